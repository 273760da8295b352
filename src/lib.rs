#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

/*
 * gps-l1ca-nav is part of the NAV-Solutions framework.
 *
 * Authors: Guillaume W. Bres <guillaume.bressaix@gmail.com> et al.
 * (cf. https://github.com/nav-solutions/gps-l1ca-nav/graphs/contributors)
 *
 * This framework is shipped under Mozilla Public V2 license.
 */

mod bytes;
mod channel;
mod ephemeris;
mod errors;
mod io;
mod parity;

#[cfg(feature = "std")]
mod pool;

pub use bytes::ByteUnpacker;
pub use channel::{BitSyncThresholds, Channel, ChannelIo};
pub use ephemeris::EphemerisRecord;
pub use errors::Error;
pub use io::{MemoryDriver, Sleeper};

#[cfg(feature = "std")]
pub use io::StdSleeper;

#[cfg(feature = "std")]
pub use pool::ChannelPool;

/// Number of hardware channels a [ChannelPool] drives in parallel.
pub const NUM_CHANS: usize = 12;

/// Number of GPS/QZSS PRNs an [EphemerisRecord] table is sized for.
pub const NUM_SATS: usize = 32;

/// Earth's gravitational constant, m^3/s^2 (WGS-84).
pub const MU: f64 = 3.986005e14;

/// Earth's rotation rate, rad/s (WGS-84).
pub const OMEGA_E: f64 = 7.2921151467e-5;

/// Speed of light, m/s.
pub const SPEED_OF_LIGHT: f64 = 2.99792458e8;

/// Relativistic clock correction constant, s/m^(1/2).
pub const F_REL: f64 = -4.442807633e-10;

/// π as specified by the ICD (not [std::f64::consts::PI]; differs in the
/// last few bits, and the constant below is the one the scale factors in
/// `ephemeris.rs` are defined against).
pub const PI: f64 = 3.1415926535898;

/// Sample bits delivered per FPGA buffer, at 1 kHz: one second of samples.
pub const RECV_MS: usize = 1000;

/// Bits in one GPS L1 C/A subframe (10 words x 30 bits).
pub const NAV_FRAME: usize = 300;

/// Polling period of a [Channel](crate::Channel)'s worker loop, in ms.
pub const POLL_MS: u64 = 250;

/// Consecutive polls without a cleanly parsed subframe before a worker
/// gives up on its assigned PRN (≈20s at [POLL_MS]).
pub const WATCHDOG_TICKS: u32 = 80;

#[cfg(test)]
pub(crate) fn init_logger() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder()
            .is_test(true)
            .filter_level(log::LevelFilter::Trace)
            .try_init();
    });
}
