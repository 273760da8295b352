//! Per-PRN ephemeris: subframe 1-3 and subframe-4-page-18 decode, plus the
//! Kepler solver and WGS-84 position/clock-correction equations.
//!
//! Scale factors and byte offsets are grounded on the reference firmware's
//! `ephemeris.cpp` (`Subframe1/2/3`, `LoadPage18`, `EccentricAnomaly`,
//! `GetXYZ`, `GetClockCorrection`), cross-checked against the independent
//! `P2_n`-constant decoder in the retrieved example pack.

#[cfg(feature = "log")]
use log::debug;

use crate::bytes::ByteUnpacker;
use crate::{F_REL, MU, OMEGA_E, PI};

/// Decoded GPS/QZSS ephemeris for one PRN.
///
/// Zero-valued on construction, which makes [EphemerisRecord::valid]
/// `false` until all of subframes 1, 2 and 3 have been parsed for the same
/// issue-of-data epoch.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct EphemerisRecord {
    /// Time-of-week of the most recent subframe's HOW word, truncated to
    /// the 17-bit storage the firmware this is grounded on uses — not the
    /// ICD's full 19-bit TOW-at-next-epoch count. Preserved intentionally
    /// (SPEC_FULL.md §9), not widened.
    pub tow: u32,

    // --- subframe 1 ---
    pub week: u16,
    pub iodc: u16,
    pub t_oc: u32,
    pub t_gd: f64,
    pub a_f: [f64; 3],

    // --- subframe 2 ---
    pub iode2: u8,
    pub t_oe: u32,
    pub c_rs: f64,
    pub dn: f64,
    pub m0: f64,
    pub c_uc: f64,
    pub e: f64,
    pub c_us: f64,
    pub sqrt_a: f64,

    // --- subframe 3 ---
    pub iode3: u8,
    pub c_ic: f64,
    pub omega0: f64,
    pub c_is: f64,
    pub i0: f64,
    pub c_rc: f64,
    pub omega: f64,
    pub omega_dot: f64,
    pub idot: f64,

    // --- subframe 4, page 18 (ionospheric/UTC) ---
    pub alpha: [f64; 4],
    pub beta: [f64; 4],
}

impl EphemerisRecord {
    /// Parses a parity-validated, polarity-corrected 300-bit subframe.
    ///
    /// Repacks the ten 30-bit words' leading 24 (data) bits, MSB-first,
    /// into `nav[0..30]` (the trailing 6 parity bits per word are
    /// discarded — they've already done their job in [crate::parity]),
    /// reads `tow` and the subframe id, and dispatches to the matching
    /// decoder.
    pub fn subframe(&mut self, buf: &[u8; 300]) {
        let id = (buf[49] << 2) + (buf[50] << 1) + buf[51];

        let mut nav = [0u8; 30];
        for word in 0..10 {
            let base = word * 30;
            for byte in 0..3 {
                let mut value = 0u8;
                for bit in 0..8 {
                    value = (value << 1) | buf[base + byte * 8 + bit];
                }
                nav[word * 3 + byte] = value;
            }
        }

        self.tow = ByteUnpacker::new(&nav[3..6]).u(17);

        match id {
            1 => self.subframe1(&nav),
            2 => self.subframe2(&nav),
            3 => self.subframe3(&nav),
            4 if ByteUnpacker::new(&nav[6..7]).u(8) == 0x78 => self.load_page18(&nav),
            _ => {}
        }

        #[cfg(feature = "log")]
        debug!("subframe {id} decoded, tow={}", self.tow);
    }

    fn subframe1(&mut self, nav: &[u8; 30]) {
        self.week = ByteUnpacker::new(&nav[6..8]).u(10) as u16;
        self.t_gd = 2f64.powi(-31) * ByteUnpacker::new(&nav[20..21]).s(8) as f64;
        self.iodc = ByteUnpacker::new(&nav[21..22]).u(8) as u16;
        self.t_oc = 16 * ByteUnpacker::new(&nav[22..24]).u(16);
        self.a_f[2] = 2f64.powi(-55) * ByteUnpacker::new(&nav[24..25]).s(8) as f64;
        self.a_f[1] = 2f64.powi(-43) * ByteUnpacker::new(&nav[25..27]).s(16) as f64;
        self.a_f[0] = 2f64.powi(-31) * ByteUnpacker::new(&nav[27..30]).s(22) as f64;
    }

    fn subframe2(&mut self, nav: &[u8; 30]) {
        self.iode2 = ByteUnpacker::new(&nav[6..7]).u(8) as u8;
        self.c_rs = 2f64.powi(-5) * ByteUnpacker::new(&nav[7..9]).s(16) as f64;
        self.dn = 2f64.powi(-43) * ByteUnpacker::new(&nav[9..11]).s(16) as f64 * PI;
        self.m0 = 2f64.powi(-31) * ByteUnpacker::new(&nav[11..15]).s(32) as f64 * PI;
        self.c_uc = 2f64.powi(-29) * ByteUnpacker::new(&nav[15..17]).s(16) as f64;
        self.e = 2f64.powi(-33) * ByteUnpacker::new(&nav[17..21]).u(32) as f64;
        self.c_us = 2f64.powi(-29) * ByteUnpacker::new(&nav[21..23]).s(16) as f64;
        self.sqrt_a = 2f64.powi(-19) * ByteUnpacker::new(&nav[23..27]).u(32) as f64;
        self.t_oe = 16 * ByteUnpacker::new(&nav[27..29]).u(16);
    }

    fn subframe3(&mut self, nav: &[u8; 30]) {
        self.c_ic = 2f64.powi(-29) * ByteUnpacker::new(&nav[6..8]).s(16) as f64;
        self.omega0 = 2f64.powi(-31) * ByteUnpacker::new(&nav[8..12]).s(32) as f64 * PI;
        self.c_is = 2f64.powi(-29) * ByteUnpacker::new(&nav[12..14]).s(16) as f64;
        self.i0 = 2f64.powi(-31) * ByteUnpacker::new(&nav[14..18]).s(32) as f64 * PI;
        self.c_rc = 2f64.powi(-5) * ByteUnpacker::new(&nav[18..20]).s(16) as f64;
        self.omega = 2f64.powi(-31) * ByteUnpacker::new(&nav[20..24]).s(32) as f64 * PI;
        self.omega_dot = 2f64.powi(-43) * ByteUnpacker::new(&nav[24..27]).s(24) as f64 * PI;
        self.iode3 = ByteUnpacker::new(&nav[27..28]).u(8) as u8;
        self.idot = 2f64.powi(-43) * ByteUnpacker::new(&nav[28..30]).s(14) as f64 * PI;
    }

    fn load_page18(&mut self, nav: &[u8; 30]) {
        self.alpha[0] = 2f64.powi(-30) * ByteUnpacker::new(&nav[7..8]).s(8) as f64;
        self.alpha[1] = 2f64.powi(-27) * ByteUnpacker::new(&nav[8..9]).s(8) as f64;
        self.alpha[2] = 2f64.powi(-24) * ByteUnpacker::new(&nav[9..10]).s(8) as f64;
        self.alpha[3] = 2f64.powi(-24) * ByteUnpacker::new(&nav[10..11]).s(8) as f64;
        self.beta[0] = 2f64.powi(11) * ByteUnpacker::new(&nav[11..12]).s(8) as f64;
        self.beta[1] = 2f64.powi(14) * ByteUnpacker::new(&nav[12..13]).s(8) as f64;
        self.beta[2] = 2f64.powi(16) * ByteUnpacker::new(&nav[13..14]).s(8) as f64;
        self.beta[3] = 2f64.powi(16) * ByteUnpacker::new(&nav[14..15]).s(8) as f64;
    }

    /// Semi-major axis, `sqrt_a^2`. Recomputed on demand rather than cached
    /// (the firmware this is grounded on caches it as a side effect of
    /// [EphemerisRecord::eccentric_anomaly]; this rewrite drops that
    /// redundant mutable field, per DESIGN.md).
    pub fn semi_major_axis(&self) -> f64 {
        self.sqrt_a * self.sqrt_a
    }

    /// Solves Kepler's equation `E = M + e*sin(E)` by fixed-point
    /// iteration, starting from `E = M`, converging for any `|e| < 1`.
    pub fn eccentric_anomaly(&self, t_k: f64) -> f64 {
        let a = self.semi_major_axis();
        let n0 = (MU / (a * a * a)).sqrt();
        let n = n0 + self.dn;
        let m_k = self.m0 + n * t_k;

        let mut e_k = m_k;
        loop {
            let prev = e_k;
            e_k = m_k + self.e * prev.sin();
            if (e_k - prev).abs() < 1e-10 {
                break;
            }
        }
        e_k
    }

    /// Satellite position in ECEF metres at time `t` (GPS seconds of week).
    pub fn get_xyz(&self, t: f64) -> (f64, f64, f64) {
        let t_k = Self::time_from_epoch(t, self.t_oe as f64);
        let e_k = self.eccentric_anomaly(t_k);
        let a = self.semi_major_axis();

        let v_k = ((1.0 - self.e * self.e).sqrt() * e_k.sin()).atan2(e_k.cos() - self.e);
        let aol = v_k + self.omega;

        let du_k = self.c_us * (2.0 * aol).sin() + self.c_uc * (2.0 * aol).cos();
        let dr_k = self.c_rs * (2.0 * aol).sin() + self.c_rc * (2.0 * aol).cos();
        let di_k = self.c_is * (2.0 * aol).sin() + self.c_ic * (2.0 * aol).cos();

        let u_k = aol + du_k;
        let r_k = a * (1.0 - self.e * e_k.cos()) + dr_k;
        let i_k = self.i0 + di_k + self.idot * t_k;

        let x_kp = r_k * u_k.cos();
        let y_kp = r_k * u_k.sin();

        let omega_k =
            self.omega0 + (self.omega_dot - OMEGA_E) * t_k - OMEGA_E * self.t_oe as f64;

        let x = x_kp * omega_k.cos() - y_kp * i_k.cos() * omega_k.sin();
        let y = x_kp * omega_k.sin() + y_kp * i_k.cos() * omega_k.cos();
        let z = y_kp * i_k.sin();

        (x, y, z)
    }

    /// SV clock correction in seconds at time `t` (GPS seconds of week).
    pub fn get_clock_correction(&self, t: f64) -> f64 {
        let t_k = Self::time_from_epoch(t, self.t_oe as f64);
        let e_k = self.eccentric_anomaly(t_k);
        let t_r = F_REL * self.e * self.sqrt_a * e_k.sin();

        let t_c = Self::time_from_epoch(t, self.t_oc as f64);
        self.a_f[0] + self.a_f[1] * t_c + self.a_f[2] * t_c.powi(2) + t_r - self.t_gd
    }

    /// Reduces `t - t_ref` to the `(-302400, 302400]` seconds-of-week window.
    pub fn time_from_epoch(t: f64, t_ref: f64) -> f64 {
        let mut d = t - t_ref;
        if d > 302400.0 {
            d -= 604800.0;
        } else if d < -302400.0 {
            d += 604800.0;
        }
        d
    }

    /// A record is valid once subframes 1, 2 and 3 agree on the same
    /// issue-of-data epoch.
    pub fn valid(&self) -> bool {
        self.iodc != 0 && self.iodc == self.iode2 as u16 && self.iodc == self.iode3 as u16
    }
}
