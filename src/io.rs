//! The external collaborators a [crate::Channel] depends on but does not
//! implement: the FPGA memory-mapped sample interface and the timer
//! service (see SPEC_FULL.md §1/§6 — both are owned by the process
//! bring-up code, out of scope here).

/// Physical-memory access to the FPGA's status register and sample BRAM.
/// An implementation wraps whatever OS mechanism maps `/dev/mem` or
/// equivalent; this crate ships none.
pub trait MemoryDriver {
    /// Error type surfaced by a failed read; the core treats any error
    /// identically to "no fresh samples" (SPEC_FULL.md §7).
    type Error: core::fmt::Debug;

    /// Reads the 32-bit status register at `addr`.
    fn mem_read(&mut self, addr: u64) -> Result<u32, Self::Error>;

    /// Reads `buf.len()` consecutive 32-bit words starting at `addr`.
    fn mem_read_words(&mut self, addr: u64, buf: &mut [u32]) -> Result<(), Self::Error>;
}

/// Blocking delay, abstracting the timer service a [crate::Channel]'s
/// worker suspends on between polls.
pub trait Sleeper {
    /// Blocks the calling thread for at least `ms` milliseconds.
    fn sleep_ms(&self, ms: u64);
}

/// [Sleeper] backed by [std::thread::sleep].
#[cfg(feature = "std")]
#[derive(Debug, Default, Clone, Copy)]
pub struct StdSleeper;

#[cfg(feature = "std")]
impl Sleeper for StdSleeper {
    fn sleep_ms(&self, ms: u64) {
        std::thread::sleep(std::time::Duration::from_millis(ms));
    }
}

#[cfg(all(test, feature = "std"))]
mod test {
    use super::*;

    #[test]
    fn std_sleeper_sleeps_at_least_requested() {
        let sleeper = StdSleeper;
        let start = std::time::Instant::now();
        sleeper.sleep_ms(5);
        assert!(start.elapsed().as_millis() >= 5);
    }
}
