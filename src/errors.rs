/// Crate-wide error type.
///
/// The decode pipeline itself has no fatal error paths (see the module-level
/// docs on [crate::Channel]): transient signal-processing conditions are
/// recorded as state flags, not `Result::Err`. This type is reserved for the
/// handful of operations that can refuse outright because a caller passed a
/// value out of range.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `ch` passed to [crate::ChannelPool::start] is not `< NUM_CHANS`.
    #[error("channel index {0} out of range")]
    InvalidChannel(usize),

    /// `sv` passed to [crate::ChannelPool::start] is not in `1..=NUM_SATS`.
    #[error("PRN {0} out of range")]
    InvalidSv(u8),
}
