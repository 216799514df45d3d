//! Driver errors.

use crate::channel::ChannelState;

/// Errors produced by the capture driver.
///
/// The first three variants are fatal at start-up: without register
/// access or firmware memory there is no capture to run, and callers
/// are expected to terminate rather than retry. Nothing in this driver
/// retries on its own.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Mapping a peripheral register range into the process failed.
    #[error("mapping peripheral registers at {phys:#010x} failed: {source}")]
    RegisterMap {
        /// Physical address of the range that failed to map.
        phys: u32,
        /// The underlying `open` or `mmap` failure.
        source: std::io::Error,
    },
    /// The firmware mailbox could not be opened or refused a request.
    #[error("firmware mailbox unavailable: {0}")]
    MailboxUnavailable(#[source] std::io::Error),
    /// The firmware returned a zero bus address, or the granted pages
    /// could not be mapped.
    #[error("firmware allocation of {size} bytes failed")]
    Allocation {
        /// The page-rounded size of the failed request.
        size: usize,
    },
    /// A capture request that can never run. Rejected before any
    /// hardware or firmware resource is touched.
    #[error("invalid capture configuration: {0}")]
    InvalidConfiguration(&'static str),
    /// A channel lifecycle call arrived in the wrong state. This is a
    /// contract violation on the caller's side, surfaced rather than
    /// absorbed.
    #[error("invalid channel state {found:?} (expected {expected:?})")]
    InvalidState {
        /// The state the call is valid from.
        expected: ChannelState,
        /// The state the channel was actually in.
        found: ChannelState,
    },
}
