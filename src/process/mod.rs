//! Processes whose standard streams are carried over named channels.
//!
//! [`Handshake`] plans and creates the three host-side channels, [`PipedProcess`]
//! owns the launched process together with its connected streams.

mod handshake;
mod piped;

#[cfg(windows)]
pub use handshake::PendingHandshake;
pub use handshake::{Handshake, StdioChannels};
pub use piped::PipedProcess;

use std::process::ExitStatus;

/// Numeric exit code of a finished process.
///
/// Processes killed by a signal report the negated signal number.
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }

    status.code().unwrap_or(-1)
}
