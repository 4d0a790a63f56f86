//! Channel direction and buffering modes.

use crate::error::ChannelError;

/// Data flow of a channel endpoint, seen from the side that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Readable only.
    Inbound,
    /// Writable only.
    Outbound,
    /// Readable and writable.
    Duplex,
}

impl Direction {
    /// Builds a direction from `inbound`/`outbound` flags.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::InvalidConfiguration` if both flags are false.
    pub fn from_flags(inbound: bool, outbound: bool) -> Result<Self, ChannelError> {
        match (inbound, outbound) {
            (true, true) => Ok(Self::Duplex),
            (true, false) => Ok(Self::Inbound),
            (false, true) => Ok(Self::Outbound),
            (false, false) => Err(ChannelError::InvalidConfiguration {
                reason: "invalid inbound and outbound combination".to_string(),
            }),
        }
    }

    /// The direction the peer endpoint must have.
    #[must_use]
    pub fn complement(self) -> Self {
        match self {
            Self::Inbound => Self::Outbound,
            Self::Outbound => Self::Inbound,
            Self::Duplex => Self::Duplex,
        }
    }

    /// Checks that `peer` can be paired with `self`.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::InvalidConfiguration` unless `peer` is the exact complement.
    pub fn check_pairing(self, peer: Direction) -> Result<(), ChannelError> {
        if peer == self.complement() {
            Ok(())
        } else {
            Err(ChannelError::InvalidConfiguration {
                reason: format!("{self} endpoint cannot pair with a {peer} peer"),
            })
        }
    }

    #[must_use]
    pub fn is_readable(self) -> bool {
        matches!(self, Self::Inbound | Self::Duplex)
    }

    #[must_use]
    pub fn is_writable(self) -> bool {
        matches!(self, Self::Outbound | Self::Duplex)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inbound => write!(f, "inbound"),
            Self::Outbound => write!(f, "outbound"),
            Self::Duplex => write!(f, "duplex"),
        }
    }
}

/// User-space buffering applied on top of the OS pipe.
///
/// Not to be confused with the pipe's own kernel buffer size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Buffering {
    /// Buffer with [`DEFAULT_BUFFER_SIZE`] bytes.
    #[default]
    Default,
    /// Every write goes straight to the OS.
    Unbuffered,
    /// Buffer with the given capacity in bytes.
    Capacity(usize),
}

/// Default capacity for both user-space buffers and OS pipe buffers.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

impl Buffering {
    /// Capacity to hand to `BufWriter`. Zero means pass-through.
    #[must_use]
    pub fn capacity(self) -> usize {
        match self {
            Self::Default => DEFAULT_BUFFER_SIZE,
            Self::Unbuffered => 0,
            Self::Capacity(n) => n,
        }
    }

    /// Capacity to hand to `BufReader`.
    ///
    /// Never zero: an empty `fill_buf` reads as end of stream. A read buffer
    /// only holds what the OS already delivered, so it never delays data.
    #[must_use]
    pub fn read_capacity(self) -> usize {
        match self.capacity() {
            0 => DEFAULT_BUFFER_SIZE,
            n => n,
        }
    }
}
