//! Client side of a named channel.

use std::time::Duration;

use tracing::{debug, instrument};

use super::direction::{Buffering, Direction};
use super::server::PipeServer;
use super::stream::ChannelStream;
use crate::error::ChannelError;

/// How long [`PipeClient::connect`] waits when every server instance is busy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectTimeout {
    /// Use the timeout the server suggested when it created the pipe.
    #[default]
    ServerDefault,
    /// Wait until an instance frees up.
    Forever,
    /// Wait at most this long.
    Bounded(Duration),
}

impl ConnectTimeout {
    /// Interprets a millisecond count the way the OS does: `0` selects the server
    /// default, any negative value waits forever.
    #[must_use]
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            0 => Self::ServerDefault,
            ms if ms < 0 => Self::Forever,
            ms => Self::Bounded(Duration::from_millis(ms.unsigned_abs())),
        }
    }

    /// What is left of this budget `elapsed` after the first attempt.
    ///
    /// Returns `None` once a bounded budget is spent; the other modes never run out.
    #[must_use]
    pub fn remaining(self, elapsed: Duration) -> Option<Self> {
        match self {
            Self::Bounded(budget) => budget
                .checked_sub(elapsed)
                .filter(|left| !left.is_zero())
                .map(Self::Bounded),
            other => Some(other),
        }
    }

    #[cfg(windows)]
    fn as_raw(self) -> u32 {
        use winapi::um::winbase::{NMPWAIT_USE_DEFAULT_WAIT, NMPWAIT_WAIT_FOREVER};

        match self {
            Self::ServerDefault => NMPWAIT_USE_DEFAULT_WAIT,
            Self::Forever => NMPWAIT_WAIT_FOREVER,
            // Clamp below the "forever" sentinel and above the "default" one.
            Self::Bounded(d) => u32::try_from(d.as_millis())
                .unwrap_or(NMPWAIT_WAIT_FOREVER - 1)
                .clamp(1, NMPWAIT_WAIT_FOREVER - 1),
        }
    }
}

/// Opens an existing pipe created by a [`PipeServer`].
#[derive(Debug, Clone)]
pub struct PipeClient {
    name: String,
    direction: Direction,
    buffering: Buffering,
}

impl PipeClient {
    /// Configures a client for `name`.
    ///
    /// `inbound` must equal the server's `outbound` and vice versa.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::InvalidConfiguration` if both flags are false.
    pub fn new(name: impl Into<String>, inbound: bool, outbound: bool) -> Result<Self, ChannelError> {
        let direction = Direction::from_flags(inbound, outbound)?;
        Ok(Self::with_direction(name, direction))
    }

    /// Configures a client with an explicit direction.
    #[must_use]
    pub fn with_direction(name: impl Into<String>, direction: Direction) -> Self {
        Self {
            name: name.into(),
            direction,
            buffering: Buffering::Default,
        }
    }

    /// Configures the complementary client of `server`.
    #[must_use]
    pub fn for_server(server: &PipeServer) -> Self {
        Self::with_direction(server.name(), server.direction().complement())
    }

    /// Configures a client for `server` with the given direction, checking the pairing.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::InvalidConfiguration` if `direction` is not the
    /// complement of the server's direction.
    pub fn paired(server: &PipeServer, direction: Direction) -> Result<Self, ChannelError> {
        server.direction().check_pairing(direction)?;
        Ok(Self::with_direction(server.name(), direction))
    }

    /// Sets user-space buffering of the connected stream.
    #[must_use]
    pub fn with_buffering(mut self, buffering: Buffering) -> Self {
        self.buffering = buffering;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub fn buffering(&self) -> Buffering {
        self.buffering
    }
}

#[cfg(windows)]
#[allow(unsafe_code)]
impl PipeClient {
    /// Connects to the server and wraps the connection as a stream.
    ///
    /// If the pipe exists but all of its instances are taken, waits for one to
    /// free up and retries. A bounded `timeout` covers all retries together.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Timeout` if the wait elapsed, `ChannelError::Io` for
    /// any other failure (e.g. no pipe with this name).
    #[instrument(skip(self), fields(name = %self.name, direction = %self.direction))]
    pub fn connect(&self, timeout: ConnectTimeout) -> Result<ChannelStream, ChannelError> {
        use std::io;
        use std::os::windows::io::{FromRawHandle, OwnedHandle, RawHandle};
        use std::ptr;
        use std::time::Instant;

        use winapi::shared::winerror::{ERROR_PIPE_BUSY, ERROR_SEM_TIMEOUT};
        use winapi::um::fileapi::{CreateFileW, OPEN_EXISTING};
        use winapi::um::handleapi::INVALID_HANDLE_VALUE;
        use winapi::um::namedpipeapi::WaitNamedPipeW;
        use winapi::um::winnt::{GENERIC_READ, GENERIC_WRITE};

        let access = match self.direction {
            Direction::Duplex => GENERIC_READ | GENERIC_WRITE,
            Direction::Inbound => GENERIC_READ,
            Direction::Outbound => GENERIC_WRITE,
        };
        let wide = super::naming::to_wide(&self.name);
        let started = Instant::now();

        loop {
            // SAFETY: `wide` is NUL-terminated and outlives the call; no security
            // attributes and no template handle.
            let raw = unsafe {
                CreateFileW(
                    wide.as_ptr(),
                    access,
                    0,
                    ptr::null_mut(),
                    OPEN_EXISTING,
                    0,
                    ptr::null_mut(),
                )
            };

            if raw != INVALID_HANDLE_VALUE {
                // SAFETY: `raw` is a valid handle that nothing else owns.
                let handle = unsafe { OwnedHandle::from_raw_handle(raw as RawHandle) };
                debug!("Connected to pipe");
                return ChannelStream::from_handle(&self.name, handle, self.direction, self.buffering);
            }

            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(ERROR_PIPE_BUSY as i32) {
                return Err(ChannelError::io(
                    format!("failed to open pipe {}", self.name),
                    err,
                ));
            }

            let Some(wait) = timeout.remaining(started.elapsed()) else {
                return Err(ChannelError::Timeout {
                    name: self.name.clone(),
                });
            };
            debug!(?wait, "All pipe instances busy, waiting");

            // SAFETY: `wide` is NUL-terminated and outlives the call.
            let ready = unsafe { WaitNamedPipeW(wide.as_ptr(), wait.as_raw()) };
            if ready == 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(ERROR_SEM_TIMEOUT as i32) {
                    return Err(ChannelError::Timeout {
                        name: self.name.clone(),
                    });
                }
                return Err(ChannelError::io(
                    format!("failed waiting for pipe {}", self.name),
                    err,
                ));
            }
        }
    }
}
