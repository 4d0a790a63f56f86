//! Server side of a named channel.

use std::time::Duration;

use tracing::{debug, instrument};

use super::direction::{Buffering, DEFAULT_BUFFER_SIZE, Direction};
use super::naming::unique_name;
use super::stream::ChannelStream;
use crate::error::ChannelError;

/// Creates pipe instances under a fixed name and waits for clients.
///
/// The OS object is only created by [`PipeServer::accept`]; constructing a
/// `PipeServer` just validates and records the configuration. Every `accept`
/// creates a fresh instance, so any number of clients can be served one after
/// another (or concurrently, one instance each).
///
/// # Example
///
/// ```no_run
/// # #[cfg(windows)]
/// # fn example() -> Result<(), sandboxie_bridge::ChannelError> {
/// use std::io::Read;
/// use sandboxie_bridge::pipe::PipeServer;
///
/// let server = PipeServer::temporary(r"\\.\pipe\example", true, false)?;
/// let mut stream = server.accept(false)?;
/// let mut buf = Vec::new();
/// stream.read_to_end(&mut buf).ok();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PipeServer {
    name: String,
    direction: Direction,
    buffering: Buffering,
    buffer_size: u32,
    default_client_wait_timeout: Duration,
}

impl PipeServer {
    /// Configures a server for `name` (`\\.\pipe\<pipename>`).
    ///
    /// `inbound` makes the server side readable, `outbound` writable.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::InvalidConfiguration` if both flags are false.
    pub fn new(name: impl Into<String>, inbound: bool, outbound: bool) -> Result<Self, ChannelError> {
        let direction = Direction::from_flags(inbound, outbound)?;
        Ok(Self::with_direction(name, direction))
    }

    /// Configures a server with an explicit direction.
    #[must_use]
    pub fn with_direction(name: impl Into<String>, direction: Direction) -> Self {
        Self {
            name: name.into(),
            direction,
            buffering: Buffering::Default,
            buffer_size: DEFAULT_BUFFER_SIZE as u32,
            default_client_wait_timeout: Duration::ZERO,
        }
    }

    /// Configures a server under a freshly generated name starting with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::InvalidConfiguration` if both flags are false.
    pub fn temporary(prefix: &str, inbound: bool, outbound: bool) -> Result<Self, ChannelError> {
        Self::new(unique_name(prefix), inbound, outbound)
    }

    /// Sets user-space buffering of accepted streams.
    #[must_use]
    pub fn with_buffering(mut self, buffering: Buffering) -> Self {
        self.buffering = buffering;
        self
    }

    /// Sets the OS pipe buffer size (both directions) in bytes.
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: u32) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Sets the connect timeout suggested to clients.
    ///
    /// Zero leaves the OS default (50 ms). Clients may ignore the suggestion.
    #[must_use]
    pub fn with_default_client_wait_timeout(mut self, timeout: Duration) -> Self {
        self.default_client_wait_timeout = timeout;
        self
    }

    /// Pipe name in `\\.\pipe\<pipename>` form.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direction of the server-side endpoint.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub fn buffering(&self) -> Buffering {
        self.buffering
    }

    #[must_use]
    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    #[must_use]
    pub fn default_client_wait_timeout(&self) -> Duration {
        self.default_client_wait_timeout
    }
}

#[cfg(windows)]
#[allow(unsafe_code)]
impl PipeServer {
    /// Creates a new pipe instance and wraps it as a stream.
    ///
    /// With `skip_wait` false this blocks until a client connects; the instance is
    /// closed if that wait fails. With `skip_wait` true it returns immediately and
    /// the caller must call [`PipeServer::wait_for_connection`] before using the stream.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Io` if the instance cannot be created, or any error
    /// of [`PipeServer::wait_for_connection`].
    #[instrument(skip(self), fields(name = %self.name, direction = %self.direction))]
    pub fn accept(&self, skip_wait: bool) -> Result<ChannelStream, ChannelError> {
        use std::io;
        use std::os::windows::io::{FromRawHandle, OwnedHandle, RawHandle};
        use std::ptr;

        use winapi::um::handleapi::INVALID_HANDLE_VALUE;
        use winapi::um::namedpipeapi::CreateNamedPipeW;
        use winapi::um::winbase::{
            PIPE_ACCESS_DUPLEX, PIPE_ACCESS_INBOUND, PIPE_ACCESS_OUTBOUND, PIPE_READMODE_BYTE,
            PIPE_TYPE_BYTE, PIPE_UNLIMITED_INSTANCES, PIPE_WAIT,
        };

        let open_mode = match self.direction {
            Direction::Duplex => PIPE_ACCESS_DUPLEX,
            Direction::Inbound => PIPE_ACCESS_INBOUND,
            Direction::Outbound => PIPE_ACCESS_OUTBOUND,
        };
        let timeout_ms =
            u32::try_from(self.default_client_wait_timeout.as_millis()).unwrap_or(u32::MAX);
        let wide = super::naming::to_wide(&self.name);

        // SAFETY: `wide` is NUL-terminated and outlives the call; null security
        // attributes select the default descriptor.
        let raw = unsafe {
            CreateNamedPipeW(
                wide.as_ptr(),
                open_mode,
                PIPE_TYPE_BYTE | PIPE_READMODE_BYTE | PIPE_WAIT,
                PIPE_UNLIMITED_INSTANCES,
                self.buffer_size,
                self.buffer_size,
                timeout_ms,
                ptr::null_mut(),
            )
        };
        if raw == INVALID_HANDLE_VALUE {
            return Err(ChannelError::io(
                format!("failed to create pipe {}", self.name),
                io::Error::last_os_error(),
            ));
        }

        // SAFETY: `raw` is a valid handle that nothing else owns.
        let handle = unsafe { OwnedHandle::from_raw_handle(raw as RawHandle) };
        let stream = ChannelStream::from_handle(&self.name, handle, self.direction, self.buffering)?;
        debug!("Pipe instance created");

        if !skip_wait {
            // Dropping `stream` on failure closes the instance.
            self.wait_for_connection(&stream)?;
        }

        Ok(stream)
    }

    /// Blocks until a client has connected to the instance behind `stream`.
    ///
    /// Returns immediately if the client connected before this call.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::BrokenChannel` if the client connected and closed
    /// again before any data was exchanged, `ChannelError::Cancelled` if
    /// [`cancel_blocking_wait`] aborted the wait, `ChannelError::Io` otherwise.
    #[instrument(skip(self, stream), fields(name = %self.name))]
    pub fn wait_for_connection(&self, stream: &ChannelStream) -> Result<(), ChannelError> {
        use std::io;
        use std::os::windows::io::AsRawHandle;
        use std::ptr;

        use winapi::shared::winerror::{ERROR_NO_DATA, ERROR_OPERATION_ABORTED, ERROR_PIPE_CONNECTED};
        use winapi::um::namedpipeapi::ConnectNamedPipe;
        use winapi::um::winnt::HANDLE;

        let raw = stream.file().as_raw_handle() as HANDLE;

        // SAFETY: the handle stays open for as long as `stream` is borrowed and
        // was not opened for overlapped I/O.
        let connected = unsafe { ConnectNamedPipe(raw, ptr::null_mut()) };
        if connected != 0 {
            debug!("Client connected");
            return Ok(());
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error().map(|code| code as u32) {
            Some(ERROR_PIPE_CONNECTED) => {
                debug!("Client was already connected");
                Ok(())
            }
            Some(ERROR_NO_DATA) => Err(ChannelError::BrokenChannel {
                name: self.name.clone(),
                source: Some(err),
            }),
            Some(ERROR_OPERATION_ABORTED) => Err(ChannelError::Cancelled {
                name: self.name.clone(),
            }),
            _ => Err(ChannelError::io(
                format!("failed waiting for a client on {}", self.name),
                err,
            )),
        }
    }
}

/// Aborts a [`PipeServer::wait_for_connection`] that `thread` is blocked in.
///
/// Does nothing if the thread is not inside a blocking call right now; callers
/// that race with the thread should retry. Returns `true` if a call was aborted.
#[cfg(windows)]
#[allow(unsafe_code)]
pub(crate) fn cancel_blocking_wait(thread: &impl std::os::windows::io::AsRawHandle) -> bool {
    use winapi::um::ioapiset::CancelSynchronousIo;
    use winapi::um::winnt::HANDLE;

    // SAFETY: the handle belongs to a live `JoinHandle` borrowed for the call.
    unsafe { CancelSynchronousIo(thread.as_raw_handle() as HANDLE) != 0 }
}
