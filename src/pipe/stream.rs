//! Byte stream over a connected channel endpoint.
//!
//! Named pipes do not fit the usual file model: a vanished peer can surface as a
//! generic "invalid parameter" failure instead of a broken pipe, and the handle
//! has no position. [`ChannelStream`] normalizes both, so callers can use plain
//! `Read`/`Write` and match on `ErrorKind::BrokenPipe`.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::process::Stdio;

use tracing::trace;

use super::direction::{Buffering, Direction};
use crate::error::ChannelError;

#[derive(Debug)]
enum Inner {
    Read(BufReader<File>),
    Write(BufWriter<File>),
    Duplex(BufReader<File>, BufWriter<File>),
}

/// A connected (or connecting) channel endpoint exposed as a sequential byte stream.
///
/// The stream exclusively owns its OS handle; dropping it closes the handle
/// after a best-effort flush. Use [`ChannelStream::close`] to observe flush errors.
#[derive(Debug)]
pub struct ChannelStream {
    name: String,
    direction: Direction,
    inner: Inner,
}

/// Returns true for the error conditions a named pipe reports when the peer is gone.
fn is_broken_pipe(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::BrokenPipe {
        return true;
    }

    #[cfg(windows)]
    {
        use winapi::shared::winerror::{
            ERROR_BROKEN_PIPE, ERROR_INVALID_PARAMETER, ERROR_NO_DATA, ERROR_PIPE_NOT_CONNECTED,
        };
        matches!(
            err.raw_os_error().map(|code| code as u32),
            Some(ERROR_INVALID_PARAMETER | ERROR_BROKEN_PIPE | ERROR_NO_DATA | ERROR_PIPE_NOT_CONNECTED)
        )
    }

    #[cfg(not(windows))]
    {
        false
    }
}

/// Maps a failure on channel `name` into the channel error taxonomy.
fn classify(name: &str, err: io::Error) -> ChannelError {
    if is_broken_pipe(&err) {
        ChannelError::BrokenChannel {
            name: name.to_string(),
            source: Some(err),
        }
    } else {
        ChannelError::from_io(name, err)
    }
}

/// Like [`classify`], but stays an `io::Error` and leaves non-pipe errors untouched.
fn translate(name: &str, err: io::Error) -> io::Error {
    if is_broken_pipe(&err) {
        classify(name, err).into()
    } else {
        err
    }
}

fn unsupported(operation: &'static str) -> io::Error {
    ChannelError::Unsupported { operation }.into()
}

impl ChannelStream {
    /// Wraps an already-open file object as a channel stream.
    ///
    /// Duplex streams duplicate the handle so reads and writes buffer independently.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Io` if the handle cannot be duplicated. `file` is
    /// closed in that case.
    pub fn from_file(
        name: impl Into<String>,
        file: File,
        direction: Direction,
        buffering: Buffering,
    ) -> Result<Self, ChannelError> {
        let name = name.into();
        let capacity = buffering.capacity();
        let read_capacity = buffering.read_capacity();
        let inner = match direction {
            Direction::Inbound => Inner::Read(BufReader::with_capacity(read_capacity, file)),
            Direction::Outbound => Inner::Write(BufWriter::with_capacity(capacity, file)),
            Direction::Duplex => {
                let writer = file
                    .try_clone()
                    .map_err(|e| ChannelError::io(format!("failed to duplicate {name}"), e))?;
                Inner::Duplex(
                    BufReader::with_capacity(read_capacity, file),
                    BufWriter::with_capacity(capacity, writer),
                )
            }
        };

        trace!(%name, %direction, capacity, "Wrapped channel handle");
        Ok(Self {
            name,
            direction,
            inner,
        })
    }

    /// Takes ownership of a raw pipe handle.
    #[cfg(windows)]
    pub(crate) fn from_handle(
        name: impl Into<String>,
        handle: std::os::windows::io::OwnedHandle,
        direction: Direction,
        buffering: Buffering,
    ) -> Result<Self, ChannelError> {
        Self::from_file(name, File::from(handle), direction, buffering)
    }

    /// Name of the channel this stream is attached to.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direction of this endpoint.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Channels are strictly sequential.
    #[must_use]
    pub fn is_seekable(&self) -> bool {
        false
    }

    /// Always fails: a channel has no position.
    ///
    /// # Errors
    ///
    /// Always returns `ChannelError::Unsupported`.
    pub fn tell(&self) -> Result<u64, ChannelError> {
        Err(ChannelError::Unsupported { operation: "tell" })
    }

    /// Always fails: a channel cannot be truncated.
    ///
    /// # Errors
    ///
    /// Always returns `ChannelError::Unsupported`.
    pub fn truncate(&mut self, _len: u64) -> Result<(), ChannelError> {
        Err(ChannelError::Unsupported {
            operation: "truncate",
        })
    }

    /// The underlying OS file object.
    pub(crate) fn file(&self) -> &File {
        match &self.inner {
            Inner::Read(r) | Inner::Duplex(r, _) => r.get_ref(),
            Inner::Write(w) => w.get_ref(),
        }
    }

    fn translate(&self, err: io::Error) -> io::Error {
        translate(&self.name, err)
    }

    /// Flushes pending writes and closes the handle.
    ///
    /// The handle is closed even when the flush fails; unflushed data is discarded.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::BrokenChannel` if the peer is gone, or
    /// `ChannelError::Io` for other flush failures.
    pub fn close(self) -> Result<(), ChannelError> {
        trace!(name = %self.name, "Closing channel stream");
        let writer = match self.inner {
            Inner::Read(_) => None,
            Inner::Write(w) => Some(w),
            Inner::Duplex(_, w) => Some(w),
        };

        let Some(mut writer) = writer else {
            return Ok(());
        };

        let flushed = writer.flush();
        let (file, _) = writer.into_parts();
        drop(file);

        flushed.map_err(|e| classify(&self.name, e))
    }

    /// Flushes pending writes and hands the handle over as a child process stdio.
    ///
    /// # Errors
    ///
    /// Returns the classified flush error; the handle is closed in that case.
    pub fn into_stdio(self) -> Result<Stdio, ChannelError> {
        let file = match self.inner {
            Inner::Read(r) => r.into_inner(),
            Inner::Write(mut w) | Inner::Duplex(_, mut w) => {
                if let Err(e) = w.flush() {
                    return Err(classify(&self.name, e));
                }
                w.into_parts().0
            }
        };
        Ok(Stdio::from(file))
    }
}

impl Read for ChannelStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = match &mut self.inner {
            Inner::Read(r) | Inner::Duplex(r, _) => r.read(buf),
            Inner::Write(_) => return Err(unsupported("read on an outbound channel")),
        };
        result.map_err(|e| self.translate(e))
    }
}

impl BufRead for ChannelStream {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        let name = &self.name;
        match &mut self.inner {
            Inner::Read(r) | Inner::Duplex(r, _) => r.fill_buf().map_err(|e| translate(name, e)),
            Inner::Write(_) => Err(unsupported("read on an outbound channel")),
        }
    }

    fn consume(&mut self, amt: usize) {
        if let Inner::Read(r) | Inner::Duplex(r, _) = &mut self.inner {
            r.consume(amt);
        }
    }
}

impl Write for ChannelStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = match &mut self.inner {
            Inner::Write(w) | Inner::Duplex(_, w) => w.write(buf),
            Inner::Read(_) => return Err(unsupported("write on an inbound channel")),
        };
        result.map_err(|e| self.translate(e))
    }

    fn flush(&mut self) -> io::Result<()> {
        let result = match &mut self.inner {
            Inner::Write(w) | Inner::Duplex(_, w) => w.flush(),
            Inner::Read(_) => Ok(()),
        };
        result.map_err(|e| self.translate(e))
    }
}

impl Seek for ChannelStream {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(unsupported("seek"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_stream(direction: Direction) -> ChannelStream {
        let file = tempfile::tempfile().unwrap();
        ChannelStream::from_file("scratch", file, direction, Buffering::Default).unwrap()
    }

    #[test]
    fn test_seek_is_unsupported_in_every_direction() {
        for direction in [Direction::Inbound, Direction::Outbound, Direction::Duplex] {
            let mut stream = scratch_stream(direction);
            let err = stream.seek(SeekFrom::Start(42)).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::Unsupported);
            assert!(stream.stream_position().is_err());
            assert!(matches!(
                stream.tell(),
                Err(ChannelError::Unsupported { operation: "tell" })
            ));
            assert!(matches!(
                stream.truncate(0),
                Err(ChannelError::Unsupported { .. })
            ));
            assert!(!stream.is_seekable());
        }
    }

    #[test]
    fn test_direction_is_enforced() {
        let mut outbound = scratch_stream(Direction::Outbound);
        let mut buf = [0u8; 4];
        assert_eq!(
            outbound.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::Unsupported
        );

        let mut inbound = scratch_stream(Direction::Inbound);
        assert_eq!(
            inbound.write(b"test").unwrap_err().kind(),
            io::ErrorKind::Unsupported
        );
    }

    #[test]
    fn test_close_flushes_buffered_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        let file = File::create(&path).unwrap();

        let mut stream =
            ChannelStream::from_file("out", file, Direction::Outbound, Buffering::Default)
                .unwrap();
        stream.write_all(b"test").unwrap();
        stream.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"test");
    }

    #[cfg(unix)]
    #[test]
    fn test_unbuffered_inbound_reads_lines() {
        use std::os::fd::OwnedFd;
        use std::process::Command;

        let mut child = Command::new("sh")
            .args(["-c", "echo diagnostic; echo second"])
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let stdout = child.stdout.take().unwrap();

        let file = File::from(OwnedFd::from(stdout));
        let mut stream =
            ChannelStream::from_file("stderr", file, Direction::Inbound, Buffering::Unbuffered)
                .unwrap();

        let mut line = String::new();
        assert_eq!(stream.read_line(&mut line).unwrap(), "diagnostic\n".len());
        assert_eq!(line, "diagnostic\n");

        let rest: Vec<String> = stream.lines().map(Result::unwrap).collect();
        assert_eq!(rest, ["second"]);
        child.wait().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_write_after_peer_exit_is_broken_channel() {
        use std::os::fd::OwnedFd;
        use std::process::Command;

        let mut child = Command::new("true")
            .stdin(Stdio::piped())
            .spawn()
            .unwrap();
        let stdin = child.stdin.take().unwrap();
        child.wait().unwrap();

        let file = File::from(OwnedFd::from(stdin));
        let mut stream =
            ChannelStream::from_file("stdin", file, Direction::Outbound, Buffering::Unbuffered)
                .unwrap();

        let err = stream.write(b"test").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        let channel_err = err
            .into_inner()
            .and_then(|inner| inner.downcast::<ChannelError>().ok())
            .unwrap();
        assert!(channel_err.is_broken());
    }

    #[cfg(unix)]
    #[test]
    fn test_close_reports_broken_channel() {
        use std::os::fd::OwnedFd;
        use std::process::Command;

        let mut child = Command::new("true")
            .stdin(Stdio::piped())
            .spawn()
            .unwrap();
        let stdin = child.stdin.take().unwrap();
        child.wait().unwrap();

        let file = File::from(OwnedFd::from(stdin));
        let mut stream =
            ChannelStream::from_file("stdin", file, Direction::Outbound, Buffering::Default)
                .unwrap();

        // Buffered, so the write itself succeeds.
        stream.write_all(b"test").unwrap();
        assert!(stream.close().unwrap_err().is_broken());
    }
}
