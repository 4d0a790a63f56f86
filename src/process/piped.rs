//! Host-side handle to a process whose standard streams run over named channels.

use std::process::Child;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, trace, warn};

use super::exit_code;
use crate::error::{ChannelError, SandboxError};
use crate::pipe::ChannelStream;

/// Poll interval while waiting with a timeout.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What ended the handle's managed lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReleaseCause {
    /// Normal end of scope: streams are closed, then the launcher is awaited.
    Completed,
    /// The controlling thread was interrupted: streams are closed, the wait is skipped.
    Interrupted,
}

/// A launched process with piped stdin/stdout/stderr, similar to a child
/// spawned with `Stdio::piped()`.
///
/// The process handle is the *launcher*, which waits for the real command and
/// exits with its exit code. Releasing the handle (via [`PipedProcess::close`],
/// [`PipedProcess::interrupt`] or drop) closes stdout, then stderr, then stdin,
/// and then waits for the launcher unless interrupted.
///
/// # Example
///
/// ```no_run
/// # fn example(mut process: sandboxie_bridge::process::PipedProcess) -> Result<(), Box<dyn std::error::Error>> {
/// use std::io::{Read, Write};
///
/// if let Some(mut stdin) = process.take_stdin() {
///     stdin.write_all(b"cd\nexit\n")?;
///     stdin.close()?;
/// }
///
/// let mut output = String::new();
/// if let Some(stdout) = process.stdout() {
///     stdout.read_to_string(&mut output)?;
/// }
///
/// let code = process.close()?;
/// println!("exit code {code}: {output}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct PipedProcess {
    launcher: Child,
    stdin: Option<ChannelStream>,
    stdout: Option<ChannelStream>,
    stderr: Option<ChannelStream>,
    returncode: Option<i32>,
    released: bool,
}

impl PipedProcess {
    /// Takes ownership of the launcher and the connected streams.
    #[must_use]
    pub fn new(
        launcher: Child,
        stdin: Option<ChannelStream>,
        stdout: Option<ChannelStream>,
        stderr: Option<ChannelStream>,
    ) -> Self {
        Self {
            launcher,
            stdin,
            stdout,
            stderr,
            returncode: None,
            released: false,
        }
    }

    /// OS process ID of the launcher.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.launcher.id()
    }

    pub fn stdin(&mut self) -> Option<&mut ChannelStream> {
        self.stdin.as_mut()
    }

    pub fn stdout(&mut self) -> Option<&mut ChannelStream> {
        self.stdout.as_mut()
    }

    pub fn stderr(&mut self) -> Option<&mut ChannelStream> {
        self.stderr.as_mut()
    }

    /// Takes the stdin stream out of the handle, e.g. to close it early.
    pub fn take_stdin(&mut self) -> Option<ChannelStream> {
        self.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChannelStream> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChannelStream> {
        self.stderr.take()
    }

    /// Exit code of the launcher, i.e. of the real command.
    ///
    /// `None` until a [`PipedProcess::wait`] has completed.
    #[must_use]
    pub fn returncode(&self) -> Option<i32> {
        self.returncode
    }

    /// Waits for the launcher to exit, at most `timeout` if given.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::WaitTimeout` if the timeout elapsed first, or
    /// `SandboxError::WaitFailed` if the OS wait failed.
    #[instrument(skip(self), fields(pid = self.launcher.id()))]
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<i32, SandboxError> {
        if let Some(code) = self.returncode {
            return Ok(code);
        }

        let status = match timeout {
            None => self.launcher.wait().map_err(SandboxError::WaitFailed)?,
            Some(timeout) => {
                let start = Instant::now();
                loop {
                    match self.launcher.try_wait().map_err(SandboxError::WaitFailed)? {
                        Some(status) => break status,
                        None => {
                            let elapsed = start.elapsed();
                            if elapsed >= timeout {
                                debug!(elapsed_ms = %elapsed.as_millis(), "Wait timed out");
                                return Err(SandboxError::WaitTimeout {
                                    timeout_ms: timeout.as_millis(),
                                });
                            }
                            thread::sleep(WAIT_POLL_INTERVAL.min(timeout - elapsed));
                        }
                    }
                }
            }
        };

        let code = exit_code(status);
        debug!(exit_code = code, "Launcher exited");
        self.returncode = Some(code);
        Ok(code)
    }

    /// Forcibly terminates the launcher.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::WaitFailed` if the OS refused.
    pub fn kill(&mut self) -> Result<(), SandboxError> {
        self.launcher.kill().map_err(SandboxError::WaitFailed)
    }

    /// Runs the scoped release and returns the exit code.
    ///
    /// # Errors
    ///
    /// Returns the first stream-close error (other than a broken stdin) or the
    /// wait error. All streams are closed regardless.
    pub fn close(mut self) -> Result<i32, SandboxError> {
        self.release(ReleaseCause::Completed)?;
        self.wait(None)
    }

    /// Runs the scoped release for an interrupted caller: streams are closed but
    /// the launcher is not awaited.
    ///
    /// # Errors
    ///
    /// Returns the first stream-close error (other than a broken stdin).
    pub fn interrupt(mut self) -> Result<(), SandboxError> {
        self.release(ReleaseCause::Interrupted)
    }

    /// Closes stdout, stderr and stdin in that order, then waits for the launcher
    /// unless `cause` is [`ReleaseCause::Interrupted`].
    ///
    /// A broken stdin is expected (the remote side may already have exited) and
    /// is ignored. Runs at most once.
    #[instrument(skip(self), fields(pid = self.launcher.id()))]
    fn release(&mut self, cause: ReleaseCause) -> Result<(), SandboxError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let mut first_error: Option<ChannelError> = None;

        for stream in [self.stdout.take(), self.stderr.take()].into_iter().flatten() {
            if let Err(e) = stream.close() {
                warn!(error = %e, "Failed to close output stream");
                first_error.get_or_insert(e);
            }
        }

        if let Some(stdin) = self.stdin.take() {
            match stdin.close() {
                Ok(()) => {}
                Err(e) if e.is_broken() => trace!("Stdin peer already gone"),
                Err(e) => {
                    warn!(error = %e, "Failed to close stdin");
                    first_error.get_or_insert(e);
                }
            }
        }

        let waited = match cause {
            ReleaseCause::Completed => self.wait(None).map(|_| ()),
            ReleaseCause::Interrupted => {
                debug!("Interrupted, not waiting for launcher");
                Ok(())
            }
        };

        match first_error {
            Some(e) => Err(e.into()),
            None => waited,
        }
    }
}

impl Drop for PipedProcess {
    fn drop(&mut self) {
        if let Err(e) = self.release(ReleaseCause::Completed) {
            warn!(error = %e, "Release of piped process failed");
        }
    }
}
