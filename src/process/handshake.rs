//! Host side of the stdio channel handshake.
//!
//! The host creates one server instance per requested stream *before* the
//! remote process starts, passes the names to the redirector on its command
//! line, and only then waits for the redirector to connect: stdin first, then
//! stdout, then stderr. The redirector connects in the same order.

use std::time::Duration;

use crate::pipe::{Buffering, Direction, PipeServer};
use crate::redirect::RedirectArgs;

#[cfg(windows)]
use {
    crate::error::{ChannelError, SandboxError},
    crate::pipe::{ChannelStream, cancel_blocking_wait},
    crate::process::{PipedProcess, exit_code},
    std::process::Child,
    std::thread,
    tracing::{debug, instrument, warn},
};

/// How often the launcher is checked while the redirector connects.
#[cfg(windows)]
const LAUNCHER_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Which standard streams are carried over channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StdioChannels {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
}

impl StdioChannels {
    /// All three streams.
    pub const ALL: Self = Self {
        stdin: true,
        stdout: true,
        stderr: true,
    };
}

impl Default for StdioChannels {
    fn default() -> Self {
        Self::ALL
    }
}

/// Planned host-side channels for one launch.
#[derive(Debug, Clone)]
pub struct Handshake {
    stdin: Option<PipeServer>,
    stdout: Option<PipeServer>,
    stderr: Option<PipeServer>,
}

impl Handshake {
    /// Plans fresh, uniquely named channels under `prefix` for the requested streams.
    ///
    /// The host writes stdin and reads stdout/stderr; stderr is unbuffered.
    #[must_use]
    pub fn new(prefix: &str, channels: StdioChannels) -> Self {
        let server = |requested: bool, direction: Direction| {
            requested.then(|| {
                PipeServer::with_direction(crate::pipe::unique_name(prefix), direction)
            })
        };

        Self {
            stdin: server(channels.stdin, Direction::Outbound),
            stdout: server(channels.stdout, Direction::Inbound),
            stderr: server(channels.stderr, Direction::Inbound)
                .map(|s| s.with_buffering(Buffering::Unbuffered)),
        }
    }

    /// Sets the OS pipe buffer size of every planned channel.
    #[must_use]
    pub fn with_buffer_size(self, buffer_size: u32) -> Self {
        self.map_servers(|s| s.with_buffer_size(buffer_size))
    }

    /// Sets the connect timeout suggested to the redirector on every channel.
    #[must_use]
    pub fn with_client_wait_timeout(self, timeout: Duration) -> Self {
        self.map_servers(|s| s.with_default_client_wait_timeout(timeout))
    }

    fn map_servers(self, f: impl Fn(PipeServer) -> PipeServer) -> Self {
        Self {
            stdin: self.stdin.map(&f),
            stdout: self.stdout.map(&f),
            stderr: self.stderr.map(&f),
        }
    }

    #[must_use]
    pub fn stdin_server(&self) -> Option<&PipeServer> {
        self.stdin.as_ref()
    }

    #[must_use]
    pub fn stdout_server(&self) -> Option<&PipeServer> {
        self.stdout.as_ref()
    }

    #[must_use]
    pub fn stderr_server(&self) -> Option<&PipeServer> {
        self.stderr.as_ref()
    }

    /// Redirector invocation that connects to these channels and runs `command`.
    #[must_use]
    pub fn redirect_args(&self, command: Vec<String>) -> RedirectArgs {
        let name = |server: &Option<PipeServer>| server.as_ref().map(|s| s.name().to_string());
        RedirectArgs {
            stdin: name(&self.stdin),
            stdout: name(&self.stdout),
            stderr: name(&self.stderr),
            command,
            verbose: false,
        }
    }

    /// Creates all planned OS pipe instances without waiting for clients.
    ///
    /// # Errors
    ///
    /// Returns the first creation failure; instances created so far are closed.
    #[cfg(windows)]
    #[instrument(skip(self))]
    pub fn accept(self) -> Result<PendingHandshake, ChannelError> {
        let open = |server: &Option<PipeServer>| server.as_ref().map(|s| s.accept(true)).transpose();

        let stdin = open(&self.stdin)?;
        let stdout = open(&self.stdout)?;
        let stderr = open(&self.stderr)?;
        debug!("Stdio channels created");

        Ok(PendingHandshake {
            plan: self,
            stdin,
            stdout,
            stderr,
        })
    }
}

/// Channels that exist at the OS level but may not be connected yet.
#[cfg(windows)]
#[derive(Debug)]
pub struct PendingHandshake {
    plan: Handshake,
    stdin: Option<ChannelStream>,
    stdout: Option<ChannelStream>,
    stderr: Option<ChannelStream>,
}

#[cfg(windows)]
impl PendingHandshake {
    /// Waits for the redirector started by `launcher` to connect every channel,
    /// in stdin, stdout, stderr order, and hands everything to a [`PipedProcess`].
    ///
    /// The waits run on a helper thread while this one watches the launcher. A
    /// launcher that exits while a wait is still pending cancels that wait.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::LauncherExited` if the launcher exits before the
    /// redirector connected, `SandboxError::WaitFailed` if the launcher cannot be
    /// polled, or the first connection failure. The streams are closed on error.
    #[instrument(skip_all, fields(pid = launcher.id()))]
    pub fn complete(self, mut launcher: Child) -> Result<PipedProcess, SandboxError> {
        let waiter = thread::spawn(move || {
            let connected = self.wait_in_order();
            (self, connected)
        });

        let mut exited = None;
        while !waiter.is_finished() {
            if exited.is_none() {
                exited = launcher.try_wait().map_err(SandboxError::WaitFailed)?;
            }
            // Repeated until the waiter notices; a cancel between two waits is lost.
            if exited.is_some() && cancel_blocking_wait(&waiter) {
                debug!("Cancelled pending connection wait");
            }
            thread::sleep(LAUNCHER_POLL_INTERVAL);
        }

        let (pending, connected) = match waiter.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        };

        match (connected, exited) {
            (Ok(()), _) => {
                debug!("Redirector connected");
                Ok(PipedProcess::new(
                    launcher,
                    pending.stdin,
                    pending.stdout,
                    pending.stderr,
                ))
            }
            (Err(ChannelError::Cancelled { name }), Some(status)) => {
                let code = exit_code(status);
                warn!(channel = %name, code, "Launcher exited before the redirector connected");
                Err(SandboxError::LauncherExited { code })
            }
            (Err(err), _) => Err(err.into()),
        }
    }

    fn wait_in_order(&self) -> Result<(), ChannelError> {
        let pairs = [
            (&self.plan.stdin, &self.stdin),
            (&self.plan.stdout, &self.stdout),
            (&self.plan.stderr, &self.stderr),
        ];
        for (server, stream) in pairs {
            if let (Some(server), Some(stream)) = (server, stream) {
                server.wait_for_connection(stream)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = r"\\.\pipe\handshake_test";

    #[test]
    fn test_host_directions() {
        let handshake = Handshake::new(PREFIX, StdioChannels::ALL);

        let stdin = handshake.stdin_server().unwrap();
        let stdout = handshake.stdout_server().unwrap();
        let stderr = handshake.stderr_server().unwrap();

        assert_eq!(stdin.direction(), Direction::Outbound);
        assert_eq!(stdout.direction(), Direction::Inbound);
        assert_eq!(stderr.direction(), Direction::Inbound);
        assert_eq!(stdout.buffering(), Buffering::Default);
        assert_eq!(stderr.buffering(), Buffering::Unbuffered);
    }

    #[test]
    fn test_names_are_distinct_and_prefixed() {
        let handshake = Handshake::new(PREFIX, StdioChannels::ALL);
        let names = [
            handshake.stdin_server().unwrap().name(),
            handshake.stdout_server().unwrap().name(),
            handshake.stderr_server().unwrap().name(),
        ];

        for name in names {
            assert!(name.starts_with(PREFIX));
        }
        assert_ne!(names[0], names[1]);
        assert_ne!(names[1], names[2]);
        assert_ne!(names[0], names[2]);
    }

    #[test]
    fn test_unrequested_streams_are_absent() {
        let handshake = Handshake::new(
            PREFIX,
            StdioChannels {
                stdin: false,
                stdout: true,
                stderr: false,
            },
        );
        assert!(handshake.stdin_server().is_none());
        assert!(handshake.stdout_server().is_some());
        assert!(handshake.stderr_server().is_none());

        let args = handshake.redirect_args(vec!["cmd".into()]);
        assert!(args.stdin.is_none());
        assert!(args.stderr.is_none());
        assert_eq!(
            args.stdout.as_deref(),
            handshake.stdout_server().map(PipeServer::name)
        );
    }

    #[test]
    fn test_redirect_args_carry_names_and_command() {
        let handshake = Handshake::new(PREFIX, StdioChannels::default());
        let args = handshake.redirect_args(vec!["cmd".into(), "/c".into(), "echo".into()]);

        assert_eq!(
            args.stdin.as_deref(),
            handshake.stdin_server().map(PipeServer::name)
        );
        assert_eq!(args.command, ["cmd", "/c", "echo"]);
        assert!(!args.verbose);
    }

    #[test]
    fn test_buffer_size_applies_to_all() {
        let handshake = Handshake::new(PREFIX, StdioChannels::ALL).with_buffer_size(4096);
        for server in [
            handshake.stdin_server(),
            handshake.stdout_server(),
            handshake.stderr_server(),
        ] {
            assert_eq!(server.unwrap().buffer_size(), 4096);
        }
    }
}
