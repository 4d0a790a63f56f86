//! The redirector: connects to the host's stdio channels and runs a command on them.
//!
//! The redirector runs inside the sandbox. It opens the client end of every
//! channel named on its command line, in stdin, stdout, stderr order, starts the
//! command with those ends as its standard streams, and exits with the command's
//! exit code. Streams without a channel are inherited.

use clap::Parser;

use crate::error::{Result, SandboxError};

#[cfg(windows)]
use {
    crate::error::ChannelError,
    crate::pipe::{Buffering, ConnectTimeout, Direction, PipeClient},
    std::process::{Command, Stdio},
    tracing::{debug, info, instrument},
};

/// Runs a command with its standard streams attached to named pipes.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "sbie-redirect", author, version, about, long_about = None)]
pub struct RedirectArgs {
    /// Pipe to use as the command's standard input
    #[arg(long, value_name = "PIPE")]
    pub stdin: Option<String>,

    /// Pipe to use as the command's standard output
    #[arg(long, value_name = "PIPE")]
    pub stdout: Option<String>,

    /// Pipe to use as the command's standard error
    #[arg(long, value_name = "PIPE")]
    pub stderr: Option<String>,

    /// One token of the command line; repeat for every argument
    #[arg(
        short = 'a',
        long = "arg",
        value_name = "TOKEN",
        required = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    pub verbose: bool,
}

impl RedirectArgs {
    /// Redirector invocation for `command` with no channels attached.
    #[must_use]
    pub fn new(command: Vec<String>) -> Self {
        Self {
            stdin: None,
            stdout: None,
            stderr: None,
            command,
            verbose: false,
        }
    }

    /// Renders the invocation as command-line arguments, one `--arg=` per token.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let channels = [
            ("stdin", &self.stdin),
            ("stdout", &self.stdout),
            ("stderr", &self.stderr),
        ];

        let mut args: Vec<String> = channels
            .into_iter()
            .filter_map(|(flag, name)| name.as_ref().map(|name| format!("--{flag}={name}")))
            .collect();
        args.extend(self.command.iter().map(|token| format!("--arg={token}")));
        if self.verbose {
            args.push("--verbose".to_string());
        }
        args
    }

    fn split_command(&self) -> Result<(&String, &[String])> {
        self.command
            .split_first()
            .ok_or_else(|| SandboxError::InvalidCommand("no command given".to_string()).into())
    }
}

#[cfg(windows)]
impl RedirectArgs {
    /// Connects the channels, runs the command to completion and returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns a channel error if a pipe cannot be opened, or
    /// `SandboxError::LaunchFailed` if the command cannot be started.
    #[instrument(skip(self), fields(command = ?self.command))]
    pub fn run(&self) -> Result<i32> {
        let (program, args) = self.split_command()?;

        let stdin = connect(self.stdin.as_deref(), Direction::Inbound, Buffering::Default)?;
        let stdout = connect(self.stdout.as_deref(), Direction::Outbound, Buffering::Default)?;
        let stderr = connect(self.stderr.as_deref(), Direction::Outbound, Buffering::Unbuffered)?;

        let mut command = Command::new(program);
        command.args(args);
        if let Some(stdin) = stdin {
            command.stdin(stdin);
        }
        if let Some(stdout) = stdout {
            command.stdout(stdout);
        }
        if let Some(stderr) = stderr {
            command.stderr(stderr);
        }

        info!(%program, "Running command");
        let status = command
            .status()
            .map_err(|source| SandboxError::LaunchFailed {
                program: program.into(),
                source,
            })?;

        let code = crate::process::exit_code(status);
        debug!(exit_code = code, "Command exited");
        Ok(code)
    }
}

#[cfg(not(windows))]
impl RedirectArgs {
    /// Named pipes are unavailable here; always fails after validating the command.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::UnsupportedPlatform`.
    pub fn run(&self) -> Result<i32> {
        self.split_command()?;
        Err(SandboxError::UnsupportedPlatform {
            operation: "stdio redirection",
        }
        .into())
    }
}

/// Opens the client end of `name`, if given, as a child stdio handle.
#[cfg(windows)]
fn connect(
    name: Option<&str>,
    direction: Direction,
    buffering: Buffering,
) -> std::result::Result<Option<Stdio>, ChannelError> {
    let Some(name) = name else {
        return Ok(None);
    };

    let stream = PipeClient::with_direction(name, direction)
        .with_buffering(buffering)
        .connect(ConnectTimeout::ServerDefault)?;
    debug!(%name, %direction, "Connected stdio channel");
    stream.into_stdio().map(Some)
}
