//! Error types for the Sandboxie bridge.
//!
//! Uses thiserror for deriving std::error::Error and miette for rich diagnostics.

use std::io;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the crate.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Named channel failure
    #[error(transparent)]
    #[diagnostic(transparent)]
    Channel(#[from] ChannelError),

    /// Sandbox control or launch failure
    #[error(transparent)]
    #[diagnostic(transparent)]
    Sandbox(#[from] SandboxError),

    /// Configuration could not be loaded
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    #[diagnostic(code(sbie::io))]
    Io(#[from] io::Error),
}

/// Errors raised by the named-pipe channel primitive.
#[derive(Error, Debug, Diagnostic)]
pub enum ChannelError {
    /// Direction flags are unusable (both false, or a mismatched pairing).
    #[error("invalid channel configuration: {reason}")]
    #[diagnostic(code(sbie::channel::invalid_configuration))]
    InvalidConfiguration { reason: String },

    /// The peer went away while the channel was in use.
    #[error("channel {name} is broken: the peer closed its end")]
    #[diagnostic(
        code(sbie::channel::broken),
        help("the remote process may have exited before the exchange completed")
    )]
    BrokenChannel {
        name: String,
        #[source]
        source: Option<io::Error>,
    },

    /// A bounded connection wait elapsed.
    #[error("timed out waiting for a free instance of {name}")]
    #[diagnostic(code(sbie::channel::timeout), help("retry or raise the wait timeout"))]
    Timeout { name: String },

    /// Random-access operation on a sequential channel.
    #[error("unsupported operation on channel: {operation}")]
    #[diagnostic(code(sbie::channel::unsupported))]
    Unsupported { operation: &'static str },

    /// A blocking connection wait was aborted from another thread.
    #[error("wait for a client on {name} was cancelled")]
    #[diagnostic(code(sbie::channel::cancelled))]
    Cancelled { name: String },

    /// Channel name is not in the expected form.
    #[error("invalid channel name: {name}")]
    #[diagnostic(
        code(sbie::channel::invalid_name),
        help(r"local pipe names have the form \\.\pipe\<name>")
    )]
    InvalidName { name: String },

    /// Any other OS-level failure.
    #[error("{context}: {source}")]
    #[diagnostic(code(sbie::channel::io))]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl ChannelError {
    /// Wraps an OS error with context.
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Classifies an I/O error raised on the channel `name`.
    ///
    /// Broken-pipe conditions become [`ChannelError::BrokenChannel`], time-outs
    /// [`ChannelError::Timeout`], everything else is kept as [`ChannelError::Io`].
    #[must_use]
    pub fn from_io(name: &str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::BrokenPipe => Self::BrokenChannel {
                name: name.to_string(),
                source: Some(source),
            },
            io::ErrorKind::TimedOut => Self::Timeout {
                name: name.to_string(),
            },
            _ => Self::io(format!("I/O on channel {name} failed"), source),
        }
    }

    /// Returns `true` for [`ChannelError::BrokenChannel`].
    #[must_use]
    pub fn is_broken(&self) -> bool {
        matches!(self, Self::BrokenChannel { .. })
    }
}

impl From<ChannelError> for io::Error {
    fn from(err: ChannelError) -> Self {
        let kind = match &err {
            ChannelError::InvalidConfiguration { .. } | ChannelError::InvalidName { .. } => {
                io::ErrorKind::InvalidInput
            }
            ChannelError::BrokenChannel { .. } => io::ErrorKind::BrokenPipe,
            ChannelError::Timeout { .. } => io::ErrorKind::TimedOut,
            ChannelError::Unsupported { .. } => io::ErrorKind::Unsupported,
            ChannelError::Cancelled { .. } => io::ErrorKind::Interrupted,
            ChannelError::Io { source, .. } => source.kind(),
        };
        io::Error::new(kind, err)
    }
}

/// Errors raised by the sandbox control surface and launch path.
#[derive(Error, Debug, Diagnostic)]
pub enum SandboxError {
    /// No sandbox with this name in the configuration store.
    #[error("sandbox \"{name}\" not found")]
    #[diagnostic(code(sbie::sandbox::not_found))]
    NotFound { name: String },

    /// A sandbox with this name already exists.
    #[error("sandbox \"{name}\" already exists")]
    #[diagnostic(
        code(sbie::sandbox::already_exists),
        help("pass exist_ok = true to accept an existing sandbox")
    )]
    AlreadyExists { name: String },

    /// Unknown setting template name.
    #[error("unknown setting template \"{name}\"")]
    #[diagnostic(
        code(sbie::sandbox::unknown_template),
        help("supported templates are \"default\" and \"piped_execution\"")
    )]
    UnknownTemplate { name: String },

    /// The command to run is empty or malformed.
    #[error("invalid command: {0}")]
    #[diagnostic(code(sbie::sandbox::invalid_command))]
    InvalidCommand(String),

    /// The operation needs an OS facility this platform lacks.
    #[error("{operation} is not supported on this platform")]
    #[diagnostic(
        code(sbie::sandbox::unsupported_platform),
        help("named channels and Sandboxie are only available on Windows")
    )]
    UnsupportedPlatform { operation: &'static str },

    /// The launcher process could not be started.
    #[error("failed to launch {program}")]
    #[diagnostic(code(sbie::sandbox::launch_failed))]
    LaunchFailed {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The launcher exited before the redirector connected every channel.
    #[error("launcher exited with code {code} before the redirector connected")]
    #[diagnostic(
        code(sbie::sandbox::launcher_exited),
        help("check that the sandbox allows OpenPipePath for the pipe prefix and that the redirector path is reachable inside it")
    )]
    LauncherExited { code: i32 },

    /// A control command exited unsuccessfully.
    #[error("control command `{command}` failed with exit code {code:?}")]
    #[diagnostic(code(sbie::sandbox::command_failed))]
    CommandFailed { command: String, code: Option<i32> },

    /// Control program produced output we could not interpret.
    #[error("unexpected output from control program: {context}")]
    #[diagnostic(code(sbie::sandbox::invalid_output))]
    InvalidOutput { context: String },

    /// The launcher did not exit within the requested time.
    #[error("process did not exit within {timeout_ms} ms")]
    #[diagnostic(code(sbie::sandbox::wait_timeout))]
    WaitTimeout { timeout_ms: u128 },

    /// Waiting on the launcher failed at the OS level.
    #[error("failed to wait for launcher process")]
    #[diagnostic(code(sbie::sandbox::wait_failed))]
    WaitFailed(#[source] io::Error),

    /// The configuration store could not be read or written.
    #[error("configuration store error: {0}")]
    #[diagnostic(code(sbie::sandbox::store))]
    Store(String),

    /// Channel failure during the launch handshake.
    #[error("channel handshake failed")]
    #[diagnostic(code(sbie::sandbox::channel))]
    Channel(#[from] ChannelError),
}

/// Errors related to loading configuration.
#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}")]
    #[diagnostic(code(sbie::config::read))]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration is not valid JSON for the expected shape.
    #[error("failed to parse configuration")]
    #[diagnostic(code(sbie::config::parse))]
    Parse(#[from] serde_json::Error),

    /// A field has an unusable value.
    #[error("invalid configuration: {reason}")]
    #[diagnostic(code(sbie::config::invalid))]
    Invalid { reason: String },
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_classifies_broken_pipe() {
        let err = ChannelError::from_io("pipe", io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(err.is_broken());
    }

    #[test]
    fn test_from_io_classifies_timeout() {
        let err = ChannelError::from_io("pipe", io::Error::from(io::ErrorKind::TimedOut));
        assert!(matches!(err, ChannelError::Timeout { name } if name == "pipe"));
    }

    #[test]
    fn test_from_io_keeps_other_errors() {
        let err = ChannelError::from_io("pipe", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, ChannelError::Io { .. }));
    }

    #[test]
    fn test_into_io_error_preserves_kind() {
        let err: io::Error = ChannelError::Unsupported { operation: "seek" }.into();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);

        let err: io::Error = ChannelError::BrokenChannel {
            name: "pipe".into(),
            source: None,
        }
        .into();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
