//! Configuration for driving a Sandboxie installation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::pipe::{DEFAULT_BUFFER_SIZE, LOCAL_PIPE_PREFIX};

/// Default location of the Sandboxie control program.
pub const DEFAULT_START_PROGRAM: &str = r"C:\Program Files\Sandboxie\Start.exe";

/// Default name prefix of the stdio channels.
pub const DEFAULT_PIPE_PREFIX: &str = r"\\.\pipe\sandboxie_bridge_pipe";

/// Sandbox used when a launch does not name one.
pub const DEFAULT_BOX: &str = "DefaultBox";

/// File name of the redirector binary.
pub const REDIRECTOR_EXE: &str = if cfg!(windows) {
    "sbie-redirect.exe"
} else {
    "sbie-redirect"
};

/// Longest sandbox name Sandboxie accepts.
const MAX_BOX_NAME_LEN: usize = 32;

/// Configuration of a [`Sandboxie`](super::Sandboxie) controller.
///
/// Every field has a default, so a JSON file only needs the keys it changes.
///
/// # Example
///
/// ```
/// use sandboxie_bridge::sandbox::SandboxieConfig;
///
/// let config = SandboxieConfig::default()
///     .with_start_program(r"D:\Sandboxie\Start.exe")
///     .with_default_box("Builds");
/// assert!(config.validate().is_ok());
///
/// let config = SandboxieConfig::from_json_str(r#"{"default_box": "Builds"}"#).unwrap();
/// assert_eq!(config.default_box, "Builds");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SandboxieConfig {
    /// Path of Sandboxie's `Start.exe`.
    pub start_program: PathBuf,

    /// Path of the redirector binary run inside the sandbox.
    ///
    /// When unset, `sbie-redirect` next to the current executable is used.
    pub redirector: Option<PathBuf>,

    /// Name prefix of the stdio channels, in `\\.\pipe\<name>` form.
    pub pipe_prefix: String,

    /// Sandbox used when a launch does not name one.
    pub default_box: String,

    /// OS buffer size of each stdio channel, in bytes.
    pub pipe_buffer_size: u32,

    /// Connect timeout suggested to the redirector, in milliseconds. Zero keeps
    /// the OS default.
    pub client_wait_timeout_ms: u64,
}

impl Default for SandboxieConfig {
    fn default() -> Self {
        Self {
            start_program: PathBuf::from(DEFAULT_START_PROGRAM),
            redirector: None,
            pipe_prefix: DEFAULT_PIPE_PREFIX.to_string(),
            default_box: DEFAULT_BOX.to_string(),
            pipe_buffer_size: DEFAULT_BUFFER_SIZE as u32,
            client_wait_timeout_ms: 0,
        }
    }
}

impl SandboxieConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Read` if the file cannot be read, `ConfigError::Parse`
    /// if it is not valid JSON, or `ConfigError::Invalid` if validation fails.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded configuration file");
        Self::from_json_str(&contents)
    }

    /// Parses and validates a configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` or `ConfigError::Invalid`.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every field is usable.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_program.as_os_str().is_empty() {
            return Err(invalid("start_program must not be empty"));
        }

        match self.pipe_prefix.strip_prefix(LOCAL_PIPE_PREFIX) {
            Some(rest) if !rest.is_empty() && !rest.contains('\\') => {}
            _ => {
                return Err(invalid(format!(
                    r"pipe_prefix must have the form \\.\pipe\<name>, got {}",
                    self.pipe_prefix
                )));
            }
        }

        validate_box_name(&self.default_box)?;

        if self.pipe_buffer_size == 0 {
            return Err(invalid("pipe_buffer_size must be greater than zero"));
        }

        Ok(())
    }

    /// Resolved path of the redirector binary.
    #[must_use]
    pub fn redirector_program(&self) -> PathBuf {
        self.redirector.clone().unwrap_or_else(|| {
            std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(|dir| dir.join(REDIRECTOR_EXE)))
                .unwrap_or_else(|| PathBuf::from(REDIRECTOR_EXE))
        })
    }

    /// Connect timeout suggested to the redirector.
    #[must_use]
    pub fn client_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.client_wait_timeout_ms)
    }

    /// Sets the path of Sandboxie's `Start.exe`.
    #[must_use]
    pub fn with_start_program(mut self, path: impl Into<PathBuf>) -> Self {
        self.start_program = path.into();
        self
    }

    /// Sets the path of the redirector binary.
    #[must_use]
    pub fn with_redirector(mut self, path: impl Into<PathBuf>) -> Self {
        self.redirector = Some(path.into());
        self
    }

    /// Sets the stdio channel name prefix.
    #[must_use]
    pub fn with_pipe_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.pipe_prefix = prefix.into();
        self
    }

    /// Sets the sandbox used when a launch does not name one.
    #[must_use]
    pub fn with_default_box(mut self, name: impl Into<String>) -> Self {
        self.default_box = name.into();
        self
    }

    #[must_use]
    pub fn with_pipe_buffer_size(mut self, size: u32) -> Self {
        self.pipe_buffer_size = size;
        self
    }

    #[must_use]
    pub fn with_client_wait_timeout(mut self, timeout: Duration) -> Self {
        self.client_wait_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

/// Checks that `name` is a usable sandbox name: ASCII letters, digits and
/// underscores, at most 32 characters.
///
/// # Errors
///
/// Returns `ConfigError::Invalid` otherwise.
pub fn validate_box_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || name.len() > MAX_BOX_NAME_LEN {
        return Err(invalid(format!(
            "sandbox name must have 1 to {MAX_BOX_NAME_LEN} characters, got {name:?}"
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid(format!(
            "sandbox name may only contain letters, digits and underscores, got {name:?}"
        )));
    }
    Ok(())
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.into(),
    }
}
