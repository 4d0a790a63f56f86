//! Command lines for the Sandboxie control program.

use std::ffi::{OsStr, OsString};
use std::path::Path;

/// How a command is launched inside a sandbox.
///
/// # Example
///
/// ```
/// use sandboxie_bridge::sandbox::LaunchOptions;
///
/// let options = LaunchOptions::new().with_sandbox("Builds").with_hide_window(true);
/// assert_eq!(options.sandbox.as_deref(), Some("Builds"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Target sandbox; the configured default box when unset.
    pub sandbox: Option<String>,

    /// Run elevated. Shows a UAC prompt unless the host already has the right.
    pub elevate: bool,

    /// Hide the command's window.
    pub hide_window: bool,
}

impl LaunchOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_sandbox(mut self, name: impl Into<String>) -> Self {
        self.sandbox = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_elevate(mut self, elevate: bool) -> Self {
        self.elevate = elevate;
        self
    }

    #[must_use]
    pub fn with_hide_window(mut self, hide_window: bool) -> Self {
        self.hide_window = hide_window;
        self
    }
}

/// Rewrites a user command right before it is launched.
///
/// Installed with [`Sandboxie::with_command_hook`](super::Sandboxie::with_command_hook),
/// e.g. to wrap the command in a debugger.
pub trait CommandHook: Send + Sync {
    fn rewrite(&self, command: Vec<OsString>) -> Vec<OsString>;
}

impl<F> CommandHook for F
where
    F: Fn(Vec<OsString>) -> Vec<OsString> + Send + Sync,
{
    fn rewrite(&self, command: Vec<OsString>) -> Vec<OsString> {
        self(command)
    }
}

/// `<start> /box:<name> /wait [/elevate] [/hide_window]`, to be followed by the command.
pub fn launch_prefix(start_program: &Path, sandbox: &str, options: &LaunchOptions) -> Vec<OsString> {
    let mut argv = vec![start_program.as_os_str().to_owned(), box_flag(sandbox), "/wait".into()];
    if options.elevate {
        argv.push("/elevate".into());
    }
    if options.hide_window {
        argv.push("/hide_window".into());
    }
    argv
}

/// `/box:<name>`.
pub fn box_flag(sandbox: &str) -> OsString {
    format!("/box:{sandbox}").into()
}

/// Renders an argument vector for logs and error messages.
pub fn display_command<S: AsRef<OsStr>>(argv: &[S]) -> String {
    argv.iter()
        .map(|arg| arg.as_ref().to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}
