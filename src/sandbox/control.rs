//! The Sandboxie controller.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::process::{Child, Command, Output};

use tracing::{debug, info, instrument};

use super::command::{CommandHook, LaunchOptions, box_flag, display_command, launch_prefix};
use super::config::SandboxieConfig;
use super::settings::make_sandbox_setting;
use super::store::{Sections, SettingsStore};
use crate::error::{ConfigError, SandboxError};

#[cfg(windows)]
use crate::process::{Handshake, PipedProcess, StdioChannels};

/// Handle to a Sandboxie installation.
///
/// Sandbox definitions are read from and written to a [`SettingsStore`]; every
/// other action goes through the control program (`Start.exe`).
///
/// # Example
///
/// ```no_run
/// use sandboxie_bridge::sandbox::{IniFileStore, LaunchOptions, Sandboxie, SandboxieConfig};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = IniFileStore::new(r"C:\Windows\Sandboxie.ini");
/// let mut sandboxie = Sandboxie::new(SandboxieConfig::default(), store)?;
///
/// let settings = sandboxie.make_sandbox_setting("default", &[])?;
/// sandboxie.create_sandbox("Builds", settings, true)?;
///
/// let mut launcher = sandboxie.execute(
///     &["notepad.exe"],
///     &LaunchOptions::new().with_sandbox("Builds"),
/// )?;
/// launcher.wait()?;
/// # Ok(())
/// # }
/// ```
pub struct Sandboxie {
    config: SandboxieConfig,
    store: Box<dyn SettingsStore>,
    hook: Option<Box<dyn CommandHook>>,
}

impl fmt::Debug for Sandboxie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandboxie")
            .field("config", &self.config)
            .field("hook", &self.hook.is_some())
            .finish_non_exhaustive()
    }
}

impl Sandboxie {
    /// Creates a controller over `store`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if `config` does not validate.
    pub fn new(
        config: SandboxieConfig,
        store: impl SettingsStore + 'static,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            store: Box::new(store),
            hook: None,
        })
    }

    /// Installs a hook that rewrites every command right before launch.
    #[must_use]
    pub fn with_command_hook(mut self, hook: impl CommandHook + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn config(&self) -> &SandboxieConfig {
        &self.config
    }

    /// Composes sandbox settings from templates using this controller's pipe prefix.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::UnknownTemplate` for unknown template names.
    pub fn make_sandbox_setting(
        &self,
        templates: &str,
        extra: &[String],
    ) -> Result<Vec<String>, SandboxError> {
        make_sandbox_setting(templates, extra, &self.config.pipe_prefix)
    }

    /// Names of all sections in the store.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::Store` if the store cannot be read.
    pub fn sandbox_names(&self) -> Result<Vec<String>, SandboxError> {
        Ok(self.store.load()?.into_keys().collect())
    }

    /// Defines a new sandbox and makes Sandboxie pick it up.
    ///
    /// With `exist_ok`, an existing sandbox of the same name is left untouched.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::AlreadyExists` if the name is taken and `exist_ok`
    /// is false, or any store or control-program failure.
    #[instrument(skip(self, settings))]
    pub fn create_sandbox(
        &mut self,
        name: &str,
        settings: Vec<String>,
        exist_ok: bool,
    ) -> Result<(), SandboxError> {
        let mut sections = self.store.load()?;
        if sections.contains_key(name) {
            if exist_ok {
                debug!("Sandbox already exists");
                return Ok(());
            }
            return Err(SandboxError::AlreadyExists {
                name: name.to_string(),
            });
        }

        sections.insert(name.to_string(), settings);
        self.store.save(&sections)?;
        info!("Sandbox created");
        self.reload()
    }

    /// Setting lines of an existing sandbox.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::NotFound` if there is no such sandbox.
    pub fn sandbox_settings(&self, name: &str) -> Result<Vec<String>, SandboxError> {
        let mut sections = self.store.load()?;
        sections.remove(name).ok_or_else(|| not_found(name))
    }

    /// Overwrites the setting lines of an existing sandbox and makes Sandboxie pick them up.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::NotFound` if there is no such sandbox.
    #[instrument(skip(self, settings))]
    pub fn set_sandbox_settings(
        &mut self,
        name: &str,
        settings: Vec<String>,
    ) -> Result<(), SandboxError> {
        let mut sections = self.existing(name)?;
        sections.insert(name.to_string(), settings);
        self.store.save(&sections)?;
        self.reload()
    }

    /// Terminates every process running in a sandbox.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::NotFound` if there is no such sandbox.
    #[instrument(skip(self))]
    pub fn terminate_sandbox_processes(&self, name: &str) -> Result<(), SandboxError> {
        self.existing(name)?;
        self.run_control(&[box_flag(name), "/terminate".into()])?;
        Ok(())
    }

    /// IDs of the processes running in a sandbox.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::NotFound` if there is no such sandbox, or
    /// `SandboxError::InvalidOutput` if the control program's answer is not a
    /// list of integers.
    #[instrument(skip(self))]
    pub fn list_pids(&self, name: &str) -> Result<Vec<u32>, SandboxError> {
        self.existing(name)?;
        let output = self.run_control(&[box_flag(name), "/listpids".into()])?;
        parse_pid_list(&String::from_utf8_lossy(&output.stdout))
    }

    /// Terminates a sandbox's processes and deletes its stored content.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::NotFound` if there is no such sandbox.
    #[instrument(skip(self))]
    pub fn delete_content(&self, name: &str) -> Result<(), SandboxError> {
        self.terminate_sandbox_processes(name)?;
        self.run_control(&[box_flag(name), "delete_sandbox_silent".into()])?;
        info!("Sandbox content deleted");
        Ok(())
    }

    /// Removes a sandbox definition, deleting its content unless `preserve_content`.
    ///
    /// Preserved content becomes visible again to a sandbox recreated under the
    /// same name.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::NotFound` if there is no such sandbox.
    #[instrument(skip(self))]
    pub fn remove_sandbox(&mut self, name: &str, preserve_content: bool) -> Result<(), SandboxError> {
        let mut sections = self.existing(name)?;

        self.terminate_sandbox_processes(name)?;
        if !preserve_content {
            self.delete_content(name)?;
        }

        sections.remove(name);
        self.store.save(&sections)?;
        info!("Sandbox removed");
        self.reload()
    }

    /// Asks Sandboxie to re-read its configuration.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::CommandFailed` if the control program fails.
    pub fn reload(&self) -> Result<(), SandboxError> {
        self.run_control(&["/reload".into()])?;
        Ok(())
    }

    /// Launches `command` in a sandbox and returns the launcher process.
    ///
    /// The launcher waits for the command and exits with its exit code. The
    /// command gets no console shared with the host; see
    /// [`Sandboxie::piped_execute`] for stdio access.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::InvalidCommand` for an empty command, or
    /// `SandboxError::LaunchFailed` if the launcher cannot be started.
    #[instrument(skip(self, command), fields(sandbox = tracing::field::Empty))]
    pub fn execute<S: AsRef<OsStr>>(
        &self,
        command: &[S],
        options: &LaunchOptions,
    ) -> Result<Child, SandboxError> {
        if command.is_empty() {
            return Err(SandboxError::InvalidCommand(
                "command cannot be empty".to_string(),
            ));
        }

        let sandbox = options
            .sandbox
            .as_deref()
            .unwrap_or(&self.config.default_box);
        tracing::Span::current().record("sandbox", sandbox);

        let mut user_command: Vec<OsString> =
            command.iter().map(|arg| arg.as_ref().to_owned()).collect();
        if let Some(hook) = &self.hook {
            user_command = hook.rewrite(user_command);
        }

        let mut argv = launch_prefix(&self.config.start_program, sandbox, options);
        argv.extend(user_command);
        debug!(command = %display_command(&argv), "Launching");

        Command::new(&self.config.start_program)
            .args(&argv[1..])
            .spawn()
            .map_err(|source| SandboxError::LaunchFailed {
                program: self.config.start_program.clone(),
                source,
            })
    }

    /// Launches `command` in a sandbox with its standard streams carried over
    /// named channels.
    ///
    /// The sandbox must be allowed to open pipes under the configured prefix; the
    /// `piped_execution` template grants that.
    ///
    /// # Errors
    ///
    /// Returns a channel error if a channel cannot be created,
    /// `SandboxError::LauncherExited` if the launcher exits before the
    /// redirector connects, or any error of [`Sandboxie::execute`].
    #[cfg(windows)]
    #[instrument(skip(self, command))]
    pub fn piped_execute<S: AsRef<str>>(
        &self,
        command: &[S],
        options: &LaunchOptions,
        channels: StdioChannels,
    ) -> Result<PipedProcess, SandboxError> {
        let handshake = Handshake::new(&self.config.pipe_prefix, channels)
            .with_buffer_size(self.config.pipe_buffer_size)
            .with_client_wait_timeout(self.config.client_wait_timeout());
        let args = handshake.redirect_args(command.iter().map(|a| a.as_ref().to_string()).collect());

        let pending = handshake.accept()?;

        let mut argv = vec![self.config.redirector_program().into_os_string()];
        argv.extend(args.to_args().into_iter().map(OsString::from));
        let launcher = self.execute(&argv, options)?;

        pending.complete(launcher)
    }

    /// Loads the store and checks that `name` is defined in it.
    fn existing(&self, name: &str) -> Result<Sections, SandboxError> {
        let sections = self.store.load()?;
        if sections.contains_key(name) {
            Ok(sections)
        } else {
            Err(not_found(name))
        }
    }

    /// Runs the control program to completion with `args`.
    fn run_control(&self, args: &[OsString]) -> Result<Output, SandboxError> {
        let start = &self.config.start_program;
        debug!(args = %display_command(args), "Running control program");

        let output = Command::new(start)
            .args(args)
            .output()
            .map_err(|source| SandboxError::LaunchFailed {
                program: start.clone(),
                source,
            })?;

        if !output.status.success() {
            let mut argv = vec![start.as_os_str().to_owned()];
            argv.extend_from_slice(args);
            return Err(SandboxError::CommandFailed {
                command: display_command(&argv),
                code: output.status.code(),
            });
        }

        Ok(output)
    }
}

fn not_found(name: &str) -> SandboxError {
    SandboxError::NotFound {
        name: name.to_string(),
    }
}

/// Parses `/listpids` output: a count followed by that many process IDs.
fn parse_pid_list(output: &str) -> Result<Vec<u32>, SandboxError> {
    output
        .split_whitespace()
        .skip(1)
        .map(|token| {
            token.parse().map_err(|_| SandboxError::InvalidOutput {
                context: format!("expected a process ID, got {token:?}"),
            })
        })
        .collect()
}
