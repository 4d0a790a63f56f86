//! Sandboxie control surface.
//!
//! Creates, inspects and removes sandbox definitions and launches commands
//! inside a sandbox, optionally with their standard streams piped back to the
//! host over named channels.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(windows)]
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use std::io::Read;
//! use sandboxie_bridge::process::StdioChannels;
//! use sandboxie_bridge::sandbox::{IniFileStore, LaunchOptions, Sandboxie, SandboxieConfig};
//!
//! let store = IniFileStore::new(r"C:\Windows\Sandboxie.ini");
//! let mut sandboxie = Sandboxie::new(SandboxieConfig::default(), store)?;
//!
//! let settings = sandboxie.make_sandbox_setting("default,piped_execution", &[])?;
//! sandboxie.create_sandbox("Piped", settings, true)?;
//!
//! let mut process = sandboxie.piped_execute(
//!     &["cmd", "/c", "echo hello"],
//!     &LaunchOptions::new().with_sandbox("Piped"),
//!     StdioChannels::ALL,
//! )?;
//!
//! let mut output = String::new();
//! if let Some(stdout) = process.stdout() {
//!     stdout.read_to_string(&mut output)?;
//! }
//! assert_eq!(process.close()?, 0);
//! # Ok(())
//! # }
//! ```

mod command;
mod config;
mod control;
mod settings;
mod store;

pub use command::{CommandHook, LaunchOptions, box_flag, launch_prefix};
pub use config::{
    DEFAULT_BOX, DEFAULT_PIPE_PREFIX, DEFAULT_START_PROGRAM, REDIRECTOR_EXE, SandboxieConfig,
    validate_box_name,
};
pub use control::Sandboxie;
pub use settings::{TEMPLATE_NAMES, make_sandbox_setting, template};
pub use store::{IniFileStore, MemoryStore, Sections, SettingsStore};
