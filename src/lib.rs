//! Sandboxie Bridge - run commands inside Sandboxie with their stdio piped back.
//!
//! A sandboxed process shares no console with the host, so its standard streams
//! are unreachable through ordinary process pipes. This crate carries them over
//! named pipes instead: the host creates one pipe per stream, launches the
//! `sbie-redirect` binary inside the sandbox, and the redirector connects to the
//! pipes and runs the real command on them.
//!
//! # Modules
//!
//! - [`pipe`]: named pipes as blocking byte streams
//! - [`process`]: the host side of the handshake and the piped-process handle
//! - [`redirect`]: the redirector's command line and run loop
//! - [`sandbox`]: the Sandboxie control surface
//!
//! # Platform
//!
//! Named pipes and Sandboxie exist on Windows only. Configuration, command
//! composition and the settings store build everywhere.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(windows)]
//! # fn example() -> miette::Result<()> {
//! use std::io::Read;
//! use sandboxie_bridge::process::StdioChannels;
//! use sandboxie_bridge::sandbox::{IniFileStore, LaunchOptions, Sandboxie, SandboxieConfig};
//!
//! let store = IniFileStore::new(r"C:\Windows\Sandboxie.ini");
//! let sandboxie = Sandboxie::new(SandboxieConfig::default(), store)?;
//!
//! let mut process =
//!     sandboxie.piped_execute(&["cmd", "/c", "dir"], &LaunchOptions::new(), StdioChannels::ALL)?;
//!
//! let mut listing = String::new();
//! if let Some(stdout) = process.stdout() {
//!     stdout.read_to_string(&mut listing).map_err(sandboxie_bridge::Error::from)?;
//! }
//! process.close()?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod pipe;
pub mod process;
pub mod redirect;
pub mod sandbox;

// Re-export commonly used types
pub use error::{ChannelError, ConfigError, Error, Result, SandboxError};
pub use pipe::{ChannelStream, PipeClient, PipeServer};
pub use process::PipedProcess;
pub use redirect::RedirectArgs;
pub use sandbox::{Sandboxie, SandboxieConfig};
