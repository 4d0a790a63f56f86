//! sbie-redirect - runs a command with its stdio attached to named pipes.
//!
//! Launched by the host inside the sandbox. Diagnostics go to this process's own
//! stderr, never to the redirected stream.

use clap::Parser;
use miette::Result;
use tracing::{Level, debug};
use tracing_subscriber::{EnvFilter, fmt};

use sandboxie_bridge::RedirectArgs;

fn main() -> Result<()> {
    let args = RedirectArgs::parse();

    let filter = if args.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::WARN.into())
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    debug!("sbie-redirect v{}", env!("CARGO_PKG_VERSION"));

    let code = args.run()?;
    std::process::exit(code);
}
