//! Named channels: OS named pipes exposed as byte streams.
//!
//! Blocking, byte-mode, local-only pipes with unlimited instances. A
//! [`PipeServer`] creates instances and waits for peers, a [`PipeClient`] opens
//! them; both hand out a [`ChannelStream`] once connected.
//!
//! The OS calls exist on Windows only. Configuration, naming and the stream
//! type itself are portable.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(windows)]
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use std::io::{Read, Write};
//! use sandboxie_bridge::pipe::{ConnectTimeout, PipeClient, PipeServer};
//!
//! let server = PipeServer::temporary(r"\\.\pipe\example", true, false)?;
//! let client = PipeClient::for_server(&server);
//!
//! let mut server_end = server.accept(true)?;
//! let mut client_end = client.connect(ConnectTimeout::ServerDefault)?;
//! server.wait_for_connection(&server_end)?;
//!
//! client_end.write_all(b"test")?;
//! client_end.flush()?;
//!
//! let mut buf = [0u8; 4];
//! server_end.read_exact(&mut buf)?;
//! assert_eq!(&buf, b"test");
//! # Ok(())
//! # }
//! ```

mod client;
mod direction;
mod naming;
mod server;
mod stream;

pub use client::{ConnectTimeout, PipeClient};
pub use direction::{Buffering, DEFAULT_BUFFER_SIZE, Direction};
pub use naming::{LOCAL_PIPE_PREFIX, NT_PIPE_PREFIX, local_to_nt_namespace, unique_name};
pub use server::PipeServer;
#[cfg(windows)]
pub(crate) use server::cancel_blocking_wait;
pub use stream::ChannelStream;
