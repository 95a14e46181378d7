//! Remote transports for autoup
//!
//! Implementations of [`autoup_types::Transport`] and [`autoup_types::Connector`]:
//!
//! - **Local**: the remote side is a mounted filesystem (network share, backup disk)
//! - **Memory**: an in-process remote with an operation log and fault injection
//! - **Sftp**: an SSH server reached with user and password
//!
//! [`connector_for`] picks the implementation from a configured remote address.
//!
//! # Examples
//!
//! ```rust
//! use autoup_transport::MemoryConnector;
//! use autoup_types::Connector;
//!
//! # async fn example() -> autoup_types::Result<()> {
//! let connector = MemoryConnector::new("backup");
//! let mut transport = connector.connect().await?;
//! transport.mkdir("/site").await?;
//! assert!(connector.remote().has_dir("/site"));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod local;
pub mod memory;
pub mod resolve;
pub mod sftp;

pub use local::{LocalConnector, LocalTransport};
pub use memory::{MemoryConnector, MemoryRemote, MemoryTransport, OpKind, RemoteOp};
pub use resolve::connector_for;
pub use sftp::{SftpAddress, SftpConnector, SftpTransport};
