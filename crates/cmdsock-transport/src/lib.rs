//! Local socket transport for cmdsock.
//!
//! The lowest layer of the workspace: a listening-socket primitive
//! ([`UnixDomainSocket`]) and the byte stream it hands out ([`IpcStream`]).
//! Nothing here knows about frames or commands.

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use traits::IpcStream;

#[cfg(unix)]
pub use uds::{path_identity, SocketIdentity, UnixDomainSocket, DEFAULT_SOCKET_PATH};
