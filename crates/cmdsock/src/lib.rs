//! Broadcast command channel over local sockets.
//!
//! A server listens on a Unix domain socket, accepts many clients, decodes the
//! commands each one sends and broadcasts commands back to all of them. Every
//! message is a 12-byte big-endian header (magic, command id, payload length)
//! followed by the payload.
//!
//! # Crate Structure
//!
//! - [`transport`] — Listening socket and byte streams
//! - [`frame`] — Header codec and incremental frame assembly
//! - [`server`] — Command server, client registry, and command client

/// Re-export transport types.
pub mod transport {
    pub use cmdsock_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use cmdsock_frame::*;
}

/// Re-export server types.
pub mod server {
    pub use cmdsock_server::*;
}

pub use cmdsock_server::{
    BroadcastReport, CommandClient, CommandEvent, CommandServer, ServerConfig, ServerError,
};
