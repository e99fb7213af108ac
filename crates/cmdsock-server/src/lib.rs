//! Command channel server for cmdsock.
//!
//! A [`CommandServer`] listens on a local socket, accepts any number of
//! clients, turns each client's byte stream into commands and hands them to
//! every registered listener. [`CommandServer::send_command`] broadcasts a
//! command to all connected clients; there is no addressed send.
//!
//! [`CommandClient`] is the other end of the channel.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod registry;
pub mod server;

pub use client::CommandClient;
pub use config::ServerConfig;
pub use connection::ConnectionHandler;
pub use error::{Result, ServerError};
pub use events::{CommandEvent, EventHub};
pub use registry::{ClientHandle, ClientId, ClientRegistry};
pub use server::{BroadcastReport, Broadcaster, CommandServer};
