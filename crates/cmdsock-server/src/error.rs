use std::path::PathBuf;

use cmdsock_frame::FrameError;
use cmdsock_transport::TransportError;

/// Errors surfaced by the command server and client.
///
/// Framing errors on inbound streams and write failures during a broadcast
/// are handled internally and never show up here.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listening socket could not be created.
    #[error("failed to start command server on {path}: {source}")]
    Bind {
        path: PathBuf,
        source: TransportError,
    },

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A worker thread could not be started.
    #[error("failed to spawn {what} thread: {source}")]
    Spawn {
        what: &'static str,
        source: std::io::Error,
    },

    /// No frame arrived within the configured read timeout.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The other side closed the connection.
    #[error("peer disconnected")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, ServerError>;
