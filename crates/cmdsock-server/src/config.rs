use std::path::{Path, PathBuf};
use std::time::Duration;

use cmdsock_frame::FrameConfig;
use cmdsock_transport::{UnixDomainSocket, DEFAULT_SOCKET_PATH};

/// Default size of a single read from a client stream.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 8 * 1024;

/// Configuration for [`CommandServer`](crate::CommandServer).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Filesystem path of the listening socket.
    pub socket_path: PathBuf,
    /// Permission bits applied to the socket path after bind.
    pub socket_mode: u32,
    /// Payload limit and write timeout for client connections.
    ///
    /// `read_timeout` is ignored: connections stay open until the client
    /// closes them.
    pub frame: FrameConfig,
    /// Maximum bytes taken from a client stream per read.
    pub read_chunk_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            socket_mode: UnixDomainSocket::DEFAULT_SOCKET_MODE,
            frame: FrameConfig::default(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

impl ServerConfig {
    /// Default configuration listening on `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn with_socket_mode(mut self, mode: u32) -> Self {
        self.socket_mode = mode;
        self
    }

    pub fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.frame.max_payload_size = max_payload_size;
        self
    }

    /// Bound how long a broadcast may block on one client.
    ///
    /// `None` (the default) lets a stalled client hold up the broadcast
    /// indefinitely.
    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.frame.write_timeout = timeout;
        self
    }

    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_points_at_well_known_path() {
        let config = ServerConfig::default();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/.sock.netflix"));
        assert_eq!(config.socket_mode, 0o600);
        assert!(config.frame.write_timeout.is_none());
    }

    #[test]
    fn builders_override_fields() {
        let config = ServerConfig::new("/tmp/x.sock")
            .with_socket_mode(0o660)
            .with_max_payload_size(1024)
            .with_write_timeout(Some(Duration::from_millis(250)))
            .with_read_chunk_size(0);

        assert_eq!(config.socket_path, PathBuf::from("/tmp/x.sock"));
        assert_eq!(config.socket_mode, 0o660);
        assert_eq!(config.frame.max_payload_size, 1024);
        assert_eq!(config.frame.write_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.read_chunk_size, 1);
    }
}
