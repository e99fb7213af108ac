use std::io::ErrorKind;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

/// Well-known path the command channel listens on when none is configured.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/.sock.netflix";

/// Filesystem-path Unix domain socket listener.
///
/// Binding removes a stale socket left behind by a previous run. Dropping the
/// listener does NOT remove the path again: cleanup happens at startup only.
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
    created_identity: Option<SocketIdentity>,
}

impl UnixDomainSocket {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on `path` with [`DEFAULT_SOCKET_MODE`](Self::DEFAULT_SOCKET_MODE).
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen on `path` with an explicit permission mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        remove_stale_socket(&path)?;

        let listener = UnixListener::bind(&path).map_err(|e| TransportError::Bind {
            path: path.clone(),
            source: e,
        })?;

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
            TransportError::Bind {
                path: path.clone(),
                source: e,
            }
        })?;

        let created_identity = path_identity(&path);
        info!(?path, "listening on unix domain socket");

        Ok(Self {
            listener,
            path,
            created_identity,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<IpcStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!("accepted connection");
        Ok(IpcStream::from(stream))
    }

    /// Connect to a listening Unix domain socket (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<IpcStream> {
        let path = path.as_ref();
        let stream =
            std::os::unix::net::UnixStream::connect(path).map_err(|e| TransportError::Connect {
                path: path.to_path_buf(),
                source: e,
            })?;
        debug!(?path, "connected to unix domain socket");
        Ok(IpcStream::from(stream))
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identity of the socket file this listener created.
    pub fn identity(&self) -> Option<SocketIdentity> {
        self.created_identity
    }

    /// Whether the path still names the socket file this listener created.
    ///
    /// False once a later bind on the same path replaced it.
    pub fn owns_path(&self) -> bool {
        self.created_identity.is_some() && path_identity(&self.path) == self.created_identity
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "unix-domain-socket"
    }
}

/// Filesystem identity of a socket path.
///
/// Inode numbers can be recycled as soon as a file is unlinked, so the change
/// time is part of the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketIdentity {
    pub dev: u64,
    pub ino: u64,
    pub ctime: i64,
    pub ctime_nsec: i64,
}

/// Identity of whatever currently sits at `path`, without following symlinks.
pub fn path_identity(path: impl AsRef<Path>) -> Option<SocketIdentity> {
    std::fs::symlink_metadata(path)
        .ok()
        .map(|metadata| SocketIdentity {
            dev: metadata.dev(),
            ino: metadata.ino(),
            ctime: metadata.ctime(),
            ctime_nsec: metadata.ctime_nsec(),
        })
}

/// Remove a socket left at `path` by a previous listener.
///
/// Missing paths and permission failures are ignored; bind reports the real
/// problem if the path is still unusable. Regular files are never removed.
fn remove_stale_socket(path: &Path) -> Result<()> {
    let bind_error = |source: std::io::Error| TransportError::Bind {
        path: path.to_path_buf(),
        source,
    };

    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if is_ignorable_cleanup_error(&err) => return Ok(()),
        Err(err) => return Err(bind_error(err)),
    };

    if !metadata.file_type().is_socket() {
        return Err(bind_error(std::io::Error::new(
            ErrorKind::AlreadyExists,
            "existing path is not a unix socket",
        )));
    }

    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(?path, "removed stale socket");
            Ok(())
        }
        Err(err) if is_ignorable_cleanup_error(&err) => {
            debug!(?path, error = %err, "could not remove stale socket; ignoring");
            Ok(())
        }
        Err(err) => Err(bind_error(err)),
    }
}

fn is_ignorable_cleanup_error(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::NotFound | ErrorKind::PermissionDenied
    )
}

impl std::fmt::Debug for UnixDomainSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixDomainSocket")
            .field("path", &self.path)
            .field("created_identity", &self.created_identity)
            .finish()
    }
}
