use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::BytesMut;
use cmdsock_frame::encode_frame;
use cmdsock_transport::{path_identity, IpcStream, SocketIdentity, UnixDomainSocket};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::connection::ConnectionHandler;
use crate::error::{Result, ServerError};
use crate::events::{CommandEvent, EventHub};
use crate::registry::{ClientHandle, ClientId, ClientRegistry};

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Clients the frame was fully written to.
    pub delivered: usize,
    /// Clients skipped because the write failed.
    pub failed: usize,
}

/// Cloneable send handle, usable from inside event listeners.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<ClientRegistry>,
    max_payload_size: usize,
}

impl Broadcaster {
    pub(crate) fn new(registry: Arc<ClientRegistry>, max_payload_size: usize) -> Self {
        Self {
            registry,
            max_payload_size,
        }
    }

    /// Send one command to every connected client.
    ///
    /// The frame is encoded once. A client whose write fails is logged,
    /// skipped and disconnected, since part of the frame may already be on
    /// its stream; the remaining clients still receive the frame. Only a
    /// payload that cannot be framed is an error.
    pub fn send_command(&self, command_id: u32, payload: &[u8]) -> Result<BroadcastReport> {
        if payload.len() > self.max_payload_size {
            return Err(cmdsock_frame::FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_size,
            }
            .into());
        }

        let mut wire = BytesMut::new();
        encode_frame(command_id, payload, &mut wire)?;

        let mut report = BroadcastReport::default();
        for client in self.registry.snapshot() {
            match client.send_encoded(&wire) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        client = %client.id(),
                        command_id,
                        error = %err,
                        "write to client failed; disconnecting"
                    );
                }
            }
        }

        debug!(
            command_id,
            len = payload.len(),
            delivered = report.delivered,
            failed = report.failed,
            "command broadcast"
        );
        Ok(report)
    }

    pub fn connected_clients(&self) -> usize {
        self.registry.count()
    }
}

struct Shared {
    config: ServerConfig,
    events: Arc<EventHub>,
    registry: Arc<ClientRegistry>,
    running: AtomicBool,
    next_client_id: AtomicU64,
}

impl Shared {
    /// Register an accepted stream and start its reader thread.
    fn attach(&self, stream: IpcStream) -> Result<ClientId> {
        let id = ClientId::new(self.next_client_id.fetch_add(1, Ordering::Relaxed));
        let mut reader = stream.try_clone()?;
        let client = Arc::new(ClientHandle::new(id, stream, &self.config.frame)?);

        if let Some((uid, gid, pid)) = client.peer_credentials() {
            debug!(client = %id, uid, gid, pid, "peer credentials");
        }

        self.registry.register(Arc::clone(&client));

        let mut handler = ConnectionHandler::new(id, Arc::clone(&self.events), &self.config);
        let registry = Arc::clone(&self.registry);
        let spawned = thread::Builder::new()
            .name(format!("cmdsock-{id}"))
            .spawn(move || {
                match handler.run(&mut reader) {
                    Ok(()) => debug!(client = %id, "client closed connection"),
                    Err(err) => debug!(client = %id, error = %err, "client read failed"),
                }
                registry.unregister(id);
            });

        if let Err(source) = spawned {
            client.close();
            self.registry.unregister(id);
            return Err(ServerError::Spawn {
                what: "connection",
                source,
            });
        }

        // Lost a race with shutdown: it may have closed the others already.
        if !self.running.load(Ordering::SeqCst) {
            client.close();
        }

        Ok(id)
    }
}

fn accept_loop(socket: UnixDomainSocket, shared: Arc<Shared>) {
    loop {
        let stream = match socket.accept() {
            Ok(stream) => stream,
            Err(err) => {
                if !shared.running.load(Ordering::SeqCst) {
                    break;
                }
                warn!(error = %err, "accept failed");
                thread::sleep(ACCEPT_RETRY_DELAY);
                continue;
            }
        };

        if !shared.running.load(Ordering::SeqCst) {
            // The shutdown wake-up connection.
            let _ = stream.shutdown();
            break;
        }

        if let Err(err) = shared.attach(stream) {
            warn!(error = %err, "failed to attach client");
        }
    }
    debug!(path = ?socket.path(), "accept loop stopped");
}

/// Listening endpoint plus broadcast API for the command channel.
///
/// Dropping the server shuts it down.
pub struct CommandServer {
    shared: Arc<Shared>,
    path: PathBuf,
    identity: Option<SocketIdentity>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl CommandServer {
    /// Bind `path` with default settings and start accepting clients.
    pub fn start_at(path: impl AsRef<Path>) -> Result<Self> {
        Self::start(ServerConfig::new(path))
    }

    /// Bind the configured socket and start accepting clients.
    ///
    /// A stale socket left at the path by an earlier run is removed first.
    pub fn start(config: ServerConfig) -> Result<Self> {
        let path = config.socket_path.clone();
        let socket = UnixDomainSocket::bind_with_mode(&path, config.socket_mode).map_err(
            |source| ServerError::Bind {
                path: path.clone(),
                source,
            },
        )?;
        let identity = socket.identity();

        let events = Arc::new(EventHub::new());
        let shared = Arc::new(Shared {
            registry: Arc::new(ClientRegistry::new(Arc::clone(&events))),
            events,
            config,
            running: AtomicBool::new(true),
            next_client_id: AtomicU64::new(1),
        });

        let accept_shared = Arc::clone(&shared);
        let accept_thread = thread::Builder::new()
            .name("cmdsock-accept".to_string())
            .spawn(move || accept_loop(socket, accept_shared))
            .map_err(|source| ServerError::Spawn {
                what: "accept",
                source,
            })?;

        info!(?path, "command server started");

        Ok(Self {
            shared,
            path,
            identity,
            accept_thread: Mutex::new(Some(accept_thread)),
        })
    }

    /// Subscribe to commands from any client.
    pub fn on_command<F>(&self, listener: F)
    where
        F: Fn(&CommandEvent) + Send + Sync + 'static,
    {
        self.shared.events.on_command(listener);
    }

    /// Subscribe to the last connected client going away.
    pub fn on_all_clients_disconnected<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.events.on_all_clients_disconnected(listener);
    }

    /// Broadcast a command to every connected client.
    pub fn send_command(&self, command_id: u32, payload: &[u8]) -> Result<BroadcastReport> {
        self.broadcaster().send_command(command_id, payload)
    }

    /// A send handle that can be moved into listeners.
    pub fn broadcaster(&self) -> Broadcaster {
        Broadcaster::new(
            Arc::clone(&self.shared.registry),
            self.shared.config.frame.max_payload_size,
        )
    }

    pub fn connected_clients(&self) -> usize {
        self.shared.registry.count()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Stop accepting and close every client connection.
    ///
    /// The socket path is left in place; the next `start` on the same path
    /// removes it. If another server has already taken the path over, the
    /// accept thread cannot be woken and is left detached. Clients are
    /// unregistered by their reader threads as they observe the close, so the
    /// all-clients-disconnected listeners still run.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let accept_thread = self
            .accept_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // Waking by path only reaches our listener while the path is still ours.
        if self.identity.is_some() && path_identity(&self.path) == self.identity {
            match UnixDomainSocket::connect(&self.path) {
                Ok(_wake) => {
                    if let Some(handle) = accept_thread {
                        let _ = handle.join();
                    }
                }
                Err(err) => {
                    debug!(error = %err, "could not wake accept loop; leaving it detached");
                }
            }
        } else {
            debug!(
                path = ?self.path,
                "socket path now belongs to another listener; leaving accept loop detached"
            );
        }

        let clients = self.shared.registry.snapshot();
        for client in &clients {
            client.close();
        }

        info!(path = ?self.path, closed = clients.len(), "command server shut down");
    }
}

impl Drop for CommandServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CommandServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandServer")
            .field("path", &self.path)
            .field("running", &self.is_running())
            .field("connected_clients", &self.connected_clients())
            .finish()
    }
}
