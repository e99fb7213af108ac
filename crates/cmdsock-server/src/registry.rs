//! The set of currently connected clients.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cmdsock_frame::{FrameConfig, FrameError, FrameWriter};
use cmdsock_transport::IpcStream;
use tracing::{debug, info};

use crate::error::Result;
use crate::events::EventHub;

/// Identity of one accepted connection. Never reused within a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Outbound side of one connected client.
///
/// Writes are serialized per client; a separate stream handle allows the
/// connection to be closed while a write is blocked.
pub struct ClientHandle {
    id: ClientId,
    writer: Mutex<FrameWriter<IpcStream>>,
    control: IpcStream,
}

impl ClientHandle {
    /// Wrap an accepted stream, applying the configured write timeout.
    pub fn new(id: ClientId, stream: IpcStream, config: &FrameConfig) -> Result<Self> {
        let control = stream.try_clone()?;
        let writer = FrameWriter::with_config_ipc(stream, config.clone())?;
        Ok(Self {
            id,
            writer: Mutex::new(writer),
            control,
        })
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Write one already-encoded frame to this client.
    ///
    /// A failed write may leave part of the frame on the stream, so the
    /// connection is closed; the reader thread then unregisters the client.
    pub fn send_encoded(&self, wire: &[u8]) -> std::result::Result<(), FrameError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let result = writer.write_encoded(wire);
        if result.is_err() {
            self.close();
        }
        result
    }

    /// Close the transport. The client's reader thread then sees EOF.
    pub fn close(&self) {
        if let Err(err) = self.control.shutdown() {
            debug!(client = %self.id, error = %err, "closing client stream failed");
        }
    }

    /// `(uid, gid, pid)` of the connected process, where the platform exposes it.
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        self.control.peer_credentials()
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle").field("id", &self.id).finish()
    }
}

/// Live client set.
///
/// Membership changes and the empty check that follows them happen under a
/// single lock, so exactly one `unregister` observes each transition to
/// empty, no matter how many clients leave at once.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<ClientId, Arc<ClientHandle>>>,
    events: Arc<EventHub>,
}

impl ClientRegistry {
    pub fn new(events: Arc<EventHub>) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            events,
        }
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<ClientId, Arc<ClientHandle>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a freshly accepted client.
    pub fn register(&self, client: Arc<ClientHandle>) {
        let id = client.id();
        let count = {
            let mut clients = self.clients();
            clients.insert(id, client);
            clients.len()
        };
        info!(client = %id, connected = count, "client connected");
    }

    /// Remove a client. Returns `true` when this call emptied the registry,
    /// in which case the all-clients-disconnected listeners have been run.
    ///
    /// Listeners run after the lock is released, so by the time they are
    /// called a new client may already have registered. Unknown ids are
    /// ignored.
    pub fn unregister(&self, id: ClientId) -> bool {
        let (removed, now_empty, count) = {
            let mut clients = self.clients();
            let removed = clients.remove(&id).is_some();
            (removed, removed && clients.is_empty(), clients.len())
        };

        if !removed {
            debug!(client = %id, "unregister for unknown client ignored");
            return false;
        }

        info!(client = %id, connected = count, "client disconnected");
        if now_empty {
            debug!("last client left; notifying listeners");
            self.events.notify_all_disconnected();
        }
        now_empty
    }

    /// Number of live clients.
    pub fn count(&self) -> usize {
        self.clients().len()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients().contains_key(&id)
    }

    /// Handles of every live client, ordered by id.
    pub fn snapshot(&self) -> Vec<Arc<ClientHandle>> {
        let mut clients: Vec<_> = self.clients().values().cloned().collect();
        clients.sort_by_key(|client| client.id());
        clients
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    fn handle(id: u64) -> (Arc<ClientHandle>, UnixStream) {
        let (server_end, client_end) = UnixStream::pair().unwrap();
        let handle = ClientHandle::new(
            ClientId::new(id),
            IpcStream::from(server_end),
            &FrameConfig::default(),
        )
        .unwrap();
        (Arc::new(handle), client_end)
    }

    fn registry_with_counter() -> (ClientRegistry, Arc<AtomicUsize>) {
        let events = Arc::new(EventHub::new());
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = Arc::clone(&fired);
            events.on_all_clients_disconnected(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }
        (ClientRegistry::new(events), fired)
    }

    #[test]
    fn count_tracks_register_and_unregister() {
        let (registry, _) = registry_with_counter();
        let (a, _ea) = handle(1);
        let (b, _eb) = handle(2);

        assert_eq!(registry.count(), 0);
        registry.register(a);
        registry.register(b);
        assert_eq!(registry.count(), 2);
        assert!(registry.contains(ClientId::new(1)));

        registry.unregister(ClientId::new(1));
        assert_eq!(registry.count(), 1);
        assert!(!registry.contains(ClientId::new(1)));
    }

    #[test]
    fn only_last_disconnect_notifies() {
        let (registry, fired) = registry_with_counter();
        let mut ends = Vec::new();
        for id in 1..=3 {
            let (client, end) = handle(id);
            registry.register(client);
            ends.push(end);
        }

        assert!(!registry.unregister(ClientId::new(2)));
        assert!(!registry.unregister(ClientId::new(1)));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        assert!(registry.unregister(ClientId::new(3)));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn each_transition_to_empty_notifies_once() {
        let (registry, fired) = registry_with_counter();

        for round in 0..3u64 {
            let (client, _end) = handle(round + 10);
            registry.register(client);
            registry.unregister(ClientId::new(round + 10));
        }

        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unknown_or_repeated_unregister_is_ignored() {
        let (registry, fired) = registry_with_counter();
        assert!(!registry.unregister(ClientId::new(99)));

        let (client, _end) = handle(1);
        registry.register(client);
        assert!(registry.unregister(ClientId::new(1)));
        assert!(!registry.unregister(ClientId::new(1)));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_disconnects_notify_exactly_once() {
        let (registry, fired) = registry_with_counter();
        let registry = Arc::new(registry);
        let mut ends = Vec::new();
        for id in 0..32 {
            let (client, end) = handle(id);
            registry.register(client);
            ends.push(end);
        }

        let workers: Vec<_> = (0..32)
            .map(|id| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.unregister(ClientId::new(id)))
            })
            .collect();
        let emptied = workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .filter(|emptied| *emptied)
            .count();

        assert_eq!(emptied, 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn snapshot_is_ordered_by_id() {
        let (registry, _) = registry_with_counter();
        let mut ends = Vec::new();
        for id in [5, 1, 3] {
            let (client, end) = handle(id);
            registry.register(client);
            ends.push(end);
        }

        let ids: Vec<_> = registry
            .snapshot()
            .iter()
            .map(|client| client.id().as_u64())
            .collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[test]
    fn close_ends_the_client_stream() {
        use std::io::Read;

        let (client, mut end) = handle(1);
        client.close();

        let mut buf = [0u8; 4];
        assert_eq!(end.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn client_id_display() {
        assert_eq!(ClientId::new(7).to_string(), "client-7");
    }

    #[test]
    fn failed_write_closes_the_client() {
        use std::io::Read;
        use std::time::Duration;

        let (server_end, mut end) = UnixStream::pair().unwrap();
        let config = FrameConfig {
            write_timeout: Some(Duration::from_millis(20)),
            ..FrameConfig::default()
        };
        let client =
            ClientHandle::new(ClientId::new(1), IpcStream::from(server_end), &config).unwrap();

        // Peer is not reading: the socket buffer fills and the write times out
        // partway through the frame.
        let mut wire = bytes::BytesMut::new();
        cmdsock_frame::encode_frame(1, &vec![0u8; 4 * 1024 * 1024], &mut wire).unwrap();
        assert!(client.send_encoded(&wire).is_err());

        end.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut received = 0usize;
        let mut buf = [0u8; 64 * 1024];
        loop {
            match end.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => received += n,
                Err(err) => panic!("expected EOF after a failed write, got {err}"),
            }
        }
        assert!(received < wire.len());
    }

    #[test]
    fn listener_may_register_while_being_notified() {
        let events = Arc::new(EventHub::new());
        let registry = Arc::new(ClientRegistry::new(Arc::clone(&events)));
        let seen_count = Arc::new(AtomicUsize::new(usize::MAX));
        let (late, _late_end) = handle(2);
        let spare = Arc::new(Mutex::new(Some(late)));
        {
            let registry = Arc::clone(&registry);
            let seen_count = Arc::clone(&seen_count);
            events.on_all_clients_disconnected(move || {
                if let Some(client) = spare.lock().unwrap().take() {
                    registry.register(client);
                }
                seen_count.store(registry.count(), Ordering::SeqCst);
            });
        }

        let (client, _end) = handle(1);
        registry.register(client);
        assert!(registry.unregister(ClientId::new(1)));

        assert_eq!(seen_count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.count(), 1);
    }
}
