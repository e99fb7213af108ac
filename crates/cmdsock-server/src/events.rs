//! Subscription points exposed to the application layer.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use tracing::{debug, error};

use crate::registry::ClientId;

/// A command received from one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEvent {
    /// The client the command arrived from.
    pub client_id: ClientId,
    /// Application-defined command id.
    pub command_id: u32,
    /// Command payload, possibly empty.
    pub payload: Bytes,
}

type CommandListener = Arc<dyn Fn(&CommandEvent) + Send + Sync>;
type DisconnectListener = Arc<dyn Fn() + Send + Sync>;

/// Ordered listener lists for command and all-clients-disconnected events.
///
/// Every registered listener is invoked, in registration order. Listeners run
/// on the thread that produced the event (a connection's reader thread) and
/// may call back into the server, including registering more listeners.
#[derive(Default)]
pub struct EventHub {
    command: RwLock<Vec<CommandListener>>,
    all_disconnected: RwLock<Vec<DisconnectListener>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every command received from any client.
    pub fn on_command<F>(&self, listener: F)
    where
        F: Fn(&CommandEvent) + Send + Sync + 'static,
    {
        self.command
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Subscribe to the moment the last connected client goes away.
    pub fn on_all_clients_disconnected<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.all_disconnected
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Deliver `event` to every command listener. Returns how many ran.
    pub fn dispatch_command(&self, event: &CommandEvent) -> usize {
        let listeners = self
            .command
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        debug!(
            client = %event.client_id,
            command_id = event.command_id,
            len = event.payload.len(),
            listeners = listeners.len(),
            "dispatching command"
        );

        for listener in &listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(
                    client = %event.client_id,
                    command_id = event.command_id,
                    "command listener panicked"
                );
            }
        }
        listeners.len()
    }

    /// Notify every all-clients-disconnected listener. Returns how many ran.
    pub fn notify_all_disconnected(&self) -> usize {
        let listeners = self
            .all_disconnected
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for listener in &listeners {
            if catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
                error!("disconnect listener panicked");
            }
        }
        listeners.len()
    }

    pub fn command_listener_count(&self) -> usize {
        self.command
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("command_listeners", &self.command_listener_count())
            .finish_non_exhaustive()
    }
}
