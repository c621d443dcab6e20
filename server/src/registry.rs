use std::{
    collections::HashMap,
    net::{Shutdown, TcpStream},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use uuid::Uuid;

struct RegisteredClient {
    session: Uuid,
    socket:  TcpStream,
}

/// Live connections keyed by `ip:port`.
///
/// Handlers insert themselves on start and are removed when their
/// [`Registration`] drops, so an entry never outlives its handler thread.
/// The only bulk operation is [`ClientRegistry::close_all`] at shutdown.
#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<String, RegisteredClient>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A handler that panicked while holding the lock leaves the map itself
    // intact, so keep using it.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, RegisteredClient>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `socket` under `client_id`. The returned guard deregisters it.
    pub fn register(
        self: &Arc<Self>,
        client_id: String,
        session: Uuid,
        socket: TcpStream,
    ) -> Registration {
        let previous = self
            .lock()
            .insert(client_id.clone(), RegisteredClient { session, socket });
        if let Some(stale) = previous {
            tracing::warn!("Replacing stale registry entry for {} ({})", client_id, stale.session);
        }

        Registration {
            registry: Arc::clone(self),
            client_id,
            session,
        }
    }

    /// Number of registered clients
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Registered client ids, sorted
    pub fn client_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Shut down every registered socket and empty the registry. Handlers
    /// blocked in a read wake up and exit. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        for (client_id, client) in &drained {
            if let Err(e) = client.socket.shutdown(Shutdown::Both) {
                tracing::debug!("Closing {} ({}) failed: {}", client_id, client.session, e);
            }
        }
        drained.len()
    }

    fn remove(&self, client_id: &str, session: Uuid) {
        let mut clients = self.lock();
        if clients.get(client_id).is_some_and(|c| c.session == session) {
            clients.remove(client_id);
        }
    }
}

/// Membership of one handler in the registry; dropping it deregisters.
pub struct Registration {
    registry:  Arc<ClientRegistry>,
    client_id: String,
    session:   Uuid,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(&self.client_id, self.session);
    }
}
