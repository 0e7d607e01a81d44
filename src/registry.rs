//! Client registry
//!
//! Thread-safe mapping from username to the connection holding it.
//! Every operation takes the lock exactly once, so inserts, removals and
//! snapshots are atomic with respect to each other. The lock is never held
//! across an await point; delivery always iterates a snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::connection::Connection;
use crate::types::ConnectionId;

/// Point-in-time copy of the registry entries
pub type Snapshot = Vec<(String, Arc<Connection>)>;

/// Active usernames and their connections
///
/// A key exists iff its connection is registered and not yet disconnected.
#[derive(Debug, Default)]
pub struct Registry {
    clients: Mutex<HashMap<String, Arc<Connection>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Connection>>> {
        // The map is consistent after every statement, so a panic elsewhere
        // cannot leave it half-updated.
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `username` → `connection` unless the name is taken.
    ///
    /// Returns whether the insertion happened. Never replaces an entry.
    pub fn try_register(&self, username: &str, connection: &Arc<Connection>) -> bool {
        let mut clients = self.lock();
        if clients.contains_key(username) {
            return false;
        }
        clients.insert(username.to_string(), Arc::clone(connection));
        debug!("Registered '{}' (total clients: {})", username, clients.len());
        true
    }

    /// Remove `username` only if it is held by the connection `id`.
    pub fn unregister(&self, username: &str, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut clients = self.lock();
        match clients.get(username) {
            Some(connection) if connection.id() == id => {
                let removed = clients.remove(username);
                debug!("Unregistered '{}' (total clients: {})", username, clients.len());
                removed
            }
            _ => None,
        }
    }

    /// Remove whichever entry belongs to `connection`, returning its username.
    ///
    /// Uses the username bound on the connection when there is one and falls
    /// back to a scan by value otherwise.
    pub fn unregister_by_connection(&self, connection: &Connection) -> Option<String> {
        let id = connection.id();
        let mut clients = self.lock();

        if let Some(username) = connection.username() {
            if clients.get(username).is_some_and(|c| c.id() == id) {
                clients.remove(username);
                debug!("Unregistered '{}' (total clients: {})", username, clients.len());
                return Some(username.to_string());
            }
        }

        let username = clients
            .iter()
            .find(|(_, c)| c.id() == id)
            .map(|(name, _)| name.clone())?;
        clients.remove(&username);
        debug!("Unregistered '{}' (total clients: {})", username, clients.len());
        Some(username)
    }

    /// Copy of the current entries, ordered by username.
    pub fn snapshot(&self) -> Snapshot {
        let mut entries: Snapshot = self
            .lock()
            .iter()
            .map(|(name, connection)| (name.clone(), Arc::clone(connection)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn contains(&self, username: &str) -> bool {
        self.lock().contains_key(username)
    }

    /// Id of the connection currently holding `username`
    pub fn connection_id(&self, username: &str) -> Option<ConnectionId> {
        self.lock().get(username).map(|c| c.id())
    }

    pub fn usernames(&self) -> Vec<String> {
        self.snapshot().into_iter().map(|(name, _)| name).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Close every registered connection.
    ///
    /// Entries stay until each connection's own lifecycle unregisters it.
    pub fn close_all(&self) {
        for (_, connection) in self.snapshot() {
            connection.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::pipe;

    #[tokio::test]
    async fn test_register_and_snapshot() {
        let registry = Registry::new();
        let (bob, _r1, _p1) = pipe();
        let (alice, _r2, _p2) = pipe();

        assert!(registry.is_empty());
        assert!(registry.try_register("bob", &bob));
        assert!(registry.try_register("alice", &alice));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.usernames(), vec!["alice", "bob"]);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].1.id(), alice.id());
        assert_eq!(snapshot[1].1.id(), bob.id());
    }

    #[tokio::test]
    async fn test_duplicate_username_does_not_replace() {
        let registry = Registry::new();
        let (first, _r1, _p1) = pipe();
        let (second, _r2, _p2) = pipe();

        assert!(registry.try_register("alice", &first));
        assert!(!registry.try_register("alice", &second));
        assert!(!registry.try_register("alice", &first));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.connection_id("alice"), Some(first.id()));
    }

    #[tokio::test]
    async fn test_unregister_requires_matching_connection() {
        let registry = Registry::new();
        let (owner, _r1, _p1) = pipe();
        let (other, _r2, _p2) = pipe();
        registry.try_register("alice", &owner);

        assert!(registry.unregister("alice", other.id()).is_none());
        assert!(registry.contains("alice"));

        let removed = registry.unregister("alice", owner.id()).unwrap();
        assert_eq!(removed.id(), owner.id());
        assert!(!registry.contains("alice"));
    }

    #[tokio::test]
    async fn test_unregister_by_connection_with_bound_username() {
        let registry = Registry::new();
        let (connection, _r, _p) = pipe();
        registry.try_register("alice", &connection);
        connection.bind_username("alice");

        assert_eq!(registry.unregister_by_connection(&connection).as_deref(), Some("alice"));
        assert!(registry.unregister_by_connection(&connection).is_none());
    }

    #[tokio::test]
    async fn test_unregister_by_connection_scans_when_unbound() {
        let registry = Registry::new();
        let (connection, _r, _p) = pipe();
        let (other, _r2, _p2) = pipe();
        registry.try_register("alice", &connection);
        registry.try_register("bob", &other);

        assert_eq!(registry.unregister_by_connection(&connection).as_deref(), Some("alice"));
        assert_eq!(registry.usernames(), vec!["bob"]);
    }

    #[tokio::test]
    async fn test_unregistered_connection_is_not_found() {
        let registry = Registry::new();
        let (connection, _r, _p) = pipe();
        assert!(registry.unregister_by_connection(&connection).is_none());
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_later_changes() {
        let registry = Registry::new();
        let (alice, _r1, _p1) = pipe();
        let (bob, _r2, _p2) = pipe();
        registry.try_register("alice", &alice);

        let snapshot = registry.snapshot();
        registry.try_register("bob", &bob);
        registry.unregister_by_connection(&alice);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, "alice");
        assert_eq!(registry.usernames(), vec!["bob"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration_admits_exactly_one() {
        let registry = Arc::new(Registry::new());
        let mut tasks = Vec::new();
        let mut keep = Vec::new();

        for _ in 0..32 {
            let (connection, reader, peer) = pipe();
            keep.push((reader, peer));
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry.try_register("alice", &connection)
            }));
        }

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_close_all_closes_registered_connections() {
        let registry = Registry::new();
        let (alice, _r1, _p1) = pipe();
        let (bob, _r2, _p2) = pipe();
        registry.try_register("alice", &alice);
        registry.try_register("bob", &bob);

        registry.close_all();

        assert!(alice.is_closed());
        assert!(bob.is_closed());
        assert_eq!(registry.len(), 2);
    }
}
