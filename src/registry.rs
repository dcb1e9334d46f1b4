//! Connection Registry
//!
//! Process-wide map from `ConnectionId` to `ConnectionHandle`.
//! Sessions insert themselves on accept and remove themselves on close;
//! every operation is a single atomic map operation, so concurrent
//! sessions never see a torn mapping.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::debug;

use crate::connection::ConnectionHandle;
use crate::types::ConnectionId;

/// Registry of live connections
#[derive(Debug)]
pub struct Registry {
    /// Live connections: ConnectionId -> ConnectionHandle
    connections: DashMap<ConnectionId, ConnectionHandle>,
    /// Next identifier to hand out
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a live connection and return its new identifier
    pub fn register(&self, handle: ConnectionHandle) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.connections.insert(id, handle);
        debug!("Registered connection {} (total {})", id, self.connections.len());
        id
    }

    /// Remove a connection
    ///
    /// Returns whether the identifier was present. Removing an absent
    /// identifier is a no-op.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.connections.remove(&id).is_some();
        if removed {
            debug!("Unregistered connection {} (total {})", id, self.connections.len());
        }
        removed
    }

    /// Find a live connection by identifier
    pub fn lookup(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    /// Snapshot of all registered identifiers, in no particular order
    pub fn list_all(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of registered connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let registry = Registry::new();
        let (handle, _rx) = ConnectionHandle::channel(4);

        let id = registry.register(handle);

        assert!(registry.lookup(id).is_some());
        assert_eq!(registry.list_all(), vec![id]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_missing() {
        let registry = Registry::new();
        assert!(registry.lookup(ConnectionId(99)).is_none());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = Registry::new();
        let (handle, _rx) = ConnectionHandle::channel(4);
        let id = registry.register(handle);

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());
        assert!(registry.lookup(id).is_none());
    }

    #[test]
    fn test_ids_never_reused() {
        let registry = Registry::new();
        let (first, _rx1) = ConnectionHandle::channel(4);
        let (second, _rx2) = ConnectionHandle::channel(4);

        let a = registry.register(first);
        registry.unregister(a);
        let b = registry.register(second);

        assert_ne!(a, b);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_yields_distinct_ids() {
        const N: usize = 64;
        let registry = Arc::new(Registry::new());

        let mut tasks = Vec::new();
        for _ in 0..N {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let (handle, rx) = ConnectionHandle::channel(4);
                (registry.register(handle), rx)
            }));
        }

        let mut ids = HashSet::new();
        let mut receivers = Vec::new();
        for task in tasks {
            let (id, rx) = task.await.unwrap();
            ids.insert(id);
            receivers.push(rx);
        }

        assert_eq!(ids.len(), N);
        let listed: HashSet<_> = registry.list_all().into_iter().collect();
        assert_eq!(listed, ids);
    }
}
