//! Open primary connections, indexed by id and by controller username

use std::collections::{HashMap, HashSet};

use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

use super::handle::ConnectionHandle;

#[derive(Default)]
struct Inner {
    connections: HashMap<Uuid, ConnectionHandle>,
    by_username: HashMap<String, HashSet<Uuid>>,
}

/// Connection registry
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
    inserted: Notify,
}

impl ConnectionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection
    pub async fn insert(&self, handle: ConnectionHandle) {
        self.inner
            .write()
            .await
            .connections
            .insert(handle.id(), handle);
        self.inserted.notify_one();
    }

    /// Index an authenticated connection under its username
    pub async fn authenticate(&self, id: Uuid, username: &str) {
        self.inner
            .write()
            .await
            .by_username
            .entry(username.to_string())
            .or_default()
            .insert(id);
    }

    /// Remove a connection from both indexes
    pub async fn remove(&self, id: Uuid) -> Option<ConnectionHandle> {
        let mut inner = self.inner.write().await;
        let handle = inner.connections.remove(&id)?;
        if let Some(username) = handle.username() {
            if let Some(ids) = inner.by_username.get_mut(username) {
                ids.remove(&id);
                if ids.is_empty() {
                    inner.by_username.remove(username);
                }
            }
        }
        Some(handle)
    }

    /// Look up a connection
    pub async fn get(&self, id: Uuid) -> Option<ConnectionHandle> {
        self.inner.read().await.connections.get(&id).cloned()
    }

    /// Connections authenticated as `username`
    pub async fn by_username(&self, username: &str) -> Vec<ConnectionHandle> {
        let inner = self.inner.read().await;
        inner
            .by_username
            .get(username)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.connections.get(id).cloned())
            .collect()
    }

    /// Every open connection
    pub async fn all(&self) -> Vec<ConnectionHandle> {
        self.inner.read().await.connections.values().cloned().collect()
    }

    /// Number of open connections
    pub async fn len(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// True if nothing is open
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.connections.is_empty()
    }

    /// Wait for the next insert
    pub async fn wait_for_insert(&self) {
        self.inserted.notified().await;
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry").finish_non_exhaustive()
    }
}
