//! Per-process connection registry.
//!
//! Maps each user to the set of their live connections on this process. The
//! map is sharded by user id, so mutating one user's set only contends with
//! users hashed to the same shard. Entries are created and removed under the
//! same shard lock as the set mutation, so an empty set is never observable.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use herald_core::{ConnectionId, UserId};

use super::connection::Connection;

/// User id → live connections on this process.
#[derive(Default)]
pub struct ConnectionRegistry {
    users: DashMap<UserId, HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to its user's entry, creating the entry if absent.
    ///
    /// Returns `false` if the connection was already registered.
    pub fn register(&self, connection: Arc<Connection>) -> bool {
        let mut entry = self.users.entry(connection.user_id).or_default();
        if entry.contains_key(&connection.id) {
            return false;
        }
        let _ = entry.insert(connection.id.clone(), connection);
        true
    }

    /// Remove a connection, dropping the user's entry once it is empty.
    ///
    /// No-op (returns `None`) for a connection that is already gone.
    pub fn unregister(&self, user_id: UserId, id: &ConnectionId) -> Option<Arc<Connection>> {
        match self.users.entry(user_id) {
            Entry::Occupied(mut entry) => {
                let removed = entry.get_mut().remove(id);
                if entry.get().is_empty() {
                    let _ = entry.remove();
                }
                removed
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Snapshot of a user's live connections.
    pub fn connections_for(&self, user_id: UserId) -> Vec<Arc<Connection>> {
        self.users
            .get(&user_id)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every connection on this process.
    ///
    /// Shard read locks are held only while copying each shard.
    pub fn all_connections(&self) -> Vec<Arc<Connection>> {
        self.users
            .iter()
            .flat_map(|entry| entry.value().values().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Whether a specific connection is registered.
    pub fn contains(&self, user_id: UserId, id: &ConnectionId) -> bool {
        self.users
            .get(&user_id)
            .is_some_and(|set| set.contains_key(id))
    }

    /// Whether the user has an entry at all.
    pub fn has_user(&self, user_id: UserId) -> bool {
        self.users.contains_key(&user_id)
    }

    /// Total live connections.
    pub fn connection_count(&self) -> usize {
        self.users.iter().map(|entry| entry.value().len()).sum()
    }

    /// Users with at least one live connection.
    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}
