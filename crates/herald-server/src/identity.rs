//! Identity store: does a claimed user exist?

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use herald_core::UserId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tracing::debug;

use crate::cache::CacheService;

/// A user known to the identity store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Primary key.
    pub id: UserId,
}

/// Identity store failures. A missing user is not an error.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Query or pool failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// The store is not reachable.
    #[error("identity store unavailable: {0}")]
    Unavailable(String),
}

/// Lookup of users by primary key.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Find a user, `Ok(None)` if no such user exists.
    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>, IdentityError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Postgres
// ─────────────────────────────────────────────────────────────────────────────

/// Pool sizing for [`PgIdentityStore::connect`].
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Connections kept open while idle.
    pub min_connections: u32,
    /// Upper bound on open connections.
    pub max_connections: u32,
    /// Wait for a pooled connection before failing.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 10,
            max_connections: 50,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Users table in Postgres.
#[derive(Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    /// Open a pool against `url`.
    pub async fn connect(url: &str, config: &PoolConfig) -> Result<Self, IdentityError> {
        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>, IdentityError> {
        let row: Option<i64> = sqlx::query_scalar("SELECT id::BIGINT FROM users WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|raw| UserId::new(raw).ok()).map(|id| User { id }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory
// ─────────────────────────────────────────────────────────────────────────────

/// Process-local user set for tests and single-process development.
#[derive(Default)]
pub struct InMemoryIdentityStore {
    users: RwLock<HashMap<UserId, User>>,
}

impl InMemoryIdentityStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store containing `ids`.
    pub fn with_users(ids: impl IntoIterator<Item = UserId>) -> Self {
        let store = Self::new();
        for id in ids {
            store.insert(id);
        }
        store
    }

    /// Add a user.
    pub fn insert(&self, id: UserId) {
        let _ = self.users.write().insert(id, User { id });
    }

    /// Remove a user.
    pub fn remove(&self, id: UserId) -> bool {
        self.users.write().remove(&id).is_some()
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>, IdentityError> {
        Ok(self.users.read().get(&id).cloned())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cached
// ─────────────────────────────────────────────────────────────────────────────

/// Read-through cache in front of another store.
///
/// Only positive lookups are cached, so a newly created user is visible on
/// the next attempt.
pub struct CachedIdentityStore {
    inner: Arc<dyn IdentityStore>,
    cache: CacheService,
    ttl: Duration,
}

impl CachedIdentityStore {
    /// Wrap `inner`, caching hits for `ttl`.
    pub fn new(inner: Arc<dyn IdentityStore>, cache: CacheService, ttl: Duration) -> Self {
        Self { inner, cache, ttl }
    }

    /// Cache key for a user record.
    pub fn cache_key(id: UserId) -> String {
        format!("user:{id}")
    }
}

#[async_trait]
impl IdentityStore for CachedIdentityStore {
    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>, IdentityError> {
        let key = Self::cache_key(id);
        if let Some(user) = self.cache.get::<User>(&key).await {
            return Ok(Some(user));
        }

        let found = self.inner.find_user_by_id(id).await?;
        if let Some(user) = &found {
            self.cache.set(&key, user, Some(self.ttl)).await;
        } else {
            debug!(user_id = %id, "user not found, not caching");
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn user(n: i64) -> UserId {
        UserId::new(n).unwrap()
    }

    struct CountingStore {
        inner: InMemoryIdentityStore,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IdentityStore for CountingStore {
        async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>, IdentityError> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.find_user_by_id(id).await
        }
    }

    #[tokio::test]
    async fn in_memory_finds_inserted_users() {
        let store = InMemoryIdentityStore::with_users([user(1), user(2)]);
        assert_eq!(
            store.find_user_by_id(user(1)).await.unwrap(),
            Some(User { id: user(1) })
        );
        assert_matches!(store.find_user_by_id(user(3)).await, Ok(None));
        assert!(store.remove(user(1)));
        assert_matches!(store.find_user_by_id(user(1)).await, Ok(None));
    }

    #[tokio::test]
    async fn cached_store_hits_inner_once_for_known_user() {
        let counting = Arc::new(CountingStore {
            inner: InMemoryIdentityStore::with_users([user(7)]),
            calls: AtomicUsize::new(0),
        });
        let cached = CachedIdentityStore::new(
            counting.clone(),
            CacheService::in_memory(),
            Duration::from_secs(60),
        );

        for _ in 0..3 {
            assert!(cached.find_user_by_id(user(7)).await.unwrap().is_some());
        }
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cached_store_does_not_cache_misses() {
        let counting = Arc::new(CountingStore {
            inner: InMemoryIdentityStore::new(),
            calls: AtomicUsize::new(0),
        });
        let cached = CachedIdentityStore::new(
            counting.clone(),
            CacheService::in_memory(),
            Duration::from_secs(60),
        );

        assert!(cached.find_user_by_id(user(5)).await.unwrap().is_none());
        counting.inner.insert(user(5));
        assert!(cached.find_user_by_id(user(5)).await.unwrap().is_some());
        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cache_key_format() {
        assert_eq!(CachedIdentityStore::cache_key(user(12)), "user:12");
    }

    #[test]
    fn user_serializes_with_numeric_id() {
        let json = serde_json::to_string(&User { id: user(3) }).unwrap();
        assert_eq!(json, r#"{"id":3}"#);
    }
}
