//! Key/value cache with TTLs.
//!
//! [`CacheService`] is the typed front end; a [`CacheBackend`] stores raw
//! JSON strings. Backend failures never reach callers: reads degrade to a
//! miss and writes to a no-op, with a warning logged.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use globset::{Glob, GlobMatcher};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

/// Default TTL when the caller passes none.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Errors raised by cache backends.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Redis command or connection failure.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    /// Value could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Key pattern is not a valid glob.
    #[error("invalid key pattern: {0}")]
    Pattern(#[from] globset::Error),
}

/// Raw string storage with expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch the raw value for `key`.
    async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError>;
    /// Store `value` under `key` for `ttl`.
    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
    /// Remove `key`.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    /// Remove every key matching the glob `pattern`, returning how many.
    async fn clear_by_pattern(&self, pattern: &str) -> Result<usize, CacheError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Redis backend
// ─────────────────────────────────────────────────────────────────────────────

/// Redis-backed cache using a reconnecting connection manager.
#[derive(Clone)]
pub struct RedisCacheBackend {
    manager: ConnectionManager,
}

impl RedisCacheBackend {
    /// Connect to Redis.
    pub async fn connect(client: redis::Client) -> Result<Self, CacheError> {
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.manager.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn clear_by_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        let mut conn = self.manager.clone();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut conn)
            .await?;
        if !keys.is_empty() {
            conn.del::<_, ()>(&keys).await?;
        }
        Ok(keys.len())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory backend
// ─────────────────────────────────────────────────────────────────────────────

/// Process-local cache for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryCacheBackend {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryCacheBackend {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Live (unexpired) entry count.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.value().1 > now).count()
    }

    /// Whether no live entries remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn glob_matcher(pattern: &str) -> Result<GlobMatcher, CacheError> {
    Ok(Glob::new(pattern)?.compile_matcher())
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(key)
            .filter(|e| e.value().1 > now)
            .map(|e| e.value().0.clone());
        if hit.is_none() {
            let _ = self.entries.remove_if(key, |_, (_, expires)| *expires <= now);
        }
        Ok(hit)
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let _ = self
            .entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let _ = self.entries.remove(key);
        Ok(())
    }

    async fn clear_by_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        let matcher = glob_matcher(pattern)?;
        let before = self.entries.len();
        self.entries.retain(|key, _| !matcher.is_match(key));
        Ok(before - self.entries.len())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Typed service
// ─────────────────────────────────────────────────────────────────────────────

/// Typed JSON cache over a [`CacheBackend`].
#[derive(Clone)]
pub struct CacheService {
    backend: Arc<dyn CacheBackend>,
    default_ttl: Duration,
}

impl CacheService {
    /// Create a service with the given default TTL.
    pub fn new(backend: Arc<dyn CacheBackend>, default_ttl: Duration) -> Self {
        Self {
            backend,
            default_ttl,
        }
    }

    /// In-memory service with [`DEFAULT_TTL`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheBackend::new()), DEFAULT_TTL)
    }

    /// Read and decode `key`. Errors are logged and read as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.backend.get_raw(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    debug!(key, "cache hit");
                    Some(value)
                }
                Err(e) => {
                    warn!(key, error = %e, "cache value failed to decode");
                    None
                }
            },
            Ok(None) => {
                debug!(key, "cache miss");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "cache get failed");
                None
            }
        }
    }

    /// Encode and store `value`; `ttl` defaults to the service default.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "cache value failed to encode");
                return;
            }
        };
        let ttl = ttl.unwrap_or(self.default_ttl);
        if let Err(e) = self.backend.set_raw(key, raw, ttl).await {
            warn!(key, error = %e, "cache set failed");
        }
    }

    /// Remove `key`.
    pub async fn delete(&self, key: &str) {
        if let Err(e) = self.backend.delete(key).await {
            warn!(key, error = %e, "cache delete failed");
        }
    }

    /// Return the cached value or compute, store and return it.
    ///
    /// Errors from `fetch` propagate and nothing is stored.
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok(hit);
        }
        let value = fetch().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    /// Remove every key matching `pattern`. Returns 0 on failure.
    pub async fn clear_by_pattern(&self, pattern: &str) -> usize {
        match self.backend.clear_by_pattern(pattern).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(pattern, error = %e, "cache clear failed");
                0
            }
        }
    }
}
