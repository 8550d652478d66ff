/*!
 * Breaker-guarded cache service
 *
 * Every store call runs through the shared [`CircuitBreaker`] under one of
 * three keys, so an unhealthy cache backend is skipped instead of stalling
 * callers. Reads degrade to a miss; writes report the failure.
 */

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use bulwark_core_resilience::{CircuitBreaker, CircuitBreakerOverrides};

use crate::config::{BulwarkConfig, CacheSettings};
use crate::error::Result;

/// Breaker key guarding reads
pub const GET_KEY: &str = "cache:get";
/// Breaker key guarding writes
pub const SET_KEY: &str = "cache:set";
/// Breaker key guarding deletes
pub const DEL_KEY: &str = "cache:del";

/// Longest TTL honored; longer ones are clamped to this
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Errors raised by a cache backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheStoreError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    #[error("cache store error: {0}")]
    Backend(String),
}

/// Raw string key/value store with per-entry TTL
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, CacheStoreError>;

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> std::result::Result<(), CacheStoreError>;

    async fn del(&self, key: &str) -> std::result::Result<(), CacheStoreError>;
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process store. Expired entries are evicted lazily on read or by
/// [`MemoryStore::purge_expired`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of stored entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, CacheStoreError> {
        let mut entries = self.entries();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Ok(Some(entry.value.clone()))
            }
            Some(_) => {}
            None => return Ok(None),
        }

        entries.remove(key);
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> std::result::Result<(), CacheStoreError> {
        let expires_at = Instant::now()
            .checked_add(ttl.min(MAX_TTL))
            .ok_or_else(|| CacheStoreError::Backend(format!("ttl {:?} out of range", ttl)))?;
        let entry = Entry { value, expires_at };
        self.entries().insert(key.to_string(), entry);
        Ok(())
    }

    async fn del(&self, key: &str) -> std::result::Result<(), CacheStoreError> {
        self.entries().remove(key);
        Ok(())
    }
}

/// JSON cache over a [`CacheStore`], guarded by the circuit breaker
pub struct CacheService<S> {
    store: S,
    breaker: CircuitBreaker,
    settings: CacheSettings,
    get_overrides: CircuitBreakerOverrides,
    set_overrides: CircuitBreakerOverrides,
    del_overrides: CircuitBreakerOverrides,
}

impl<S> std::fmt::Debug for CacheService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("settings", &self.settings)
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}

impl<S: CacheStore> CacheService<S> {
    /// Build a service using the cache settings and per-key breaker overrides
    /// from `config`
    pub fn new(store: S, breaker: CircuitBreaker, config: &BulwarkConfig) -> Self {
        Self {
            store,
            breaker,
            settings: config.cache.clone(),
            get_overrides: config.breaker.overrides_for(GET_KEY),
            set_overrides: config.breaker.overrides_for(SET_KEY),
            del_overrides: config.breaker.overrides_for(DEL_KEY),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.settings.key_prefix, key)
    }

    /// Read and decode `key`. Any failure is logged and reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let full_key = self.namespaced(key);

        let raw = match self
            .breaker
            .execute_with(GET_KEY, &self.get_overrides, || self.store.get(&full_key))
            .await
        {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(key = %full_key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %full_key, error = %e, "Undecodable cache payload, treating as miss");
                None
            }
        }
    }

    /// Encode and store `value`; `ttl` of None uses the configured default.
    /// TTLs above [`MAX_TTL`] are clamped.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        let full_key = self.namespaced(key);
        let payload = serde_json::to_string(value)?;
        let ttl = ttl.unwrap_or_else(|| self.settings.default_ttl()).min(MAX_TTL);

        let store_key = full_key.as_str();
        self.breaker
            .execute_with(SET_KEY, &self.set_overrides, move || {
                self.store.set(store_key, payload, ttl)
            })
            .await?;

        tracing::debug!(key = %full_key, ttl_secs = ttl.as_secs(), "Cache entry written");
        Ok(())
    }

    pub async fn del(&self, key: &str) -> Result<()> {
        let full_key = self.namespaced(key);

        self.breaker
            .execute_with(DEL_KEY, &self.del_overrides, || self.store.del(&full_key))
            .await?;
        Ok(())
    }

    /// Read-through: return the cached value or run `loader` and cache its
    /// result. Loader errors propagate; a failed write after loading is
    /// logged and the loaded value is still returned.
    pub async fn get_or_load<T, F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        loader: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok(hit);
        }

        let value = loader().await?;

        if let Err(e) = self.set(key, &value, ttl).await {
            tracing::warn!(key = %key, error = %e, "Failed to cache loaded value");
        }
        Ok(value)
    }
}
