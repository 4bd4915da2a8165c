//! Caching for system and intermediate keys.
//!
//! The cache is keyed by `(id, created)` with a "latest for id" pointer and
//! guarantees at most one concurrent materialization per key: concurrent
//! callers of a missing key serialize on a per-key load token, so exactly
//! one runs the loader while the rest await and then adopt the cached
//! result. A failed load leaves nothing behind and the next caller retries.
//!
//! Ownership: the cache entry owns its key; callers receive shared
//! references. Eviction drops the cache's reference, and the key material is
//! wiped as soon as the last reference goes away.

use crate::cache::{Cache, CacheBuilder};
use crate::envelope::KeyMeta;
use crate::error::Result;
use crate::key::{is_key_invalid, CryptoKey};
use crate::policy::CryptoPolicy;
use chrono::Utc;
use log::debug;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Which tier a cache serves; used for sizing, policy, and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKeyType {
    SystemKeys,
    IntermediateKeys,
}

impl std::fmt::Display for CacheKeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKeyType::SystemKeys => write!(f, "system"),
            CacheKeyType::IntermediateKeys => write!(f, "intermediate"),
        }
    }
}

/// A cached key plus the time its envelope record was last read, which
/// bounds how stale the revoked flag may be.
#[derive(Clone)]
pub struct CachedKey {
    key: Arc<CryptoKey>,
    loaded_at: Arc<AtomicI64>,
}

impl CachedKey {
    fn new(key: CryptoKey) -> Self {
        Self {
            key: Arc::new(key),
            loaded_at: Arc::new(AtomicI64::new(Utc::now().timestamp())),
        }
    }

    fn loaded_at(&self) -> i64 {
        self.loaded_at.load(Ordering::Acquire)
    }

    /// Applies a fresh read of the envelope record: revocation propagates
    /// (one-way) and the staleness clock restarts.
    fn refresh(&self, revoked: bool) {
        self.key.set_revoked(revoked);
        self.loaded_at
            .store(Utc::now().timestamp(), Ordering::Release);
    }
}

/// Gets keys from a cache, loading them at most once per miss.
#[async_trait::async_trait]
pub trait KeyCacher: Send + Sync {
    /// Returns the cached key for `meta`, invoking `loader` exactly once
    /// across concurrent callers when it is absent or stale.
    async fn get_or_load<F, Fut>(&self, meta: KeyMeta, loader: F) -> Result<Arc<CryptoKey>>
    where
        F: FnOnce(KeyMeta) -> Fut + Send,
        Fut: Future<Output = Result<CryptoKey>> + Send;

    /// Like `get_or_load` for the latest version of `id`; an expired or
    /// revoked latest is treated as a miss so the loader can rotate.
    async fn get_or_load_latest<F, Fut>(&self, id: &str, loader: F) -> Result<Arc<CryptoKey>>
    where
        F: FnOnce(KeyMeta) -> Fut + Send,
        Fut: Future<Output = Result<CryptoKey>> + Send;

    /// Wipes all cached keys.
    async fn close(&self) -> Result<()>;
}

fn cache_key(meta: &KeyMeta) -> String {
    format!("{}-{}", meta.id, meta.created)
}

/// Bounded key cache with latest-pointer indirection and load deduplication.
pub struct KeyCache {
    cache_type: CacheKeyType,
    policy: Arc<CryptoPolicy>,
    entries: Arc<dyn Cache<String, CachedKey>>,
    latest: RwLock<HashMap<String, KeyMeta>>,
    loads: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyCache {
    pub fn new(cache_type: CacheKeyType, policy: Arc<CryptoPolicy>) -> Self {
        let (capacity, eviction_policy) = match cache_type {
            CacheKeyType::SystemKeys => (
                policy.system_key_cache_max_size,
                policy.system_key_cache_policy,
            ),
            CacheKeyType::IntermediateKeys => (
                policy.intermediate_key_cache_max_size,
                policy.intermediate_key_cache_policy,
            ),
        };

        let entries = CacheBuilder::<String, CachedKey>::new(capacity)
            .with_policy(eviction_policy)
            .with_evict_callback(move |id: &String, _entry: &CachedKey| {
                debug!("{} evict -> {}", cache_type, id);
            })
            .build();

        Self {
            cache_type,
            policy,
            entries,
            latest: RwLock::new(HashMap::new()),
            loads: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves a latest-sentinel meta through the latest pointer.
    fn resolve(&self, meta: &KeyMeta) -> Option<KeyMeta> {
        if meta.is_latest() {
            let latest = match self.latest.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            latest.get(&meta.id).cloned()
        } else {
            Some(meta.clone())
        }
    }

    /// True once the entry's revoked flag is older than the policy's check
    /// interval. Revoked entries never need a reload; revocation is final.
    fn is_reload_required(&self, entry: &CachedKey) -> bool {
        if entry.key.is_revoked() {
            return false;
        }
        let interval = self.policy.revoke_check_interval.as_secs() as i64;
        Utc::now().timestamp() - entry.loaded_at() >= interval
    }

    fn get_fresh(&self, meta: &KeyMeta) -> Option<CachedKey> {
        let concrete = self.resolve(meta)?;
        let entry = self.entries.get(&cache_key(&concrete))?;
        if self.is_reload_required(&entry) {
            debug!("{} stale -> {}", self.cache_type, concrete);
            return None;
        }
        Some(entry)
    }

    fn update_latest(&self, id: &str, candidate: &KeyMeta) {
        let mut latest = match self.latest.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match latest.get(id) {
            Some(current) if current.created >= candidate.created => {}
            _ => {
                latest.insert(id.to_string(), candidate.clone());
            }
        }
    }

    /// Merges a freshly loaded key into the cache. If the same version is
    /// already cached the existing entry wins; the duplicate is wiped and
    /// the survivor's revoked flag refreshed.
    fn write(&self, key: CryptoKey) -> Arc<CryptoKey> {
        let concrete = KeyMeta::new(key.id(), key.created());
        let id = cache_key(&concrete);

        if let Some(existing) = self.entries.get(&id) {
            existing.refresh(key.is_revoked());
            if let Err(e) = key.close() {
                debug!("failed to wipe duplicate key {}: {}", concrete, e);
            }
            return existing.key;
        }

        debug!("{} write -> {}", self.cache_type, concrete);
        let entry = CachedKey::new(key);
        let result = Arc::clone(&entry.key);
        self.entries.insert(id, entry);
        self.update_latest(&concrete.id, &concrete);
        result
    }

    fn lock_loads(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
        match self.loads.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn load_token(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut loads = self.lock_loads();
        Arc::clone(
            loads
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Drops the token once no other caller holds it, so the map stays
    /// bounded by in-flight loads.
    fn release_token(&self, id: &str) {
        let mut loads = self.lock_loads();
        if let Some(token) = loads.get(id) {
            if Arc::strong_count(token) <= 2 {
                loads.remove(id);
            }
        }
    }

    /// Removes a specific key version, wiping it.
    pub fn invalidate(&self, id: &str, created: i64) {
        self.entries.remove(&cache_key(&KeyMeta::new(id, created)));
    }
}

#[async_trait::async_trait]
impl KeyCacher for KeyCache {
    async fn get_or_load<F, Fut>(&self, meta: KeyMeta, loader: F) -> Result<Arc<CryptoKey>>
    where
        F: FnOnce(KeyMeta) -> Fut + Send,
        Fut: Future<Output = Result<CryptoKey>> + Send,
    {
        if let Some(entry) = self.get_fresh(&meta) {
            return Ok(entry.key);
        }

        let token_id = cache_key(&meta);
        let token = self.load_token(&token_id);
        let result = {
            let _guard = token.lock().await;

            // Double-check: the token winner may have populated the cache
            // while this caller waited.
            match self.get_fresh(&meta) {
                Some(entry) => Ok(entry.key),
                None => match loader(meta.clone()).await {
                    Ok(key) => Ok(self.write(key)),
                    Err(e) => Err(e),
                },
            }
        };
        self.release_token(&token_id);

        result
    }

    async fn get_or_load_latest<F, Fut>(&self, id: &str, loader: F) -> Result<Arc<CryptoKey>>
    where
        F: FnOnce(KeyMeta) -> Fut + Send,
        Fut: Future<Output = Result<CryptoKey>> + Send,
    {
        let meta = KeyMeta::latest(id);

        let usable = |entry: &CachedKey| !is_key_invalid(&entry.key, self.policy.expire_key_after);

        if let Some(entry) = self.get_fresh(&meta) {
            if usable(&entry) {
                return Ok(entry.key);
            }
        }

        let token_id = cache_key(&meta);
        let token = self.load_token(&token_id);
        let result = {
            let _guard = token.lock().await;

            match self.get_fresh(&meta).filter(usable) {
                Some(entry) => Ok(entry.key),
                None => match loader(meta.clone()).await {
                    Ok(key) => Ok(self.write(key)),
                    Err(e) => Err(e),
                },
            }
        };
        self.release_token(&token_id);

        result
    }

    async fn close(&self) -> Result<()> {
        debug!("{} cache closing", self.cache_type);
        self.entries.close();
        let mut latest = match self.latest.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        latest.clear();
        Ok(())
    }
}

/// Pass-through used when caching is disabled: every call runs the loader.
pub struct NeverCache;

#[async_trait::async_trait]
impl KeyCacher for NeverCache {
    async fn get_or_load<F, Fut>(&self, meta: KeyMeta, loader: F) -> Result<Arc<CryptoKey>>
    where
        F: FnOnce(KeyMeta) -> Fut + Send,
        Fut: Future<Output = Result<CryptoKey>> + Send,
    {
        Ok(Arc::new(loader(meta).await?))
    }

    async fn get_or_load_latest<F, Fut>(&self, id: &str, loader: F) -> Result<Arc<CryptoKey>>
    where
        F: FnOnce(KeyMeta) -> Fut + Send,
        Fut: Future<Output = Result<CryptoKey>> + Send,
    {
        Ok(Arc::new(loader(KeyMeta::latest(id)).await?))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Static dispatch over the configured cache flavor.
#[derive(Clone)]
pub enum AnyCache {
    Cached(Arc<KeyCache>),
    Never(Arc<NeverCache>),
}

#[async_trait::async_trait]
impl KeyCacher for AnyCache {
    async fn get_or_load<F, Fut>(&self, meta: KeyMeta, loader: F) -> Result<Arc<CryptoKey>>
    where
        F: FnOnce(KeyMeta) -> Fut + Send,
        Fut: Future<Output = Result<CryptoKey>> + Send,
    {
        match self {
            AnyCache::Cached(cache) => cache.get_or_load(meta, loader).await,
            AnyCache::Never(cache) => cache.get_or_load(meta, loader).await,
        }
    }

    async fn get_or_load_latest<F, Fut>(&self, id: &str, loader: F) -> Result<Arc<CryptoKey>>
    where
        F: FnOnce(KeyMeta) -> Fut + Send,
        Fut: Future<Output = Result<CryptoKey>> + Send,
    {
        match self {
            AnyCache::Cached(cache) => cache.get_or_load_latest(id, loader).await,
            AnyCache::Never(cache) => cache.get_or_load_latest(id, loader).await,
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            AnyCache::Cached(cache) => cache.close().await,
            AnyCache::Never(cache) => cache.close().await,
        }
    }
}
