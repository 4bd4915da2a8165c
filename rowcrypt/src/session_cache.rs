//! Session caching with reference counting.
//!
//! Cached sessions are shared across callers: each lookup increments a usage
//! count and each session close releases it. Eviction waits until the count
//! drains, then runs the session's full close path (wiping any per-session
//! intermediate key cache). Idle sessions expire lazily on lookup after the
//! policy's session cache duration.

use crate::cache::{Cache, CacheBuilder, CachePolicy};
use crate::envelope::DataRowRecord;
use crate::error::Result;
use crate::session::EnvelopeSession;
use crate::Encryption;

use async_trait::async_trait;
use log::warn;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Cache of reusable sessions keyed by partition id.
pub trait SessionCache: Send + Sync {
    /// Returns the cached session for the partition, creating it on demand,
    /// and takes a usage lease on it.
    fn get(&self, id: &str) -> Result<Arc<EnvelopeSession>>;

    /// Number of cached sessions.
    fn count(&self) -> usize;

    /// Evicts all sessions, closing each once its users are done.
    fn close(&self);
}

/// Wraps an encryption instance with a usage count so eviction can wait for
/// in-flight users before closing it.
pub struct SharedEncryption {
    inner: Arc<dyn Encryption>,
    created: Instant,
    usage: Mutex<usize>,
    cond: Condvar,
}

impl SharedEncryption {
    pub fn new(encryption: Arc<dyn Encryption>) -> Self {
        Self {
            inner: encryption,
            created: Instant::now(),
            usage: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    /// Takes a usage lease; released by the session's `close`.
    pub fn increment_usage(&self) {
        if let Ok(mut usage) = self.usage.lock() {
            *usage += 1;
        }
    }

    /// Waits for all users to release their leases, then closes the
    /// underlying encryption.
    pub fn remove(&self) {
        let guard = self.usage.lock();
        if let Ok(mut usage) = guard {
            while *usage > 0 {
                usage = match self.cond.wait(usage) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
        }

        if let Err(e) = futures::executor::block_on(self.inner.close()) {
            warn!("error closing evicted session: {}", e);
        }
    }
}

#[async_trait]
impl Encryption for SharedEncryption {
    async fn encrypt_payload(&self, data: &[u8]) -> Result<DataRowRecord> {
        self.inner.encrypt_payload(data).await
    }

    async fn decrypt_data_row_record(&self, drr: &DataRowRecord) -> Result<Vec<u8>> {
        self.inner.decrypt_data_row_record(drr).await
    }

    /// Releases one usage lease; the underlying encryption closes only when
    /// the cache evicts this entry.
    async fn close(&self) -> Result<()> {
        if let Ok(mut usage) = self.usage.lock() {
            *usage = usage.saturating_sub(1);
        }
        self.cond.notify_all();
        Ok(())
    }

    fn as_any(&self) -> &(dyn std::any::Any + Send + Sync) {
        self
    }
}

impl fmt::Debug for SharedEncryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedEncryption")
            .field("created", &self.created)
            .finish()
    }
}

type SessionLoaderFn = Arc<dyn Fn(&str) -> Result<Arc<EnvelopeSession>> + Send + Sync>;

struct CacheWrapper {
    loader: SessionLoaderFn,
    cache: Arc<dyn Cache<String, Arc<EnvelopeSession>>>,
    // Serializes lookups so a partition's session is created exactly once.
    lock: Mutex<()>,
}

impl CacheWrapper {
    fn new(
        loader: SessionLoaderFn,
        max_size: usize,
        expiry: Option<Duration>,
        eviction_policy: CachePolicy,
    ) -> Self {
        let mut builder = CacheBuilder::<String, Arc<EnvelopeSession>>::new(max_size)
            .with_policy(eviction_policy)
            .with_evict_callback(|_, session: &Arc<EnvelopeSession>| {
                if let Some(shared) = session
                    .encryption
                    .as_any()
                    .downcast_ref::<SharedEncryption>()
                {
                    shared.remove();
                }
            });
        if let Some(expiry) = expiry {
            builder = builder.with_ttl(expiry);
        }

        Self {
            loader,
            cache: builder.build(),
            lock: Mutex::new(()),
        }
    }

    fn get_or_add(&self, id: &str) -> Result<Arc<EnvelopeSession>> {
        if let Some(session) = self.cache.get(&id.to_string()) {
            return Ok(session);
        }

        let session = (self.loader)(id)?;
        let session = Self::ensure_shared(&session);
        self.cache.insert(id.to_string(), Arc::clone(&session));
        Ok(session)
    }

    /// Wraps the session's encryption in [`SharedEncryption`] unless it
    /// already is.
    fn ensure_shared(session: &Arc<EnvelopeSession>) -> Arc<EnvelopeSession> {
        if session
            .encryption
            .as_any()
            .downcast_ref::<SharedEncryption>()
            .is_none()
        {
            let shared = Arc::new(SharedEncryption::new(Arc::clone(&session.encryption)));
            return Arc::new(EnvelopeSession::new(shared));
        }
        Arc::clone(session)
    }
}

impl SessionCache for CacheWrapper {
    fn get(&self, id: &str) -> Result<Arc<EnvelopeSession>> {
        let _guard = match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let session = self.get_or_add(id)?;

        if let Some(shared) = session
            .encryption
            .as_any()
            .downcast_ref::<SharedEncryption>()
        {
            shared.increment_usage();
        }

        Ok(session)
    }

    fn count(&self) -> usize {
        self.cache.len()
    }

    fn close(&self) {
        self.cache.clear();
    }
}

/// Builds the session cache used by the factory when session caching is
/// enabled.
pub fn new_session_cache(
    loader: impl Fn(&str) -> Result<Arc<EnvelopeSession>> + Send + Sync + 'static,
    max_size: usize,
    expiry: Option<Duration>,
    eviction_policy: CachePolicy,
) -> Arc<dyn SessionCache> {
    Arc::new(CacheWrapper::new(
        Arc::new(loader),
        max_size,
        expiry,
        eviction_policy,
    ))
}
