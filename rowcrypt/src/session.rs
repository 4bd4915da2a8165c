//! Sessions and the factory that creates them.
//!
//! A [`SessionFactory`] is intended to be process-wide, one per
//! service/product pair. It owns the system key cache, the shared
//! intermediate key cache when configured, and the optional session cache.
//! A [`Session`] binds a partition to the envelope engine.

use crate::crypto::Aes256GcmAead;
use crate::envelope::{DataRowRecord, EnvelopeEncryption};
use crate::error::{Error, Result};
use crate::key::cache::{AnyCache, CacheKeyType, KeyCache, KeyCacher, NeverCache};
use crate::partition::{DefaultPartition, Partition, SuffixedPartition};
use crate::policy::CryptoPolicy;
use crate::session_cache::{new_session_cache, SessionCache};
use crate::{Aead, Encryption, KeyManagementService, Loader, Metastore, Storer};

use async_trait::async_trait;
use log::debug;
use metrics::counter;
use secretmem::SecretFactory;
use std::sync::Arc;

/// Encrypt/decrypt operations bound to one partition.
#[async_trait]
pub trait Session: Send + Sync {
    /// Encrypts a payload into a data row record.
    async fn encrypt(&self, data: &[u8]) -> Result<DataRowRecord>;

    /// Decrypts a data row record back into the payload.
    async fn decrypt(&self, drr: &DataRowRecord) -> Result<Vec<u8>>;

    /// Encrypts a JSON value; sugar over the byte variant.
    async fn encrypt_json(&self, value: &serde_json::Value) -> Result<DataRowRecord>;

    /// Decrypts a record produced by `encrypt_json`.
    async fn decrypt_json(&self, drr: &DataRowRecord) -> Result<serde_json::Value>;

    /// Encrypts `data` and hands the record to `storer`, returning its key.
    async fn store<S: Storer + 'static>(&self, data: &[u8], storer: S) -> Result<S::Key>;

    /// Loads a record through `loader` and decrypts it if present.
    async fn load<L: Loader + 'static>(&self, key: &L::Key, loader: L)
        -> Result<Option<Vec<u8>>>;

    /// Releases the session's resources (or its cache lease when cached).
    async fn close(&self) -> Result<()>;
}

/// Everything needed to assemble a session; shared between the factory and
/// the session cache loader.
struct SessionDeps {
    service: String,
    product: String,
    policy: Arc<CryptoPolicy>,
    kms: Arc<dyn KeyManagementService>,
    metastore: Arc<dyn Metastore>,
    crypto: Arc<dyn Aead>,
    secret_factory: Arc<dyn SecretFactory>,
    system_keys: AnyCache,
    shared_intermediate_keys: Option<AnyCache>,
}

impl SessionDeps {
    /// Picks the intermediate key cache for a new session: the factory's
    /// shared cache, a fresh per-session cache, or none.
    fn intermediate_key_cache(&self) -> (AnyCache, bool) {
        if let Some(shared) = &self.shared_intermediate_keys {
            (shared.clone(), true)
        } else if self.policy.cache_intermediate_keys {
            (
                AnyCache::Cached(Arc::new(KeyCache::new(
                    CacheKeyType::IntermediateKeys,
                    Arc::clone(&self.policy),
                ))),
                false,
            )
        } else {
            (AnyCache::Never(Arc::new(NeverCache)), false)
        }
    }

    fn create_session(&self, partition: Arc<dyn Partition>) -> Result<Arc<EnvelopeSession>> {
        debug!("creating session for {:?}", partition);
        counter!("rowcrypt.session.created", 1);

        let (ik_cache, shared) = self.intermediate_key_cache();
        let builder = EnvelopeEncryption::builder()
            .with_partition(partition)
            .with_metastore(Arc::clone(&self.metastore))
            .with_kms(Arc::clone(&self.kms))
            .with_policy(Arc::clone(&self.policy))
            .with_crypto(Arc::clone(&self.crypto))
            .with_secret_factory(Arc::clone(&self.secret_factory))
            .with_sk_cache(self.system_keys.clone());
        let builder = if shared {
            builder.with_shared_ik_cache(ik_cache)
        } else {
            builder.with_ik_cache(ik_cache)
        };

        let encryption = Arc::new(builder.build()?);
        Ok(Arc::new(EnvelopeSession::new(encryption)))
    }
}

/// Creates sessions for partitions, owning the process-wide caches.
pub struct SessionFactory {
    deps: Arc<SessionDeps>,
    session_cache: Option<Arc<dyn SessionCache>>,
}

impl SessionFactory {
    pub fn builder() -> SessionFactoryBuilder {
        SessionFactoryBuilder::new()
    }

    /// Returns a session for the partition. With session caching enabled,
    /// repeated calls share one session per partition and each call takes a
    /// lease released by that session's `close`.
    pub async fn session(&self, partition_id: impl Into<String>) -> Result<Arc<EnvelopeSession>> {
        let id = partition_id.into();
        if id.is_empty() {
            return Err(Error::InvalidConfiguration(
                "partition id cannot be empty".to_string(),
            ));
        }

        if let Some(cache) = &self.session_cache {
            return cache.get(&id);
        }

        let partition = Arc::new(DefaultPartition::new(
            &id,
            &self.deps.service,
            &self.deps.product,
        ));
        self.deps.create_session(partition)
    }

    /// Returns a session whose key identifiers carry a region suffix.
    /// Suffixed sessions bypass the session cache.
    pub async fn session_with_suffix(
        &self,
        partition_id: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Result<Arc<EnvelopeSession>> {
        let id = partition_id.into();
        if id.is_empty() {
            return Err(Error::InvalidConfiguration(
                "partition id cannot be empty".to_string(),
            ));
        }

        let partition = Arc::new(SuffixedPartition::new(
            &id,
            &self.deps.service,
            &self.deps.product,
            suffix,
        ));
        self.deps.create_session(partition)
    }

    /// Closes factory-owned resources: the session cache, the shared
    /// intermediate key cache, and the system key cache. All cached key
    /// material is wiped.
    pub async fn close(&self) -> Result<()> {
        if let Some(cache) = &self.session_cache {
            cache.close();
        }

        if let Some(shared) = &self.deps.shared_intermediate_keys {
            shared.close().await?;
        }

        self.deps.system_keys.close().await?;
        Ok(())
    }
}

/// Builder for [`SessionFactory`]; service, product, policy, kms, metastore,
/// and secret factory are required.
#[derive(Default)]
pub struct SessionFactoryBuilder {
    service: Option<String>,
    product: Option<String>,
    policy: Option<CryptoPolicy>,
    kms: Option<Arc<dyn KeyManagementService>>,
    metastore: Option<Arc<dyn Metastore>>,
    crypto: Option<Arc<dyn Aead>>,
    secret_factory: Option<Arc<dyn SecretFactory>>,
}

impl SessionFactoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    pub fn with_policy(mut self, policy: CryptoPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_kms(mut self, kms: Arc<dyn KeyManagementService>) -> Self {
        self.kms = Some(kms);
        self
    }

    pub fn with_metastore(mut self, metastore: Arc<dyn Metastore>) -> Self {
        self.metastore = Some(metastore);
        self
    }

    /// Overrides the AEAD; defaults to AES-256-GCM.
    pub fn with_crypto(mut self, crypto: Arc<dyn Aead>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    pub fn with_secret_factory(mut self, secret_factory: Arc<dyn SecretFactory>) -> Self {
        self.secret_factory = Some(secret_factory);
        self
    }

    pub fn build(self) -> Result<SessionFactory> {
        fn required<T>(value: Option<T>, name: &str) -> Result<T> {
            value.ok_or_else(|| Error::InvalidConfiguration(format!("{} is required", name)))
        }

        let service = required(self.service, "service")?;
        let product = required(self.product, "product")?;
        let policy = Arc::new(required(self.policy, "policy")?);
        let kms = required(self.kms, "kms")?;
        let metastore = required(self.metastore, "metastore")?;
        let secret_factory = required(self.secret_factory, "secret_factory")?;
        let crypto = self
            .crypto
            .unwrap_or_else(|| Arc::new(Aes256GcmAead::new()));

        let system_keys = if policy.cache_system_keys {
            AnyCache::Cached(Arc::new(KeyCache::new(
                CacheKeyType::SystemKeys,
                Arc::clone(&policy),
            )))
        } else {
            AnyCache::Never(Arc::new(NeverCache))
        };

        let shared_intermediate_keys = if policy.shared_intermediate_key_cache {
            Some(AnyCache::Cached(Arc::new(KeyCache::new(
                CacheKeyType::IntermediateKeys,
                Arc::clone(&policy),
            ))))
        } else {
            None
        };

        let deps = Arc::new(SessionDeps {
            service,
            product,
            policy: Arc::clone(&policy),
            kms,
            metastore,
            crypto,
            secret_factory,
            system_keys,
            shared_intermediate_keys,
        });

        let session_cache = if policy.cache_sessions {
            let expiry = (policy.session_cache_duration.as_secs() > 0)
                .then_some(policy.session_cache_duration);
            let loader = {
                let deps = Arc::clone(&deps);
                move |id: &str| {
                    let partition =
                        Arc::new(DefaultPartition::new(id, &deps.service, &deps.product));
                    deps.create_session(partition)
                }
            };
            Some(new_session_cache(
                loader,
                policy.session_cache_max_size,
                expiry,
                policy.session_cache_policy,
            ))
        } else {
            None
        };

        Ok(SessionFactory {
            deps,
            session_cache,
        })
    }
}

/// Session implementation over the envelope engine.
#[derive(Clone)]
pub struct EnvelopeSession {
    pub(crate) encryption: Arc<dyn Encryption>,
}

impl EnvelopeSession {
    pub fn new(encryption: Arc<dyn Encryption>) -> Self {
        Self { encryption }
    }
}

impl std::fmt::Debug for EnvelopeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeSession").finish()
    }
}

#[async_trait]
impl Session for EnvelopeSession {
    async fn encrypt(&self, data: &[u8]) -> Result<DataRowRecord> {
        self.encryption.encrypt_payload(data).await
    }

    async fn decrypt(&self, drr: &DataRowRecord) -> Result<Vec<u8>> {
        self.encryption.decrypt_data_row_record(drr).await
    }

    async fn encrypt_json(&self, value: &serde_json::Value) -> Result<DataRowRecord> {
        let bytes = serde_json::to_vec(value)?;
        self.encrypt(&bytes).await
    }

    async fn decrypt_json(&self, drr: &DataRowRecord) -> Result<serde_json::Value> {
        let bytes = self.decrypt(drr).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn store<S: Storer + 'static>(&self, data: &[u8], storer: S) -> Result<S::Key> {
        let drr = self.encrypt(data).await?;
        storer.store(&drr).await
    }

    async fn load<L: Loader + 'static>(
        &self,
        key: &L::Key,
        loader: L,
    ) -> Result<Option<Vec<u8>>> {
        match loader.load(key).await? {
            Some(drr) => Ok(Some(self.decrypt(&drr).await?)),
            None => Ok(None),
        }
    }

    async fn close(&self) -> Result<()> {
        self.encryption.close().await
    }
}
