use crate::envelope::{DataRowRecord, EnvelopeKeyRecord, KeyMeta};
use crate::error::{Error, Result};
use crate::key::cache::{AnyCache, KeyCacher};
use crate::key::CryptoKey;
use crate::partition::Partition;
use crate::policy::{self, CryptoPolicy};
use crate::util;
use crate::{Aead, Encryption, KeyManagementService, Metastore, AES256_KEY_SIZE};

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use metrics::{counter, histogram};
use secretmem::SecretFactory;
use std::sync::Arc;
use std::time::Instant;
use zeroize::Zeroizing;

/// The envelope encryption engine for one partition.
///
/// Encrypt resolves (or rotates) the partition's intermediate key, wraps a
/// fresh data key under it, and AEAD-encrypts the payload. Decrypt walks the
/// hierarchy in reverse using the exact key versions the record references;
/// it never rotates. Expired or revoked keys remain usable for decrypt but
/// trigger rotation on the next encrypt.
pub struct EnvelopeEncryption {
    partition: Arc<dyn Partition>,
    metastore: Arc<dyn Metastore>,
    kms: Arc<dyn KeyManagementService>,
    policy: Arc<CryptoPolicy>,
    crypto: Arc<dyn Aead>,
    secret_factory: Arc<dyn SecretFactory>,
    sk_cache: AnyCache,
    ik_cache: AnyCache,
    // A per-session IK cache is closed with this instance; a factory-shared
    // one is not.
    owns_ik_cache: bool,
}

impl std::fmt::Debug for EnvelopeEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeEncryption")
            .field("partition", &self.partition)
            .finish()
    }
}

/// Builder for [`EnvelopeEncryption`]; every dependency is required.
#[derive(Default)]
pub struct EnvelopeEncryptionBuilder {
    partition: Option<Arc<dyn Partition>>,
    metastore: Option<Arc<dyn Metastore>>,
    kms: Option<Arc<dyn KeyManagementService>>,
    policy: Option<Arc<CryptoPolicy>>,
    crypto: Option<Arc<dyn Aead>>,
    secret_factory: Option<Arc<dyn SecretFactory>>,
    sk_cache: Option<AnyCache>,
    ik_cache: Option<(AnyCache, bool)>,
}

impl EnvelopeEncryptionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_partition(mut self, partition: Arc<dyn Partition>) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_metastore(mut self, metastore: Arc<dyn Metastore>) -> Self {
        self.metastore = Some(metastore);
        self
    }

    pub fn with_kms(mut self, kms: Arc<dyn KeyManagementService>) -> Self {
        self.kms = Some(kms);
        self
    }

    pub fn with_policy(mut self, policy: Arc<CryptoPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_crypto(mut self, crypto: Arc<dyn Aead>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    pub fn with_secret_factory(mut self, secret_factory: Arc<dyn SecretFactory>) -> Self {
        self.secret_factory = Some(secret_factory);
        self
    }

    pub fn with_sk_cache(mut self, sk_cache: AnyCache) -> Self {
        self.sk_cache = Some(sk_cache);
        self
    }

    /// Sets an intermediate key cache owned by this instance and closed
    /// with it.
    pub fn with_ik_cache(mut self, ik_cache: AnyCache) -> Self {
        self.ik_cache = Some((ik_cache, true));
        self
    }

    /// Sets an intermediate key cache shared across sessions; the factory
    /// owns its lifecycle.
    pub fn with_shared_ik_cache(mut self, ik_cache: AnyCache) -> Self {
        self.ik_cache = Some((ik_cache, false));
        self
    }

    pub fn build(self) -> Result<EnvelopeEncryption> {
        fn required<T>(value: Option<T>, name: &str) -> Result<T> {
            value.ok_or_else(|| Error::InvalidConfiguration(format!("{} is required", name)))
        }

        let (ik_cache, owns_ik_cache) = required(self.ik_cache, "ik_cache")?;

        Ok(EnvelopeEncryption {
            partition: required(self.partition, "partition")?,
            metastore: required(self.metastore, "metastore")?,
            kms: required(self.kms, "kms")?,
            policy: required(self.policy, "policy")?,
            crypto: required(self.crypto, "crypto")?,
            secret_factory: required(self.secret_factory, "secret_factory")?,
            sk_cache: required(self.sk_cache, "sk_cache")?,
            ik_cache,
            owns_ik_cache,
        })
    }
}

impl EnvelopeEncryption {
    pub fn builder() -> EnvelopeEncryptionBuilder {
        EnvelopeEncryptionBuilder::new()
    }

    /// True if the envelope may not wrap new keys: revoked, or past the
    /// policy's expiry.
    fn is_envelope_invalid(&self, record: &EnvelopeKeyRecord) -> bool {
        record.is_revoked()
            || policy::is_key_expired(record.created, self.policy.expire_key_after)
    }

    /// Resolves the current system key, rotating if the latest stored one
    /// is absent, expired, or revoked.
    async fn get_system_key(&self) -> Result<Arc<CryptoKey>> {
        let id = self.partition.system_key_id();
        self.sk_cache
            .get_or_load_latest(&id, |meta| self.load_or_create_system_key(meta))
            .await
    }

    async fn load_or_create_system_key(&self, meta: KeyMeta) -> Result<CryptoKey> {
        if let Some(record) = self.metastore.load_latest(&meta.id).await? {
            if !self.is_envelope_invalid(&record) {
                return self.system_key_from_record(&meta.id, &record).await;
            }
            debug!("system key {} invalid, rotating", meta.id);
        }
        self.create_system_key(&meta.id).await
    }

    async fn system_key_from_record(
        &self,
        id: &str,
        record: &EnvelopeKeyRecord,
    ) -> Result<CryptoKey> {
        let bytes = self.kms.decrypt_key(&record.encrypted_key).await?;
        let key = CryptoKey::new(id, record.created, bytes, self.secret_factory.as_ref())?;
        key.set_revoked(record.is_revoked());
        Ok(key)
    }

    async fn create_system_key(&self, id: &str) -> Result<CryptoKey> {
        let created = policy::new_key_timestamp(self.policy.create_date_precision);
        let key = CryptoKey::generate(self.secret_factory.as_ref(), id, created, AES256_KEY_SIZE)?;

        let wrapped = {
            let raw = Zeroizing::new(key.with_bytes(|bytes| Ok(bytes.to_vec()))?);
            self.kms.encrypt_key(&raw).await?
        };

        let record = EnvelopeKeyRecord {
            revoked: None,
            id: id.to_string(),
            created,
            encrypted_key: wrapped,
            parent_key_meta: None,
        };

        if self.metastore.store(id, created, &record).await? {
            counter!("rowcrypt.systemkey.created", 1);
            return Ok(key);
        }

        // Lost the store race: wipe the fresh key and adopt the winner's.
        debug!("system key {}-{} store conflict, adopting winner", id, created);
        if let Err(e) = key.close() {
            warn!("failed to wipe losing system key: {}", e);
        }
        let winner = self
            .metastore
            .load(id, created)
            .await?
            .ok_or_else(|| {
                Error::Metastore("winning system key not found after store conflict".to_string())
            })?;
        self.system_key_from_record(id, &winner).await
    }

    /// Resolves an exact system key version referenced by a stored record.
    async fn get_system_key_exact(&self, meta: KeyMeta) -> Result<Arc<CryptoKey>> {
        self.sk_cache
            .get_or_load(meta, |m| async move {
                let record = self
                    .metastore
                    .load(&m.id, m.created)
                    .await?
                    .ok_or_else(|| {
                        Error::MetadataMissing(format!("system key {} not found", m))
                    })?;
                self.system_key_from_record(&m.id, &record).await
            })
            .await
    }

    /// Resolves the current intermediate key, rotating if the latest stored
    /// one is absent, expired, or revoked.
    async fn get_intermediate_key(&self) -> Result<Arc<CryptoKey>> {
        let id = self.partition.intermediate_key_id();
        self.ik_cache
            .get_or_load_latest(&id, |meta| self.load_or_create_intermediate_key(meta))
            .await
    }

    async fn load_or_create_intermediate_key(&self, meta: KeyMeta) -> Result<CryptoKey> {
        if let Some(record) = self.metastore.load_latest(&meta.id).await? {
            if !self.is_envelope_invalid(&record) {
                return self.intermediate_key_from_record(&meta.id, &record).await;
            }
            debug!("intermediate key {} invalid, rotating", meta.id);
        }
        self.create_intermediate_key(&meta.id).await
    }

    async fn intermediate_key_from_record(
        &self,
        id: &str,
        record: &EnvelopeKeyRecord,
    ) -> Result<CryptoKey> {
        let parent = record.parent_key_meta.as_ref().ok_or_else(|| {
            Error::MetadataMissing(format!(
                "intermediate key {} has no parent system key",
                id
            ))
        })?;

        if !self.partition.is_valid_system_key_id(&parent.id) {
            return Err(Error::MetadataMissing(format!(
                "intermediate key {} is wrapped by foreign system key {}",
                id, parent.id
            )));
        }

        let system_key = self.get_system_key_exact(parent.clone()).await?;
        let bytes = system_key
            .with_bytes(|sk_bytes| self.crypto.decrypt(&record.encrypted_key, sk_bytes))?;

        let key = CryptoKey::new(id, record.created, bytes, self.secret_factory.as_ref())?;
        key.set_revoked(record.is_revoked());
        Ok(key)
    }

    async fn create_intermediate_key(&self, id: &str) -> Result<CryptoKey> {
        let system_key = self.get_system_key().await?;

        let created = policy::new_key_timestamp(self.policy.create_date_precision);
        let key = CryptoKey::generate(self.secret_factory.as_ref(), id, created, AES256_KEY_SIZE)?;

        let wrapped = key.with_bytes(|ik_bytes| {
            system_key.with_bytes(|sk_bytes| self.crypto.encrypt(ik_bytes, sk_bytes))
        })?;

        let record = EnvelopeKeyRecord {
            revoked: None,
            id: id.to_string(),
            created,
            encrypted_key: wrapped,
            parent_key_meta: Some(KeyMeta::new(system_key.id(), system_key.created())),
        };

        if self.metastore.store(id, created, &record).await? {
            counter!("rowcrypt.intermediatekey.created", 1);
            return Ok(key);
        }

        // Lost the store race: wipe the fresh key and adopt the winner's.
        debug!(
            "intermediate key {}-{} store conflict, adopting winner",
            id, created
        );
        if let Err(e) = key.close() {
            warn!("failed to wipe losing intermediate key: {}", e);
        }
        let winner = self
            .metastore
            .load(id, created)
            .await?
            .ok_or_else(|| {
                Error::Metastore(
                    "winning intermediate key not found after store conflict".to_string(),
                )
            })?;
        self.intermediate_key_from_record(id, &winner).await
    }

    /// Resolves the exact intermediate key version a record references.
    async fn load_intermediate_key(&self, meta: &KeyMeta) -> Result<Arc<CryptoKey>> {
        self.ik_cache
            .get_or_load(meta.clone(), |m| async move {
                let record = self
                    .metastore
                    .load(&m.id, m.created)
                    .await?
                    .ok_or_else(|| {
                        Error::MetadataMissing(format!("intermediate key {} not found", m))
                    })?;
                self.intermediate_key_from_record(&m.id, &record).await
            })
            .await
    }
}

#[async_trait]
impl Encryption for EnvelopeEncryption {
    async fn encrypt_payload(&self, data: &[u8]) -> Result<DataRowRecord> {
        let start = Instant::now();
        counter!("rowcrypt.envelope.encrypt", 1);

        let intermediate_key = self.get_intermediate_key().await?;

        // The data key exists in the clear only for the scope of this call.
        let data_key = Zeroizing::new(util::get_rand_bytes(AES256_KEY_SIZE));

        let encrypted_data = self.crypto.encrypt(data, &data_key)?;
        let encrypted_data_key = intermediate_key
            .with_bytes(|ik_bytes| self.crypto.encrypt(&data_key, ik_bytes))?;

        let drr = DataRowRecord {
            key: EnvelopeKeyRecord {
                revoked: None,
                // Data keys have no id of their own; identity lives in the
                // parent reference.
                id: String::new(),
                created: Utc::now().timestamp(),
                encrypted_key: encrypted_data_key,
                parent_key_meta: Some(KeyMeta::new(
                    intermediate_key.id(),
                    intermediate_key.created(),
                )),
            },
            data: encrypted_data,
        };

        histogram!("rowcrypt.envelope.encrypt.time", start.elapsed());
        Ok(drr)
    }

    async fn decrypt_data_row_record(&self, drr: &DataRowRecord) -> Result<Vec<u8>> {
        let start = Instant::now();
        counter!("rowcrypt.envelope.decrypt", 1);

        let parent = drr.key.parent_key_meta.as_ref().ok_or_else(|| {
            Error::MetadataMissing("record has no parent key metadata".to_string())
        })?;

        if !self.partition.is_valid_intermediate_key_id(&parent.id) {
            return Err(Error::MetadataMissing(format!(
                "record references intermediate key {} outside this partition",
                parent.id
            )));
        }

        let intermediate_key = self.load_intermediate_key(parent).await?;

        let data_key = Zeroizing::new(intermediate_key.with_bytes(|ik_bytes| {
            self.crypto.decrypt(&drr.key.encrypted_key, ik_bytes)
        })?);
        let data = self.crypto.decrypt(&drr.data, &data_key)?;

        histogram!("rowcrypt.envelope.decrypt.time", start.elapsed());
        Ok(data)
    }

    async fn close(&self) -> Result<()> {
        if self.owns_ik_cache {
            self.ik_cache.close().await?;
        }
        Ok(())
    }

    fn as_any(&self) -> &(dyn std::any::Any + Send + Sync) {
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::crypto::Aes256GcmAead;
    use crate::key::cache::{CacheKeyType, KeyCache};
    use crate::kms::StaticKeyManagementService;
    use crate::metastore::InMemoryMetastore;
    use crate::partition::DefaultPartition;
    use secretmem::ProtectedSecretFactory;
    use std::time::Duration;

    fn build_encryption(
        metastore: Arc<InMemoryMetastore>,
        policy: CryptoPolicy,
    ) -> EnvelopeEncryption {
        let policy = Arc::new(policy);
        EnvelopeEncryption::builder()
            .with_partition(Arc::new(DefaultPartition::new("test", "service", "product")))
            .with_metastore(metastore)
            .with_kms(Arc::new(StaticKeyManagementService::new(vec![0_u8; 32])))
            .with_policy(Arc::clone(&policy))
            .with_crypto(Arc::new(Aes256GcmAead::new()))
            .with_secret_factory(Arc::new(ProtectedSecretFactory::new()))
            .with_sk_cache(AnyCache::Cached(Arc::new(KeyCache::new(
                CacheKeyType::SystemKeys,
                Arc::clone(&policy),
            ))))
            .with_ik_cache(AnyCache::Cached(Arc::new(KeyCache::new(
                CacheKeyType::IntermediateKeys,
                policy,
            ))))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn encrypt_decrypt_round_trip() {
        let metastore = Arc::new(InMemoryMetastore::new());
        let encryption = build_encryption(metastore, CryptoPolicy::default());

        let drr = encryption.encrypt_payload(b"hello world").await.unwrap();
        let decrypted = encryption.decrypt_data_row_record(&drr).await.unwrap();
        assert_eq!(decrypted, b"hello world");
    }

    #[tokio::test]
    async fn record_references_partition_intermediate_key() {
        let metastore = Arc::new(InMemoryMetastore::new());
        let encryption = build_encryption(metastore, CryptoPolicy::default());

        let drr = encryption.encrypt_payload(b"payload").await.unwrap();
        let parent = drr.key.parent_key_meta.unwrap();
        assert_eq!(parent.id, "_IK_test_service_product");
        assert!(parent.created > 0);
    }

    #[tokio::test]
    async fn expired_keys_rotate_inline() {
        let metastore = Arc::new(InMemoryMetastore::new());
        let policy = CryptoPolicy::default()
            .with_expire_after(Duration::from_secs(1))
            .with_create_date_precision(Duration::from_secs(0));
        let encryption = build_encryption(metastore, policy);

        let first = encryption.encrypt_payload(b"data").await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let second = encryption.encrypt_payload(b"data").await.unwrap();

        assert_ne!(
            first.key.parent_key_meta.as_ref().unwrap().created,
            second.key.parent_key_meta.as_ref().unwrap().created
        );

        // Rotation never orphans old records.
        assert_eq!(
            encryption.decrypt_data_row_record(&first).await.unwrap(),
            b"data"
        );
        assert_eq!(
            encryption.decrypt_data_row_record(&second).await.unwrap(),
            b"data"
        );
    }

    #[tokio::test]
    async fn missing_parent_meta_is_rejected() {
        let metastore = Arc::new(InMemoryMetastore::new());
        let encryption = build_encryption(metastore, CryptoPolicy::default());

        let mut drr = encryption.encrypt_payload(b"payload").await.unwrap();
        drr.key.parent_key_meta = None;

        assert!(matches!(
            encryption.decrypt_data_row_record(&drr).await,
            Err(Error::MetadataMissing(_))
        ));
    }

    #[tokio::test]
    async fn tampered_data_fails_authentication() {
        let metastore = Arc::new(InMemoryMetastore::new());
        let encryption = build_encryption(metastore, CryptoPolicy::default());

        let mut drr = encryption.encrypt_payload(b"payload").await.unwrap();
        let last = drr.data.len() - 1;
        drr.data[last] ^= 0x01;

        assert!(matches!(
            encryption.decrypt_data_row_record(&drr).await,
            Err(Error::DecryptionFailed(_))
        ));
    }

    #[test]
    fn builder_requires_all_dependencies() {
        let result = EnvelopeEncryption::builder().build();
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    }
}
