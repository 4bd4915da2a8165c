#![allow(dead_code, clippy::unwrap_used)]

use async_trait::async_trait;
use rowcrypt::envelope::EnvelopeKeyRecord;
use rowcrypt::kms::StaticKeyManagementService;
use rowcrypt::policy::CryptoPolicy;
use rowcrypt::session::SessionFactory;
use rowcrypt::{Metastore, Result};
use secretmem::ProtectedSecretFactory;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::Arc;

pub const SERVICE: &str = "service";
pub const PRODUCT: &str = "product";
pub const PARTITION_ID: &str = "shopper123";
pub const ORIGINAL_DATA: &[u8] = b"hello world";

pub fn static_kms() -> Arc<StaticKeyManagementService> {
    Arc::new(StaticKeyManagementService::new(vec![0_u8; 32]))
}

pub fn factory_with(metastore: Arc<dyn Metastore>, policy: CryptoPolicy) -> SessionFactory {
    let _ = env_logger::builder().is_test(true).try_init();

    SessionFactory::builder()
        .with_service(SERVICE)
        .with_product(PRODUCT)
        .with_policy(policy)
        .with_kms(static_kms())
        .with_metastore(metastore)
        .with_secret_factory(Arc::new(ProtectedSecretFactory::new()))
        .build()
        .unwrap()
}

type VersionMap = HashMap<String, BTreeMap<i64, EnvelopeKeyRecord>>;

/// In-memory metastore that tests can reach into: flipping revocation
/// flags, rewinding timestamps, and counting stored versions.
#[derive(Debug, Default)]
pub struct MutableMetastore {
    records: RwLock<VersionMap>,
}

impl MutableMetastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the latest record for `id` as revoked, as an operator would in
    /// the backing store.
    pub fn revoke_latest(&self, id: &str) {
        let mut records = self.records.write().unwrap();
        if let Some(versions) = records.get_mut(id) {
            if let Some((_, record)) = versions.iter_mut().next_back() {
                record.revoked = Some(true);
            }
        }
    }

    /// Moves the latest record for `id` back in time by `seconds`,
    /// simulating a key written long ago.
    pub fn rewind_latest(&self, id: &str, seconds: i64) {
        let mut records = self.records.write().unwrap();
        if let Some(versions) = records.get_mut(id) {
            let latest = versions.keys().next_back().copied();
            if let Some(created) = latest {
                if let Some(mut record) = versions.remove(&created) {
                    record.created = created - seconds;
                    versions.insert(created - seconds, record);
                }
            }
        }
    }

    /// All stored creation timestamps for `id`, ascending.
    pub fn versions(&self, id: &str) -> Vec<i64> {
        let records = self.records.read().unwrap();
        records
            .get(id)
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Metastore for MutableMetastore {
    async fn load(&self, id: &str, created: i64) -> Result<Option<EnvelopeKeyRecord>> {
        let records = self.records.read().unwrap();
        Ok(records
            .get(id)
            .and_then(|versions| versions.get(&created))
            .cloned())
    }

    async fn load_latest(&self, id: &str) -> Result<Option<EnvelopeKeyRecord>> {
        let records = self.records.read().unwrap();
        Ok(records
            .get(id)
            .and_then(|versions| versions.last_key_value())
            .map(|(_, record)| record.clone()))
    }

    async fn store(&self, id: &str, created: i64, envelope: &EnvelopeKeyRecord) -> Result<bool> {
        let mut records = self.records.write().unwrap();
        let versions = records.entry(id.to_string()).or_default();
        if versions.contains_key(&created) {
            return Ok(false);
        }
        versions.insert(created, envelope.clone());
        Ok(true)
    }
}

/// Derived key identifiers for the default test partition.
pub fn intermediate_key_id() -> String {
    format!("_IK_{}_{}_{}", PARTITION_ID, SERVICE, PRODUCT)
}

pub fn system_key_id() -> String {
    format!("_SK_{}_{}", SERVICE, PRODUCT)
}
