//! Metastore implementations.
//!
//! The engine only requires the [`crate::Metastore`] trait. Relational
//! backends conventionally use the schema
//!
//! ```sql
//! CREATE TABLE encryption_key (
//!   id         VARCHAR(255) NOT NULL,
//!   created    TIMESTAMP    NOT NULL,
//!   key_record TEXT         NOT NULL,
//!   PRIMARY KEY (id, created),
//!   INDEX (created)
//! );
//! ```
//!
//! with `key_record` holding the JSON envelope shape. Only the in-memory
//! implementation ships with this crate.

use crate::envelope::EnvelopeKeyRecord;
use crate::error::Result;
use crate::Metastore;

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// An in-memory metastore for tests and development.
///
/// Keys are lost when the process exits; do not use in production.
#[derive(Debug, Default)]
pub struct InMemoryMetastore {
    store: RwLock<HashMap<String, BTreeMap<i64, EnvelopeKeyRecord>>>,
}

impl InMemoryMetastore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, BTreeMap<i64, EnvelopeKeyRecord>>> {
        match self.store.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, BTreeMap<i64, EnvelopeKeyRecord>>> {
        match self.store.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Metastore for InMemoryMetastore {
    async fn load(&self, id: &str, created: i64) -> Result<Option<EnvelopeKeyRecord>> {
        let store = self.read();
        Ok(store
            .get(id)
            .and_then(|versions| versions.get(&created))
            .cloned())
    }

    async fn load_latest(&self, id: &str) -> Result<Option<EnvelopeKeyRecord>> {
        let store = self.read();
        Ok(store
            .get(id)
            .and_then(|versions| versions.last_key_value())
            .map(|(_, record)| record.clone()))
    }

    async fn store(&self, id: &str, created: i64, envelope: &EnvelopeKeyRecord) -> Result<bool> {
        let mut store = self.write();
        let versions = store.entry(id.to_string()).or_default();

        if versions.contains_key(&created) {
            return Ok(false);
        }

        versions.insert(created, envelope.clone());
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record(created: i64) -> EnvelopeKeyRecord {
        EnvelopeKeyRecord {
            revoked: None,
            id: "test".to_string(),
            created,
            encrypted_key: vec![created as u8],
            parent_key_meta: None,
        }
    }

    #[tokio::test]
    async fn load_specific_version() {
        let metastore = InMemoryMetastore::new();
        metastore.store("k", 100, &record(100)).await.unwrap();
        metastore.store("k", 200, &record(200)).await.unwrap();

        let loaded = metastore.load("k", 100).await.unwrap().unwrap();
        assert_eq!(loaded.created, 100);
        assert!(metastore.load("k", 300).await.unwrap().is_none());
        assert!(metastore.load("other", 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn load_latest_returns_greatest_created() {
        let metastore = InMemoryMetastore::new();
        metastore.store("k", 200, &record(200)).await.unwrap();
        metastore.store("k", 100, &record(100)).await.unwrap();

        let latest = metastore.load_latest("k").await.unwrap().unwrap();
        assert_eq!(latest.created, 200);
    }

    #[tokio::test]
    async fn duplicate_store_returns_false() {
        let metastore = InMemoryMetastore::new();
        assert!(metastore.store("k", 100, &record(100)).await.unwrap());
        assert!(!metastore.store("k", 100, &record(100)).await.unwrap());

        // The winner's record is untouched by the losing store.
        let loaded = metastore.load("k", 100).await.unwrap().unwrap();
        assert_eq!(loaded.encrypted_key, vec![100]);
    }
}
