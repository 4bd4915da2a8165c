//! # rowcrypt
//!
//! Application-level envelope encryption for per-row data at rest.
//!
//! `rowcrypt` manages a hierarchy of keys terminating at a KMS-held master
//! key: a System Key (SK) per service/product wrapped by the KMS, an
//! Intermediate Key (IK) per partition wrapped by the SK, and an ephemeral
//! Data Key (DK) per row wrapped by the IK. Encrypting a payload produces a
//! self-describing [`DataRowRecord`]; decryption walks the hierarchy in
//! reverse, materializing missing keys from the [`Metastore`] and
//! [`KeyManagementService`].
//!
//! Key rotation is inline: a new key is generated on the first encrypt after
//! the current one expires or is revoked, as configured by [`CryptoPolicy`].
//! Decrypt always uses the exact key a record references and never rotates.
//! Decrypted key material lives in page-locked, access-gated memory (the
//! `secretmem` crate) and is wiped on cache eviction and session close.
//!
//! ## Basic usage
//!
//! ```rust,no_run
//! use rowcrypt::kms::StaticKeyManagementService;
//! use rowcrypt::metastore::InMemoryMetastore;
//! use rowcrypt::policy::CryptoPolicy;
//! use rowcrypt::session::{Session, SessionFactory};
//! use secretmem::ProtectedSecretFactory;
//! use std::sync::Arc;
//!
//! # async fn example() -> rowcrypt::Result<()> {
//! let factory = SessionFactory::builder()
//!     .with_service("service")
//!     .with_product("product")
//!     .with_policy(CryptoPolicy::new())
//!     .with_kms(Arc::new(StaticKeyManagementService::new(vec![0_u8; 32])))
//!     .with_metastore(Arc::new(InMemoryMetastore::new()))
//!     .with_secret_factory(Arc::new(ProtectedSecretFactory::new()))
//!     .build()?;
//!
//! let session = factory.session("user123").await?;
//!
//! let record = session.encrypt(b"secret data").await?;
//! let decrypted = session.decrypt(&record).await?;
//! assert_eq!(decrypted, b"secret data");
//!
//! session.close().await?;
//! factory.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod key;
pub mod kms;
pub mod metastore;
pub mod partition;
pub mod persistence;
pub mod policy;
pub mod session;
pub mod session_cache;
pub mod util;

pub use crate::cache::{Cache, CacheBuilder, CachePolicy};
pub use crate::envelope::{DataRowRecord, EnvelopeKeyRecord, KeyMeta};
pub use crate::error::{Error, Result};
pub use crate::partition::{DefaultPartition, Partition, SuffixedPartition};
pub use crate::policy::CryptoPolicy;
pub use crate::session::{Session, SessionFactory};

use async_trait::async_trait;
use std::fmt;

/// Size of an AES-256 key in bytes.
pub const AES256_KEY_SIZE: usize = 32;

/// Encrypts payloads into data row records and back.
#[async_trait]
pub trait Encryption: Send + Sync + fmt::Debug {
    /// Encrypts a payload and returns a data row record.
    async fn encrypt_payload(&self, data: &[u8]) -> Result<DataRowRecord>;

    /// Decrypts a data row record and returns the original payload.
    async fn decrypt_data_row_record(&self, drr: &DataRowRecord) -> Result<Vec<u8>>;

    /// Releases resources held by this instance.
    async fn close(&self) -> Result<()>;

    /// Downcasting support for cache wrappers.
    fn as_any(&self) -> &(dyn std::any::Any + Send + Sync);
}

/// Wraps and unwraps system keys with a master key the caller never sees.
///
/// Implementations must round-trip plaintext through `encrypt_key` /
/// `decrypt_key`; the wrapped form is opaque to the engine. Errors are
/// propagated, never retried.
#[async_trait]
pub trait KeyManagementService: Send + Sync + fmt::Debug {
    /// Wraps key material under the master key.
    async fn encrypt_key(&self, key: &[u8]) -> Result<Vec<u8>>;

    /// Unwraps key material previously wrapped with `encrypt_key`.
    async fn decrypt_key(&self, encrypted_key: &[u8]) -> Result<Vec<u8>>;
}

/// Persistent store of envelope key records, keyed by `(id, created)`.
///
/// Implementations must guarantee `(id, created)` uniqueness, durability of a
/// successful `store` before it returns, and that `load_latest` reflects all
/// prior successful stores.
#[async_trait]
pub trait Metastore: Send + Sync + fmt::Debug {
    /// Loads the record with the given id and creation timestamp.
    async fn load(&self, id: &str, created: i64) -> Result<Option<EnvelopeKeyRecord>>;

    /// Loads the record with the greatest creation timestamp for the id.
    async fn load_latest(&self, id: &str) -> Result<Option<EnvelopeKeyRecord>>;

    /// Stores a record, returning false if a record with the same
    /// `(id, created)` already exists. Duplicate-insert races are resolved
    /// by the loser reading the winner.
    async fn store(&self, id: &str, created: i64, envelope: &EnvelopeKeyRecord) -> Result<bool>;
}

/// Stateless authenticated encryption over byte payloads.
pub trait Aead: Send + Sync + fmt::Debug {
    /// Encrypts data under the given key.
    fn encrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>>;

    /// Decrypts data under the given key, authenticating it.
    fn decrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>>;
}

/// Loads data row records from a caller-owned store.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Key used to look up the record.
    type Key: Send + Sync;

    /// Loads a record, returning `None` when the key is unknown.
    async fn load(&self, key: &Self::Key) -> Result<Option<DataRowRecord>>;
}

/// Stores data row records in a caller-owned store.
#[async_trait]
pub trait Storer: Send + Sync {
    /// Key returned for future lookup.
    type Key;

    /// Stores a record and returns its lookup key.
    async fn store(&self, drr: &DataRowRecord) -> Result<Self::Key>;
}
