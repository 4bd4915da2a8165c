//! Envelope records and their wire shapes.
//!
//! Field names and encodings are normative for cross-language interop:
//! PascalCase names, byte fields as base64 strings, optional fields omitted
//! entirely when absent.

pub mod encryption;

use crate::error::Result;
use serde::{Deserialize, Serialize};

pub use encryption::{EnvelopeEncryption, EnvelopeEncryptionBuilder};

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Identity of a key: its id and creation timestamp in epoch seconds.
///
/// A `created` of zero is the "latest" sentinel used by cache lookups; it
/// never appears in persisted records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct KeyMeta {
    #[serde(rename = "KeyId")]
    pub id: String,
    #[serde(rename = "Created")]
    pub created: i64,
}

impl KeyMeta {
    pub fn new(id: impl Into<String>, created: i64) -> Self {
        Self {
            id: id.into(),
            created,
        }
    }

    /// Returns a meta addressing the latest version of `id`.
    pub fn latest(id: impl Into<String>) -> Self {
        Self::new(id, 0)
    }

    /// True if this meta addresses the latest version rather than a
    /// specific one.
    pub fn is_latest(&self) -> bool {
        self.created == 0
    }
}

impl std::fmt::Display for KeyMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.id, self.created)
    }
}

/// Persisted shape of an encrypted key.
///
/// `parent_key_meta` is absent only for system keys, whose parent is the KMS
/// master key. `revoked` is omitted on the wire when false.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvelopeKeyRecord {
    #[serde(rename = "Revoked", skip_serializing_if = "Option::is_none")]
    pub revoked: Option<bool>,

    /// The key id; carried in memory only, the metastore key column holds it.
    #[serde(skip)]
    pub id: String,

    #[serde(rename = "Created")]
    pub created: i64,

    #[serde(rename = "Key", with = "base64_bytes")]
    pub encrypted_key: Vec<u8>,

    #[serde(rename = "ParentKeyMeta", skip_serializing_if = "Option::is_none")]
    pub parent_key_meta: Option<KeyMeta>,
}

impl EnvelopeKeyRecord {
    /// True if the record is flagged revoked.
    pub fn is_revoked(&self) -> bool {
        self.revoked.unwrap_or(false)
    }
}

/// Output of an encrypt call: the AEAD ciphertext plus the wrapped data key,
/// self-describing enough that decryption is deterministic given the
/// metastore and KMS.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataRowRecord {
    #[serde(rename = "Key")]
    pub key: EnvelopeKeyRecord,

    #[serde(rename = "Data", with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl DataRowRecord {
    /// Serializes the record to its JSON wire form.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a record from its JSON wire form.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
