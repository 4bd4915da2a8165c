use thiserror::Error;

/// Result type for rowcrypt operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the envelope encryption engine.
///
/// No variant is swallowed internally; callers can match on the failure kind
/// and map it into their own domain.
#[derive(Error, Debug)]
pub enum Error {
    /// A key management service wrap/unwrap failed.
    #[error("KMS error: {0}")]
    Kms(String),

    /// The metastore surfaced a backend error on load or store.
    #[error("metastore error: {0}")]
    Metastore(String),

    /// A record references key metadata that cannot be resolved: the
    /// envelope is absent from the metastore or belongs to another
    /// partition. The record is undecryptable.
    #[error("key metadata missing or mismatched: {0}")]
    MetadataMissing(String),

    /// AEAD authentication failed; the record is corrupt or tampered.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// A cryptographic operation failed outside of AEAD authentication.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// A builder was invoked without a required option or with
    /// contradictory options.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Secure memory allocation, protection, or access failed.
    #[error("secure memory error: {0}")]
    SecretMemory(#[from] secretmem::SecretError),

    /// JSON serialization or deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}
