use thiserror::Error;

/// Errors that can occur while managing secret memory.
#[derive(Error, Debug)]
pub enum SecretError {
    /// Page allocation or locking failed while creating a secret.
    #[error("failed to allocate secure memory: {0}")]
    AllocationFailed(String),

    /// The memory could not be locked into RAM, so the secret could end up
    /// in swap. Creation fails rather than continuing unprotected.
    #[error("failed to lock memory: {0}")]
    LockFailed(String),

    /// A protection change (no-access / read-only / read-write) failed.
    #[error("failed to set memory protection: {0}")]
    ProtectionFailed(String),

    /// The secret has been closed; its bytes are gone.
    #[error("secret is already closed")]
    SecretClosed,

    /// An invalid size was given, such as a zero-length secret.
    #[error("invalid size: {0}")]
    InvalidSize(String),

    /// The system random source failed.
    #[error("random generation failed: {0}")]
    RandomFailed(String),

    /// The requested secure-heap engine is not available in this build.
    #[error("unsupported secure-heap engine: {0}")]
    UnsupportedEngine(String),

    /// A general failure during a secret operation.
    #[error("secret operation failed: {0}")]
    OperationFailed(String),
}

/// Result type for secretmem operations.
pub type Result<T> = std::result::Result<T, SecretError>;
