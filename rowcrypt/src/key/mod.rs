//! Cryptographic keys held in protected memory.

pub mod cache;

use crate::error::Result;
use crate::policy::is_key_expired;
use secretmem::{Secret, SecretFactory};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A key in the hierarchy: protected key material plus identity metadata.
///
/// The bytes are only reachable through scoped access and are wiped when the
/// last handle drops or the key is closed. The revoked flag transitions
/// false to true only; a revoked key still decrypts but must not encrypt
/// new data.
pub struct CryptoKey {
    id: String,
    created: i64,
    revoked: AtomicBool,
    secret: Box<dyn Secret>,
}

impl std::fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoKey")
            .field("id", &self.id)
            .field("created", &self.created)
            .field("revoked", &self.is_revoked())
            .field("secret", &"<hidden>")
            .finish()
    }
}

impl CryptoKey {
    /// Creates a key from raw material, wiping `bytes` in the process.
    pub fn new(
        id: impl Into<String>,
        created: i64,
        mut bytes: Vec<u8>,
        secret_factory: &dyn SecretFactory,
    ) -> Result<Self> {
        let secret = secret_factory.new_secret(&mut bytes)?;
        Ok(Self {
            id: id.into(),
            created,
            revoked: AtomicBool::new(false),
            secret,
        })
    }

    /// Generates a key with `size` random bytes.
    pub fn generate(
        secret_factory: &dyn SecretFactory,
        id: impl Into<String>,
        created: i64,
        size: usize,
    ) -> Result<Self> {
        let secret = secret_factory.random_secret(size)?;
        Ok(Self {
            id: id.into(),
            created,
            revoked: AtomicBool::new(false),
            secret,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Creation timestamp in epoch seconds; stable for the key's lifetime.
    pub fn created(&self) -> i64 {
        self.created
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }

    /// Marks the key revoked. Revocation is one-way.
    pub fn set_revoked(&self, revoked: bool) {
        if revoked {
            self.revoked.store(true, Ordering::Release);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.secret.is_closed()
    }

    /// Wipes the key material. Idempotent.
    pub fn close(&self) -> Result<()> {
        Ok(self.secret.close()?)
    }

    /// Invokes `action` with the key bytes under scoped protection.
    ///
    /// The action's own error kind passes through intact; only access
    /// failures surface as secure memory errors.
    pub fn with_bytes<F, R>(&self, action: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> Result<R>,
    {
        let mut action = Some(action);
        let mut result: Option<Result<R>> = None;
        self.secret.with_bytes_raw(&mut |bytes| {
            if let Some(f) = action.take() {
                result = Some(f(bytes));
            }
            Ok(())
        })?;
        result.unwrap_or_else(|| {
            Err(crate::Error::Internal(
                "key bytes were not accessible".to_string(),
            ))
        })
    }
}

/// True if the key may not be used for new encryption.
pub fn is_key_invalid(key: &CryptoKey, expire_after: Duration) -> bool {
    key.is_revoked() || is_key_expired(key.created(), expire_after)
}
