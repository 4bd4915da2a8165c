use crate::error::{Result, SecretError};
use crate::protected::secret::ProtectedSecret;
use crate::secret::{Secret, SecretFactory};
use log::warn;
use std::sync::Once;
use zeroize::Zeroize;

static PLATFORM_INIT: Once = Once::new();

/// Backing engine for secret storage.
///
/// Only the mmap engine is built into this workspace; `OpenSsl11` is
/// recognized for configuration compatibility and rejected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureHeapEngine {
    /// Anonymous page mappings with mlock/mprotect (the default).
    Mmap,
    /// OpenSSL 1.1 secure heap; not available in this build.
    OpenSsl11,
}

/// Creates [`ProtectedSecret`] instances.
///
/// The first factory constructed also disables core dumps for the process;
/// a failure there is logged and does not prevent factory creation.
#[derive(Debug, Clone)]
pub struct ProtectedSecretFactory {
    mlock: bool,
}

impl ProtectedSecretFactory {
    pub fn new() -> Self {
        PLATFORM_INIT.call_once(|| {
            if let Err(e) = memprot::disable_core_dumps() {
                warn!("could not disable core dumps: {}", e);
            }
        });

        Self { mlock: true }
    }

    /// Controls whether secrets are locked into RAM. Disabling is intended
    /// for environments with restrictive mlock limits, not for production.
    pub fn with_mlock(mut self, mlock: bool) -> Self {
        self.mlock = mlock;
        self
    }

    /// Constructs a factory for the given engine.
    pub fn for_engine(engine: SecureHeapEngine) -> Result<Self> {
        match engine {
            SecureHeapEngine::Mmap => Ok(Self::new()),
            SecureHeapEngine::OpenSsl11 => Err(SecretError::UnsupportedEngine(
                "openssl11 secure heap is not built into this binary".to_string(),
            )),
        }
    }
}

impl Default for ProtectedSecretFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretFactory for ProtectedSecretFactory {
    fn new_secret(&self, b: &mut [u8]) -> Result<Box<dyn Secret>> {
        if b.is_empty() {
            return Err(SecretError::InvalidSize(
                "cannot create a secret from an empty slice".to_string(),
            ));
        }

        let secret = ProtectedSecret::with_options(b, self.mlock)?;
        b.zeroize();
        Ok(Box::new(secret))
    }

    fn random_secret(&self, size: usize) -> Result<Box<dyn Secret>> {
        let secret = ProtectedSecret::random_with_options(size, self.mlock)?;
        Ok(Box::new(secret))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::secret::SecretExt;

    #[test]
    fn new_secret_wipes_source() {
        let factory = ProtectedSecretFactory::new();
        let mut source = b"wipe me".to_vec();
        let secret = factory.new_secret(&mut source).unwrap();

        assert!(source.iter().all(|&b| b == 0));
        secret
            .with_bytes(|bytes| {
                assert_eq!(bytes, b"wipe me");
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn empty_source_is_rejected() {
        let factory = ProtectedSecretFactory::new();
        let mut source = Vec::new();
        assert!(factory.new_secret(&mut source).is_err());
    }

    #[test]
    fn openssl_engine_is_rejected() {
        assert!(matches!(
            ProtectedSecretFactory::for_engine(SecureHeapEngine::OpenSsl11),
            Err(SecretError::UnsupportedEngine(_))
        ));
    }

    #[test]
    fn mmap_engine_is_the_default() {
        let factory = ProtectedSecretFactory::for_engine(SecureHeapEngine::Mmap).unwrap();
        let secret = factory.random_secret(16).unwrap();
        assert_eq!(secret.len(), 16);
    }
}
