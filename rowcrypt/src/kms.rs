//! Key management service implementations.
//!
//! The engine only requires the [`crate::KeyManagementService`] trait; cloud
//! KMS backends live outside this crate. The static implementation here
//! serves tests, development, and environments that manage their own master
//! key material.

use crate::crypto::Aes256GcmAead;
use crate::error::{Error, Result};
use crate::{Aead, KeyManagementService};
use async_trait::async_trait;

/// A KMS with a fixed in-process master key.
///
/// Suitable for tests and development only: the master key lives in ordinary
/// process memory and is never rotated.
pub struct StaticKeyManagementService {
    master_key: Vec<u8>,
    aead: Aes256GcmAead,
}

impl std::fmt::Debug for StaticKeyManagementService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticKeyManagementService")
            .field("master_key", &"<hidden>")
            .finish()
    }
}

impl StaticKeyManagementService {
    pub fn new(master_key: Vec<u8>) -> Self {
        Self {
            master_key,
            aead: Aes256GcmAead::new(),
        }
    }
}

#[async_trait]
impl KeyManagementService for StaticKeyManagementService {
    async fn encrypt_key(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.aead
            .encrypt(key, &self.master_key)
            .map_err(|e| Error::Kms(e.to_string()))
    }

    async fn decrypt_key(&self, encrypted_key: &[u8]) -> Result<Vec<u8>> {
        self.aead
            .decrypt(encrypted_key, &self.master_key)
            .map_err(|e| Error::Kms(e.to_string()))
    }
}
