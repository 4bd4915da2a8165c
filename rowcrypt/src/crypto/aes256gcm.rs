use crate::error::{Error, Result};
use crate::util;
use crate::Aead;
use aes_gcm::aead::{Aead as AeadTrait, KeyInit};
use aes_gcm::{Aes256Gcm, Key as AesKey, Nonce};

const GCM_BLOCK_SIZE: usize = 16;
const GCM_NONCE_SIZE: usize = 12;
const GCM_TAG_SIZE: usize = 16;

// Maximum plaintext size supported by GCM: ((1 << 32) - 2) blocks.
const GCM_MAX_DATA_SIZE: usize = ((1 << 32) - 2) * GCM_BLOCK_SIZE;

/// AES-256-GCM with a random 96-bit nonce and 128-bit tag.
///
/// Output layout is `nonce || ciphertext || tag`, the format shared by all
/// implementations of this record format.
#[derive(Default, Debug, Clone)]
pub struct Aes256GcmAead;

impl Aes256GcmAead {
    pub fn new() -> Self {
        Self
    }
}

impl Aead for Aes256GcmAead {
    fn encrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        if data.len() > GCM_MAX_DATA_SIZE {
            return Err(Error::Crypto("data too large for GCM".to_string()));
        }
        if key.len() != crate::AES256_KEY_SIZE {
            return Err(Error::Crypto(format!(
                "AES-256 requires a 32-byte key, got {}",
                key.len()
            )));
        }

        let cipher = Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(key));

        let mut nonce_and_cipher = vec![0_u8; GCM_NONCE_SIZE + data.len() + GCM_TAG_SIZE];
        util::fill_random(&mut nonce_and_cipher[..GCM_NONCE_SIZE]);

        let nonce = Nonce::from_slice(&nonce_and_cipher[..GCM_NONCE_SIZE]);
        let ciphertext = cipher
            .encrypt(nonce, data)
            .map_err(|e| Error::Crypto(format!("encryption failed: {}", e)))?;

        nonce_and_cipher[GCM_NONCE_SIZE..].copy_from_slice(&ciphertext);
        Ok(nonce_and_cipher)
    }

    fn decrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        if data.len() < GCM_NONCE_SIZE + GCM_TAG_SIZE {
            return Err(Error::DecryptionFailed(
                "data shorter than GCM nonce and tag".to_string(),
            ));
        }
        if key.len() != crate::AES256_KEY_SIZE {
            return Err(Error::Crypto(format!(
                "AES-256 requires a 32-byte key, got {}",
                key.len()
            )));
        }

        let cipher = Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(key));
        let nonce = Nonce::from_slice(&data[..GCM_NONCE_SIZE]);

        cipher
            .decrypt(nonce, &data[GCM_NONCE_SIZE..])
            .map_err(|_| Error::DecryptionFailed("GCM tag verification failed".to_string()))
    }
}
