//! AEAD implementations for payload and key wrapping.

mod aes256gcm;

pub use aes256gcm::Aes256GcmAead;
