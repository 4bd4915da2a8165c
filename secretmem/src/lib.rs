//! # secretmem
//!
//! Storage for sensitive bytes (cryptographic keys, passwords) with
//! OS-enforced protection: the backing pages are locked into RAM so they
//! cannot reach swap, excluded from core dumps where supported, kept
//! unreadable while not in use, and wiped before release.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use secretmem::protected::ProtectedSecretFactory;
//! use secretmem::{SecretExt, SecretFactory};
//!
//! let factory = ProtectedSecretFactory::new();
//!
//! let mut key_material = b"0123456789abcdef0123456789abcdef".to_vec();
//! let secret = factory.new_secret(&mut key_material)?;
//! // key_material has been wiped at this point
//!
//! secret.with_bytes(|bytes| {
//!     // bytes is readable only inside this closure
//!     assert_eq!(bytes.len(), 32);
//!     Ok(())
//! })?;
//! # Ok::<(), secretmem::SecretError>(())
//! ```

pub mod error;
pub mod protected;
pub mod secret;

pub use crate::error::{Result, SecretError};
pub use crate::protected::{ProtectedSecret, ProtectedSecretFactory, SecureHeapEngine};
pub use crate::secret::{Secret, SecretExt, SecretFactory};
