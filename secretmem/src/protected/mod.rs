//! Protected-memory implementation of [`crate::secret::Secret`].
//!
//! Secrets live in dedicated page-aligned mappings that are locked into RAM,
//! excluded from core dumps where the OS supports it, and kept at no-access
//! protection except while a scoped byte access is active:
//!
//! ```text
//! NoAccess --(first with_bytes)--> ReadOnly --(last exit)--> NoAccess
//!     |
//!     +--(close)--> ReadWrite (wipe) --> freed
//! ```

pub mod factory;
pub mod secret;

pub use factory::{ProtectedSecretFactory, SecureHeapEngine};
pub use secret::ProtectedSecret;
