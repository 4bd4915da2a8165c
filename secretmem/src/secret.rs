use crate::error::{Result, SecretError};
use std::io::Read;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// A handle to sensitive bytes held in protected memory.
///
/// The bytes are unreadable while no scoped access is active; implementations
/// raise the protection for the duration of [`Secret::with_bytes_raw`] and
/// restore it on every exit path. Closing a secret wipes the backing memory.
pub trait Secret: Send + Sync {
    /// Returns true once the secret has been closed.
    fn is_closed(&self) -> bool;

    /// Closes the secret, wiping its memory. Idempotent; blocks until all
    /// in-flight accesses have finished.
    fn close(&self) -> Result<()>;

    /// The length of the secret in bytes.
    fn len(&self) -> usize;

    /// Returns true if the secret holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes `action` with a read-only view of the bytes.
    ///
    /// The view is valid only for the duration of the call; protection is
    /// restored afterwards even if `action` fails or panics. Fails with
    /// [`SecretError::SecretClosed`] once the secret is closed.
    fn with_bytes_raw(&self, action: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<()>;

    /// Returns an `io::Read` view over the secret.
    fn reader(&self) -> Result<Box<dyn Read + Send + '_>>;
}

/// Ergonomic, generic helpers layered over [`Secret::with_bytes_raw`].
///
/// Blanket-implemented so they are available on `Box<dyn Secret>` as well.
pub trait SecretExt: Secret {
    /// Invokes `action` with the secret bytes and returns its result.
    fn with_bytes<F, R>(&self, action: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> Result<R>,
    {
        let mut action = Some(action);
        let mut result: Option<R> = None;
        self.with_bytes_raw(&mut |bytes| {
            let f = action.take().ok_or_else(|| {
                SecretError::OperationFailed("byte access callback invoked twice".to_string())
            })?;
            result = Some(f(bytes)?);
            Ok(())
        })?;
        result.ok_or_else(|| {
            SecretError::OperationFailed("byte access callback never invoked".to_string())
        })
    }

    /// Like [`SecretExt::with_bytes`], for actions that also produce a
    /// transient byte buffer. The buffer is wiped before returning.
    fn with_bytes_func<F, R>(&self, action: F) -> Result<R>
    where
        F: FnOnce(&[u8]) -> Result<(R, Vec<u8>)>,
    {
        self.with_bytes(|bytes| {
            let (result, mut transient) = action(bytes)?;
            transient.zeroize();
            Ok(result)
        })
    }

    /// Compares the secret against `other` in constant time.
    fn matches_bytes(&self, other: &[u8]) -> Result<bool> {
        self.with_bytes(|bytes| Ok(bytes.ct_eq(other).into()))
    }
}

impl<T: Secret + ?Sized> SecretExt for T {}

/// Creates secrets. Object-safe so callers can select a backing engine at
/// runtime.
pub trait SecretFactory: Send + Sync {
    /// Creates a secret from `b`, wiping `b` before returning.
    fn new_secret(&self, b: &mut [u8]) -> Result<Box<dyn Secret>>;

    /// Creates a secret filled with `size` cryptographically random bytes.
    fn random_secret(&self, size: usize) -> Result<Box<dyn Secret>>;
}
