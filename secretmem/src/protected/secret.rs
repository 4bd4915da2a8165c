use crate::error::{Result, SecretError};
use crate::secret::{Secret, SecretExt};
use log::{error, trace, warn};
use memprot::PageProtection;
use std::io::Read;
use std::sync::{Arc, Condvar, Mutex, RwLock};
use zeroize::Zeroize;

/// A page-aligned mapping owning its memory.
///
/// `len` is the logical secret length; `capacity` is the whole-page size
/// actually mapped. Protection changes always cover the full mapping.
struct PageRegion {
    ptr: *mut u8,
    len: usize,
    capacity: usize,
    locked: bool,
}

impl PageRegion {
    fn new(len: usize, mlock: bool) -> Result<Self> {
        let capacity = memprot::round_to_pages(len);
        let mapping = memprot::alloc(capacity)
            .map_err(|e| SecretError::AllocationFailed(e.to_string()))?;

        let mut region = Self {
            ptr: mapping.as_mut_ptr(),
            len,
            capacity,
            locked: false,
        };

        if mlock {
            // If locking fails the mapping is freed by Drop on the error path.
            memprot::lock(unsafe { region.full_mapping() })
                .map_err(|e| SecretError::LockFailed(e.to_string()))?;
            region.locked = true;
        }

        Ok(region)
    }

    fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    /// The full mapping, for protection and locking syscalls only.
    ///
    /// Safety: the returned slice aliases `bytes()`. Callers must hand it
    /// straight to a syscall wrapper and never read or write through it while
    /// any byte view is live.
    #[allow(clippy::mut_from_ref)]
    unsafe fn full_mapping(&self) -> &'static mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr, self.capacity)
    }

    fn set_protection(&self, protection: PageProtection) -> Result<()> {
        memprot::protect(unsafe { self.full_mapping() }, protection)
            .map_err(|e| SecretError::ProtectionFailed(e.to_string()))
    }
}

impl Drop for PageRegion {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }

        let mapping = unsafe { self.full_mapping() };

        if self.locked {
            if let Err(e) = memprot::unlock(mapping) {
                error!("failed to unlock secret mapping before release: {}", e);
            }
        }

        // free() raises protection and wipes the mapping before unmapping.
        if let Err(e) = memprot::free(mapping) {
            error!("failed to free secret mapping: {}", e);
        }

        self.ptr = std::ptr::null_mut();
    }
}

// PageRegion owns its mapping exclusively; access is serialized by
// SecretInner's locks.
unsafe impl Send for PageRegion {}
unsafe impl Sync for PageRegion {}

#[derive(Debug)]
struct AccessState {
    closed: bool,
    closing: bool,
    access_count: usize,
}

pub(crate) struct SecretInner {
    region: RwLock<Option<PageRegion>>,
    state: Mutex<AccessState>,
    cond: Condvar,
    mlock: bool,
}

impl SecretInner {
    /// Raises protection to read-only for the first accessor and records the
    /// access. Fails without side effects if the secret is closed or closing,
    /// or if the protection change fails.
    fn begin_access(&self) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| {
            SecretError::OperationFailed("access state lock poisoned".to_string())
        })?;

        if state.closing || state.closed {
            return Err(SecretError::SecretClosed);
        }

        if state.access_count == 0 {
            let region_guard = self.region.read().map_err(|_| {
                SecretError::OperationFailed("region lock poisoned".to_string())
            })?;

            if let Some(region) = region_guard.as_ref() {
                region.set_protection(PageProtection::ReadOnly)?;
            }
        }

        state.access_count += 1;
        Ok(())
    }

    /// Records the end of an access; the last accessor restores no-access
    /// protection. Infallible: a protection failure is logged, state cleanup
    /// still happens, and close() waiters are woken.
    fn end_access(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.access_count -= 1;

            if state.access_count == 0 {
                if let Ok(region_guard) = self.region.read() {
                    if let Some(region) = region_guard.as_ref() {
                        if let Err(e) = region.set_protection(PageProtection::NoAccess) {
                            warn!("failed to restore no-access protection: {}", e);
                        }
                    }
                }
            }
        }

        self.cond.notify_all();
    }
}

/// Restores protection and wakes close() waiters on every exit path,
/// including panics inside the access closure.
struct AccessGuard<'a> {
    inner: &'a SecretInner,
}

impl Drop for AccessGuard<'_> {
    fn drop(&mut self) {
        self.inner.end_access();
    }
}

/// A secret held in page-locked memory.
///
/// The pages rest at no-access protection and are raised to read-only while a
/// scoped byte access is active. Closing wipes the pages; `close` waits for
/// in-flight accesses to drain. Cloning shares the underlying secret.
pub struct ProtectedSecret {
    inner: Arc<SecretInner>,
}

impl ProtectedSecret {
    /// Creates a secret by copying `data` into a fresh protected mapping.
    pub fn new(data: &[u8]) -> Result<Self> {
        Self::with_options(data, true)
    }

    pub(crate) fn with_options(data: &[u8], mlock: bool) -> Result<Self> {
        if data.is_empty() {
            return Err(SecretError::InvalidSize(
                "cannot create a zero-length secret".to_string(),
            ));
        }

        trace!("creating protected secret of {} bytes", data.len());

        let mut region = PageRegion::new(data.len(), mlock)?;
        region.bytes_mut().copy_from_slice(data);
        region.set_protection(PageProtection::NoAccess)?;

        Ok(Self {
            inner: Arc::new(SecretInner {
                region: RwLock::new(Some(region)),
                state: Mutex::new(AccessState {
                    closed: false,
                    closing: false,
                    access_count: 0,
                }),
                cond: Condvar::new(),
                mlock,
            }),
        })
    }

    /// Creates a secret filled with cryptographically random bytes.
    ///
    /// The random bytes are written directly into the protected mapping so
    /// they never exist on the ordinary heap.
    pub fn random(len: usize) -> Result<Self> {
        Self::random_with_options(len, true)
    }

    pub(crate) fn random_with_options(len: usize, mlock: bool) -> Result<Self> {
        if len == 0 {
            return Err(SecretError::InvalidSize(
                "cannot create a zero-length secret".to_string(),
            ));
        }

        let mut region = PageRegion::new(len, mlock)?;
        getrandom::getrandom(region.bytes_mut())
            .map_err(|e| SecretError::RandomFailed(e.to_string()))?;
        region.set_protection(PageProtection::NoAccess)?;

        Ok(Self {
            inner: Arc::new(SecretInner {
                region: RwLock::new(Some(region)),
                state: Mutex::new(AccessState {
                    closed: false,
                    closing: false,
                    access_count: 0,
                }),
                cond: Condvar::new(),
                mlock,
            }),
        })
    }

    /// Duplicates the secret into an independent protected mapping.
    pub fn copy(&self) -> Result<Self> {
        let mlock = self.inner.mlock;
        self.with_bytes(|bytes| {
            let mut staging = bytes.to_vec();
            let duplicate = Self::with_options(&staging, mlock);
            staging.zeroize();
            duplicate
        })
    }

    fn close_impl(&self) -> Result<()> {
        let mut state = self.inner.state.lock().map_err(|_| {
            SecretError::OperationFailed("access state lock poisoned".to_string())
        })?;

        state.closing = true;

        loop {
            if state.closed {
                return Ok(());
            }

            if state.access_count == 0 {
                let mut region_guard = self.inner.region.write().map_err(|_| {
                    SecretError::OperationFailed("region lock poisoned".to_string())
                })?;

                if let Some(mut region) = region_guard.take() {
                    // Raise protection so the pages can be wiped. A syscall
                    // failure is logged and cleanup continues; the mapping is
                    // wiped again inside free().
                    match region.set_protection(PageProtection::ReadWrite) {
                        Ok(()) => region.bytes_mut().zeroize(),
                        Err(e) => error!("failed to unprotect secret for wiping: {}", e),
                    }
                    // region drops here, unlocking and freeing the mapping
                }

                state.closed = true;
                return Ok(());
            }

            // Wait for in-flight accesses to drain.
            state = self.inner.cond.wait(state).map_err(|_| {
                SecretError::OperationFailed("access state lock poisoned".to_string())
            })?;
        }
    }
}

impl Secret for ProtectedSecret {
    fn is_closed(&self) -> bool {
        self.inner
            .state
            .lock()
            .map(|state| state.closed)
            .unwrap_or(false)
    }

    fn close(&self) -> Result<()> {
        self.close_impl()
    }

    fn len(&self) -> usize {
        self.inner
            .region
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().map(|region| region.len))
            .unwrap_or(0)
    }

    fn with_bytes_raw(&self, action: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<()> {
        self.inner.begin_access()?;
        let _guard = AccessGuard { inner: &self.inner };

        let region_guard = self.inner.region.read().map_err(|_| {
            SecretError::OperationFailed("region lock poisoned".to_string())
        })?;
        let region = region_guard.as_ref().ok_or(SecretError::SecretClosed)?;

        action(region.bytes())
    }

    fn reader(&self) -> Result<Box<dyn Read + Send + '_>> {
        if self.is_closed() {
            return Err(SecretError::SecretClosed);
        }
        Ok(Box::new(SecretReader {
            secret: self,
            position: 0,
        }))
    }
}

impl Drop for ProtectedSecret {
    fn drop(&mut self) {
        // Wipe only when the last handle goes away.
        if Arc::strong_count(&self.inner) == 1 {
            if let Err(e) = self.close_impl() {
                error!("error closing secret during drop: {}", e);
            }
        }
    }
}

impl Clone for ProtectedSecret {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for ProtectedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectedSecret")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Sequential read access over a protected secret.
struct SecretReader<'a> {
    secret: &'a ProtectedSecret,
    position: usize,
}

impl Read for SecretReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.secret
            .with_bytes(|bytes| {
                if self.position >= bytes.len() {
                    return Ok(0);
                }

                let remaining = bytes.len() - self.position;
                let to_read = remaining.min(buf.len());
                buf[..to_read].copy_from_slice(&bytes[self.position..self.position + to_read]);
                self.position += to_read;
                Ok(to_read)
            })
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }
}
