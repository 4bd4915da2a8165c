//! # memprot
//!
//! Cross-platform wrapper for the memory syscalls needed to hold secrets:
//!
//! - page-aligned allocation and deallocation
//! - protection changes (no-access / read-only / read-write)
//! - locking pages into RAM so they cannot be swapped to disk
//! - excluding pages from core dumps where the OS supports it
//!
//! The rest of the workspace is platform-agnostic; only this crate talks to
//! the OS.

mod error;
mod types;

#[cfg(unix)]
pub(crate) mod unix;
#[cfg(unix)]
use unix as platform;

#[cfg(windows)]
pub(crate) mod windows;
#[cfg(windows)]
use windows as platform;

pub use error::MemprotError;
pub use types::{PageProtection, RlimitResource};

/// Allocates a page-aligned, zeroed memory region of at least `size` bytes.
///
/// The region is returned read-write; callers are expected to lock and
/// protect it before storing anything sensitive.
pub fn alloc(size: usize) -> Result<&'static mut [u8], MemprotError> {
    platform::alloc(size)
}

/// Frees a region previously returned by [`alloc`].
///
/// The region is made writable and zeroed before it is returned to the OS.
pub fn free(region: &mut [u8]) -> Result<(), MemprotError> {
    platform::free(region)
}

/// Applies the given protection to a region.
pub fn protect(region: &mut [u8], protection: PageProtection) -> Result<(), MemprotError> {
    platform::protect(region, protection)
}

/// Locks a region into physical RAM and, where supported, excludes it from
/// core dumps.
pub fn lock(region: &mut [u8]) -> Result<(), MemprotError> {
    platform::lock(region)
}

/// Unlocks a region previously locked with [`lock`].
pub fn unlock(region: &mut [u8]) -> Result<(), MemprotError> {
    platform::unlock(region)
}

/// Returns the system page size.
pub fn page_size() -> usize {
    platform::page_size()
}

/// Disables core dump files for the current process.
pub fn disable_core_dumps() -> Result<(), MemprotError> {
    platform::disable_core_dumps()
}

/// Sets a resource limit for the current process.
pub fn set_limit(resource: RlimitResource, value: u64) -> Result<(), MemprotError> {
    platform::set_limit(resource, value)
}

/// Rounds `size` up to a whole number of pages.
pub fn round_to_pages(size: usize) -> usize {
    let page = page_size();
    size.div_ceil(page) * page
}
