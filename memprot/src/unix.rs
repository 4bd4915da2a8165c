use crate::error::MemprotError;
use crate::types::{PageProtection, RlimitResource};
use once_cell::sync::Lazy;
use std::ptr;

static PAGE_SIZE: Lazy<usize> =
    Lazy::new(|| unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize });

#[inline]
fn as_mut_ptr(region: &mut [u8]) -> *mut libc::c_void {
    region.as_mut_ptr().cast::<libc::c_void>()
}

pub fn alloc(size: usize) -> Result<&'static mut [u8], MemprotError> {
    if size == 0 {
        return Err(MemprotError::InvalidArgument(
            "cannot allocate a zero-length region".to_string(),
        ));
    }

    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        return Err(MemprotError::SystemError(format!(
            "mmap of {} bytes failed [{}]",
            size,
            std::io::Error::last_os_error()
        )));
    }

    let region = unsafe { std::slice::from_raw_parts_mut(ptr.cast::<u8>(), size) };

    // Wipe any remnant data in the fresh mapping.
    region.fill(0);

    Ok(region)
}

pub fn free(region: &mut [u8]) -> Result<(), MemprotError> {
    if region.is_empty() {
        return Ok(());
    }

    // The region must be writable to be wiped.
    protect(region, PageProtection::ReadWrite)?;
    region.fill(0);

    let result = unsafe { libc::munmap(as_mut_ptr(region), region.len()) };
    if result != 0 {
        return Err(MemprotError::SystemError(format!(
            "munmap of {:p} failed [{}]",
            region.as_ptr(),
            std::io::Error::last_os_error()
        )));
    }

    Ok(())
}

pub fn protect(region: &mut [u8], protection: PageProtection) -> Result<(), MemprotError> {
    if region.is_empty() {
        return Ok(());
    }

    let prot = match protection {
        PageProtection::NoAccess => libc::PROT_NONE,
        PageProtection::ReadOnly => libc::PROT_READ,
        PageProtection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
    };

    let result = unsafe { libc::mprotect(as_mut_ptr(region), region.len(), prot) };
    if result != 0 {
        return Err(MemprotError::SystemError(format!(
            "mprotect({:?}) on {:p} failed [{}]",
            protection,
            region.as_ptr(),
            std::io::Error::last_os_error()
        )));
    }

    Ok(())
}

pub fn lock(region: &mut [u8]) -> Result<(), MemprotError> {
    if region.is_empty() {
        return Ok(());
    }

    // Keep these pages out of core dumps. Linux-only; failure is not fatal
    // because mlock below is the load-bearing call.
    #[cfg(target_os = "linux")]
    unsafe {
        libc::madvise(as_mut_ptr(region), region.len(), libc::MADV_DONTDUMP);
    }

    let result = unsafe { libc::mlock(as_mut_ptr(region), region.len()) };
    if result != 0 {
        return Err(MemprotError::SystemError(format!(
            "mlock on {:p} failed, limit reached? [{}]",
            region.as_ptr(),
            std::io::Error::last_os_error()
        )));
    }

    Ok(())
}

pub fn unlock(region: &mut [u8]) -> Result<(), MemprotError> {
    if region.is_empty() {
        return Ok(());
    }

    let result = unsafe { libc::munlock(as_mut_ptr(region), region.len()) };
    if result != 0 {
        return Err(MemprotError::SystemError(format!(
            "munlock on {:p} failed [{}]",
            region.as_ptr(),
            std::io::Error::last_os_error()
        )));
    }

    Ok(())
}

pub fn page_size() -> usize {
    *PAGE_SIZE
}

pub fn disable_core_dumps() -> Result<(), MemprotError> {
    set_limit(RlimitResource::Core, 0)
}

pub fn set_limit(resource: RlimitResource, value: u64) -> Result<(), MemprotError> {
    let resource_id = match resource {
        RlimitResource::Core => libc::RLIMIT_CORE,
        RlimitResource::Data => libc::RLIMIT_DATA,
        RlimitResource::MemLock => libc::RLIMIT_MEMLOCK,
    };

    let rlimit = libc::rlimit {
        rlim_cur: value,
        rlim_max: value,
    };

    let result = unsafe { libc::setrlimit(resource_id, &rlimit) };
    if result != 0 {
        return Err(MemprotError::SystemError(format!(
            "setrlimit failed [{}]",
            std::io::Error::last_os_error()
        )));
    }

    Ok(())
}
