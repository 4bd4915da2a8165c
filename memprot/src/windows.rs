use crate::error::MemprotError;
use crate::types::{PageProtection, RlimitResource};
use std::ptr;
use winapi::um::memoryapi::{VirtualAlloc, VirtualFree, VirtualLock, VirtualProtect, VirtualUnlock};
use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};
use winapi::um::winnt::{
    MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_NOACCESS, PAGE_READONLY, PAGE_READWRITE,
};

#[inline]
fn as_ptr_void(region: &mut [u8]) -> *mut winapi::ctypes::c_void {
    region.as_mut_ptr().cast::<winapi::ctypes::c_void>()
}

pub fn alloc(size: usize) -> Result<&'static mut [u8], MemprotError> {
    if size == 0 {
        return Err(MemprotError::InvalidArgument(
            "cannot allocate a zero-length region".to_string(),
        ));
    }

    let ptr = unsafe {
        VirtualAlloc(
            ptr::null_mut(),
            size,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_READWRITE,
        )
    };

    if ptr.is_null() {
        return Err(MemprotError::SystemError(format!(
            "VirtualAlloc of {} bytes failed [{}]",
            size,
            std::io::Error::last_os_error()
        )));
    }

    let region = unsafe { std::slice::from_raw_parts_mut(ptr.cast::<u8>(), size) };
    region.fill(0);
    Ok(region)
}

pub fn free(region: &mut [u8]) -> Result<(), MemprotError> {
    if region.is_empty() {
        return Ok(());
    }

    protect(region, PageProtection::ReadWrite)?;
    region.fill(0);

    let result = unsafe { VirtualFree(as_ptr_void(region), 0, MEM_RELEASE) };
    if result == 0 {
        return Err(MemprotError::SystemError(format!(
            "VirtualFree of {:p} failed [{}]",
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
        PageProtection::NoAccess => PAGE_NOACCESS,
        PageProtection::ReadOnly => PAGE_READONLY,
        PageProtection::ReadWrite => PAGE_READWRITE,
    };

    let mut old_protect: u32 = 0;
    let result =
        unsafe { VirtualProtect(as_ptr_void(region), region.len(), prot, &mut old_protect) };
    if result == 0 {
        return Err(MemprotError::SystemError(format!(
            "VirtualProtect({:?}) on {:p} failed [{}]",
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
    let result = unsafe { VirtualLock(as_ptr_void(region), region.len()) };
    if result == 0 {
        return Err(MemprotError::SystemError(format!(
            "VirtualLock on {:p} failed, limit reached? [{}]",
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
    let result = unsafe { VirtualUnlock(as_ptr_void(region), region.len()) };
    if result == 0 {
        return Err(MemprotError::SystemError(format!(
            "VirtualUnlock on {:p} failed [{}]",
            region.as_ptr(),
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

pub fn page_size() -> usize {
    unsafe {
        let mut si: SYSTEM_INFO = std::mem::zeroed();
        GetSystemInfo(&mut si);
        si.dwPageSize as usize
    }
}

// Locked pages are excluded from minidumps by default; nothing to do here.
pub fn disable_core_dumps() -> Result<(), MemprotError> {
    Ok(())
}

pub fn set_limit(_resource: RlimitResource, _value: u64) -> Result<(), MemprotError> {
    Err(MemprotError::NotSupported(
        "set_limit is not supported on Windows".to_string(),
    ))
}
