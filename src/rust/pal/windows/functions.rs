// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::{
    ffi::c_void,
    mem,
    ptr,
};
use ::windows::Win32::{
    NetworkManagement::NetManagement::{
        NetApiBufferAllocate,
        NetApiBufferFree,
    },
    System::{
        Com::{
            CoTaskMemAlloc,
            CoTaskMemFree,
        },
        Memory::{
            VirtualAlloc,
            VirtualFree,
            VirtualQuery,
            MEMORY_BASIC_INFORMATION,
            MEM_COMMIT,
            MEM_RELEASE,
            MEM_RESERVE,
            PAGE_READWRITE,
        },
        SystemInformation::{
            GetSystemInfo,
            SYSTEM_INFO,
        },
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Status code returned by NetApi routines on success.
const NERR_SUCCESS: u32 = 0;

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Returns the page size of the system.
pub fn page_size() -> usize {
    let mut info: SYSTEM_INFO = unsafe { mem::zeroed() };
    // Safety: GetSystemInfo is a FFI that fills in the structure we pass in.
    unsafe { GetSystemInfo(&mut info) };
    info.dwPageSize as usize
}

/// Reserves and commits a page-granular region of at least `size` bytes. The region is zero-filled. Returns a null
/// pointer on failure.
pub unsafe fn virtual_alloc(size: usize) -> *mut u8 {
    let addr: *mut c_void = VirtualAlloc(None, size, MEM_RESERVE | MEM_COMMIT, PAGE_READWRITE);
    if addr.is_null() {
        warn!("virtual_alloc(): failed to allocate region (size={})", size);
    }
    trace!("virtual_alloc(): size={} addr={:?}", size, addr);
    addr.cast::<u8>()
}

/// Queries the size of the region that starts at `addr`, as reported by the system.
pub unsafe fn virtual_region_size(addr: *const u8, requested: usize) -> usize {
    let mut info: MEMORY_BASIC_INFORMATION = mem::zeroed();
    let len: usize = VirtualQuery(
        Some(addr.cast::<c_void>()),
        &mut info,
        mem::size_of::<MEMORY_BASIC_INFORMATION>(),
    );
    if len == 0 {
        warn!("virtual_region_size(): failed to query region (addr={:?})", addr);
        return requested;
    }
    info.RegionSize
}

/// Releases a whole region previously returned by [virtual_alloc].
pub unsafe fn virtual_free(addr: *mut u8, _size: usize) -> bool {
    trace!("virtual_free(): addr={:?}", addr);
    // MEM_RELEASE requires a zero size and releases the entire reservation.
    VirtualFree(addr.cast::<c_void>(), 0, MEM_RELEASE).is_ok()
}

/// Allocates a block from the COM task allocator. Returns a null pointer on failure.
pub unsafe fn task_mem_alloc(size: usize) -> *mut u8 {
    let ptr: *mut c_void = CoTaskMemAlloc(size);
    trace!("task_mem_alloc(): size={} ptr={:?}", size, ptr);
    ptr.cast::<u8>()
}

/// Frees a block of the COM task allocator.
pub unsafe fn task_mem_free(ptr: *mut u8) {
    trace!("task_mem_free(): ptr={:?}", ptr);
    CoTaskMemFree(Some(ptr.cast_const().cast::<c_void>()))
}

/// Allocates a NetApi buffer. Returns a null pointer on failure.
pub unsafe fn net_buffer_alloc(size: u32) -> *mut u8 {
    let mut buffer: *mut c_void = ptr::null_mut();
    let status: u32 = NetApiBufferAllocate(size, &mut buffer);
    if status != NERR_SUCCESS {
        warn!("net_buffer_alloc(): failed to allocate buffer (size={}, status={})", size, status);
        return ptr::null_mut();
    }
    trace!("net_buffer_alloc(): size={} ptr={:?}", size, buffer);
    buffer.cast::<u8>()
}

/// Frees a NetApi buffer.
pub unsafe fn net_buffer_free(ptr: *mut u8) -> bool {
    trace!("net_buffer_free(): ptr={:?}", ptr);
    NetApiBufferFree(Some(ptr.cast_const().cast::<c_void>())) == NERR_SUCCESS
}
