// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::ptr;

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Returns the page size of the system.
pub fn page_size() -> usize {
    // Safety: sysconf is a FFI that only reads a system constant.
    let ret: libc::c_long = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if ret <= 0 {
        // POSIX guarantees at least 4 KB pages on the platforms we support.
        4096
    } else {
        ret as usize
    }
}

/// Reserves and commits a page-granular region of at least `size` bytes. The region is zero-filled. Returns a null
/// pointer on failure.
pub unsafe fn virtual_alloc(size: usize) -> *mut u8 {
    let addr: *mut libc::c_void = libc::mmap(
        ptr::null_mut(),
        size,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
    );

    // Check for failure return value.
    if addr == libc::MAP_FAILED {
        let errno: libc::c_int = *libc::__errno_location();
        warn!("virtual_alloc(): failed to map region (size={}, errno={})", size, errno);
        return ptr::null_mut();
    }

    trace!("virtual_alloc(): size={} addr={:?}", size, addr);
    addr.cast::<u8>()
}

/// Computes the size of the region that [virtual_alloc] mapped for `requested` bytes. Linux offers no cheap query for an
/// anonymous mapping, so this does not ask the kernel: mappings are page-granular and the region is `requested` rounded
/// up to the next page boundary.
pub unsafe fn virtual_region_size(_addr: *const u8, requested: usize) -> usize {
    let page_size: usize = page_size();
    requested.div_ceil(page_size) * page_size
}

/// Releases a whole region previously returned by [virtual_alloc] for `size` bytes.
pub unsafe fn virtual_free(addr: *mut u8, size: usize) -> bool {
    let region: usize = virtual_region_size(addr, size);
    trace!("virtual_free(): addr={:?} size={} region={}", addr, size, region);
    libc::munmap(addr.cast::<libc::c_void>(), region) == 0
}

/// Allocates a block from the task allocator. Returns a null pointer on failure.
pub unsafe fn task_mem_alloc(size: usize) -> *mut u8 {
    let ptr: *mut libc::c_void = libc::malloc(size);
    trace!("task_mem_alloc(): size={} ptr={:?}", size, ptr);
    ptr.cast::<u8>()
}

/// Frees a block of the task allocator.
pub unsafe fn task_mem_free(ptr: *mut u8) {
    trace!("task_mem_free(): ptr={:?}", ptr);
    libc::free(ptr.cast::<libc::c_void>())
}

/// Allocates a network buffer. Returns a null pointer on failure.
pub unsafe fn net_buffer_alloc(size: u32) -> *mut u8 {
    let ptr: *mut libc::c_void = libc::calloc(1, size as libc::size_t);
    trace!("net_buffer_alloc(): size={} ptr={:?}", size, ptr);
    ptr.cast::<u8>()
}

/// Frees a network buffer.
pub unsafe fn net_buffer_free(ptr: *mut u8) -> bool {
    trace!("net_buffer_free(): ptr={:?}", ptr);
    libc::free(ptr.cast::<libc::c_void>());
    true
}
