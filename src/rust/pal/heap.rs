// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::libmimalloc_sys::{
    mi_free,
    mi_heap_check_owned,
    mi_heap_contains_block,
    mi_heap_delete,
    mi_heap_get_default,
    mi_heap_malloc,
    mi_heap_new,
    mi_heap_realloc,
    mi_heap_t,
    mi_heap_zalloc,
    mi_usable_size,
};
use ::std::ffi::c_void;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Raw handle to a native heap instance.
pub type RawHeap = *mut mi_heap_t;

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Returns the default heap of the calling thread.
pub fn heap_default() -> RawHeap {
    // Safety: mi_heap_get_default is a FFI that takes no arguments and never fails.
    unsafe { mi_heap_get_default() }
}

/// Creates a new private heap. Returns a null pointer on failure.
pub fn heap_new() -> RawHeap {
    // Safety: mi_heap_new is a FFI that takes no arguments.
    unsafe { mi_heap_new() }
}

/// Deletes a private heap. Blocks that are still allocated are migrated to the default heap.
pub unsafe fn heap_delete(heap: RawHeap) {
    trace!("heap_delete(): heap={:?}", heap);
    mi_heap_delete(heap)
}

/// Allocates `size` bytes from `heap`, optionally zero-filled. Returns a null pointer on failure.
pub unsafe fn heap_alloc(heap: RawHeap, size: usize, zero_init: bool) -> *mut u8 {
    let ptr: *mut c_void = if zero_init {
        mi_heap_zalloc(heap, size)
    } else {
        mi_heap_malloc(heap, size)
    };
    trace!("heap_alloc(): heap={:?} size={} zero_init={} ptr={:?}", heap, size, zero_init, ptr);
    ptr.cast::<u8>()
}

/// Reallocates a block of `heap` to `size` bytes. Returns a null pointer on failure, in which case the original block
/// is left untouched.
pub unsafe fn heap_realloc(heap: RawHeap, ptr: *mut u8, size: usize) -> *mut u8 {
    let new_ptr: *mut c_void = mi_heap_realloc(heap, ptr.cast::<c_void>(), size);
    trace!("heap_realloc(): heap={:?} ptr={:?} size={} new_ptr={:?}", heap, ptr, size, new_ptr);
    new_ptr.cast::<u8>()
}

/// Frees a heap block.
pub unsafe fn heap_free(ptr: *mut u8) {
    trace!("heap_free(): ptr={:?}", ptr);
    mi_free(ptr.cast::<c_void>())
}

/// Queries the number of usable bytes in a heap block.
pub unsafe fn heap_usable_size(ptr: *const u8) -> usize {
    mi_usable_size(ptr.cast::<c_void>())
}

/// Checks whether `ptr` is the start of a live block that belongs to `heap`.
pub unsafe fn heap_validate(heap: RawHeap, ptr: *const u8) -> bool {
    // The ownership check only inspects heap metadata, so it is safe to call with arbitrary pointers. The block check
    // requires the pointer to be in one of the heap's areas.
    mi_heap_check_owned(heap, ptr.cast::<c_void>()) && mi_heap_contains_block(heap, ptr.cast::<c_void>())
}
