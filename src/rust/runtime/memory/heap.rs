// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    pal::functions::{
        heap_alloc,
        heap_default,
        heap_delete,
        heap_free,
        heap_new,
        heap_realloc,
        heap_usable_size,
        heap_validate,
        RawHeap,
    },
    runtime::fail::Fail,
};
use ::std::{
    fmt,
    rc::Rc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// A native heap instance.
///
/// This is either the default heap of the process (as seen from the calling thread) or a private heap created with
/// [NativeHeap::create]. Clones share the same underlying heap, which is kept alive until the last clone goes away,
/// so a buffer that holds a clone can always return its memory to the heap it came from.
#[derive(Clone)]
pub struct NativeHeap {
    inner: Rc<HeapInner>,
}

struct HeapInner {
    raw: RawHeap,
    is_private: bool,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl NativeHeap {
    /// Binds to the default heap of the process.
    pub fn process() -> Self {
        Self {
            inner: Rc::new(HeapInner {
                raw: heap_default(),
                is_private: false,
            }),
        }
    }

    /// Creates a new private heap.
    pub fn create() -> Result<Self, Fail> {
        let raw: RawHeap = heap_new();
        if raw.is_null() {
            let cause: &str = "failed to create private heap";
            error!("create(): {}", cause);
            return Err(Fail::new(libc::ENOMEM, cause));
        }
        debug!("create(): heap={:?}", raw);
        Ok(Self {
            inner: Rc::new(HeapInner { raw, is_private: true }),
        })
    }

    /// Returns `true` if this is the default heap of the process.
    pub fn is_process_heap(&self) -> bool {
        !self.inner.is_private
    }

    /// Returns `true` if both handles refer to the same native heap.
    pub fn same_as(&self, other: &NativeHeap) -> bool {
        self.inner.raw == other.inner.raw
    }

    /// Allocates `size` bytes. Returns a null pointer on failure.
    pub fn allocate(&self, size: usize, zero_init: bool) -> *mut u8 {
        // Safety: the heap handle is valid for as long as `self` is alive.
        unsafe { heap_alloc(self.inner.raw, size, zero_init) }
    }

    /// Resizes a block of this heap. Returns a null pointer on failure, leaving the original block untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block returned by this heap.
    pub unsafe fn reallocate(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        heap_realloc(self.inner.raw, ptr, size)
    }

    /// Frees a block of this heap.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block returned by this heap, and must not be used afterwards.
    pub unsafe fn free(&self, ptr: *mut u8) {
        heap_free(ptr)
    }

    /// Queries the usable size of a block.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block returned by this heap.
    pub unsafe fn usable_size(&self, ptr: *const u8) -> usize {
        heap_usable_size(ptr)
    }

    /// Checks that `ptr` is the start of a live block of this heap.
    ///
    /// # Safety
    ///
    /// `ptr` may be any address, but the answer is only meaningful while no other thread frees blocks of this heap.
    pub unsafe fn validate(&self, ptr: *const u8) -> bool {
        !ptr.is_null() && heap_validate(self.inner.raw, ptr)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for NativeHeap {
    fn default() -> Self {
        Self::process()
    }
}

impl fmt::Debug for NativeHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHeap")
            .field("raw", &self.inner.raw)
            .field("is_private", &self.inner.is_private)
            .finish()
    }
}

impl Drop for HeapInner {
    fn drop(&mut self) {
        if self.is_private {
            // Safety: the heap was created by us and no clone of the owning NativeHeap remains.
            unsafe { heap_delete(self.raw) };
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
