// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

// This MemoryBuffer type is a single handle over raw memory that may come from any of several native allocator
// families (see Backend). The handle remembers which family produced its memory and routes every size-changing
// operation back to it, so callers can allocate, grow, shrink, edit, and release memory the same way regardless of
// where it lives.
//
// A handle is either Unallocated (null address, zero length, invalid backend) or Allocated with exactly one backend:
//
//   Unallocated --allocate--> Allocated(b) --resize--> Allocated(b) --release / resize(0)--> Unallocated
//
// Switching backends always requires a release first. The memory is released when the handle is dropped, so a
// handle owned by a scope is freed on every exit path of that scope.
//
// Note on ownership: handles created through from_raw() may be non-owning views. Such a view never calls a native
// free routine and cannot change the size of the memory it points to.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    config::BufferOptions,
    fail::Fail,
    memory::{
        backend::{
            self,
            Allocation,
            Backend,
        },
        heap::NativeHeap,
        pressure::{
            MemoryPressure,
            NoPressure,
        },
    },
};
use ::std::{
    fmt,
    ops::{
        Deref,
        DerefMut,
    },
    ptr::{
        self,
        NonNull,
    },
    rc::Rc,
    slice,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Handle to a block of unmanaged memory.
pub struct MemoryBuffer {
    /// Address of the data. Null when unallocated.
    address: *mut u8,
    /// Logical size of the data in bytes.
    length: usize,
    /// Native allocator family that produced `address`.
    backend: Backend,
    /// Whether this handle must release `address`.
    is_owner: bool,
    /// Whether `length` is currently reported to `pressure`.
    has_external_accounting: bool,
    /// Whether memory exposed by growth is zero-filled.
    zero_init: bool,
    /// Alignment of an [Backend::AlignedHeap] block. Zero for other backends or unknown alignments.
    alignment: usize,
    /// Heap that heap-based backends allocate from.
    heap: NativeHeap,
    /// External pressure accounting sink.
    pressure: Rc<dyn MemoryPressure>,
    /// Defaults applied by this handle.
    options: BufferOptions,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl MemoryBuffer {
    // ------------
    // Constructors
    // ------------

    /// Creates an unallocated handle bound to the process heap.
    pub fn new() -> Self {
        Self::with_options(BufferOptions::default())
    }

    /// Creates an unallocated handle bound to the process heap, using `options` as defaults.
    pub fn with_options(options: BufferOptions) -> Self {
        Self {
            address: ptr::null_mut(),
            length: 0,
            backend: Backend::Invalid,
            is_owner: false,
            has_external_accounting: false,
            zero_init: false,
            alignment: 0,
            heap: NativeHeap::process(),
            pressure: Rc::new(NoPressure),
            options,
        }
    }

    /// Creates a handle that owns `size` bytes of `backend` memory.
    pub fn allocated(size: usize, backend: Backend, zero_init: bool) -> Result<Self, Fail> {
        let mut buffer: MemoryBuffer = MemoryBuffer::new();
        buffer.allocate(size, backend, zero_init, false)?;
        Ok(buffer)
    }

    /// Wraps an existing native address.
    ///
    /// A null `address` yields an unallocated handle. For heap-based backends the memory is assumed to come from the
    /// process heap; use [MemoryBuffer::set_heap] on an unallocated handle and [MemoryBuffer::allocate] instead when a
    /// private heap is involved.
    ///
    /// # Safety
    ///
    /// `address` must point to at least `length` bytes of memory produced by `backend`. If `is_owner` is set, the
    /// memory must not be released by anyone else.
    pub unsafe fn from_raw(address: *mut u8, length: usize, backend: Backend, is_owner: bool) -> Result<Self, Fail> {
        let mut buffer: MemoryBuffer = MemoryBuffer::new();
        if address.is_null() {
            if length != 0 {
                return Err(Fail::new(libc::EINVAL, "a null address cannot have a length"));
            }
            return Ok(buffer);
        }
        if backend == Backend::Invalid {
            return Err(Fail::new(libc::EINVAL, "cannot wrap memory of the invalid backend"));
        }

        buffer.address = address;
        buffer.length = length;
        buffer.backend = backend;
        buffer.is_owner = is_owner;
        trace!("from_raw(): address={:?} length={} backend={} is_owner={}", address, length, backend, is_owner);
        Ok(buffer)
    }

    /// Gives up ownership of the memory, returning its address and length. The handle is left unallocated and any
    /// reported pressure is withdrawn.
    pub fn into_raw(mut self) -> Option<(NonNull<u8>, usize)> {
        let allocation: Allocation = self.allocation()?;
        if self.has_external_accounting {
            self.report_pressure(-(self.length as isize));
        }
        self.reset();
        Some((allocation.address, allocation.length))
    }

    // ----------------
    // Public Functions
    // ----------------

    /// Returns `true` if the handle currently refers to memory.
    pub fn is_allocated(&self) -> bool {
        !self.address.is_null()
    }

    /// Logical size of the buffer in bytes.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Native allocator family of the buffer.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Returns `true` if this handle releases its memory.
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    /// Returns `true` if the size of this buffer is reported to the pressure sink.
    pub fn has_external_accounting(&self) -> bool {
        self.has_external_accounting
    }

    /// Alignment of an [Backend::AlignedHeap] buffer, zero otherwise.
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Heap this handle allocates from.
    pub fn heap(&self) -> &NativeHeap {
        &self.heap
    }

    /// Defaults applied by this handle.
    pub fn options(&self) -> &BufferOptions {
        &self.options
    }

    /// Returns `true` if memory exposed by growth is zero-filled.
    pub fn zero_init(&self) -> bool {
        self.zero_init
    }

    /// Pressure sink this handle reports to.
    pub fn pressure(&self) -> &Rc<dyn MemoryPressure> {
        &self.pressure
    }

    /// Raw address of the data (null when unallocated).
    pub fn as_ptr(&self) -> *const u8 {
        self.address
    }

    /// Raw mutable address of the data (null when unallocated).
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.address
    }

    /// Binds the handle to another heap. Only allowed while unallocated.
    pub fn set_heap(&mut self, heap: NativeHeap) -> Result<(), Fail> {
        self.ensure_unallocated("set_heap")?;
        self.heap = heap;
        Ok(())
    }

    /// Installs the pressure sink. Only allowed while unallocated.
    pub fn set_pressure(&mut self, pressure: Rc<dyn MemoryPressure>) -> Result<(), Fail> {
        self.ensure_unallocated("set_pressure")?;
        self.pressure = pressure;
        Ok(())
    }

    /// Allocates `size` bytes from `backend`.
    ///
    /// If the handle already owns memory of the same backend, this resizes it instead. If it owns memory of a different
    /// backend, the request fails and the handle must be released first. [Backend::AlignedHeap] uses the alignment of
    /// the handle's options.
    pub fn allocate(
        &mut self,
        size: usize,
        backend: Backend,
        zero_init: bool,
        account_pressure: bool,
    ) -> Result<(), Fail> {
        let alignment: usize = self.options.alignment;
        self.do_allocate(size, backend, alignment, zero_init, account_pressure)
    }

    /// Allocates `size` bytes of [Backend::AlignedHeap] memory aligned to `alignment` (a power of two).
    pub fn allocate_aligned(
        &mut self,
        size: usize,
        alignment: usize,
        zero_init: bool,
        account_pressure: bool,
    ) -> Result<(), Fail> {
        self.do_allocate(size, Backend::AlignedHeap, alignment, zero_init, account_pressure)
    }

    /// Allocates `size` bytes using the default backend and zero-fill setting of the handle's options.
    pub fn allocate_default(&mut self, size: usize, account_pressure: bool) -> Result<(), Fail> {
        let options: BufferOptions = self.options;
        self.do_allocate(size, options.default_backend, options.alignment, options.zero_init, account_pressure)
    }

    /// Releases the memory. Releasing an unallocated handle succeeds and does nothing.
    pub fn release(&mut self) -> Result<(), Fail> {
        let allocation: Allocation = match self.allocation() {
            Some(allocation) => allocation,
            None => return Ok(()),
        };

        if self.is_owner {
            // Safety: the allocation was produced by this backend and heap, and is forgotten right after.
            unsafe { backend::free(self.backend, &self.heap, allocation)? };
        }
        if self.has_external_accounting {
            self.report_pressure(-(self.length as isize));
        }

        debug!(
            "release(): address={:?} length={} backend={} is_owner={}",
            self.address, self.length, self.backend, self.is_owner
        );
        self.reset();
        Ok(())
    }

    /// Changes the size of the buffer. Resizing to zero releases it. The first `min(old, new)` bytes are preserved.
    pub fn resize(&mut self, new_size: usize) -> Result<(), Fail> {
        let allocation: Allocation = self.ensure_allocated("resize")?;
        if new_size == 0 {
            return self.release();
        }
        self.ensure_resizable("resize")?;
        if new_size == self.length {
            return Ok(());
        }

        // Safety: the allocation was produced by this backend and heap, and is replaced right after.
        let new_allocation: Allocation =
            unsafe { backend::reallocate(self.backend, &self.heap, allocation, new_size, self.zero_init)? };

        let delta: isize = new_allocation.length as isize - allocation.length as isize;
        debug!(
            "resize(): backend={} length={}->{} address={:?}->{:?}",
            self.backend, allocation.length, new_allocation.length, allocation.address, new_allocation.address
        );
        self.address = new_allocation.address.as_ptr();
        self.length = new_allocation.length;
        if self.has_external_accounting {
            self.report_pressure(delta);
        }
        Ok(())
    }

    // ------------------
    // Internal Functions
    // ------------------

    fn do_allocate(
        &mut self,
        size: usize,
        backend: Backend,
        alignment: usize,
        zero_init: bool,
        account_pressure: bool,
    ) -> Result<(), Fail> {
        if size == 0 {
            return Err(Fail::new(libc::EINVAL, "cannot allocate a zero-sized buffer"));
        }
        if self.is_allocated() {
            if self.backend != backend {
                let cause: String = format!(
                    "handle already holds memory of another backend (current={}, requested={})",
                    self.backend, backend
                );
                error!("allocate(): {}", cause);
                return Err(Fail::new(libc::EBUSY, &cause));
            }
            return self.reallocate_in_place(size, zero_init, account_pressure);
        }

        let allocation: Allocation = backend::allocate(backend, &self.heap, size, alignment, zero_init)?;

        self.address = allocation.address.as_ptr();
        self.length = allocation.length;
        self.backend = backend;
        self.is_owner = true;
        self.zero_init = zero_init;
        self.alignment = if backend == Backend::AlignedHeap { alignment } else { 0 };
        self.has_external_accounting = account_pressure && allocation.length >= self.options.pressure_threshold;
        if self.has_external_accounting {
            self.report_pressure(allocation.length as isize);
        }

        debug!(
            "allocate(): address={:?} length={} backend={} zero_init={} accounted={}",
            self.address, self.length, self.backend, zero_init, self.has_external_accounting
        );
        Ok(())
    }

    /// Serves an allocate request on a handle that already holds memory of the requested backend. The requested
    /// zero-fill applies to the bytes exposed by growth, and accounting starts if it was requested and not yet active.
    fn reallocate_in_place(&mut self, size: usize, zero_init: bool, account_pressure: bool) -> Result<(), Fail> {
        let was_zero_init: bool = self.zero_init;
        self.zero_init = was_zero_init || zero_init;
        if let Err(e) = self.resize(size) {
            self.zero_init = was_zero_init;
            return Err(e);
        }

        if account_pressure && !self.has_external_accounting && self.length >= self.options.pressure_threshold {
            self.has_external_accounting = true;
            self.report_pressure(self.length as isize);
        }
        Ok(())
    }

    /// Current allocation, if any.
    pub(super) fn allocation(&self) -> Option<Allocation> {
        NonNull::new(self.address).map(|address: NonNull<u8>| Allocation {
            address,
            length: self.length,
        })
    }

    /// Fails unless the handle refers to memory.
    pub(super) fn ensure_allocated(&self, caller: &str) -> Result<Allocation, Fail> {
        match self.allocation() {
            Some(allocation) => Ok(allocation),
            None => {
                let cause: String = format!("{}(): buffer is not allocated", caller);
                warn!("{}", cause);
                Err(Fail::new(libc::EINVAL, &cause))
            },
        }
    }

    /// Fails unless the size of the buffer may change.
    pub(super) fn ensure_resizable(&self, caller: &str) -> Result<(), Fail> {
        self.ensure_allocated(caller)?;
        if !self.is_owner {
            let cause: String = format!("{}(): buffer does not own its memory", caller);
            error!("{}", cause);
            return Err(Fail::new(libc::EPERM, &cause));
        }
        if !self.backend.supports_resize() {
            let cause: String = format!("{}(): {} buffers cannot be resized", caller, self.backend);
            error!("{}", cause);
            return Err(Fail::new(libc::ENOTSUP, &cause));
        }
        Ok(())
    }

    /// Grows the buffer so that at least `end` bytes are addressable.
    pub(super) fn ensure_capacity(&mut self, end: usize) -> Result<(), Fail> {
        self.ensure_allocated("ensure_capacity")?;
        if end > self.length {
            self.resize(end)?;
        }
        Ok(())
    }

    fn ensure_unallocated(&self, caller: &str) -> Result<(), Fail> {
        if self.is_allocated() {
            let cause: String = format!("{}(): buffer is allocated", caller);
            error!("{}", cause);
            return Err(Fail::new(libc::EBUSY, &cause));
        }
        Ok(())
    }

    fn report_pressure(&self, delta: isize) {
        if delta != 0 {
            trace!("report_pressure(): delta={}", delta);
            self.pressure.report_delta(delta);
        }
    }

    /// Returns the handle to the unallocated state, keeping its heap, pressure sink, and options.
    fn reset(&mut self) {
        self.address = ptr::null_mut();
        self.length = 0;
        self.backend = Backend::Invalid;
        self.is_owner = false;
        self.has_external_accounting = false;
        self.zero_init = false;
        self.alignment = 0;
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for MemoryBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBuffer")
            .field("address", &self.address)
            .field("length", &self.length)
            .field("backend", &self.backend)
            .field("is_owner", &self.is_owner)
            .field("has_external_accounting", &self.has_external_accounting)
            .field("heap", &self.heap)
            .finish()
    }
}

/// De-Reference Trait Implementation for `MemoryBuffer`.
impl Deref for MemoryBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self.allocation() {
            // Safety: the buffer holds `length` addressable bytes that live as long as the handle does.
            Some(allocation) => unsafe { slice::from_raw_parts(allocation.address.as_ptr(), allocation.length) },
            None => &[],
        }
    }
}

/// Mutable De-Reference Trait Implementation for `MemoryBuffer`.
impl DerefMut for MemoryBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self.allocation() {
            // Safety: the buffer holds `length` addressable bytes, and `&mut self` guarantees exclusive access.
            Some(allocation) => unsafe { slice::from_raw_parts_mut(allocation.address.as_ptr(), allocation.length) },
            None => &mut [],
        }
    }
}

/// Drop Trait Implementation for `MemoryBuffer`.
impl Drop for MemoryBuffer {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            error!("drop(): failed to release buffer ({:?})", e);
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
