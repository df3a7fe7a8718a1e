// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

// The dispatcher routes generic allocate/free/reallocate requests to the routine of the native allocator family that a
// buffer's memory came from. Each family has different capabilities:
//
//   Backend         | Size query | Resize                      | Size limit
//   ----------------+------------+-----------------------------+-----------
//   Heap            | yes        | native realloc              | isize::MAX
//   AlignedHeap     | no         | rejected                    | isize::MAX
//   TaskAllocator   | no         | emulated (alloc/copy/free)  | i32::MAX
//   VirtualMemory   | yes        | emulated (alloc/copy/free)  | isize::MAX
//   NetworkBuffer   | no         | rejected                    | i32::MAX
//
// Emulated resizes are not atomic: the block moves to a new address. Every allocation records the size that was
// requested; size queries only back up validation, never the logical length.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    pal::{
        arch::POINTER_WIDTH,
        functions::{
            net_buffer_alloc,
            net_buffer_free,
            task_mem_alloc,
            task_mem_free,
            virtual_alloc,
            virtual_free,
            virtual_region_size,
        },
    },
    runtime::{
        fail::Fail,
        limits::{
            NATIVE_SIZE_MAX,
            NATIVE_SIZE_MAX_31BIT,
        },
        memory::heap::NativeHeap,
    },
};
use ::std::{
    cmp,
    fmt,
    ptr::{
        self,
        NonNull,
    },
    str::FromStr,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Native allocator family that backs a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Native heap (process heap or a private heap).
    Heap,
    /// Native heap with an over-allocated, manually aligned block.
    AlignedHeap,
    /// Single-shot task allocator.
    TaskAllocator,
    /// Page-granular virtual memory.
    VirtualMemory,
    /// Network buffer allocator.
    NetworkBuffer,
    /// No memory.
    Invalid,
}

/// A block handed out by a native allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation {
    /// Address of the usable data.
    pub address: NonNull<u8>,
    /// Usable size in bytes.
    pub length: usize,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Backend {
    /// Returns `true` if buffers of this backend can change size while allocated.
    pub fn supports_resize(self) -> bool {
        match self {
            Backend::Heap | Backend::TaskAllocator | Backend::VirtualMemory => true,
            Backend::AlignedHeap | Backend::NetworkBuffer | Backend::Invalid => false,
        }
    }

    /// Returns `true` if the native allocator can report the actual size of a block.
    pub fn supports_size_query(self) -> bool {
        match self {
            Backend::Heap | Backend::VirtualMemory => true,
            Backend::AlignedHeap | Backend::TaskAllocator | Backend::NetworkBuffer | Backend::Invalid => false,
        }
    }

    /// Largest size that may be requested from this backend.
    pub fn size_limit(self) -> usize {
        match self {
            Backend::Heap | Backend::AlignedHeap | Backend::VirtualMemory => NATIVE_SIZE_MAX,
            Backend::TaskAllocator | Backend::NetworkBuffer => NATIVE_SIZE_MAX_31BIT,
            Backend::Invalid => 0,
        }
    }

    /// Returns `true` if blocks of this backend come from a [NativeHeap].
    pub fn is_heap_based(self) -> bool {
        matches!(self, Backend::Heap | Backend::AlignedHeap)
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Allocates at least `size` bytes from `backend`. `alignment` is only used by [Backend::AlignedHeap].
pub fn allocate(
    backend: Backend,
    heap: &NativeHeap,
    size: usize,
    alignment: usize,
    zero_init: bool,
) -> Result<Allocation, Fail> {
    check_size(backend, size)?;

    match backend {
        Backend::Heap => {
            let address: NonNull<u8> = non_null(heap.allocate(size, zero_init), backend, size)?;
            // Safety: `address` is a live block of `heap`.
            debug_assert!(unsafe { heap.usable_size(address.as_ptr()) } >= size);
            Ok(Allocation { address, length: size })
        },
        Backend::AlignedHeap => allocate_aligned(heap, size, alignment, zero_init),
        Backend::TaskAllocator => {
            // Safety: task_mem_alloc is safe to call with any size; its result is checked for null below.
            let address: NonNull<u8> = non_null(unsafe { task_mem_alloc(size) }, backend, size)?;
            if zero_init {
                // Safety: the block is valid for writes of `size` bytes.
                unsafe { ptr::write_bytes(address.as_ptr(), 0, size) };
            }
            Ok(Allocation { address, length: size })
        },
        Backend::VirtualMemory => {
            // Safety: virtual_alloc is safe to call with any size; its result is checked for null below.
            let address: NonNull<u8> = non_null(unsafe { virtual_alloc(size) }, backend, size)?;
            // Freshly committed pages are always zero-filled, so `zero_init` needs no extra work here. The region is
            // page-granular; the slack past `size` is never exposed and goes away with the whole region on free.
            // Safety: `address` is the start of a live region.
            debug_assert!(unsafe { virtual_region_size(address.as_ptr(), size) } >= size);
            Ok(Allocation { address, length: size })
        },
        Backend::NetworkBuffer => {
            // The size check above guarantees that this cast does not truncate.
            // Safety: net_buffer_alloc is safe to call with any size; its result is checked for null below.
            let address: NonNull<u8> = non_null(unsafe { net_buffer_alloc(size as u32) }, backend, size)?;
            if zero_init {
                // Safety: the block is valid for writes of `size` bytes.
                unsafe { ptr::write_bytes(address.as_ptr(), 0, size) };
            }
            Ok(Allocation { address, length: size })
        },
        Backend::Invalid => unreachable!("check_size() rejects the invalid backend"),
    }
}

/// Releases a block back to `backend`.
///
/// # Safety
///
/// `allocation` must have been returned by [allocate] or [reallocate] for the same `backend` and `heap`, and must not
/// be used afterwards.
pub unsafe fn free(backend: Backend, heap: &NativeHeap, allocation: Allocation) -> Result<(), Fail> {
    match backend {
        Backend::Heap => {
            heap.free(allocation.address.as_ptr());
            Ok(())
        },
        Backend::AlignedHeap => {
            let raw: *mut u8 = recover_aligned_raw(heap, allocation)?;
            heap.free(raw);
            Ok(())
        },
        Backend::TaskAllocator => {
            task_mem_free(allocation.address.as_ptr());
            Ok(())
        },
        Backend::VirtualMemory => {
            if !virtual_free(allocation.address.as_ptr(), allocation.length) {
                let cause: String = format!("failed to release virtual memory region (length={})", allocation.length);
                error!("free(): {}", cause);
                return Err(Fail::new(libc::EFAULT, &cause));
            }
            Ok(())
        },
        Backend::NetworkBuffer => {
            if !net_buffer_free(allocation.address.as_ptr()) {
                let cause: &str = "failed to release network buffer";
                error!("free(): {}", cause);
                return Err(Fail::new(libc::EFAULT, cause));
            }
            Ok(())
        },
        Backend::Invalid => Err(Fail::new(libc::EINVAL, "cannot free memory of the invalid backend")),
    }
}

/// Changes the size of a block to at least `new_size` bytes. On success the returned allocation replaces `allocation`
/// (which may have moved). On failure `allocation` is left untouched.
///
/// # Safety
///
/// `allocation` must be a live block returned by [allocate] or [reallocate] for the same `backend` and `heap`.
pub unsafe fn reallocate(
    backend: Backend,
    heap: &NativeHeap,
    allocation: Allocation,
    new_size: usize,
    zero_init: bool,
) -> Result<Allocation, Fail> {
    check_size(backend, new_size)?;

    match backend {
        Backend::Heap => {
            let new_ptr: *mut u8 = heap.reallocate(allocation.address.as_ptr(), new_size);
            let address: NonNull<u8> = non_null(new_ptr, backend, new_size)?;
            if zero_init && new_size > allocation.length {
                ptr::write_bytes(address.as_ptr().add(allocation.length), 0, new_size - allocation.length);
            }
            Ok(Allocation {
                address,
                length: new_size,
            })
        },
        Backend::TaskAllocator | Backend::VirtualMemory => {
            let new_allocation: Allocation = allocate(backend, heap, new_size, 0, zero_init)?;
            let count: usize = cmp::min(allocation.length, new_allocation.length);
            ptr::copy_nonoverlapping(allocation.address.as_ptr(), new_allocation.address.as_ptr(), count);
            if let Err(e) = free(backend, heap, allocation) {
                // Keep the caller's block; drop the copy instead.
                warn!("reallocate(): failed to release old block, discarding new one ({:?})", e);
                free(backend, heap, new_allocation)?;
                return Err(e);
            }
            Ok(new_allocation)
        },
        Backend::AlignedHeap | Backend::NetworkBuffer => {
            let cause: String = format!("{} buffers cannot be resized", backend);
            warn!("reallocate(): {}", cause);
            Err(Fail::new(libc::ENOTSUP, &cause))
        },
        Backend::Invalid => unreachable!("check_size() rejects the invalid backend"),
    }
}

/// Asks the origin heap whether a block is still structurally consistent. Only heap-based backends can answer.
///
/// # Safety
///
/// `allocation` must describe memory of `backend`, although it may have been corrupted.
pub unsafe fn validate(backend: Backend, heap: &NativeHeap, allocation: Allocation) -> bool {
    match backend {
        Backend::Heap => {
            let address: *const u8 = allocation.address.as_ptr();
            heap.validate(address) && heap.usable_size(address) >= allocation.length
        },
        Backend::AlignedHeap => recover_aligned_raw(heap, allocation).is_ok(),
        Backend::TaskAllocator | Backend::VirtualMemory | Backend::NetworkBuffer | Backend::Invalid => false,
    }
}

/// Allocates an aligned block out of an over-sized heap block. The raw address of the heap block is stored in the
/// pointer-sized word that immediately precedes the aligned address.
fn allocate_aligned(heap: &NativeHeap, size: usize, alignment: usize, zero_init: bool) -> Result<Allocation, Fail> {
    if alignment == 0 || !alignment.is_power_of_two() {
        let cause: String = format!("alignment must be a power of two (alignment={})", alignment);
        error!("allocate_aligned(): {}", cause);
        return Err(Fail::new(libc::EINVAL, &cause));
    }

    let raw_size: usize = match size.checked_add(alignment - 1 + POINTER_WIDTH) {
        Some(raw_size) if raw_size <= NATIVE_SIZE_MAX => raw_size,
        _ => {
            let cause: String = format!("aligned allocation is too large (size={}, alignment={})", size, alignment);
            error!("allocate_aligned(): {}", cause);
            return Err(Fail::new(libc::ERANGE, &cause));
        },
    };

    let raw: NonNull<u8> = non_null(heap.allocate(raw_size, zero_init), Backend::AlignedHeap, raw_size)?;

    // Leave room for the stash, then round up to the requested alignment.
    let raw_addr: usize = raw.as_ptr() as usize;
    let aligned_addr: usize = (raw_addr + POINTER_WIDTH + alignment - 1) & !(alignment - 1);
    let offset: usize = aligned_addr - raw_addr;
    debug_assert!(offset >= POINTER_WIDTH && offset + size <= raw_size);

    // Safety: `offset` is within the raw block, and so is the stash word right before the aligned address.
    let address: NonNull<u8> = unsafe {
        let aligned: *mut u8 = raw.as_ptr().add(offset);
        aligned.sub(POINTER_WIDTH).cast::<usize>().write_unaligned(raw_addr);
        NonNull::new_unchecked(aligned)
    };

    Ok(Allocation { address, length: size })
}

/// Recovers the raw heap block behind an aligned allocation, checking the stash before trusting it.
unsafe fn recover_aligned_raw(heap: &NativeHeap, allocation: Allocation) -> Result<*mut u8, Fail> {
    let aligned: *mut u8 = allocation.address.as_ptr();
    let aligned_addr: usize = aligned as usize;
    if aligned_addr < POINTER_WIDTH {
        return Err(corrupted_stash(aligned_addr, 0));
    }

    let raw_addr: usize = aligned.sub(POINTER_WIDTH).cast::<usize>().read_unaligned();

    // The raw block must start before the stash and hold the whole aligned region.
    if raw_addr > aligned_addr - POINTER_WIDTH {
        return Err(corrupted_stash(aligned_addr, raw_addr));
    }
    let raw: *mut u8 = aligned.sub(aligned_addr - raw_addr);
    if !heap.validate(raw) || heap.usable_size(raw) < (aligned_addr - raw_addr) + allocation.length {
        return Err(corrupted_stash(aligned_addr, raw_addr));
    }

    Ok(raw)
}

/// Builds the failure reported for an aligned block whose stash does not point back to its heap block.
fn corrupted_stash(aligned_addr: usize, raw_addr: usize) -> Fail {
    let cause: String = format!(
        "aligned block does not point back to its heap block (address={:#x}, stash={:#x})",
        aligned_addr, raw_addr
    );
    error!("recover_aligned_raw(): {}", cause);
    Fail::new(libc::EINVAL, &cause)
}

/// Rejects sizes that `backend` cannot address, before any native call is made.
fn check_size(backend: Backend, size: usize) -> Result<(), Fail> {
    if backend == Backend::Invalid {
        return Err(Fail::new(libc::EINVAL, "cannot allocate memory from the invalid backend"));
    }
    if size == 0 {
        return Err(Fail::new(libc::EINVAL, "cannot allocate a zero-sized block"));
    }
    if size > backend.size_limit() {
        let cause: String = format!(
            "size exceeds the addressing limit of the backend (backend={}, size={}, limit={})",
            backend,
            size,
            backend.size_limit()
        );
        error!("check_size(): {}", cause);
        return Err(Fail::new(libc::ERANGE, &cause));
    }
    Ok(())
}

/// Converts the result of a native allocation into a [NonNull], reporting allocation failures.
fn non_null(ptr: *mut u8, backend: Backend, size: usize) -> Result<NonNull<u8>, Fail> {
    match NonNull::new(ptr) {
        Some(ptr) => Ok(ptr),
        None => {
            let cause: String = format!("native allocation failed (backend={}, size={})", backend, size);
            error!("non_null(): {}", cause);
            Err(Fail::new(libc::ENOMEM, &cause))
        },
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name: &str = match self {
            Backend::Heap => "heap",
            Backend::AlignedHeap => "aligned_heap",
            Backend::TaskAllocator => "task_allocator",
            Backend::VirtualMemory => "virtual_memory",
            Backend::NetworkBuffer => "network_buffer",
            Backend::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

impl FromStr for Backend {
    type Err = Fail;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "heap" => Ok(Backend::Heap),
            "aligned_heap" => Ok(Backend::AlignedHeap),
            "task_allocator" => Ok(Backend::TaskAllocator),
            "virtual_memory" => Ok(Backend::VirtualMemory),
            "network_buffer" => Ok(Backend::NetworkBuffer),
            _ => {
                let cause: String = format!("unknown backend \"{}\"", s);
                Err(Fail::new(libc::EINVAL, &cause))
            },
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
