// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    memory::{
        backend::{
            self,
            Allocation,
            Backend,
        },
        buffer::MemoryBuffer,
    },
};
use ::crc::{
    Crc,
    CRC_32_ISO_HDLC,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// CRC-32 as used by Ethernet, zlib, and PNG.
static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl MemoryBuffer {
    /// Sets every byte of the buffer to zero.
    pub fn zero_memory(&mut self) -> Result<(), Fail> {
        self.fill(0)
    }

    /// Sets every byte of the buffer to `value`.
    pub fn fill(&mut self, value: u8) -> Result<(), Fail> {
        self.ensure_allocated("fill")?;
        self[..].fill(value);
        Ok(())
    }

    /// Computes the CRC-32 of the buffer contents. An unallocated buffer has a checksum of zero.
    pub fn calculate_crc32(&self) -> u32 {
        if !self.is_allocated() {
            return 0;
        }
        CRC32.checksum(self)
    }

    /// Asks the origin heap whether the block behind this buffer is still consistent. Buffers that do not come from a
    /// heap cannot be checked and report `false`.
    pub fn validate(&self) -> bool {
        let allocation: Allocation = match self.allocation() {
            Some(allocation) => allocation,
            None => return false,
        };
        // Safety: the allocation was produced by this backend and heap, or wrapped under that promise.
        let valid: bool = unsafe { backend::validate(self.backend(), self.heap(), allocation) };
        if !valid && self.backend().is_heap_based() {
            warn!("validate(): heap block failed validation (address={:?})", allocation.address);
        }
        valid
    }

    /// Copies the contents into a new buffer owned by `backend`. The copy shares the heap, pressure sink, options, and
    /// pressure accounting of this buffer.
    pub fn duplicate(&self, backend: Backend) -> Result<MemoryBuffer, Fail> {
        let allocation: Allocation = self.ensure_allocated("duplicate")?;

        let mut copy: MemoryBuffer = MemoryBuffer::with_options(*self.options());
        copy.set_heap(self.heap().clone())?;
        copy.set_pressure(self.pressure().clone())?;
        let account_pressure: bool = self.has_external_accounting();
        match backend {
            Backend::AlignedHeap => {
                let alignment: usize = match self.alignment() {
                    0 => self.options().alignment,
                    alignment => alignment,
                };
                copy.allocate_aligned(allocation.length, alignment, self.zero_init(), account_pressure)?
            },
            _ => copy.allocate(allocation.length, backend, self.zero_init(), account_pressure)?,
        }

        copy[..allocation.length].copy_from_slice(self);
        debug!(
            "duplicate(): {} buffer of {} bytes copied into {} buffer",
            self.backend(),
            allocation.length,
            backend
        );
        Ok(copy)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
