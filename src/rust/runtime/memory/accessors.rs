// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

// Typed accessors reinterpret the bytes at `address + offset` as plain `Copy` values, strings, or arrays.
//
// Reads are deliberately unchecked: the caller asserts (through `unsafe`) that the requested range lies within the
// buffer and holds a valid value of the requested type. Writes are checked instead, because a write that runs past the
// end of the buffer first grows it; that fails for backends that cannot be resized. All accessors fail on an
// unallocated handle.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    memory::{
        backend::Allocation,
        buffer::MemoryBuffer,
    },
};
use ::std::{
    ffi::{
        c_char,
        CStr,
    },
    mem::{
        size_of,
        size_of_val,
    },
    ptr,
};

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl MemoryBuffer {
    // --------------
    // Scalar Values
    // --------------

    /// Reads a `T` stored at `offset`.
    ///
    /// # Safety
    ///
    /// `offset + size_of::<T>()` must not exceed the length of the buffer, and the bytes must be a valid `T`.
    pub unsafe fn read<T: Copy>(&self, offset: usize) -> Result<T, Fail> {
        let allocation: Allocation = self.ensure_allocated("read")?;
        Ok(allocation.address.as_ptr().add(offset).cast::<T>().read_unaligned())
    }

    /// Writes `value` at `offset`, growing the buffer if it is too short.
    pub fn write<T: Copy>(&mut self, offset: usize, value: T) -> Result<(), Fail> {
        let end: usize = checked_end(offset, size_of::<T>())?;
        self.ensure_capacity(end)?;
        // Safety: the buffer now holds at least `end` bytes.
        unsafe { self.as_mut_ptr().add(offset).cast::<T>().write_unaligned(value) };
        Ok(())
    }

    // -------------
    // UTF-16 Strings
    // -------------

    /// Reads a null-terminated UTF-16 string stored at `offset`.
    ///
    /// # Safety
    ///
    /// A null code unit must be present at or after `offset`, within the buffer.
    pub unsafe fn read_string(&self, offset: usize) -> Result<String, Fail> {
        let allocation: Allocation = self.ensure_allocated("read_string")?;
        let units: Vec<u16> = utf16_until_null(allocation.address.as_ptr().add(offset));
        Ok(String::from_utf16_lossy(&units))
    }

    /// Reads exactly `chars` UTF-16 code units stored at `offset`.
    ///
    /// # Safety
    ///
    /// `offset + 2 * chars` must not exceed the length of the buffer.
    pub unsafe fn read_string_len(&self, offset: usize, chars: usize) -> Result<String, Fail> {
        let units: Vec<u16> = self.to_array::<u16>(offset, chars)?;
        Ok(String::from_utf16_lossy(&units))
    }

    /// Reads a null-terminated UTF-16 string whose address is stored at `offset`. A null address reads as an empty
    /// string.
    ///
    /// # Safety
    ///
    /// The pointer-sized value at `offset` must be null or point to a live, null-terminated UTF-16 string.
    pub unsafe fn read_string_indirect(&self, offset: usize) -> Result<String, Fail> {
        let target: *const u8 = self.read::<*const u8>(offset)?;
        if target.is_null() {
            return Ok(String::new());
        }
        Ok(String::from_utf16_lossy(&utf16_until_null(target)))
    }

    /// Writes `value` as UTF-16 at `offset`, optionally followed by a null code unit, growing the buffer if needed.
    pub fn write_string(&mut self, offset: usize, value: &str, add_null: bool) -> Result<(), Fail> {
        let mut units: Vec<u16> = value.encode_utf16().collect();
        if add_null {
            units.push(0);
        }
        self.from_array(&units, offset)
    }

    // ------------
    // UTF-8 Strings
    // ------------

    /// Reads a null-terminated UTF-8 string stored at `offset`. Invalid sequences are replaced.
    ///
    /// # Safety
    ///
    /// A null byte must be present at or after `offset`, within the buffer.
    pub unsafe fn read_string_utf8(&self, offset: usize) -> Result<String, Fail> {
        let allocation: Allocation = self.ensure_allocated("read_string_utf8")?;
        let bytes: &[u8] = CStr::from_ptr(allocation.address.as_ptr().add(offset).cast::<c_char>()).to_bytes();
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Reads exactly `bytes` bytes stored at `offset` as UTF-8. Invalid sequences are replaced.
    ///
    /// # Safety
    ///
    /// `offset + bytes` must not exceed the length of the buffer.
    pub unsafe fn read_string_utf8_len(&self, offset: usize, bytes: usize) -> Result<String, Fail> {
        let raw: Vec<u8> = self.to_array::<u8>(offset, bytes)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Reads a null-terminated UTF-8 string whose address is stored at `offset`. A null address reads as an empty
    /// string.
    ///
    /// # Safety
    ///
    /// The pointer-sized value at `offset` must be null or point to a live, null-terminated string.
    pub unsafe fn read_string_utf8_indirect(&self, offset: usize) -> Result<String, Fail> {
        let target: *const u8 = self.read::<*const u8>(offset)?;
        if target.is_null() {
            return Ok(String::new());
        }
        Ok(String::from_utf8_lossy(CStr::from_ptr(target.cast::<c_char>()).to_bytes()).into_owned())
    }

    /// Writes `value` as UTF-8 at `offset`, optionally followed by a null byte, growing the buffer if needed.
    pub fn write_string_utf8(&mut self, offset: usize, value: &str, add_null: bool) -> Result<(), Fail> {
        let end: usize = checked_end(offset, value.len() + add_null as usize)?;
        self.ensure_capacity(end)?;
        self.from_array(value.as_bytes(), offset)?;
        if add_null {
            self.write::<u8>(offset + value.len(), 0)?;
        }
        Ok(())
    }

    // -------------
    // String Arrays
    // -------------

    /// Reads a sequence of null-terminated UTF-16 strings stored at `offset`, which ends with an empty string.
    ///
    /// # Safety
    ///
    /// The sequence, including its terminating empty string, must lie within the buffer.
    pub unsafe fn read_string_array(&self, offset: usize) -> Result<Vec<String>, Fail> {
        let allocation: Allocation = self.ensure_allocated("read_string_array")?;
        let mut cursor: *const u8 = allocation.address.as_ptr().add(offset);
        let mut strings: Vec<String> = Vec::new();
        loop {
            let units: Vec<u16> = utf16_until_null(cursor);
            if units.is_empty() {
                break;
            }
            cursor = cursor.add((units.len() + 1) * size_of::<u16>());
            strings.push(String::from_utf16_lossy(&units));
        }
        Ok(strings)
    }

    /// Writes `values` at `offset` as a sequence of null-terminated UTF-16 strings followed by an empty string, growing
    /// the buffer if needed. Empty entries cannot be represented and are rejected.
    pub fn write_string_array(&mut self, offset: usize, values: &[&str]) -> Result<(), Fail> {
        if values.iter().any(|value: &&str| value.is_empty()) {
            let cause: &str = "string arrays cannot hold empty strings";
            error!("write_string_array(): {}", cause);
            return Err(Fail::new(libc::EINVAL, cause));
        }

        let mut units: Vec<u16> = Vec::new();
        for value in values {
            units.extend(value.encode_utf16());
            units.push(0);
        }
        units.push(0);
        self.from_array(&units, offset)
    }

    // ------
    // Arrays
    // ------

    /// Copies `count` values of `T` stored at `offset` into a new vector.
    ///
    /// # Safety
    ///
    /// `offset + count * size_of::<T>()` must not exceed the length of the buffer, and the bytes must be valid `T`s.
    pub unsafe fn to_array<T: Copy>(&self, offset: usize, count: usize) -> Result<Vec<T>, Fail> {
        let allocation: Allocation = self.ensure_allocated("to_array")?;
        let bytes: usize = match count.checked_mul(size_of::<T>()) {
            Some(bytes) => bytes,
            None => return Err(Fail::new(libc::ERANGE, "array size overflows")),
        };

        let mut values: Vec<T> = Vec::with_capacity(count);
        ptr::copy_nonoverlapping(allocation.address.as_ptr().add(offset), values.as_mut_ptr().cast::<u8>(), bytes);
        values.set_len(count);
        Ok(values)
    }

    /// Copies `values` to `offset`, growing the buffer if it is too short.
    #[allow(clippy::wrong_self_convention)]
    pub fn from_array<T: Copy>(&mut self, values: &[T], offset: usize) -> Result<(), Fail> {
        let bytes: usize = size_of_val(values);
        let end: usize = checked_end(offset, bytes)?;
        self.ensure_capacity(end)?;
        // Safety: the buffer now holds at least `end` bytes, and `values` cannot alias it while we hold `&mut self`.
        unsafe { ptr::copy_nonoverlapping(values.as_ptr().cast::<u8>(), self.as_mut_ptr().add(offset), bytes) };
        Ok(())
    }

    /// Copies the whole buffer into a new byte vector.
    pub fn to_byte_array(&self) -> Result<Vec<u8>, Fail> {
        self.ensure_allocated("to_byte_array")?;
        Ok(self.to_vec())
    }

    /// Copies `bytes` to the start of the buffer, growing it if it is too short.
    #[allow(clippy::wrong_self_convention)]
    pub fn from_byte_array(&mut self, bytes: &[u8]) -> Result<(), Fail> {
        self.from_array(bytes, 0)
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Computes the end of a `len`-byte range starting at `offset`.
fn checked_end(offset: usize, len: usize) -> Result<usize, Fail> {
    match offset.checked_add(len) {
        Some(end) => Ok(end),
        None => {
            let cause: String = format!("range overflows (offset={}, len={})", offset, len);
            error!("checked_end(): {}", cause);
            Err(Fail::new(libc::ERANGE, &cause))
        },
    }
}

/// Collects the UTF-16 code units that start at `ptr`, up to (and excluding) the first null code unit.
unsafe fn utf16_until_null(ptr: *const u8) -> Vec<u16> {
    let mut units: Vec<u16> = Vec::new();
    let mut cursor: *const u16 = ptr.cast::<u16>();
    loop {
        let unit: u16 = cursor.read_unaligned();
        if unit == 0 {
            return units;
        }
        units.push(unit);
        cursor = cursor.add(1);
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use crate::{
        ensure_eq,
        runtime::memory::{
            Backend,
            MemoryBuffer,
        },
    };
    use ::anyhow::{
        ensure,
        Result,
    };
    use ::std::mem::size_of;

    /// Disk extent record, laid out the way callers marshal it.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq)]
    struct DiskExtent {
        disk_number: u32,
        starting_offset: i64,
        extent_length: i64,
    }

    #[test]
    fn scalars_round_trip() -> Result<()> {
        let mut buffer: MemoryBuffer = MemoryBuffer::allocated(16, Backend::Heap, true)?;
        buffer.write::<u32>(0, 0xDEADBEEF)?;
        buffer.write::<u16>(5, 0x1234)?;
        buffer.write::<f64>(8, 2.5)?;
        unsafe {
            ensure_eq!(buffer.read::<u32>(0)?, 0xDEADBEEF);
            ensure_eq!(buffer.read::<u16>(5)?, 0x1234);
            ensure_eq!(buffer.read::<f64>(8)?, 2.5);
        }
        ensure_eq!(buffer.len(), 16);
        Ok(())
    }

    #[test]
    fn write_past_end_grows() -> Result<()> {
        let extent: DiskExtent = DiskExtent {
            disk_number: 2,
            starting_offset: 1 << 20,
            extent_length: 1 << 30,
        };
        let mut buffer: MemoryBuffer = MemoryBuffer::allocated(4, Backend::Heap, true)?;
        buffer.write(4, extent)?;
        ensure_eq!(buffer.len(), 4 + size_of::<DiskExtent>());
        ensure_eq!(unsafe { buffer.read::<DiskExtent>(4)? }, extent);
        Ok(())
    }

    #[test]
    fn write_past_end_fails_without_growth() -> Result<()> {
        for backend in [Backend::AlignedHeap, Backend::NetworkBuffer] {
            let mut buffer: MemoryBuffer = MemoryBuffer::allocated(4, backend, true)?;
            ensure_eq!(buffer.write::<u64>(0, 1).map_err(|e| e.errno), Err(libc::ENOTSUP));
            ensure_eq!(buffer.len(), 4);
            buffer.write::<u32>(0, 1)?;
        }
        Ok(())
    }

    #[test]
    fn unallocated_accessors_fail() -> Result<()> {
        let mut buffer: MemoryBuffer = MemoryBuffer::new();
        unsafe {
            ensure_eq!(buffer.read::<u32>(0).map_err(|e| e.errno), Err(libc::EINVAL));
            ensure!(buffer.read_string(0).is_err());
            ensure!(buffer.read_string_utf8(0).is_err());
            ensure!(buffer.to_array::<u8>(0, 1).is_err());
            ensure!(buffer.read_string_array(0).is_err());
        }
        ensure!(buffer.write::<u32>(0, 1).is_err());
        ensure!(buffer.to_byte_array().is_err());
        ensure!(buffer.from_byte_array(&[1]).is_err());
        ensure!(!buffer.is_allocated());
        Ok(())
    }

    #[test]
    fn utf16_string() -> Result<()> {
        let mut buffer: MemoryBuffer = MemoryBuffer::allocated(16, Backend::Heap, false)?;
        buffer.write_string(0, "AB", true)?;
        ensure_eq!(unsafe { buffer.read_string(0)? }, "AB");

        // Writing past the end grows the buffer.
        buffer.write_string(10, "Größe", true)?;
        ensure_eq!(buffer.len(), 10 + 6 * 2);
        ensure_eq!(unsafe { buffer.read_string(10)? }, "Größe");
        ensure_eq!(unsafe { buffer.read_string_len(10, 2)? }, "Gr");
        Ok(())
    }

    #[test]
    fn utf8_string() -> Result<()> {
        let mut buffer: MemoryBuffer = MemoryBuffer::allocated(4, Backend::TaskAllocator, true)?;
        buffer.write_string_utf8(0, "\\\\.\\PhysicalDrive0", true)?;
        ensure_eq!(buffer.len(), 19);
        ensure_eq!(unsafe { buffer.read_string_utf8(0)? }, "\\\\.\\PhysicalDrive0");
        ensure_eq!(unsafe { buffer.read_string_utf8_len(4, 8)? }, "Physical");

        // Without a terminator only the characters are written.
        buffer.write_string_utf8(0, "xy", false)?;
        ensure_eq!(unsafe { buffer.read_string_utf8_len(0, 4)? }, "xy.\\");
        Ok(())
    }

    #[test]
    fn indirect_strings() -> Result<()> {
        let mut wide: MemoryBuffer = MemoryBuffer::allocated(32, Backend::Heap, true)?;
        wide.write_string(0, "USB\\ROOT_HUB30", true)?;
        let mut narrow: MemoryBuffer = MemoryBuffer::allocated(32, Backend::Heap, true)?;
        narrow.write_string_utf8(0, "HID", true)?;

        let mut table: MemoryBuffer = MemoryBuffer::allocated(3 * size_of::<usize>(), Backend::Heap, true)?;
        table.write::<*const u8>(0, wide.as_ptr())?;
        table.write::<*const u8>(size_of::<usize>(), narrow.as_ptr())?;
        unsafe {
            ensure_eq!(table.read_string_indirect(0)?, "USB\\ROOT_HUB30");
            ensure_eq!(table.read_string_utf8_indirect(size_of::<usize>())?, "HID");
            ensure_eq!(table.read_string_indirect(2 * size_of::<usize>())?, "");
        }
        Ok(())
    }

    #[test]
    fn arrays_round_trip() -> Result<()> {
        let values: [u32; 5] = [1, 1 << 8, 1 << 16, 1 << 24, u32::MAX];
        let mut buffer: MemoryBuffer = MemoryBuffer::allocated(8, Backend::VirtualMemory, false)?;
        buffer.from_array(&values, 3)?;
        ensure_eq!(unsafe { buffer.to_array::<u32>(3, values.len())? }, values.to_vec());

        let extents: Vec<DiskExtent> = (0..4)
            .map(|i: i64| DiskExtent {
                disk_number: i as u32,
                starting_offset: i * 512,
                extent_length: 512,
            })
            .collect();
        let mut buffer: MemoryBuffer = MemoryBuffer::allocated(1, Backend::Heap, false)?;
        buffer.from_array(&extents, 0)?;
        ensure_eq!(buffer.len(), extents.len() * size_of::<DiskExtent>());
        ensure_eq!(unsafe { buffer.to_array::<DiskExtent>(0, extents.len())? }, extents);
        Ok(())
    }

    #[test]
    fn byte_array_into_zeroed_buffer() -> Result<()> {
        let mut buffer: MemoryBuffer = MemoryBuffer::allocated(8, Backend::Heap, true)?;
        buffer.from_byte_array(&[1, 2, 3, 4])?;
        ensure_eq!(buffer.to_byte_array()?, vec![1, 2, 3, 4, 0, 0, 0, 0]);
        Ok(())
    }

    #[test]
    fn string_arrays() -> Result<()> {
        let mut buffer: MemoryBuffer = MemoryBuffer::allocated(2, Backend::Heap, true)?;
        buffer.write_string_array(2, &["COM1", "COM3", "LPT1"])?;
        ensure_eq!(buffer.len(), 2 + (3 * 5 + 1) * 2);
        ensure_eq!(unsafe { buffer.read_string_array(2)? }, vec!["COM1", "COM3", "LPT1"]);

        buffer.write_string_array(0, &[])?;
        ensure_eq!(unsafe { buffer.read_string_array(0)? }, Vec::<String>::new());

        ensure_eq!(buffer.write_string_array(0, &["A", ""]).map_err(|e| e.errno), Err(libc::EINVAL));
        Ok(())
    }
}
