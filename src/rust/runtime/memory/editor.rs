// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    memory::buffer::MemoryBuffer,
};

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// In-place editing primitives.
///
/// Every primitive works on the logical length of the buffer. Out-of-range indices and amounts are rejected with
/// `ERANGE`, never clamped, and a rejected edit leaves the buffer untouched.
impl MemoryBuffer {
    /// Moves the `length`-byte block at `index` by `offset` bytes (towards the end when positive). The bytes the block
    /// lands on are moved into the place it vacated.
    pub fn slide(&mut self, index: usize, length: usize, offset: isize) -> Result<(), Fail> {
        self.ensure_allocated("slide")?;
        let block_end: usize = self.check_range("slide", index, length)?;
        let distance: usize = offset.unsigned_abs();
        if offset >= 0 {
            // Block and displaced bytes span [index, block_end + distance).
            self.check_range("slide", block_end, distance)?;
            self[index..block_end + distance].rotate_right(distance);
        } else {
            if distance > index {
                return Err(range_error("slide", index, distance));
            }
            // Displaced bytes and block span [index - distance, block_end).
            self[index - distance..block_end].rotate_left(distance);
        }
        Ok(())
    }

    /// Opens an `amount`-byte gap at `index`, growing the buffer. The gap is filled with `fill`, which must hold
    /// exactly `amount` bytes, or zeroed if no fill is supplied.
    pub fn push_out(&mut self, index: usize, amount: usize, fill: Option<&[u8]>) -> Result<(), Fail> {
        self.ensure_allocated("push_out")?;
        let old_length: usize = self.len();
        if index > old_length {
            return Err(range_error("push_out", index, amount));
        }
        if let Some(fill) = fill {
            if fill.len() != amount {
                let cause: String = format!("push_out(): fill holds {} bytes, expected {}", fill.len(), amount);
                error!("{}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            }
        }
        if amount == 0 {
            return Ok(());
        }
        self.ensure_resizable("push_out")?;
        let new_length: usize = match old_length.checked_add(amount) {
            Some(new_length) => new_length,
            None => return Err(range_error("push_out", index, amount)),
        };

        self.resize(new_length)?;
        self.slide(index, old_length - index, amount as isize)?;
        let gap: &mut [u8] = &mut self[index..index + amount];
        match fill {
            Some(fill) => gap.copy_from_slice(fill),
            None => gap.fill(0),
        }
        trace!("push_out(): index={} amount={} length={}->{}", index, amount, old_length, self.len());
        Ok(())
    }

    /// Removes the `amount` bytes at `index`, shrinking the buffer. Removing every byte releases it.
    pub fn pull_in(&mut self, index: usize, amount: usize) -> Result<(), Fail> {
        self.ensure_allocated("pull_in")?;
        let old_length: usize = self.len();
        let end: usize = self.check_range("pull_in", index, amount)?;
        if amount == 0 {
            return Ok(());
        }
        self.ensure_resizable("pull_in")?;

        self.slide(end, old_length - end, -(amount as isize))?;
        self.resize(old_length - amount)?;
        trace!("pull_in(): index={} amount={} length={}->{}", index, amount, old_length, self.len());
        Ok(())
    }

    /// Inserts `bytes` at `index`.
    pub fn insert(&mut self, index: usize, bytes: &[u8]) -> Result<(), Fail> {
        self.push_out(index, bytes.len(), Some(bytes))
    }

    /// Deletes `amount` bytes at `index`.
    pub fn delete(&mut self, index: usize, amount: usize) -> Result<(), Fail> {
        self.pull_in(index, amount)
    }

    /// Inserts `amount` zero bytes on each side of the boundary at `index`.
    pub fn part(&mut self, index: usize, amount: usize) -> Result<(), Fail> {
        let total: usize = match amount.checked_mul(2) {
            Some(total) => total,
            None => return Err(range_error("part", index, amount)),
        };
        self.push_out(index, total, None)
    }

    /// Removes `amount` bytes on each side of the boundary at `index`.
    pub fn consume(&mut self, index: usize, amount: usize) -> Result<(), Fail> {
        self.ensure_allocated("consume")?;
        if amount > index {
            return Err(range_error("consume", index, amount));
        }
        self.check_range("consume", index, amount)?;
        self.pull_in(index - amount, 2 * amount)
    }

    /// Reverses the bytes of the buffer.
    pub fn reverse(&mut self) -> Result<(), Fail> {
        self.ensure_allocated("reverse")?;
        self[..].reverse();
        Ok(())
    }

    /// Checks that `[index, index + amount)` lies within the buffer and returns its end.
    fn check_range(&self, caller: &str, index: usize, amount: usize) -> Result<usize, Fail> {
        match index.checked_add(amount) {
            Some(end) if end <= self.len() => Ok(end),
            _ => Err(range_error(caller, index, amount)),
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

fn range_error(caller: &str, index: usize, amount: usize) -> Fail {
    let cause: String = format!("{}(): range out of bounds (index={}, amount={})", caller, index, amount);
    error!("{}", cause);
    Fail::new(libc::ERANGE, &cause)
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
    use ::rand::{
        rngs::SmallRng,
        Rng,
        SeedableRng,
    };

    /// Creates a heap buffer holding `bytes`.
    fn buffer_with(bytes: &[u8]) -> Result<MemoryBuffer> {
        let mut buffer: MemoryBuffer = MemoryBuffer::allocated(bytes.len(), Backend::Heap, false)?;
        buffer.copy_from_slice(bytes);
        Ok(buffer)
    }

    #[test]
    fn slide_forward_and_backward() -> Result<()> {
        let mut buffer: MemoryBuffer = buffer_with(b"abcdefgh")?;
        buffer.slide(1, 2, 3)?;
        ensure_eq!(&buffer[..], b"adefbcgh");
        buffer.slide(4, 2, -3)?;
        ensure_eq!(&buffer[..], b"abcdefgh");
        buffer.slide(0, 8, 0)?;
        ensure_eq!(&buffer[..], b"abcdefgh");
        Ok(())
    }

    #[test]
    fn slide_rejects_out_of_range() -> Result<()> {
        let mut buffer: MemoryBuffer = buffer_with(b"abcdefgh")?;
        ensure_eq!(buffer.slide(6, 2, 1).map_err(|e| e.errno), Err(libc::ERANGE));
        ensure_eq!(buffer.slide(1, 2, -2).map_err(|e| e.errno), Err(libc::ERANGE));
        ensure_eq!(buffer.slide(7, 2, 0).map_err(|e| e.errno), Err(libc::ERANGE));
        ensure_eq!(buffer.slide(usize::MAX, 2, 0).map_err(|e| e.errno), Err(libc::ERANGE));
        ensure_eq!(&buffer[..], b"abcdefgh");
        Ok(())
    }

    #[test]
    fn push_out_opens_zeroed_gap() -> Result<()> {
        let mut buffer: MemoryBuffer = buffer_with(&[0xFF; 10])?;
        buffer.push_out(2, 4, None)?;
        ensure_eq!(buffer.len(), 14);
        ensure!(buffer[..2].iter().all(|b| *b == 0xFF));
        ensure!(buffer[2..6].iter().all(|b| *b == 0));
        ensure!(buffer[6..].iter().all(|b| *b == 0xFF));
        Ok(())
    }

    #[test]
    fn push_out_fill() -> Result<()> {
        let mut buffer: MemoryBuffer = buffer_with(b"held")?;
        buffer.push_out(4, 3, Some(b"!!!"))?;
        ensure_eq!(&buffer[..], b"held!!!");
        ensure_eq!(buffer.push_out(0, 3, Some(b"!!")).map_err(|e| e.errno), Err(libc::EINVAL));
        ensure_eq!(buffer.push_out(8, 1, None).map_err(|e| e.errno), Err(libc::ERANGE));
        ensure_eq!(&buffer[..], b"held!!!");
        Ok(())
    }

    #[test]
    fn insert_and_delete() -> Result<()> {
        let mut buffer: MemoryBuffer = buffer_with(b"PhysicalDrive")?;
        buffer.insert(0, b"\\\\.\\")?;
        ensure_eq!(&buffer[..], b"\\\\.\\PhysicalDrive");
        buffer.delete(4, 8)?;
        ensure_eq!(&buffer[..], b"\\\\.\\Drive");
        ensure_eq!(buffer.delete(9, 2).map_err(|e| e.errno), Err(libc::ERANGE));
        Ok(())
    }

    #[test]
    fn part_and_consume() -> Result<()> {
        let mut buffer: MemoryBuffer = buffer_with(b"abcd")?;
        buffer.part(2, 2)?;
        ensure_eq!(&buffer[..], b"ab\0\0\0\0cd");
        buffer.consume(4, 2)?;
        ensure_eq!(&buffer[..], b"abcd");
        buffer.consume(2, 1)?;
        ensure_eq!(&buffer[..], b"ad");
        ensure_eq!(buffer.consume(1, 2).map_err(|e| e.errno), Err(libc::ERANGE));
        ensure_eq!(buffer.consume(2, 1).map_err(|e| e.errno), Err(libc::ERANGE));
        Ok(())
    }

    #[test]
    fn pull_in_everything_releases() -> Result<()> {
        let mut buffer: MemoryBuffer = buffer_with(b"abc")?;
        buffer.pull_in(0, 3)?;
        ensure!(!buffer.is_allocated());
        Ok(())
    }

    #[test]
    fn fixed_size_backends_reject_growth() -> Result<()> {
        for backend in [Backend::AlignedHeap, Backend::NetworkBuffer] {
            let mut buffer: MemoryBuffer = MemoryBuffer::allocated(8, backend, true)?;
            buffer[0] = 1;
            ensure_eq!(buffer.push_out(0, 2, None).map_err(|e| e.errno), Err(libc::ENOTSUP));
            ensure_eq!(buffer.pull_in(0, 2).map_err(|e| e.errno), Err(libc::ENOTSUP));
            ensure_eq!(buffer.len(), 8);
            ensure_eq!(buffer[0], 1);

            // Editing that keeps the size works everywhere.
            buffer.slide(0, 1, 7)?;
            ensure_eq!(buffer[7], 1);
            buffer.reverse()?;
            ensure_eq!(buffer[0], 1);
        }
        Ok(())
    }

    #[test]
    fn unallocated_editing_fails() -> Result<()> {
        let mut buffer: MemoryBuffer = MemoryBuffer::new();
        ensure_eq!(buffer.reverse().map_err(|e| e.errno), Err(libc::EINVAL));
        ensure_eq!(buffer.push_out(0, 1, None).map_err(|e| e.errno), Err(libc::EINVAL));
        ensure_eq!(buffer.pull_in(0, 0).map_err(|e| e.errno), Err(libc::EINVAL));
        ensure_eq!(buffer.slide(0, 0, 0).map_err(|e| e.errno), Err(libc::EINVAL));
        Ok(())
    }

    #[test]
    fn random_edits_round_trip() -> Result<()> {
        let mut rng: SmallRng = SmallRng::seed_from_u64(0x6d656d);
        for _ in 0..64 {
            let length: usize = rng.gen_range(1..512);
            let mut buffer: MemoryBuffer = MemoryBuffer::allocated(length, Backend::Heap, false)?;
            rng.fill(&mut buffer[..]);
            let original: Vec<u8> = buffer.to_vec();

            let index: usize = rng.gen_range(0..=length);
            let amount: usize = rng.gen_range(1..256);
            buffer.push_out(index, amount, None)?;
            ensure_eq!(buffer.len(), length + amount);
            ensure!(buffer[index..index + amount].iter().all(|b| *b == 0));
            buffer.pull_in(index, amount)?;
            ensure_eq!(&buffer[..], &original[..]);

            buffer.reverse()?;
            ensure_eq!(buffer.iter().rev().copied().collect::<Vec<u8>>(), original);
            buffer.reverse()?;
            ensure_eq!(&buffer[..], &original[..]);
        }
        Ok(())
    }
}
