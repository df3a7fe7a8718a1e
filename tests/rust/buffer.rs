// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::crc::{
    Crc,
    CRC_32_ISO_HDLC,
};
use ::memhandle::{
    ensure_eq,
    runtime::logging,
    Backend,
    BufferOptions,
    Config,
    MemoryBuffer,
    PressureCounter,
};
use ::rand::{
    rngs::SmallRng,
    Rng,
    SeedableRng,
};
use ::std::rc::Rc;

//==============================================================================
// Constants
//==============================================================================

/// Backends whose buffers can grow and shrink.
const GROWABLE_BACKENDS: [Backend; 3] = [Backend::Heap, Backend::TaskAllocator, Backend::VirtualMemory];

/// Every backend that can hold memory.
const ALL_BACKENDS: [Backend; 5] = [
    Backend::Heap,
    Backend::AlignedHeap,
    Backend::TaskAllocator,
    Backend::VirtualMemory,
    Backend::NetworkBuffer,
];

/// Sizes exercised by the round-trip tests.
const SIZES: [usize; 4] = [1, 63, 4096, 65537];

/// Seed for random buffer contents.
const SEED: u64 = 0x4d454d48;

//==============================================================================
// Helper Functions
//==============================================================================

/// Allocates a buffer of `size` random bytes and returns it together with a copy of its contents.
fn random_buffer(rng: &mut SmallRng, size: usize, backend: Backend) -> Result<(MemoryBuffer, Vec<u8>)> {
    let mut buffer: MemoryBuffer = match MemoryBuffer::allocated(size, backend, false) {
        Ok(buffer) => buffer,
        Err(e) => anyhow::bail!("failed to allocate {} buffer: {:?}", backend, e),
    };
    if buffer.len() < size {
        anyhow::bail!("{} buffer is too short (expected={}, got={})", backend, size, buffer.len());
    }
    rng.fill(&mut buffer[..]);
    let contents: Vec<u8> = buffer.to_vec();
    Ok((buffer, contents))
}

//==============================================================================
// test_allocate_round_trip()
//==============================================================================

/// Tests that every byte of a fresh buffer can be written and read back.
#[test]
fn test_allocate_round_trip() -> Result<()> {
    logging::initialize();
    let mut rng: SmallRng = SmallRng::seed_from_u64(SEED);
    for backend in ALL_BACKENDS {
        for size in SIZES {
            let (buffer, contents) = random_buffer(&mut rng, size, backend)?;
            ensure_eq!(buffer.to_byte_array()?, contents);
        }
    }
    Ok(())
}

//==============================================================================
// test_resize_preserves_prefix()
//==============================================================================

/// Tests that growing and shrinking keeps the leading bytes.
#[test]
fn test_resize_preserves_prefix() -> Result<()> {
    let mut rng: SmallRng = SmallRng::seed_from_u64(SEED);
    for backend in GROWABLE_BACKENDS {
        for size in SIZES {
            let (mut buffer, contents) = random_buffer(&mut rng, size, backend)?;
            let new_size: usize = rng.gen_range(1..2 * size + 1);
            buffer.resize(new_size)?;
            if buffer.len() < new_size {
                anyhow::bail!("resize() returned a short buffer (expected={}, got={})", new_size, buffer.len());
            }
            let kept: usize = contents.len().min(new_size);
            ensure_eq!(&buffer[..kept], &contents[..kept]);
        }
    }
    Ok(())
}

//==============================================================================
// test_push_out_pull_in()
//==============================================================================

/// Tests that pulling in what was pushed out restores the buffer.
#[test]
fn test_push_out_pull_in() -> Result<()> {
    let mut rng: SmallRng = SmallRng::seed_from_u64(SEED);
    for backend in GROWABLE_BACKENDS {
        for size in SIZES {
            let (mut buffer, contents) = random_buffer(&mut rng, size, backend)?;
            ensure_eq!(buffer.len(), size);
            let index: usize = rng.gen_range(0..size + 1);
            let amount: usize = rng.gen_range(1..size + 1);
            buffer.push_out(index, amount, None)?;
            ensure_eq!(buffer.len(), size + amount);
            buffer.pull_in(index, amount)?;
            ensure_eq!(buffer.len(), size);
            ensure_eq!(buffer.to_byte_array()?, contents);
        }
    }
    Ok(())
}

//==============================================================================
// test_virtual_memory_push_out_pull_in()
//==============================================================================

/// Tests that editing virtual memory tracks the logical length, not the page-rounded region.
#[test]
fn test_virtual_memory_push_out_pull_in() -> Result<()> {
    let mut buffer: MemoryBuffer = MemoryBuffer::allocated(100, Backend::VirtualMemory, true)?;
    ensure_eq!(buffer.len(), 100);
    buffer.fill(0x5A)?;
    buffer.push_out(2, 4, None)?;
    ensure_eq!(buffer.len(), 104);
    ensure_eq!(&buffer[2..6], &[0u8; 4]);
    buffer.pull_in(2, 4)?;
    ensure_eq!(buffer.len(), 100);
    ensure_eq!(buffer.to_byte_array()?, vec![0x5A; 100]);
    Ok(())
}

//==============================================================================
// test_push_out_zero_gap()
//==============================================================================

/// Tests the gap opened in a buffer of `0xFF` bytes.
#[test]
fn test_push_out_zero_gap() -> Result<()> {
    let mut buffer: MemoryBuffer = MemoryBuffer::allocated(10, Backend::Heap, false)?;
    buffer.fill(0xFF)?;
    buffer.push_out(2, 4, None)?;
    ensure_eq!(buffer.len(), 14);
    ensure_eq!(
        buffer.to_byte_array()?,
        vec![0xFF, 0xFF, 0, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
    );
    Ok(())
}

//==============================================================================
// test_reverse_twice()
//==============================================================================

/// Tests that reversing twice restores the contents.
#[test]
fn test_reverse_twice() -> Result<()> {
    let mut rng: SmallRng = SmallRng::seed_from_u64(SEED);
    for backend in ALL_BACKENDS {
        let (mut buffer, contents) = random_buffer(&mut rng, 1021, backend)?;
        buffer.reverse()?;
        ensure_eq!(buffer[0], contents[contents.len() - 1]);
        buffer.reverse()?;
        ensure_eq!(buffer.to_byte_array()?, contents);
    }
    Ok(())
}

//==============================================================================
// test_array_round_trip()
//==============================================================================

/// Tests that arrays written into growable buffers read back unchanged.
#[test]
fn test_array_round_trip() -> Result<()> {
    let mut rng: SmallRng = SmallRng::seed_from_u64(SEED);
    for backend in GROWABLE_BACKENDS {
        let values: Vec<u64> = (0..rng.gen_range(1..1024)).map(|_| rng.gen()).collect();
        let offset: usize = rng.gen_range(0..64);
        let mut buffer: MemoryBuffer = MemoryBuffer::allocated(1, backend, true)?;
        buffer.from_array(&values, offset)?;
        ensure_eq!(unsafe { buffer.to_array::<u64>(offset, values.len())? }, values);
    }
    Ok(())
}

//==============================================================================
// test_byte_array_and_strings()
//==============================================================================

/// Tests the byte array and string accessors on small buffers.
#[test]
fn test_byte_array_and_strings() -> Result<()> {
    let mut buffer: MemoryBuffer = MemoryBuffer::allocated(8, Backend::Heap, true)?;
    buffer.from_byte_array(&[1, 2, 3, 4])?;
    ensure_eq!(buffer.to_byte_array()?, vec![1, 2, 3, 4, 0, 0, 0, 0]);

    let mut buffer: MemoryBuffer = MemoryBuffer::allocated(16, Backend::Heap, false)?;
    buffer.write_string(0, "AB", true)?;
    ensure_eq!(unsafe { buffer.read_string(0)? }, "AB");
    Ok(())
}

//==============================================================================
// test_crc32()
//==============================================================================

/// Tests the checksum against the reference CRC-32 values.
#[test]
fn test_crc32() -> Result<()> {
    let crc: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);
    let mut rng: SmallRng = SmallRng::seed_from_u64(SEED);
    for backend in ALL_BACKENDS {
        let mut buffer: MemoryBuffer = MemoryBuffer::allocated(43, backend, false)?;
        buffer.copy_from_slice(b"The quick brown fox jumps over the lazy dog");
        ensure_eq!(buffer.calculate_crc32(), 0x414FA339);

        let (buffer, _) = random_buffer(&mut rng, 4099, backend)?;
        ensure_eq!(buffer.calculate_crc32(), crc.checksum(&buffer.to_byte_array()?));
    }
    ensure_eq!(MemoryBuffer::new().calculate_crc32(), 0);
    Ok(())
}

//==============================================================================
// test_unallocated_handle()
//==============================================================================

/// Tests the behavior of a handle that holds no memory.
#[test]
fn test_unallocated_handle() -> Result<()> {
    let mut buffer: MemoryBuffer = MemoryBuffer::new();
    buffer.release()?;
    buffer.release()?;
    ensure_eq!(buffer.resize(8).is_err(), true);
    ensure_eq!(buffer.write::<u32>(0, 1).is_err(), true);
    ensure_eq!(unsafe { buffer.read::<u32>(0) }.is_err(), true);
    ensure_eq!(buffer.calculate_crc32(), 0);
    ensure_eq!(buffer.is_allocated(), false);
    Ok(())
}

//==============================================================================
// test_pressure_accounting()
//==============================================================================

/// Tests that accounted buffers report exactly their size, whatever happens to them.
#[test]
fn test_pressure_accounting() -> Result<()> {
    let counter: Rc<PressureCounter> = Rc::new(PressureCounter::new());
    let mut rng: SmallRng = SmallRng::seed_from_u64(SEED);
    for backend in GROWABLE_BACKENDS {
        let mut buffer: MemoryBuffer = MemoryBuffer::new();
        buffer.set_pressure(counter.clone())?;
        buffer.allocate(rng.gen_range(1..8192), backend, false, true)?;
        for _ in 0..8 {
            buffer.resize(rng.gen_range(1..8192))?;
            ensure_eq!(counter.total(), buffer.len() as isize);
        }
        buffer.insert(0, b"header")?;
        ensure_eq!(counter.total(), buffer.len() as isize);
    }
    ensure_eq!(counter.total(), 0);
    Ok(())
}

//==============================================================================
// test_options_from_config()
//==============================================================================

/// Tests allocating with defaults read from a configuration document.
#[test]
fn test_options_from_config() -> Result<()> {
    let config: Config = Config::from_yaml_str(
        "memory:\n  default_backend: task_allocator\n  zero_init: true\n  alignment: 256\n  pressure_threshold: 0\n",
    )?;
    let options: BufferOptions = config.buffer_options()?;
    ensure_eq!(options.default_backend, Backend::TaskAllocator);

    let mut buffer: MemoryBuffer = MemoryBuffer::with_options(options);
    buffer.allocate_default(32, false)?;
    ensure_eq!(buffer.backend(), Backend::TaskAllocator);
    ensure_eq!(buffer.to_byte_array()?, vec![0; 32]);
    buffer.release()?;

    buffer.allocate(32, Backend::AlignedHeap, false, false)?;
    ensure_eq!(buffer.as_ptr() as usize % 256, 0);
    Ok(())
}
