// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

/// Largest size accepted by allocators whose size argument is a signed 32-bit quantity (task allocator and network
/// buffers). Requests above this are rejected before reaching the native API.
pub const NATIVE_SIZE_MAX_31BIT: usize = i32::MAX as usize;

/// Largest size accepted by any allocator. Rust objects may not span more than `isize::MAX` bytes.
pub const NATIVE_SIZE_MAX: usize = isize::MAX as usize;
