// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

// This file is for CPU architecture-specific things.

// ------------------------
// CPU Data Cache Line Size
// ------------------------
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub const CPU_DATA_CACHE_LINE_SIZE: usize = 64;

#[cfg(target_arch = "aarch64")]
pub const CPU_DATA_CACHE_LINE_SIZE: usize = 128;

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
pub const CPU_DATA_CACHE_LINE_SIZE: usize = 64;

// -------------
// Pointer Width
// -------------
/// Size in bytes of a native pointer. Aligned heap blocks stash their raw address in the word right before the data.
pub const POINTER_WIDTH: usize = ::std::mem::size_of::<usize>();

const _: () = assert!(CPU_DATA_CACHE_LINE_SIZE.is_power_of_two());
