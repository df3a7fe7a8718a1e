// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// PAL: Platform Abstraction Layer
//======================================================================================================================

// This is the platform abstraction layer designed to hide the platform specific details of the native allocators that
// back a memory buffer. Heap instances are provided by mimalloc on every platform, while virtual memory, the task
// allocator, and network buffers are forwarded to the underlying OS.

pub mod arch;
pub mod functions;
pub mod heap;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "windows")]
pub mod windows;
