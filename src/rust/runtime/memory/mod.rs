// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod accessors;
mod backend;
mod buffer;
mod editor;
mod heap;
mod pressure;
mod utility;

//==============================================================================
// Exports
//==============================================================================

pub use self::{
    backend::Backend,
    buffer::MemoryBuffer,
    heap::NativeHeap,
    pressure::{
        MemoryPressure,
        NoPressure,
        PressureCounter,
    },
};
