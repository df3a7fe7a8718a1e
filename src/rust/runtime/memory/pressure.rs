// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::cell::Cell;

//======================================================================================================================
// Traits
//======================================================================================================================

/// External memory-pressure accounting.
///
/// A [crate::MemoryBuffer] that was allocated with pressure accounting reports every change to its size through this
/// hook: the full size on allocation, the signed delta on resize, and the negated size on release.
pub trait MemoryPressure {
    /// Reports that `bytes` of unmanaged memory were added (positive) or removed (negative).
    fn report_delta(&self, bytes: isize);
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Pressure sink that discards every report.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPressure;

/// Pressure sink that keeps a running total of the reported bytes.
#[derive(Debug, Default)]
pub struct PressureCounter {
    /// Net number of bytes reported.
    total: Cell<isize>,
    /// Number of reports received.
    reports: Cell<usize>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl PressureCounter {
    /// Creates a counter with no reported pressure.
    pub fn new() -> Self {
        Self::default()
    }

    /// Net number of bytes currently reported.
    pub fn total(&self) -> isize {
        self.total.get()
    }

    /// Number of reports received so far.
    pub fn reports(&self) -> usize {
        self.reports.get()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl MemoryPressure for NoPressure {
    fn report_delta(&self, _bytes: isize) {}
}

impl MemoryPressure for PressureCounter {
    fn report_delta(&self, bytes: isize) {
        self.total.set(self.total.get() + bytes);
        self.reports.set(self.reports.get() + 1);
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
