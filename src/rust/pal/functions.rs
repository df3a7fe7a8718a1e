// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

::cfg_if::cfg_if! {
    if #[cfg(target_os = "windows")] {
        pub use crate::pal::windows::functions::*;
    } else {
        pub use crate::pal::linux::functions::*;
    }
}

pub use crate::pal::heap::*;
