// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for arena construction.
//!
//! Exhaustion of the backing store is deliberately *not* represented here:
//! a failed segment allocation is a process-level failure and aborts via
//! [`std::alloc::handle_alloc_error`]. The errors below all come from
//! misconfigured [`ArenaOptions`](crate::ArenaOptions) and are reported
//! before any memory is touched.

/// Errors produced while validating arena options.
#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    /// The configured element size was zero.
    #[error("cannot build an arena for zero-sized elements")]
    ZeroElemSize,

    /// The configured alignment was not a power of two.
    #[error("alignment {0} is not a power of two")]
    BadAlignment(usize),

    /// The element size does not preserve alignment from slot to slot.
    ///
    /// Slot `i` lives at `start + i * elem_size`, so every slot is aligned
    /// only when `elem_size` is a multiple of the alignment.
    #[error("element size {elem_size} is not a multiple of alignment {alignment}")]
    MisalignedElemSize { elem_size: usize, alignment: usize },

    /// The initial segment capacity exceeds the configured maximum.
    #[error("initial segment capacity {initial} exceeds maximum {max}")]
    InvertedBounds { initial: u32, max: u32 },
}
