// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Segment sizing policy.
//!
//! [`ArenaOptions`] is pure configuration: element size, slot alignment,
//! capacity bounds, and the [`Growth`] rule that picks each new segment's
//! capacity. The arena consults it on every growth step and never mutates
//! it, so one options value can parameterize any number of arenas.

use crate::{ArenaError, MemTag};

/// Smallest segment capacity the policy will hand out.
pub const MIN_SEGMENT_ELEMS: u32 = 8;

/// Largest segment capacity the policy will hand out.
pub const MAX_SEGMENT_ELEMS: u32 = u32::MAX / 2;

/// Default slot alignment in bytes.
pub const DEFAULT_ALIGNMENT: usize = 4;

/// How successive segment capacities are chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Growth {
    /// Every segment gets `initial_num_elems` slots.
    #[default]
    Constant,
    /// Each segment doubles the previous capacity, clamped into
    /// `[initial_num_elems, max_num_elems]`.
    Doubling,
}

/// Construction-time options for a [`SegmentedArena`](crate::SegmentedArena).
///
/// Built with defaults and adjusted through the `with_*` setters:
///
/// ```
/// use segmented_arena::{ArenaOptions, Growth};
///
/// let options = ArenaOptions::new(16)
///     .with_initial_num_elems(64)
///     .with_growth(Growth::Doubling);
/// assert_eq!(options.next_num_elems(64), 128);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ArenaOptions {
    /// Slot width in bytes. Fixed per arena.
    elem_size: usize,
    /// Capacity of the first segment (and of every segment under
    /// [`Growth::Constant`]).
    initial_num_elems: u32,
    /// Upper bound on any single segment's capacity.
    max_num_elems: u32,
    /// Slot alignment in bytes; must divide `elem_size`.
    alignment: usize,
    /// Capacity rule for successive segments.
    growth: Growth,
    /// Accounting label for backing-store allocations.
    tag: MemTag,
}

impl ArenaOptions {
    /// Options for `elem_size`-byte slots with default bounds: initial
    /// capacity [`MIN_SEGMENT_ELEMS`], maximum [`MAX_SEGMENT_ELEMS`],
    /// alignment [`DEFAULT_ALIGNMENT`], constant growth.
    pub fn new(elem_size: usize) -> Self {
        Self {
            elem_size,
            initial_num_elems: MIN_SEGMENT_ELEMS,
            max_num_elems: MAX_SEGMENT_ELEMS,
            alignment: DEFAULT_ALIGNMENT,
            growth: Growth::Constant,
            tag: MemTag::DEFAULT,
        }
    }

    /// Sets the initial segment capacity, clamped into
    /// `[MIN_SEGMENT_ELEMS, MAX_SEGMENT_ELEMS]`.
    pub fn with_initial_num_elems(mut self, initial: u32) -> Self {
        self.initial_num_elems = initial.clamp(MIN_SEGMENT_ELEMS, MAX_SEGMENT_ELEMS);
        self
    }

    /// Sets the maximum segment capacity, clamped into
    /// `[MIN_SEGMENT_ELEMS, MAX_SEGMENT_ELEMS]`.
    pub fn with_max_num_elems(mut self, max: u32) -> Self {
        self.max_num_elems = max.clamp(MIN_SEGMENT_ELEMS, MAX_SEGMENT_ELEMS);
        self
    }

    /// Sets the slot alignment. Validated, not clamped: a non-power-of-two
    /// or non-dividing alignment is reported by [`ArenaOptions::validate`].
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Sets the growth rule.
    pub fn with_growth(mut self, growth: Growth) -> Self {
        self.growth = growth;
        self
    }

    /// Sets the accounting tag for backing-store allocations.
    pub fn with_tag(mut self, tag: MemTag) -> Self {
        self.tag = tag;
        self
    }

    /// Slot width in bytes.
    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    /// Capacity of the first segment.
    pub fn initial_num_elems(&self) -> u32 {
        self.initial_num_elems
    }

    /// Upper bound on any segment's capacity.
    pub fn max_num_elems(&self) -> u32 {
        self.max_num_elems
    }

    /// Slot alignment in bytes.
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// The configured growth rule.
    pub fn growth(&self) -> Growth {
        self.growth
    }

    /// The accounting tag.
    pub fn tag(&self) -> MemTag {
        self.tag
    }

    /// Capacity for the next segment, given the capacity of the segment it
    /// replaces (`0` when there is none yet).
    pub fn next_num_elems(&self, prev_num_elems: u32) -> u32 {
        match self.growth {
            Growth::Constant => self.initial_num_elems,
            Growth::Doubling => prev_num_elems
                .saturating_mul(2)
                .max(self.initial_num_elems)
                .min(self.max_num_elems),
        }
    }

    /// Checks the options for internal consistency.
    ///
    /// Called by the arena constructor; exposed so callers can fail fast
    /// when assembling configuration.
    pub fn validate(&self) -> Result<(), ArenaError> {
        if self.elem_size == 0 {
            return Err(ArenaError::ZeroElemSize);
        }
        if !self.alignment.is_power_of_two() {
            return Err(ArenaError::BadAlignment(self.alignment));
        }
        if self.elem_size % self.alignment != 0 {
            return Err(ArenaError::MisalignedElemSize {
                elem_size: self.elem_size,
                alignment: self.alignment,
            });
        }
        if self.initial_num_elems > self.max_num_elems {
            return Err(ArenaError::InvertedBounds {
                initial: self.initial_num_elems,
                max: self.max_num_elems,
            });
        }
        Ok(())
    }
}
