// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Counter snapshots for diagnostics.
//!
//! Both snapshot types are assembled from live atomic counters, so under
//! concurrency the fields are individually accurate but not mutually
//! consistent. They serialize cleanly for structured diagnostic output and
//! render as one-line summaries for plain-text sinks.

/// A point-in-time view of one arena's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ArenaStats {
    /// The arena's diagnostic name.
    pub name: &'static str,
    /// Segments currently linked into the arena chain.
    pub num_segments: usize,
    /// Total footprint of the chain in bytes (storage plus bookkeeping).
    pub mem_size_bytes: usize,
    /// Sum of the capacities of every linked segment.
    pub available_slots: usize,
    /// Slots handed out since the last reset.
    pub allocated_slots: usize,
}

impl ArenaStats {
    /// One-line usage summary: name, segment count, byte total, occupancy.
    pub fn summary(&self) -> String {
        format!(
            "{}: {} segments, {} bytes, {}/{} slots allocated",
            self.name,
            self.num_segments,
            self.mem_size_bytes,
            self.allocated_slots,
            self.available_slots,
        )
    }
}

/// A point-in-time view of the free pool's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    /// Segments currently pooled.
    pub num_segments: usize,
    /// Total footprint of pooled segments in bytes.
    pub mem_size_bytes: usize,
}

impl PoolStats {
    /// One-line usage summary: segment count and byte total.
    pub fn summary(&self) -> String {
        format!(
            "free pool: {} segments, {} bytes",
            self.num_segments, self.mem_size_bytes,
        )
    }
}
