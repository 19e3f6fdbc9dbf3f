// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # segmented-arena
//!
//! A concurrent arena allocator that hands out fixed-size element slots from
//! chains of equal-stride segments, with wholesale recycling through a shared
//! lock-free pool. Built for collector-style workloads: many threads allocate
//! small bookkeeping records during a work phase, then a single maintenance
//! step reclaims everything at once.
//!
//! # Key Components
//!
//! - [`SegmentedArena`] — the allocator: lock-free slot claims on the hot
//!   path, segment-at-a-time growth on the cold path.
//! - [`Segment`] — one fixed-capacity slab of slots with an atomic bump
//!   index and an intrusive chain link.
//! - [`SegmentPool`] — a lock-free free list of retired segments, shared by
//!   any number of arenas with the same element size.
//! - [`ArenaOptions`] — the sizing policy: element size, alignment, segment
//!   capacity bounds, and the [`Growth`] strategy.
//! - [`ArenaStats`] / [`PoolStats`] — serializable counter snapshots with
//!   one-line summaries.
//!
//! # Ownership Model
//!
//! ```text
//! SegmentedArena::allocate()
//!       │
//!       ▼
//!   first ──► Segment ──► Segment ──► Segment ──► null
//!  (newest)                            (oldest)
//!       │
//!       │  reset_all()           one splice
//!       ▼
//!   SegmentPool  ──► pop() ──► recycled into any arena's chain
//! ```
//!
//! The arena owns its chain; slots are borrows into it and are never freed
//! individually. `reset_all` moves the whole chain into the pool in a single
//! lock-free splice, and dropping the arena does the same. Segments leave the
//! pool one at a time when an arena grows, zero-filled and rewound.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use segmented_arena::{ArenaOptions, SegmentPool, SegmentedArena};
//!
//! let pool = Arc::new(SegmentPool::new());
//! let options = ArenaOptions::new(16).with_initial_num_elems(8);
//! let mut arena = SegmentedArena::new("remset", options, Arc::clone(&pool)).unwrap();
//!
//! // Nine claims overflow the first 8-slot segment into a second one.
//! for _ in 0..9 {
//!     arena.allocate();
//! }
//! assert_eq!(arena.num_segments(), 2);
//! assert_eq!(arena.num_allocated_slots(), 9);
//!
//! // The maintenance phase retires the chain wholesale.
//! arena.reset_all();
//! assert_eq!(arena.num_segments(), 0);
//! assert_eq!(pool.num_segments(), 2);
//! ```

mod arena;
pub mod backing;
mod error;
mod policy;
mod pool;
pub mod segment;
mod stats;

pub use arena::SegmentedArena;
pub use backing::MemTag;
pub use error::ArenaError;
pub use policy::{
    ArenaOptions, Growth, DEFAULT_ALIGNMENT, MAX_SEGMENT_ELEMS, MIN_SEGMENT_ELEMS,
};
pub use pool::SegmentPool;
pub use segment::{Segment, SegmentChain};
pub use stats::{ArenaStats, PoolStats};
