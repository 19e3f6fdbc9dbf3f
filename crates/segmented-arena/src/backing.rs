// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tagged allocation of segment backing stores.
//!
//! A thin decorator over [`std::alloc`]: every segment's raw storage is
//! requested and released through this module, labeled with a [`MemTag`].
//! The tag has no functional effect. It exists purely for accounting: it
//! rides on the `tracing` records emitted here and lets external tooling
//! attribute memory to a subsystem ("card-set", "remset", ...).
//!
//! Allocation failure is fatal by design. The arena sits below the layers
//! that could meaningfully recover, so a failed backing allocation goes
//! straight to [`std::alloc::handle_alloc_error`] with no retry.

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Live backing bytes across all tags, process-wide.
static LIVE_BACKING_BYTES: AtomicUsize = AtomicUsize::new(0);

/// An accounting label for backing-store allocations.
///
/// Tags are cheap, copyable, and purely descriptive. Two arenas may share a
/// tag; the label then aggregates both in trace output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemTag(&'static str);

impl MemTag {
    /// The tag used when callers do not pick one.
    pub const DEFAULT: MemTag = MemTag("segmented-arena");

    /// Creates a tag from a static label.
    pub const fn new(label: &'static str) -> Self {
        Self(label)
    }

    /// The tag's label.
    pub fn label(&self) -> &'static str {
        self.0
    }
}

impl Default for MemTag {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for MemTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Allocates `layout` from the system allocator under `tag`.
///
/// The returned storage is uninitialized. Aborts the process via
/// [`alloc::handle_alloc_error`] if the system allocator fails.
///
/// # Panics
/// Panics if `layout` has zero size.
pub fn alloc_backing(layout: Layout, tag: MemTag) -> NonNull<u8> {
    assert!(layout.size() > 0, "backing stores are never zero-sized");

    // SAFETY: the layout has nonzero size, checked above.
    let raw = unsafe { alloc::alloc(layout) };
    let Some(ptr) = NonNull::new(raw) else {
        alloc::handle_alloc_error(layout);
    };

    LIVE_BACKING_BYTES.fetch_add(layout.size(), Ordering::Relaxed);
    tracing::trace!(tag = %tag, bytes = layout.size(), "backing store allocated");
    ptr
}

/// Returns `ptr` to the system allocator under `tag`.
///
/// # Safety
///
/// `ptr` must have been returned by [`alloc_backing`] with this exact
/// `layout`, and must not be used afterwards.
pub unsafe fn dealloc_backing(ptr: NonNull<u8>, layout: Layout, tag: MemTag) {
    // SAFETY: forwarded from the caller.
    unsafe { alloc::dealloc(ptr.as_ptr(), layout) };

    LIVE_BACKING_BYTES.fetch_sub(layout.size(), Ordering::Relaxed);
    tracing::trace!(tag = %tag, bytes = layout.size(), "backing store released");
}

/// Backing bytes currently live across the whole process.
///
/// Best-effort under concurrency, like every other counter in this crate.
pub fn live_backing_bytes() -> usize {
    LIVE_BACKING_BYTES.load(Ordering::Relaxed)
}
