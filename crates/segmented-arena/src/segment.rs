// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Fixed-capacity segments and owned segment chains.
//!
//! A [`Segment`] is one slab of uniformly sized slots carved out of a raw
//! backing store. Slots are claimed by a monotonic atomic bump index and
//! are never freed individually; the only way back is [`Segment::reset`],
//! which rewinds the whole slab at once. Segments carry an intrusive `next`
//! link so that arenas and free pools can thread them into chains without
//! allocating.
//!
//! # Ownership
//!
//! A segment belongs to exactly one place at a time: a private arena chain,
//! the free pool, or an owned [`SegmentChain`] in flight between the two.
//! Handoffs move `Box<Segment>` (or a whole chain), never shared
//! references, so double-membership is unrepresentable in safe code.
//!
//! # The bump index
//!
//! `next_allocate` only grows. Claims that lose a race at the capacity
//! boundary push it past `capacity()`; those indices are waste, never
//! handed out, and never reclaimed until a reset. [`Segment::length`]
//! therefore reports the raw offset, which can exceed the capacity after a
//! boundary race; iteration code must clamp to `capacity()`.

use std::alloc::Layout;
use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use lockfree_stack::Link;

use crate::backing::{self, MemTag};

/// A fixed-capacity slab of `num_elems` slots, each `elem_size` bytes.
///
/// Freshly constructed segments hand out *uninitialized* slots; segments
/// recycled through [`Segment::reset`] hand out zero-filled ones.
pub struct Segment {
    /// Slot width in bytes. Immutable.
    elem_size: usize,
    /// Slot count. Immutable.
    num_elems: u32,
    /// Backing-store layout; kept so deallocation mirrors allocation.
    layout: Layout,
    /// Accounting label for the backing store.
    tag: MemTag,
    /// Intrusive link for arena chains and the free pool.
    next: AtomicPtr<Segment>,
    /// Monotonic bump index; may transiently exceed `num_elems`.
    next_allocate: AtomicU32,
    /// Raw backing store of `num_elems * elem_size` bytes.
    storage: NonNull<u8>,
}

impl Segment {
    /// Allocates a segment with uninitialized storage, labeled `tag`.
    ///
    /// Aborts the process if the system allocator cannot satisfy the
    /// backing store (allocation failure at this layer is not recoverable).
    ///
    /// # Panics
    /// Panics on a zero `elem_size` or `num_elems`, a non-power-of-two
    /// `alignment`, or a capacity whose byte size overflows the address
    /// space. Arena construction validates its options up front, so these
    /// fire only on direct misuse.
    pub fn new(elem_size: usize, num_elems: u32, alignment: usize, tag: MemTag) -> Box<Segment> {
        assert!(elem_size > 0, "segment slots must have nonzero size");
        assert!(num_elems > 0, "segments hold at least one slot");
        assert!(alignment.is_power_of_two(), "alignment must be a power of two");

        let layout = match (num_elems as usize)
            .checked_mul(elem_size)
            .and_then(|bytes| Layout::from_size_align(bytes, alignment).ok())
        {
            Some(layout) => layout,
            None => panic!("segment of {num_elems} x {elem_size} B slots overflows the address space"),
        };

        let storage = backing::alloc_backing(layout, tag);

        Box::new(Segment {
            elem_size,
            num_elems,
            layout,
            tag,
            next: AtomicPtr::new(ptr::null_mut()),
            next_allocate: AtomicU32::new(0),
            storage,
        })
    }

    /// Claims the next free slot, or `None` if the segment is exhausted.
    ///
    /// Lock-free: a cheap load filters out calls against a full segment,
    /// then a `fetch_add` claims an index. An index claimed at or past the
    /// capacity (a lost race at the boundary) is abandoned; the bump index
    /// is not rewound.
    ///
    /// Successful claims return disjoint `elem_size`-byte regions.
    pub fn allocate_slot(&self) -> Option<NonNull<u8>> {
        if self.next_allocate.load(Ordering::Relaxed) >= self.num_elems {
            return None;
        }

        let claimed = self.next_allocate.fetch_add(1, Ordering::Relaxed);
        if claimed >= self.num_elems {
            return None;
        }

        let offset = claimed as usize * self.elem_size;
        // SAFETY: claimed < num_elems, so the slot lies inside the backing
        // store: offset + elem_size <= num_elems * elem_size.
        Some(unsafe { NonNull::new_unchecked(self.storage.as_ptr().add(offset)) })
    }

    /// Rewinds the segment for reuse: zero-fills the storage, resets the
    /// bump index, and points the intrusive link at `next`.
    ///
    /// Exclusivity is encoded in `&mut self`; a segment being reset cannot
    /// be racing with `allocate_slot`.
    pub fn reset(&mut self, next: *mut Segment) {
        debug_assert!(
            !ptr::eq(next, self),
            "segment must not be linked to itself"
        );

        // SAFETY: the extent is exactly our backing allocation, and &mut
        // guarantees no concurrent readers or writers.
        unsafe { ptr::write_bytes(self.storage.as_ptr(), 0, self.layout.size()) };
        self.next_allocate.store(0, Ordering::Relaxed);
        self.next.store(next, Ordering::Relaxed);
    }

    /// Slot width in bytes.
    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    /// Slot count. Fixed at construction, preserved across pool trips.
    pub fn capacity(&self) -> u32 {
        self.num_elems
    }

    /// The raw bump offset: how many claims have been attempted.
    ///
    /// Exceeds [`Segment::capacity`] after a lost race at the boundary;
    /// clamp before using it as an iteration limit.
    pub fn length(&self) -> u32 {
        self.next_allocate.load(Ordering::Relaxed)
    }

    /// Whether every slot has been claimed.
    pub fn is_full(&self) -> bool {
        self.next_allocate.load(Ordering::Relaxed) >= self.num_elems
    }

    /// Base address of the backing store.
    pub fn start(&self) -> NonNull<u8> {
        self.storage
    }

    /// Backing-store size in bytes.
    pub fn storage_bytes(&self) -> usize {
        self.layout.size()
    }

    /// Total footprint: backing store plus this bookkeeping struct.
    pub fn mem_size(&self) -> usize {
        std::mem::size_of::<Segment>() + self.layout.size()
    }

    /// Slot alignment of the backing store.
    pub fn alignment(&self) -> usize {
        self.layout.align()
    }

    /// The accounting tag the backing store was allocated under.
    pub fn tag(&self) -> MemTag {
        self.tag
    }

    pub(crate) fn next(&self) -> *mut Segment {
        self.next.load(Ordering::Relaxed)
    }

    pub(crate) fn set_next(&self, next: *mut Segment) {
        debug_assert!(
            !ptr::eq(next, self),
            "segment must not be linked to itself"
        );
        self.next.store(next, Ordering::Relaxed);
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        // SAFETY: `storage` came from `alloc_backing` with this `layout`
        // and is not referenced past this point.
        unsafe { backing::dealloc_backing(self.storage, self.layout, self.tag) };
    }
}

// SAFETY: `next` is dedicated to whichever single container holds the
// segment, and the same field is returned on every call.
unsafe impl Link for Segment {
    fn next_link(&self) -> &AtomicPtr<Self> {
        &self.next
    }
}

// A segment exclusively owns its backing store, and all shared-reference
// mutation goes through atomics.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("elem_size", &self.elem_size)
            .field("capacity", &self.num_elems)
            .field("length", &self.length())
            .field("tag", &self.tag)
            .finish()
    }
}

/// An owned, detached chain of segments, threaded through the intrusive
/// link from `first` (most recent) to `last` (oldest, link null).
///
/// Produced when an arena retires its whole chain or when the free pool is
/// drained; consumed by splicing into the pool or by iteration. Dropping a
/// chain frees every remaining segment.
///
/// The carried counts are whatever the producer knew at detach time. For
/// arena-built chains they are exact; for drained pools they are the
/// best-effort counter values.
pub struct SegmentChain {
    first: NonNull<Segment>,
    last: NonNull<Segment>,
    num_segments: usize,
    mem_size: usize,
}

impl SegmentChain {
    /// Assembles a chain from raw ends.
    ///
    /// # Safety
    ///
    /// `first..last` must be a live chain threaded through the intrusive
    /// link, null-terminated at `last`, with every segment owned by the
    /// caller and by nothing else. The chain takes that ownership.
    pub(crate) unsafe fn from_raw_parts(
        first: NonNull<Segment>,
        last: NonNull<Segment>,
        num_segments: usize,
        mem_size: usize,
    ) -> Self {
        debug_assert!(unsafe { last.as_ref() }.next().is_null());
        Self {
            first,
            last,
            num_segments,
            mem_size,
        }
    }

    /// Number of segments carried, as counted at detach time.
    pub fn num_segments(&self) -> usize {
        self.num_segments
    }

    /// Total footprint in bytes, as counted at detach time.
    pub fn mem_size(&self) -> usize {
        self.mem_size
    }

    /// Disassembles the chain without freeing anything.
    pub(crate) fn into_raw_parts(self) -> (NonNull<Segment>, NonNull<Segment>, usize, usize) {
        let this = ManuallyDrop::new(self);
        (this.first, this.last, this.num_segments, this.mem_size)
    }
}

impl Drop for SegmentChain {
    fn drop(&mut self) {
        let mut cur = Some(self.first);
        while let Some(node) = cur {
            // SAFETY: the chain owns its segments; each was Box-allocated.
            let seg = unsafe { Box::from_raw(node.as_ptr()) };
            cur = NonNull::new(seg.next());
        }
    }
}

// The chain owns its segments outright; nothing in it is shared.
unsafe impl Send for SegmentChain {}

impl std::fmt::Debug for SegmentChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentChain")
            .field("num_segments", &self.num_segments)
            .field("mem_size", &self.mem_size)
            .finish()
    }
}

impl IntoIterator for SegmentChain {
    type Item = Box<Segment>;
    type IntoIter = IntoIter;

    fn into_iter(self) -> IntoIter {
        let (first, _, _, _) = self.into_raw_parts();
        IntoIter {
            next_up: Some(first),
        }
    }
}

/// Consuming iterator over a [`SegmentChain`], yielding owned segments
/// from most recent to oldest. Remaining segments are freed on drop.
pub struct IntoIter {
    next_up: Option<NonNull<Segment>>,
}

impl Iterator for IntoIter {
    type Item = Box<Segment>;

    fn next(&mut self) -> Option<Box<Segment>> {
        let node = self.next_up.take()?;
        // SAFETY: we own the remainder of the chain.
        let seg = unsafe { Box::from_raw(node.as_ptr()) };
        self.next_up = NonNull::new(seg.next());
        Some(seg)
    }
}

impl Drop for IntoIter {
    fn drop(&mut self) {
        while self.next().is_some() {}
    }
}

// Same ownership story as the chain it came from.
unsafe impl Send for IntoIter {}
