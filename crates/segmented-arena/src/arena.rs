// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The segmented arena allocator.
//!
//! A [`SegmentedArena`] hands out fixed-size element slots from a private
//! chain of [`Segment`]s. The newest segment sits at the head of the chain
//! and is the only allocation target; when it fills up, the arena grows by
//! one segment, preferring a recycled one from the shared [`SegmentPool`]
//! over a fresh backing-store allocation.
//!
//! # Concurrency
//!
//! `allocate` is lock-free on the hot path: an acquire-load of the head
//! segment plus an atomic bump inside it. Growth is the cold path and is
//! serialized by a narrow internal mutex; threads that lose the growth
//! race simply retry against the segment the winner published. Nothing
//! else in the arena blocks.
//!
//! The maintenance operations ([`SegmentedArena::reset_all`],
//! [`SegmentedArena::for_each_element`]) need the arena quiescent, which
//! is encoded as `&mut self`: the borrow checker refuses them while any
//! shared borrow could still be allocating.
//!
//! # Lifecycle
//!
//! Allocated slots are never freed individually. The arena gives memory
//! back wholesale: `reset_all` retires the entire chain to the pool in one
//! splice (done between use phases, e.g. at a collection pause), and drop
//! does the same. Arenas sharing a pool must use the same element size;
//! segment capacities may differ freely.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::policy::ArenaOptions;
use crate::pool::SegmentPool;
use crate::segment::{Segment, SegmentChain};
use crate::stats::ArenaStats;
use crate::ArenaError;

/// A concurrent arena of uniformly sized element slots, grown segment by
/// segment and recycled wholesale through a shared [`SegmentPool`].
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use segmented_arena::{ArenaOptions, SegmentPool, SegmentedArena};
///
/// let pool = Arc::new(SegmentPool::new());
/// let options = ArenaOptions::new(16).with_initial_num_elems(8);
/// let mut arena = SegmentedArena::new("card-set", options, Arc::clone(&pool)).unwrap();
///
/// let slot = arena.allocate();
/// assert_eq!(arena.num_allocated_slots(), 1);
///
/// // Between use phases, the whole chain goes back to the pool.
/// arena.reset_all();
/// assert_eq!(pool.num_segments(), 1);
/// # let _ = slot;
/// ```
pub struct SegmentedArena {
    /// Diagnostic name; also labels log records.
    name: &'static str,
    /// Validated sizing policy.
    options: ArenaOptions,
    /// Where retired segments go and recycled ones come from.
    pool: Arc<SegmentPool>,
    /// Head of the chain: the newest segment, the allocation target.
    first: AtomicPtr<Segment>,
    /// Tail of the chain: the oldest segment. Written once per chain life.
    last: AtomicPtr<Segment>,
    /// Segments currently linked. Exact: updated only under the grow lock.
    num_segments: AtomicUsize,
    /// Chain footprint in bytes. Exact: updated only under the grow lock.
    mem_size: AtomicUsize,
    /// Sum of linked segment capacities.
    num_available_slots: AtomicUsize,
    /// Successful allocations since the last reset.
    num_allocated_slots: AtomicUsize,
    /// Serializes growth. Never touched on the allocation hot path.
    grow_lock: Mutex<()>,
}

impl SegmentedArena {
    /// Creates an empty arena named `name` over the given pool.
    ///
    /// No memory is allocated until the first [`SegmentedArena::allocate`].
    /// Fails if `options` are inconsistent (see [`ArenaOptions::validate`]).
    pub fn new(
        name: &'static str,
        options: ArenaOptions,
        pool: Arc<SegmentPool>,
    ) -> Result<Self, ArenaError> {
        options.validate()?;
        Ok(Self {
            name,
            options,
            pool,
            first: AtomicPtr::new(ptr::null_mut()),
            last: AtomicPtr::new(ptr::null_mut()),
            num_segments: AtomicUsize::new(0),
            mem_size: AtomicUsize::new(0),
            num_available_slots: AtomicUsize::new(0),
            num_allocated_slots: AtomicUsize::new(0),
            grow_lock: Mutex::new(()),
        })
    }

    /// Claims one `elem_size`-byte slot.
    ///
    /// Returned storage is uninitialized if the slot comes from a fresh
    /// segment and zero-filled if it comes from a recycled one; callers
    /// construct their element into it either way.
    ///
    /// Never fails: if neither the head segment nor the pool can satisfy
    /// the claim, the arena grows, and a failed backing-store allocation
    /// aborts the process.
    pub fn allocate(&self) -> NonNull<u8> {
        loop {
            let head = self.first.load(Ordering::Acquire);
            // SAFETY: chain segments are unlinked only by `reset_all` and
            // `drop`, both of which require exclusive access; while this
            // shared borrow lives, `head` stays valid.
            if let Some(segment) = unsafe { head.as_ref() } {
                if let Some(slot) = segment.allocate_slot() {
                    self.num_allocated_slots.fetch_add(1, Ordering::Relaxed);
                    debug_assert_eq!(
                        slot.as_ptr() as usize % self.options.alignment(),
                        0,
                        "slot must honor the configured alignment"
                    );
                    return slot;
                }
            }
            self.grow(head);
        }
    }

    /// Grows the chain by one segment, unless another thread already did.
    ///
    /// `exhausted` is the head the caller failed against (null for an
    /// empty arena). Recycling from the pool is preferred; only an empty
    /// pool costs a backing-store allocation.
    #[cold]
    #[inline(never)]
    fn grow(&self, exhausted: *mut Segment) {
        let _guard = match self.grow_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        // Somebody may have grown while we waited for the lock; if the
        // head moved, their segment has free slots for us.
        if self.first.load(Ordering::Acquire) != exhausted {
            return;
        }

        let (mut segment, recycled) = match self.pool.pop() {
            Some(segment) => (segment, true),
            None => {
                // SAFETY: `exhausted` is null or a segment of our own
                // chain, kept alive by the shared borrow (see `allocate`).
                let prev_capacity =
                    unsafe { exhausted.as_ref() }.map_or(0, Segment::capacity);
                let capacity = self.options.next_num_elems(prev_capacity);
                let segment = Segment::new(
                    self.options.elem_size(),
                    capacity,
                    self.options.alignment(),
                    self.options.tag(),
                );
                (segment, false)
            }
        };

        if recycled {
            debug_assert_eq!(
                segment.elem_size(),
                self.options.elem_size(),
                "pool shared across arenas with different element sizes"
            );
            // Zero-fills, rewinds the bump index, and links to the old head.
            segment.reset(exhausted);
        } else {
            segment.set_next(exhausted);
        }

        let capacity = segment.capacity();
        let mem = segment.mem_size();
        let raw = Box::into_raw(segment);

        if exhausted.is_null() {
            self.last.store(raw, Ordering::Relaxed);
        }
        // Publish: allocators may start claiming slots immediately.
        self.first.store(raw, Ordering::Release);

        self.num_segments.fetch_add(1, Ordering::Relaxed);
        self.mem_size.fetch_add(mem, Ordering::Relaxed);
        self.num_available_slots
            .fetch_add(capacity as usize, Ordering::Relaxed);

        tracing::debug!(
            arena = self.name,
            capacity,
            recycled,
            segments = self.num_segments.load(Ordering::Relaxed),
            "arena grew by one segment"
        );
    }

    /// Retires the entire chain to the pool in one splice and rewinds all
    /// counters to zero.
    ///
    /// Requires the arena quiescent (`&mut self`): no slot handed out
    /// before this call may be used after it.
    pub fn reset_all(&mut self) {
        let first = std::mem::replace(self.first.get_mut(), ptr::null_mut());
        let last = std::mem::replace(self.last.get_mut(), ptr::null_mut());

        let num = std::mem::take(self.num_segments.get_mut());
        let mem = std::mem::take(self.mem_size.get_mut());
        let available = std::mem::take(self.num_available_slots.get_mut());
        let allocated = std::mem::take(self.num_allocated_slots.get_mut());

        let (first, last) = match (NonNull::new(first), NonNull::new(last)) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                debug_assert_eq!(num, 0, "an empty arena has nothing to retire");
                return;
            }
        };

        #[cfg(debug_assertions)]
        verify_chain(first, last, num, mem);

        tracing::debug!(
            arena = self.name,
            segments = num,
            bytes = mem,
            allocated,
            available,
            "arena chain retired to pool"
        );

        // SAFETY: the chain was exclusively ours and is null-terminated at
        // `last`; ownership moves wholesale into the handle.
        let chain = unsafe { SegmentChain::from_raw_parts(first, last, num, mem) };
        self.pool.bulk_push(chain);
    }

    /// Visits every occupied slot, newest segment first.
    ///
    /// The per-segment limit clamps to the capacity: a bump index that
    /// overshot in a boundary race counts attempts, not live slots.
    ///
    /// Requires the arena quiescent (`&mut self`).
    pub fn for_each_element<F: FnMut(NonNull<u8>)>(&mut self, mut visitor: F) {
        let mut cur = self.first.load(Ordering::Relaxed);
        // SAFETY: exclusive access; the chain cannot change under us.
        while let Some(segment) = unsafe { cur.as_ref() } {
            let occupied = segment.length().min(segment.capacity()) as usize;
            let elem_size = segment.elem_size();
            let base = segment.start().as_ptr();
            for i in 0..occupied {
                // SAFETY: i < capacity, so the slot lies in the backing store.
                visitor(unsafe { NonNull::new_unchecked(base.add(i * elem_size)) });
            }
            cur = segment.next();
        }
    }

    /// Best-effort number of slots claimed across the chain.
    ///
    /// Sums the raw bump offsets, so concurrent allocation and boundary
    /// races can make this exceed the number of live slots.
    pub fn length(&self) -> usize {
        let mut total = 0usize;
        let mut cur = self.first.load(Ordering::Acquire);
        // SAFETY: same chain-stability argument as in `allocate`.
        while let Some(segment) = unsafe { cur.as_ref() } {
            total += segment.length() as usize;
            cur = segment.next();
        }
        total
    }

    /// The arena's diagnostic name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The sizing policy this arena was built with.
    pub fn options(&self) -> &ArenaOptions {
        &self.options
    }

    /// Number of segments currently linked.
    pub fn num_segments(&self) -> usize {
        self.num_segments.load(Ordering::Relaxed)
    }

    /// Chain footprint in bytes (backing stores plus bookkeeping).
    pub fn mem_size(&self) -> usize {
        self.mem_size.load(Ordering::Relaxed)
    }

    /// Sum of the capacities of every linked segment.
    pub fn num_available_slots(&self) -> usize {
        self.num_available_slots.load(Ordering::Relaxed)
    }

    /// Successful allocations since the last reset.
    pub fn num_allocated_slots(&self) -> usize {
        self.num_allocated_slots.load(Ordering::Relaxed)
    }

    /// A snapshot of the arena counters.
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            name: self.name,
            num_segments: self.num_segments(),
            mem_size_bytes: self.mem_size(),
            available_slots: self.num_available_slots(),
            allocated_slots: self.num_allocated_slots(),
        }
    }

    /// One-line usage summary for diagnostic output.
    pub fn summary(&self) -> String {
        self.stats().summary()
    }
}

impl Drop for SegmentedArena {
    fn drop(&mut self) {
        self.reset_all();
    }
}

impl std::fmt::Debug for SegmentedArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentedArena")
            .field("name", &self.name)
            .field("num_segments", &self.num_segments())
            .field("mem_size", &self.mem_size())
            .field("allocated_slots", &self.num_allocated_slots())
            .field("available_slots", &self.num_available_slots())
            .finish()
    }
}

/// Walks a detached chain and checks it against the retired counters.
#[cfg(debug_assertions)]
fn verify_chain(
    first: NonNull<Segment>,
    last: NonNull<Segment>,
    expected_segments: usize,
    expected_bytes: usize,
) {
    let mut count = 0usize;
    let mut bytes = 0usize;
    let mut tail = first;
    let mut cur = Some(first);
    while let Some(node) = cur {
        // SAFETY: the caller owns the chain; nodes are live.
        let segment = unsafe { node.as_ref() };
        count += 1;
        bytes += segment.mem_size();
        tail = node;
        cur = NonNull::new(segment.next());
    }
    assert_eq!(count, expected_segments, "chain length matches the counter");
    assert_eq!(bytes, expected_bytes, "chain footprint matches the counter");
    assert_eq!(tail, last, "the chain terminates at the recorded tail");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::MemTag;
    use crate::policy::Growth;
    use std::collections::HashSet;

    fn small_options() -> ArenaOptions {
        ArenaOptions::new(16)
            .with_initial_num_elems(8)
            .with_tag(MemTag::new("test"))
    }

    fn arena_with_pool() -> (SegmentedArena, Arc<SegmentPool>) {
        let pool = Arc::new(SegmentPool::new());
        let arena = SegmentedArena::new("test-arena", small_options(), Arc::clone(&pool))
            .expect("options are valid");
        (arena, pool)
    }

    #[test]
    fn test_new_validates_options() {
        let pool = Arc::new(SegmentPool::new());
        let result = SegmentedArena::new("bad", ArenaOptions::new(0), pool);
        assert!(matches!(result, Err(ArenaError::ZeroElemSize)));
    }

    #[test]
    fn test_empty_arena_has_no_memory() {
        let (arena, _pool) = arena_with_pool();
        assert_eq!(arena.num_segments(), 0);
        assert_eq!(arena.mem_size(), 0);
        assert_eq!(arena.num_available_slots(), 0);
        assert_eq!(arena.num_allocated_slots(), 0);
        assert_eq!(arena.length(), 0);
    }

    #[test]
    fn test_first_allocation_grows_one_segment() {
        let (arena, _pool) = arena_with_pool();

        let slot = arena.allocate();
        assert_eq!(slot.as_ptr() as usize % 4, 0);
        assert_eq!(arena.num_segments(), 1);
        assert_eq!(arena.num_available_slots(), 8);
        assert_eq!(arena.num_allocated_slots(), 1);
        assert_eq!(arena.length(), 1);
    }

    #[test]
    fn test_ninth_allocation_grows_second_segment() {
        let (arena, _pool) = arena_with_pool();

        for _ in 0..8 {
            arena.allocate();
        }
        assert_eq!(arena.num_segments(), 1, "eight slots fit in one segment");
        assert_eq!(arena.length(), 8);

        arena.allocate();
        assert_eq!(arena.num_segments(), 2, "the ninth slot forces growth");
        assert_eq!(arena.length(), 9);
        assert_eq!(arena.num_available_slots(), 16);
        assert_eq!(arena.num_allocated_slots(), 9);
        assert_eq!(
            arena.mem_size(),
            2 * (std::mem::size_of::<Segment>() + 8 * 16)
        );
    }

    #[test]
    fn test_slots_distinct_and_aligned() {
        let (arena, _pool) = arena_with_pool();

        let slots: HashSet<usize> = (0..100)
            .map(|_| arena.allocate().as_ptr() as usize)
            .collect();
        assert_eq!(slots.len(), 100, "no slot handed out twice");
        assert!(slots.iter().all(|addr| addr % 4 == 0));
    }

    #[test]
    fn test_reset_all_retires_chain_to_pool() {
        let (mut arena, pool) = arena_with_pool();

        // 24 allocations fill exactly three 8-slot segments.
        for _ in 0..24 {
            arena.allocate();
        }
        assert_eq!(arena.num_segments(), 3);
        let chain_mem = arena.mem_size();

        arena.reset_all();

        assert_eq!(pool.num_segments(), 3);
        assert_eq!(pool.mem_size(), chain_mem);
        assert_eq!(arena.num_segments(), 0);
        assert_eq!(arena.mem_size(), 0);
        assert_eq!(arena.num_available_slots(), 0);
        assert_eq!(arena.num_allocated_slots(), 0);
        assert_eq!(arena.length(), 0);
    }

    #[test]
    fn test_reset_all_on_empty_arena() {
        let (mut arena, pool) = arena_with_pool();
        arena.reset_all();
        assert_eq!(pool.num_segments(), 0);
        assert_eq!(arena.num_segments(), 0);
    }

    #[test]
    fn test_growth_prefers_pool_over_fresh_allocation() {
        let (mut arena, pool) = arena_with_pool();

        for _ in 0..24 {
            arena.allocate();
        }
        arena.reset_all();
        assert_eq!(pool.num_segments(), 3);

        // The next allocation recycles instead of allocating fresh.
        arena.allocate();
        assert_eq!(pool.num_segments(), 2);
        assert_eq!(arena.num_segments(), 1);
    }

    #[test]
    fn test_recycled_slot_is_zeroed() {
        let (mut arena, pool) = arena_with_pool();

        let slot = arena.allocate();
        // SAFETY: the slot is 16 writable bytes we own.
        unsafe { ptr::write_bytes(slot.as_ptr(), 0xFF, 16) };

        arena.reset_all();
        assert_eq!(pool.num_segments(), 1);

        let slot = arena.allocate();
        // SAFETY: freshly claimed 16-byte slot.
        let bytes = unsafe { std::slice::from_raw_parts(slot.as_ptr(), 16) };
        assert!(
            bytes.iter().all(|&b| b == 0),
            "recycled segments hand out zero-filled slots"
        );
    }

    #[test]
    fn test_shared_pool_across_arenas() {
        let pool = Arc::new(SegmentPool::new());
        let mut writer =
            SegmentedArena::new("writer", small_options(), Arc::clone(&pool)).unwrap();
        let reader =
            SegmentedArena::new("reader", small_options(), Arc::clone(&pool)).unwrap();

        for _ in 0..16 {
            writer.allocate();
        }
        writer.reset_all();
        assert_eq!(pool.num_segments(), 2);

        // The second arena grows out of the first one's retirees.
        reader.allocate();
        assert_eq!(pool.num_segments(), 1);
        assert_eq!(reader.num_segments(), 1);
    }

    #[test]
    fn test_for_each_element_visits_exactly_occupied_slots() {
        let (mut arena, _pool) = arena_with_pool();

        let mut handed_out = HashSet::new();
        for _ in 0..11 {
            handed_out.insert(arena.allocate().as_ptr() as usize);
        }

        let mut visited = HashSet::new();
        arena.for_each_element(|slot| {
            visited.insert(slot.as_ptr() as usize);
        });

        assert_eq!(visited, handed_out, "visitation covers the slots handed out");
    }

    #[test]
    fn test_for_each_element_on_empty_arena() {
        let (mut arena, _pool) = arena_with_pool();
        let mut visits = 0;
        arena.for_each_element(|_| visits += 1);
        assert_eq!(visits, 0);
    }

    #[test]
    fn test_doubling_growth_scales_segments() {
        let pool = Arc::new(SegmentPool::new());
        let options = small_options()
            .with_growth(Growth::Doubling)
            .with_max_num_elems(32);
        let arena = SegmentedArena::new("doubling", options, pool).unwrap();

        // Fill the first 8-slot segment, then force growth: 8 -> 16.
        for _ in 0..9 {
            arena.allocate();
        }
        assert_eq!(arena.num_segments(), 2);
        assert_eq!(arena.num_available_slots(), 8 + 16);

        // Fill through the second segment: next is 16 * 2 = 32.
        for _ in 9..25 {
            arena.allocate();
        }
        assert_eq!(arena.num_segments(), 3);
        assert_eq!(arena.num_available_slots(), 8 + 16 + 32);
    }

    #[test]
    fn test_drop_retires_chain() {
        let pool = Arc::new(SegmentPool::new());
        {
            let arena =
                SegmentedArena::new("transient", small_options(), Arc::clone(&pool)).unwrap();
            for _ in 0..17 {
                arena.allocate();
            }
            assert_eq!(arena.num_segments(), 3);
        }
        assert_eq!(pool.num_segments(), 3);
    }

    #[test]
    fn test_stats_and_summary() {
        let (arena, _pool) = arena_with_pool();
        for _ in 0..9 {
            arena.allocate();
        }

        let stats = arena.stats();
        assert_eq!(stats.name, "test-arena");
        assert_eq!(stats.num_segments, 2);
        assert_eq!(stats.allocated_slots, 9);
        assert_eq!(stats.available_slots, 16);

        let summary = arena.summary();
        assert!(summary.contains("test-arena"));
        assert!(summary.contains("9/16 slots"));
    }

    #[test]
    fn test_debug_format() {
        let (arena, _pool) = arena_with_pool();
        let debug = format!("{arena:?}");
        assert!(debug.contains("SegmentedArena"));
        assert!(debug.contains("test-arena"));
    }
}
