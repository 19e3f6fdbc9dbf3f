// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Lock-free pool of retired segments.
//!
//! The [`SegmentPool`] keeps segments that arenas have finished with so the
//! next growth step can skip the system allocator. It is a LIFO free list
//! built on a lock-free intrusive stack:
//!
//! 1. `push` / `pop` move single segments in and out with CAS retry loops.
//! 2. `bulk_push` splices a whole retired chain in one CAS.
//! 3. `drain_all` detaches everything in one swap.
//!
//! # Counters
//!
//! The segment and byte counters ride *alongside* the stack operations
//! rather than inside them, so they are best-effort: a reader can observe
//! a count that is off by in-flight operations. They exist for sizing
//! decisions and diagnostics and are never used for correctness.
//!
//! # Thread safety
//!
//! All operations take `&self` and may race freely. Segments enter and
//! leave as owned values (`Box<Segment>` / [`SegmentChain`]), which keeps
//! the single-owner rule visible in the signatures: the pool owns what has
//! been pushed, the caller owns what has been popped.
//!
//! # Reclamation
//!
//! A concurrent `pop` reads a segment it does not yet own, so the
//! underlying stack's usage contract applies to everything that was ever
//! pooled: a segment taken out of the pool may be freed, or pushed back
//! in, only once concurrently started pool operations have finished.
//! Arena lifecycles satisfy this structurally. Popped segments are linked
//! into a live chain rather than freed, and the two points that do free
//! or re-push (`reset_all` on an arena, dropping a drained chain) sit in
//! exclusive maintenance phases.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use lockfree_stack::Stack;

use crate::segment::{Segment, SegmentChain};
use crate::stats::PoolStats;

/// A lock-free LIFO free list of segments with best-effort accounting.
///
/// `const`-constructible, so a pool can live in a `static` and be shared
/// by every arena in the process.
pub struct SegmentPool {
    /// The free list itself.
    segments: Stack<Segment>,
    /// Best-effort count of pooled segments.
    num_segments: AtomicUsize,
    /// Best-effort total footprint of pooled segments, in bytes.
    mem_size: AtomicUsize,
}

impl SegmentPool {
    /// Creates an empty pool.
    pub const fn new() -> Self {
        Self {
            segments: Stack::new(),
            num_segments: AtomicUsize::new(0),
            mem_size: AtomicUsize::new(0),
        }
    }

    /// Returns one segment to the pool.
    pub fn push(&self, segment: Box<Segment>) {
        let mem = segment.mem_size();
        let raw = NonNull::from(Box::leak(segment));

        // SAFETY: just detached from its Box; nothing else references it.
        unsafe { self.segments.push(raw) };

        self.num_segments.fetch_add(1, Ordering::Relaxed);
        self.mem_size.fetch_add(mem, Ordering::Relaxed);
    }

    /// Splices an entire retired chain into the pool with a single CAS.
    pub fn bulk_push(&self, chain: SegmentChain) {
        let (first, last, num, mem) = chain.into_raw_parts();

        // SAFETY: the chain owned `first..last` exclusively; ownership
        // moves to the stack in one splice.
        unsafe { self.segments.push_chain(first, last) };

        self.num_segments.fetch_add(num, Ordering::Relaxed);
        self.mem_size.fetch_add(mem, Ordering::Relaxed);
        tracing::trace!(segments = num, bytes = mem, "chain spliced into free pool");
    }

    /// Takes one segment from the pool, or `None` if it was observed empty.
    ///
    /// The segment keeps whatever capacity it was created with, which may
    /// differ from what the requesting arena would have built.
    pub fn pop(&self) -> Option<Box<Segment>> {
        // SAFETY: pooled segments are freed or re-pushed only at quiescent
        // points (teardown, stop-the-world resets), which is exactly the
        // stack's usage contract.
        let node = unsafe { self.segments.pop() }?;

        self.num_segments.fetch_sub(1, Ordering::Relaxed);
        // SAFETY: pop transferred exclusive ownership of the node.
        let segment = unsafe { Box::from_raw(node.as_ptr()) };
        self.mem_size.fetch_sub(segment.mem_size(), Ordering::Relaxed);
        Some(segment)
    }

    /// Detaches every pooled segment in one swap.
    ///
    /// Returns the detached chain carrying the counter values at detach
    /// time, and resets both counters to zero. Concurrent drains partition
    /// the segments: each ends up in exactly one chain.
    pub fn drain_all(&self) -> Option<SegmentChain> {
        // SAFETY: same contract as `pop`.
        let first = unsafe { self.segments.take_all() }?;

        let num = self.num_segments.swap(0, Ordering::Relaxed);
        let mem = self.mem_size.swap(0, Ordering::Relaxed);

        // The chain is ours now; walk it to find the tail for the handle.
        let mut last = first;
        loop {
            // SAFETY: we own the whole detached chain.
            match NonNull::new(unsafe { last.as_ref() }.next()) {
                Some(next) => last = next,
                None => break,
            }
        }

        // SAFETY: `first..last` is a null-terminated chain we own outright.
        Some(unsafe { SegmentChain::from_raw_parts(first, last, num, mem) })
    }

    /// Frees every pooled segment back to the system allocator.
    ///
    /// A no-op on an empty pool.
    pub fn release_all_to_system(&self) {
        if let Some(chain) = self.drain_all() {
            let num = chain.num_segments();
            let mem = chain.mem_size();
            drop(chain);
            tracing::debug!(segments = num, bytes = mem, "free pool released to system");
        }
    }

    /// Best-effort count of pooled segments.
    pub fn num_segments(&self) -> usize {
        self.num_segments.load(Ordering::Relaxed)
    }

    /// Best-effort footprint of pooled segments, in bytes.
    pub fn mem_size(&self) -> usize {
        self.mem_size.load(Ordering::Relaxed)
    }

    /// A snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            num_segments: self.num_segments(),
            mem_size_bytes: self.mem_size(),
        }
    }

    /// One-line usage summary for diagnostic output.
    pub fn summary(&self) -> String {
        self.stats().summary()
    }
}

impl Default for SegmentPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SegmentPool {
    fn drop(&mut self) {
        self.release_all_to_system();
    }
}

impl std::fmt::Debug for SegmentPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentPool")
            .field("num_segments", &self.num_segments())
            .field("mem_size", &self.mem_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::MemTag;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn test_segment(elem_size: usize, num_elems: u32) -> Box<Segment> {
        Segment::new(elem_size, num_elems, 8, MemTag::new("test"))
    }

    /// Hand-links `n` fresh segments into a chain and wraps it in a handle
    /// with exact counts.
    fn test_chain(n: usize) -> (SegmentChain, Vec<usize>) {
        assert!(n > 0);
        let raws: Vec<*mut Segment> = (0..n).map(|_| Box::into_raw(test_segment(16, 8))).collect();
        let bases: Vec<usize> = raws
            .iter()
            .map(|&raw| unsafe { (*raw).start() }.as_ptr() as usize)
            .collect();

        let mut mem = 0;
        for window in raws.windows(2) {
            unsafe { (*window[0]).set_next(window[1]) };
        }
        for &raw in &raws {
            mem += unsafe { (*raw).mem_size() };
        }

        let chain = unsafe {
            SegmentChain::from_raw_parts(
                NonNull::new_unchecked(raws[0]),
                NonNull::new_unchecked(raws[n - 1]),
                n,
                mem,
            )
        };
        (chain, bases)
    }

    #[test]
    fn test_pop_empty() {
        let pool = SegmentPool::new();
        assert!(pool.pop().is_none());
        assert_eq!(pool.num_segments(), 0);
        assert_eq!(pool.mem_size(), 0);
    }

    #[test]
    fn test_push_pop_preserves_geometry() {
        let pool = SegmentPool::new();
        pool.push(test_segment(16, 32));

        let seg = pool.pop().unwrap();
        assert_eq!(seg.elem_size(), 16);
        assert_eq!(seg.capacity(), 32);
        assert!(pool.pop().is_none());
    }

    #[test]
    fn test_lifo_order() {
        let pool = SegmentPool::new();
        let a = test_segment(16, 8);
        let b = test_segment(16, 8);
        let a_base = a.start().as_ptr() as usize;
        let b_base = b.start().as_ptr() as usize;

        pool.push(a);
        pool.push(b);

        assert_eq!(pool.pop().unwrap().start().as_ptr() as usize, b_base);
        assert_eq!(pool.pop().unwrap().start().as_ptr() as usize, a_base);
    }

    #[test]
    fn test_counters_track_push_pop() {
        let pool = SegmentPool::new();
        let a = test_segment(16, 8);
        let b = test_segment(16, 64);
        let total_mem = a.mem_size() + b.mem_size();

        pool.push(a);
        pool.push(b);
        assert_eq!(pool.num_segments(), 2);
        assert_eq!(pool.mem_size(), total_mem);

        let popped = pool.pop().unwrap();
        assert_eq!(pool.num_segments(), 1);
        assert_eq!(pool.mem_size(), total_mem - popped.mem_size());

        let _ = pool.pop().unwrap();
        assert_eq!(pool.num_segments(), 0);
        assert_eq!(pool.mem_size(), 0);
    }

    #[test]
    fn test_bulk_push_splices_whole_chain() {
        let pool = SegmentPool::new();
        let old = test_segment(16, 8);
        let old_base = old.start().as_ptr() as usize;
        pool.push(old);

        let (chain, bases) = test_chain(3);
        let chain_mem = chain.mem_size();
        pool.bulk_push(chain);
        assert_eq!(pool.num_segments(), 4);
        assert!(pool.mem_size() > chain_mem);

        // The spliced chain sits on top in link order, then the old content.
        for expected in bases {
            assert_eq!(pool.pop().unwrap().start().as_ptr() as usize, expected);
        }
        assert_eq!(pool.pop().unwrap().start().as_ptr() as usize, old_base);
        assert!(pool.pop().is_none());
    }

    #[test]
    fn test_drain_all_takes_everything_and_zeroes_counters() {
        let pool = SegmentPool::new();
        let mut total_mem = 0;
        for _ in 0..3 {
            let seg = test_segment(16, 8);
            total_mem += seg.mem_size();
            pool.push(seg);
        }

        let chain = pool.drain_all().unwrap();
        assert_eq!(chain.num_segments(), 3);
        assert_eq!(chain.mem_size(), total_mem);

        assert_eq!(pool.num_segments(), 0);
        assert_eq!(pool.mem_size(), 0);
        assert!(pool.pop().is_none());

        assert_eq!(chain.into_iter().count(), 3);
    }

    #[test]
    fn test_drain_all_empty() {
        let pool = SegmentPool::new();
        assert!(pool.drain_all().is_none());
    }

    #[test]
    fn test_release_all_to_system() {
        let pool = SegmentPool::new();
        // No-op on an empty pool.
        pool.release_all_to_system();

        pool.push(test_segment(16, 8));
        pool.push(test_segment(16, 8));
        pool.release_all_to_system();

        assert_eq!(pool.num_segments(), 0);
        assert_eq!(pool.mem_size(), 0);
        assert!(pool.pop().is_none());
    }

    #[test]
    fn test_concurrent_push_pop_conserves_segments() {
        const PRODUCERS: usize = 4;
        const CONSUMERS: usize = 4;
        const PER_PRODUCER: usize = 250;
        const TOTAL: usize = PRODUCERS * PER_PRODUCER;

        let pool = SegmentPool::new();
        let popped = AtomicUsize::new(0);
        let collected: Mutex<Vec<Box<Segment>>> = Mutex::new(Vec::new());

        std::thread::scope(|s| {
            for _ in 0..PRODUCERS {
                let pool = &pool;
                s.spawn(move || {
                    for _ in 0..PER_PRODUCER {
                        pool.push(test_segment(16, 8));
                    }
                });
            }
            for _ in 0..CONSUMERS {
                let pool = &pool;
                let popped = &popped;
                let collected = &collected;
                s.spawn(move || {
                    let mut local = Vec::new();
                    while popped.load(Ordering::Relaxed) < TOTAL {
                        match pool.pop() {
                            Some(seg) => {
                                popped.fetch_add(1, Ordering::Relaxed);
                                local.push(seg);
                            }
                            None => std::thread::yield_now(),
                        }
                    }
                    collected.lock().unwrap().extend(local);
                });
            }
        });

        let collected = collected.into_inner().unwrap();
        assert_eq!(collected.len(), TOTAL, "every pushed segment popped once");
        assert_eq!(pool.num_segments(), 0);
        assert_eq!(pool.mem_size(), 0);

        // All distinct, geometry intact.
        let bases: HashSet<usize> = collected
            .iter()
            .map(|seg| seg.start().as_ptr() as usize)
            .collect();
        assert_eq!(bases.len(), TOTAL);
        assert!(collected.iter().all(|s| s.elem_size() == 16 && s.capacity() == 8));
    }

    #[test]
    fn test_stats_and_summary() {
        let pool = SegmentPool::new();
        pool.push(test_segment(16, 8));

        let stats = pool.stats();
        assert_eq!(stats.num_segments, 1);
        assert!(stats.mem_size_bytes > 0);

        let summary = pool.summary();
        assert!(summary.contains("free pool"));
        assert!(summary.contains("1 segments"));
    }

    #[test]
    fn test_debug_format() {
        let pool = SegmentPool::new();
        let debug = format!("{pool:?}");
        assert!(debug.contains("SegmentPool"));
        assert!(debug.contains("num_segments"));
    }
}
