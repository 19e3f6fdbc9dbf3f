// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # lockfree-stack
//!
//! A minimal lock-free LIFO stack over *intrusive* nodes. The stack never
//! allocates: each node carries its own atomic `next` link (exposed through
//! the [`Link`] trait) and the stack threads nodes together through that
//! field. Every mutation is a compare-and-swap retry loop on the head
//! pointer; [`Stack::take_all`] detaches the entire stack in a single swap.
//!
//! # Ownership
//!
//! The stack holds raw pointers, so ownership is a protocol rather than a
//! type: `push` hands a node to the stack, `pop` hands it back. Callers are
//! expected to wrap those handoffs in owning types (`Box::into_raw` on the
//! way in, `Box::from_raw` on the way out).
//!
//! # Usage contract
//!
//! Lock-free pops dereference nodes they do not yet own: a thread reads the
//! head, then reads that node's `next` link, and only then tries to swing
//! the head. Two rules keep this sound:
//!
//! 1. A node must stay allocated for as long as any thread may be inside
//!    `pop`. Free popped nodes only after the threads that could have
//!    observed them are done (a join, a stop-the-world phase, or similar).
//! 2. A popped node must not be pushed back while a concurrent `pop` that
//!    observed it may still be in flight. Re-pushing the same head with a
//!    different tail would let a stale compare-and-swap succeed (the
//!    classic ABA failure). Recycle nodes only across a quiescent point.
//!
//! Both rules are naturally satisfied by free-list usage where nodes are
//! recycled and freed only during exclusive maintenance phases.

use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

/// An intrusive stack node: a type that dedicates one atomic pointer field
/// to the container.
///
/// # Safety
///
/// Implementors must guarantee that:
///
/// - `next_link` always returns the same field for the same node, and
/// - while a node is a member of a [`Stack`] (or a detached chain produced
///   by one), nothing else writes that field.
pub unsafe trait Link: Sized {
    /// The node's intrusive `next` pointer.
    fn next_link(&self) -> &AtomicPtr<Self>;
}

/// A lock-free LIFO stack of intrusive nodes.
///
/// All operations are non-blocking. `push`/`pop` are CAS retry loops;
/// `take_all` is a single atomic swap. The stack imposes no order on
/// concurrent callers beyond LIFO per linearized operation.
pub struct Stack<N: Link> {
    head: AtomicPtr<N>,
    // Raw node pointers: opt out of auto Send/Sync and opt back in below.
    _marker: PhantomData<*mut N>,
}

impl<N: Link> Stack<N> {
    /// Creates an empty stack.
    pub const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            _marker: PhantomData,
        }
    }

    /// Returns `true` if the stack was empty at the moment of the load.
    ///
    /// Under concurrency this is a snapshot, stale by the time the caller
    /// acts on it.
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    /// Pushes a single node.
    ///
    /// # Safety
    ///
    /// `node` must point to a live node that is not currently a member of
    /// any stack or chain. The stack takes logical ownership until the node
    /// is popped or detached.
    pub unsafe fn push(&self, node: NonNull<N>) {
        // SAFETY: a single node is a chain of length one; contract forwarded.
        unsafe { self.push_chain(node, node) }
    }

    /// Splices a pre-linked chain `first -> .. -> last` onto the stack in
    /// one successful CAS. `last`'s link is overwritten to point at the old
    /// head.
    ///
    /// # Safety
    ///
    /// `first` and `last` must delimit a live, acyclic chain threaded
    /// through the [`Link`] field, with no node a member of any other
    /// container. The stack takes logical ownership of every node in the
    /// chain.
    pub unsafe fn push_chain(&self, first: NonNull<N>, last: NonNull<N>) {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            // SAFETY: caller guarantees `last` is live and exclusively ours.
            unsafe { last.as_ref() }.next_link().store(head, Ordering::Relaxed);
            // Release publishes the chain contents (including the link
            // stores above) to the thread that eventually pops `first`.
            match self.head.compare_exchange_weak(
                head,
                first.as_ptr(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => head = actual,
            }
        }
    }

    /// Pops the most recently pushed node, transferring ownership to the
    /// caller. Returns `None` if the stack was empty.
    ///
    /// # Safety
    ///
    /// The crate-level usage contract must hold: every node that may be
    /// observed here stays allocated while this call is in flight, and no
    /// observed node is concurrently re-pushed.
    pub unsafe fn pop(&self) -> Option<NonNull<N>> {
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let node = NonNull::new(head)?;
            // SAFETY: the usage contract keeps `node` allocated; its link
            // may be stale, in which case the CAS below fails and retries.
            let next = unsafe { node.as_ref() }.next_link().load(Ordering::Relaxed);
            match self
                .head
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some(node),
                Err(actual) => head = actual,
            }
        }
    }

    /// Detaches every node in one atomic swap, returning the old head (the
    /// start of a chain terminated by a null link), or `None` if the stack
    /// was empty.
    ///
    /// Concurrent `take_all` calls partition the nodes: each node ends up
    /// in exactly one detached chain.
    ///
    /// # Safety
    ///
    /// Same contract as [`Stack::pop`]. The caller takes logical ownership
    /// of the whole chain.
    pub unsafe fn take_all(&self) -> Option<NonNull<N>> {
        NonNull::new(self.head.swap(ptr::null_mut(), Ordering::AcqRel))
    }
}

impl<N: Link> Default for Stack<N> {
    fn default() -> Self {
        Self::new()
    }
}

// The stack stores only raw pointers and owns no node data directly;
// sending or sharing it between threads is sound whenever the nodes
// themselves may cross threads.
unsafe impl<N: Link + Send> Send for Stack<N> {}
unsafe impl<N: Link + Send> Sync for Stack<N> {}

impl<N: Link> std::fmt::Debug for Stack<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("empty", &self.is_empty())
            .finish()
    }
}
