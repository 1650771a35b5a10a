//! A bare-bones lock-free intrusive stack operating on raw pointers.
//!
//! The block pools use this as their shared free list: blocks are pushed
//! one at a time with *compare-and-swap* and consumed either one at a time
//! (`take_one`) or all at once (`take_all`), so no dedicated memory
//! reclamation mechanism is required for the list itself.

use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crossbeam_utils::Backoff;

////////////////////////////////////////////////////////////////////////////////////////////////////
// RawNode (trait)
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A trait for node types that contain `next` pointers and can be accessed
/// through raw pointers.
pub(crate) trait RawNode {
    /// Returns the `node`'s next pointer.
    ///
    /// # Safety
    ///
    /// The caller has to ensure `node` is a valid pointer to a node and that
    /// the aliasing rules are not violated.
    unsafe fn next(node: *mut Self) -> *mut Self;

    /// Sets the `node`'s next pointer to `next`.
    ///
    /// # Safety
    ///
    /// The caller has to ensure `node` is a valid pointer to a node and that
    /// the aliasing rules are not violated.
    unsafe fn set_next(node: *mut Self, next: *mut Self);
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// RawQueue
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A concurrent linked-list based LIFO queue operating on raw pointers that
/// serves as a building block for the block pools.
///
/// Elements are inserted at the front and removed either all at once by
/// swapping the queue to empty or one at a time through
/// [`take_one`][RawQueue::take_one].
#[derive(Debug, Default)]
pub(crate) struct RawQueue<N> {
    head: AtomicPtr<N>,
}

/********** impl inherent *************************************************************************/

impl<N> RawQueue<N> {
    /// Creates a new empty `RawQueue`.
    #[inline]
    pub const fn new() -> Self {
        Self { head: AtomicPtr::new(ptr::null_mut()) }
    }

    /// Returns `true` if the queue is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Relaxed).is_null()
    }
}

impl<N: RawNode> RawQueue<N> {
    /// Pushes `node` to the head of the queue.
    ///
    /// # Safety
    ///
    /// `node` must be non-null and valid (alive and not mutably aliased).
    #[inline]
    pub unsafe fn push(&self, node: *mut N) {
        let backoff = Backoff::new();
        loop {
            let head = self.head.load(Ordering::Relaxed);
            N::set_next(node, head);

            // (QUE:1) this `Release` CAS synchronizes-with the `Acquire` swap in (QUE:2)
            if self.cas_head(head, node) {
                return;
            }

            backoff.spin();
        }
    }

    /// Pushes the sub-list formed by `first` and `last` to the head of the
    /// queue.
    ///
    /// # Safety
    ///
    /// `(first, last)` must form the head and the tail of a consecutively
    /// linked sub-list.
    /// Both must be non-null and valid.
    #[inline]
    pub unsafe fn push_many(&self, (first, last): (*mut N, *mut N)) {
        let backoff = Backoff::new();
        loop {
            let head = self.head.load(Ordering::Relaxed);
            N::set_next(last, head);

            if self.cas_head(head, first) {
                return;
            }

            backoff.spin();
        }
    }

    /// Swaps out the first node and leaves the `RawQueue` empty.
    ///
    /// The returned node (if it is non-`null`) effectively owns all following
    /// nodes and can deallocate or mutate them as desired.
    #[inline]
    pub fn take_all(&self) -> *mut N {
        // (QUE:2) this `Acquire` swap synchronizes-with the `Release` CAS in (QUE:1)
        self.head.swap(ptr::null_mut(), Ordering::Acquire)
    }

    /// Removes and returns the first node or `null`, if the queue is empty.
    ///
    /// The entire list is taken with a single swap and all nodes but the
    /// first are re-inserted, since a plain CAS pop over recycled nodes would
    /// be vulnerable to the ABA problem.
    /// The returned node's own next pointer is left unchanged and must be
    /// re-initialized by the caller.
    #[inline]
    pub fn take_one(&self) -> *mut N {
        let head = self.take_all();
        if head.is_null() {
            return head;
        }

        unsafe {
            let rest = N::next(head);
            if !rest.is_null() {
                let mut last = rest;
                while !N::next(last).is_null() {
                    last = N::next(last);
                }

                self.push_many((rest, last));
            }
        }

        head
    }

    #[inline]
    fn cas_head(&self, current: *mut N, new: *mut N) -> bool {
        self.head.compare_exchange_weak(current, new, Ordering::Release, Ordering::Relaxed).is_ok()
    }
}
