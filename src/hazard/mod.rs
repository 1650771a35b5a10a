//! The per-thread hazard cells protecting specific pointers from concurrent
//! reclamation.
//!
//! Each attached thread owns a dynamically growable array of cells, any of
//! which can be armed by storing a pointer into it.
//! Arming and disarming a cell never synchronizes with other owners, only
//! with scanning threads: any scan that does not observe a published pointer
//! is free to reclaim it, so publication must become visible before the
//! protected pointer is dereferenced.

mod array;

use core::cell::UnsafeCell;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, Ordering};

pub(crate) use self::array::{HazardArray, GUARD_BLOCK_CAPACITY, GuardBlock};

////////////////////////////////////////////////////////////////////////////////////////////////////
// HazardPtr
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A single hazard cell, visible to all threads, protecting at most one
/// pointer from reclamation.
#[derive(Debug)]
pub(crate) struct HazardPtr {
    protected: AtomicPtr<()>,
    /// Intrusive link chaining unused cells into the owning thread's free
    /// list; only ever accessed by the record's current owner.
    free_next: UnsafeCell<*mut HazardPtr>,
}

/********** impl Sync *****************************************************************************/

// scanning threads only ever read `protected`, the free list link is
// exclusive to the owning thread
unsafe impl Sync for HazardPtr {}

/********** impl inherent *************************************************************************/

impl HazardPtr {
    #[inline]
    pub fn new() -> Self {
        Self {
            protected: AtomicPtr::new(ptr::null_mut()),
            free_next: UnsafeCell::new(ptr::null_mut()),
        }
    }

    /// Marks the cell as actively protecting the given pointer `protect`.
    ///
    /// # Panics
    ///
    /// Panics if `order` is not `SeqCst`: the subsequent validating re-read
    /// of the protected source must not be reordered before the store.
    #[inline]
    pub fn set_protected(&self, protect: NonNull<()>, order: Ordering) {
        assert_eq!(order, Ordering::SeqCst, "must only be called with `SeqCst`");
        // (HZD:1) this `SeqCst` store forms a total order with the `SeqCst` fence in (SMR:1)
        self.protected.store(protect.as_ptr(), order);
    }

    /// Clears the cell.
    #[inline]
    pub fn clear(&self, order: Ordering) {
        self.protected.store(ptr::null_mut(), order);
    }

    /// Returns the currently protected pointer, if any (scanners only).
    #[inline]
    pub fn protected(&self, order: Ordering) -> Option<NonNull<()>> {
        NonNull::new(self.protected.load(order))
    }

    /// Returns the cell's free list link.
    ///
    /// # Safety
    ///
    /// Must only be called by the thread currently owning the cell's record.
    #[inline]
    pub unsafe fn free_next(&self) -> *mut HazardPtr {
        *self.free_next.get()
    }

    /// Sets the cell's free list link.
    ///
    /// # Safety
    ///
    /// Must only be called by the thread currently owning the cell's record.
    #[inline]
    pub unsafe fn set_free_next(&self, next: *mut HazardPtr) {
        *self.free_next.get() = next;
    }
}

#[cfg(test)]
mod tests {
    use core::ptr::NonNull;
    use core::sync::atomic::Ordering;

    use assert_matches::assert_matches;

    use super::HazardPtr;

    #[test]
    fn protect_and_clear() {
        let value = &mut 1;
        let ptr = NonNull::from(value).cast();

        let hazard = HazardPtr::new();
        assert_matches!(hazard.protected(Ordering::Relaxed), None);

        hazard.set_protected(ptr, Ordering::SeqCst);
        assert_eq!(hazard.protected(Ordering::Relaxed), Some(ptr));

        hazard.clear(Ordering::Release);
        assert_matches!(hazard.protected(Ordering::Relaxed), None);
    }

    #[test]
    #[should_panic]
    fn protect_requires_seq_cst() {
        let hazard = HazardPtr::new();
        hazard.set_protected(NonNull::from(&mut 1).cast(), Ordering::Release);
    }
}
