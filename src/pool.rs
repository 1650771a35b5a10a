//! Free-list pools recycling fixed-size blocks across threads.

use core::fmt;
use core::ptr::NonNull;

use crate::alloc::RawAllocator;
use crate::queue::{RawNode, RawQueue};

////////////////////////////////////////////////////////////////////////////////////////////////////
// Block (trait)
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A trait for fixed-size block types that can be recycled through a
/// [`BlockPool`].
pub(crate) trait Block: RawNode + Sized {
    /// Initializes the freshly allocated block at `block`.
    ///
    /// # Safety
    ///
    /// `block` must point at uninitialized memory suitable for a `Self` and
    /// must not be shared with any other thread yet.
    unsafe fn init(block: *mut Self);

    /// Re-primes the previously used block at `block` for hand-out.
    ///
    /// # Safety
    ///
    /// `block` must point at an initialized block that is owned exclusively
    /// by the calling thread.
    unsafe fn prime(block: *mut Self);
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// BlockPool
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A lock-free pool of re-usable blocks.
///
/// Blocks returned to the pool are kept in an intrusive free list and are
/// only deallocated (through the pool's raw allocator) when the pool itself
/// is dropped.
pub(crate) struct BlockPool<B: RawNode> {
    free_list: RawQueue<B>,
    alloc: RawAllocator,
}

/********** impl Debug ****************************************************************************/

impl<B: RawNode> fmt::Debug for BlockPool<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPool").field("is_empty", &self.free_list.is_empty()).finish()
    }
}

/********** impl inherent *************************************************************************/

impl<B: Block> BlockPool<B> {
    #[inline]
    pub fn new(alloc: RawAllocator) -> Self {
        Self { free_list: RawQueue::new(), alloc }
    }

    /// Takes a primed block from the pool, allocating a fresh one if the
    /// free list is empty.
    #[inline]
    pub fn get(&self) -> NonNull<B> {
        match NonNull::new(self.free_list.take_one()) {
            Some(block) => {
                unsafe { B::prime(block.as_ptr()) };
                block
            }
            None => {
                let block = self.alloc.allocate_one::<B>();
                unsafe {
                    B::init(block.as_ptr());
                    B::prime(block.as_ptr());
                }

                block
            }
        }
    }

    /// Returns `block` to the pool for later reuse.
    ///
    /// # Safety
    ///
    /// `block` must have been acquired from the same pool and must not be
    /// referenced by its previous owner anymore.
    #[inline]
    pub unsafe fn put(&self, block: NonNull<B>) {
        self.free_list.push(block.as_ptr());
    }
}

/********** impl Drop *****************************************************************************/

impl<B: RawNode> Drop for BlockPool<B> {
    #[inline(never)]
    fn drop(&mut self) {
        let mut curr = self.free_list.take_all();
        while !curr.is_null() {
            unsafe {
                let next = B::next(curr);
                self.alloc.deallocate_one(NonNull::new_unchecked(curr));
                curr = next;
            }
        }
    }
}
