//! Storage for retired pointers until they can be safely freed.
//!
//! Retired pointers are kept in fixed-size, pool-recycled blocks forming a
//! per-thread singly-linked list.
//! The list is only ever accessed by the record's current owner (or by a
//! help-scanning thread that has taken over ownership), so all cursor state
//! is plain data.

use core::mem::MaybeUninit;
use core::ptr::{self, NonNull};

use crate::pool::{Block, BlockPool};
use crate::queue::RawNode;

/// The number of retired pointers per block.
pub(crate) const RETIRED_BLOCK_CAPACITY: usize = 256;

////////////////////////////////////////////////////////////////////////////////////////////////////
// RetiredPtr
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A pointer that has been handed over for deferred reclamation, together
/// with the callable that eventually frees it.
///
/// The deleter is a plain function pointer with an opaque context argument,
/// which keeps the in-block representation compact and free of dynamic
/// dispatch.
#[derive(Debug)]
pub struct RetiredPtr {
    ptr: *mut (),
    deleter: unsafe fn(*mut (), *mut ()),
    context: *mut (),
}

/********** impl inherent *************************************************************************/

impl RetiredPtr {
    /// Creates a new `RetiredPtr` from the given raw parts.
    ///
    /// # Safety
    ///
    /// `ptr` must point at a live object that has been unlinked from every
    /// shared location and is never retired a second time.
    /// Calling `deleter(ptr, context)` once all hazards on `ptr` are gone
    /// must be sound; the deleter must neither fail nor call back into the
    /// memory reclamation instance.
    #[inline]
    pub unsafe fn new(
        ptr: *mut (),
        deleter: unsafe fn(*mut (), *mut ()),
        context: *mut (),
    ) -> Self {
        Self { ptr, deleter, context }
    }

    /// Creates a new `RetiredPtr` that drops and deallocates the boxed
    /// record.
    ///
    /// # Safety
    ///
    /// The same restrictions as for [`new`][RetiredPtr::new] apply.
    /// Additionally, since the record is dropped at an unspecified later
    /// time, its `Drop` implementation must not access any non-static
    /// references.
    #[inline]
    pub unsafe fn from_box<T>(boxed: Box<T>) -> Self {
        unsafe fn drop_boxed<T>(ptr: *mut (), _: *mut ()) {
            drop(Box::from_raw(ptr as *mut T));
        }

        Self::new(Box::into_raw(boxed) as *mut (), drop_boxed::<T>, ptr::null_mut())
    }

    /// Returns the memory address of the retired pointer.
    #[inline]
    pub fn address(&self) -> usize {
        self.ptr as usize
    }

    /// Invokes the deleter on the retired pointer.
    ///
    /// # Safety
    ///
    /// Must only be called once no hazard cell protects the pointer anymore
    /// and no subsequent snapshot can observe it.
    #[inline]
    pub(crate) unsafe fn free(self) {
        (self.deleter)(self.ptr, self.context);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// RetiredBlock
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A pool-recycled block of retired pointer slots.
///
/// Blocks are exclusively owned and only ever accessed through raw
/// pointers; the cells before the owning array's write cursor are
/// initialized.
pub(crate) struct RetiredBlock {
    next: *mut RetiredBlock,
    cells: [MaybeUninit<RetiredPtr>; RETIRED_BLOCK_CAPACITY],
}

/********** impl inherent *************************************************************************/

impl RetiredBlock {
    /// Writes `retired` into the slot at `idx`.
    ///
    /// # Safety
    ///
    /// `block` must be valid, `idx` must be within bounds and the slot's
    /// previous content (if any) must already have been moved out.
    #[inline]
    pub unsafe fn write(block: *mut Self, idx: usize, retired: RetiredPtr) {
        debug_assert!(idx < RETIRED_BLOCK_CAPACITY);
        ptr::addr_of_mut!((*block).cells).cast::<RetiredPtr>().add(idx).write(retired);
    }

    /// Moves the retired pointer out of the slot at `idx`.
    ///
    /// # Safety
    ///
    /// `block` must be valid and the slot at `idx` must have been written
    /// and not yet moved out.
    #[inline]
    pub unsafe fn read(block: *mut Self, idx: usize) -> RetiredPtr {
        debug_assert!(idx < RETIRED_BLOCK_CAPACITY);
        ptr::addr_of!((*block).cells).cast::<RetiredPtr>().add(idx).read()
    }
}

/********** impl RawNode **************************************************************************/

impl RawNode for RetiredBlock {
    #[inline]
    unsafe fn next(block: *mut Self) -> *mut Self {
        (*block).next
    }

    #[inline]
    unsafe fn set_next(block: *mut Self, next: *mut Self) {
        (*block).next = next;
    }
}

/********** impl Block ****************************************************************************/

impl Block for RetiredBlock {
    unsafe fn init(block: *mut Self) {
        // the slots themselves require no initialization
        ptr::addr_of_mut!((*block).next).write(ptr::null_mut());
    }

    unsafe fn prime(block: *mut Self) {
        Self::set_next(block, ptr::null_mut());
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// RetiredArray
////////////////////////////////////////////////////////////////////////////////////////////////////

/// One thread record's list of retired pointers awaiting reclamation.
///
/// The retired pointers are the cells from the head block's first slot up
/// to (exclusively) the write cursor at `current_block`/`current_index`.
/// The cursor is rewound and re-advanced in place during a scan's
/// compaction pass, which is why the cursor fields are directly accessible
/// within the crate.
#[derive(Debug)]
pub(crate) struct RetiredArray {
    pub list_head: *mut RetiredBlock,
    pub list_tail: *mut RetiredBlock,
    pub current_block: *mut RetiredBlock,
    pub current_index: usize,
    pub block_count: usize,
}

/********** impl inherent *************************************************************************/

impl RetiredArray {
    #[inline]
    pub fn new() -> Self {
        Self {
            list_head: ptr::null_mut(),
            list_tail: ptr::null_mut(),
            current_block: ptr::null_mut(),
            current_index: 0,
            block_count: 0,
        }
    }

    /// Ensures the array has its head block.
    ///
    /// Re-attaching to a previously abandoned record keeps both the head
    /// block and any still pending retired pointers.
    #[inline]
    pub fn init(&mut self, pool: &BlockPool<RetiredBlock>) {
        if self.list_head.is_null() {
            let block = pool.get().as_ptr();
            self.list_head = block;
            self.list_tail = block;
            self.current_block = block;
            self.current_index = 0;
            self.block_count = 1;
        }
    }

    /// Returns `true` if the array contains no retired pointers.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.current_block == self.list_head && self.current_index == 0
    }

    /// Appends `retired` at the write cursor.
    ///
    /// Fails and returns the value back when the tail block is full; the
    /// caller must scan and/or [`extend`][RetiredArray::extend] before
    /// retrying.
    #[inline]
    pub fn push(&mut self, retired: RetiredPtr) -> Result<(), RetiredPtr> {
        if self.current_index == RETIRED_BLOCK_CAPACITY {
            // the cursor is parked at the end of a full tail block
            return Err(retired);
        }

        unsafe { RetiredBlock::write(self.current_block, self.current_index, retired) };
        self.current_index += 1;

        if self.current_index == RETIRED_BLOCK_CAPACITY {
            let next = unsafe { RetiredBlock::next(self.current_block) };
            if !next.is_null() {
                self.current_block = next;
                self.current_index = 0;
            }
        }

        Ok(())
    }

    /// Appends `retired` at the write cursor, which must have room.
    ///
    /// # Panics
    ///
    /// Panics if the array is full; used during in-place compaction, where
    /// the write cursor can never overtake the read position.
    #[inline]
    pub fn safe_push(&mut self, retired: RetiredPtr) {
        if self.push(retired).is_err() {
            panic!("retired array overflow during compaction");
        }
    }

    /// Appends a fresh empty block at the tail.
    #[inline]
    pub fn extend(&mut self, pool: &BlockPool<RetiredBlock>) {
        let block = pool.get().as_ptr();
        unsafe { RetiredBlock::set_next(self.list_tail, block) };
        self.list_tail = block;
        self.block_count += 1;

        // un-park the cursor if it sat at the end of the previously full tail
        if self.current_index == RETIRED_BLOCK_CAPACITY {
            self.current_block = block;
            self.current_index = 0;
        }
    }

    /// Returns every block except the head to `pool` and rewinds the write
    /// cursor.
    ///
    /// All retired pointers must have been moved out beforehand.
    pub fn fini(&mut self, pool: &BlockPool<RetiredBlock>) {
        debug_assert!(self.block_count > 0);
        let mut block = unsafe { RetiredBlock::next(self.list_head) };
        unsafe { RetiredBlock::set_next(self.list_head, ptr::null_mut()) };

        while !block.is_null() {
            unsafe {
                let next = RetiredBlock::next(block);
                pool.put(NonNull::new_unchecked(block));
                block = next;
            }
        }

        self.list_tail = self.list_head;
        self.current_block = self.list_head;
        self.current_index = 0;
        self.block_count = 1;
    }

    /// Returns the empty blocks trailing the write cursor to `pool`.
    ///
    /// Used when a thread detaches while some of its retired pointers are
    /// still protected: the non-empty prefix is kept for whichever thread
    /// adopts the record later.
    pub fn trim_trailing(&mut self, pool: &BlockPool<RetiredBlock>) {
        let mut block = unsafe { RetiredBlock::next(self.current_block) };
        unsafe { RetiredBlock::set_next(self.current_block, ptr::null_mut()) };

        while !block.is_null() {
            unsafe {
                let next = RetiredBlock::next(block);
                pool.put(NonNull::new_unchecked(block));
                block = next;
            }

            self.block_count -= 1;
        }

        self.list_tail = self.current_block;
    }

    /// Returns all blocks, including the head, to `pool`.
    ///
    /// All retired pointers must have been moved out beforehand; the array
    /// is unusable until the next [`init`][RetiredArray::init].
    pub fn release_all(&mut self, pool: &BlockPool<RetiredBlock>) {
        self.fini(pool);
        unsafe { pool.put(NonNull::new_unchecked(self.list_head)) };

        self.list_head = ptr::null_mut();
        self.list_tail = ptr::null_mut();
        self.current_block = ptr::null_mut();
        self.current_index = 0;
        self.block_count = 0;
    }
}
