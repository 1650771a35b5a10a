//! The global state of one memory reclamation instance: the registry of
//! thread records, the block pools and the scan and help-scan procedures.

use core::ptr::{self, NonNull};
use core::sync::atomic::{self, AtomicPtr, AtomicUsize, Ordering};

use crossbeam_utils::Backoff;

use crate::alloc::RawAllocator;
use crate::config::Config;
use crate::hazard::GuardBlock;
use crate::local::{LocalHandle, ThreadRecord};
use crate::os::{self, ThreadId};
use crate::pool::BlockPool;
use crate::queue::RawNode;
use crate::retired::{RetiredBlock, RetiredPtr, RETIRED_BLOCK_CAPACITY};

////////////////////////////////////////////////////////////////////////////////////////////////////
// Smr
////////////////////////////////////////////////////////////////////////////////////////////////////

/// One instance of the dynamic hazard pointer memory reclamation scheme.
///
/// The instance owns the registry of all thread records and both block
/// pools.
/// Threads participate by [attaching][Smr::attach] themselves, which either
/// adopts an abandoned record or creates a new one; records are only ever
/// deallocated when the instance itself is dropped, so the registry grows
/// monotonically up to the maximum number of concurrently attached threads.
///
/// An `Smr` is usually shared process-wide (see the [`default`][crate::default]
/// module), but separate instances are fully independent, which keeps the
/// scheme testable and embeddable.
#[derive(Debug)]
pub struct Smr {
    /// Head of the thread record registry.
    thread_list: AtomicPtr<ThreadRecord>,
    /// The number of inline hazard cells per record.
    initial_hazard_count: usize,
    /// The size of the largest hazard snapshot observed so far, used to
    /// pre-reserve the scan vector.
    last_plist_size: AtomicUsize,
    /// The probe deciding whether a record's owner is still alive.
    is_thread_alive: fn(ThreadId) -> bool,
    alloc: RawAllocator,
    guard_pool: BlockPool<GuardBlock>,
    retired_pool: BlockPool<RetiredBlock>,
}

/********** impl inherent *************************************************************************/

impl Smr {
    /// Creates a new `Smr` instance using the process's global allocator
    /// for all block and record allocations.
    #[inline]
    pub fn new(config: Config) -> Self {
        Self::with_allocator(config, RawAllocator::default())
    }

    /// Creates a new `Smr` instance performing all block and record
    /// allocations through `alloc`.
    pub fn with_allocator(config: Config, alloc: RawAllocator) -> Self {
        Self {
            thread_list: AtomicPtr::new(ptr::null_mut()),
            initial_hazard_count: config.initial_hazard_count,
            last_plist_size: AtomicUsize::new(config.initial_scan_hint()),
            is_thread_alive: config.is_thread_alive,
            alloc,
            guard_pool: BlockPool::new(alloc),
            retired_pool: BlockPool::new(alloc),
        }
    }

    /// Attaches the calling thread and returns the handle representing the
    /// attachment.
    ///
    /// An abandoned record is adopted if possible, otherwise a new record is
    /// created and inserted into the registry.
    #[inline]
    pub fn attach(&self) -> LocalHandle<'_> {
        LocalHandle::new(self, self.attach_record())
    }

    /// The number of records in the registry.
    ///
    /// The count never decreases while the instance is alive and is bounded
    /// by the maximum number of concurrently attached threads observed.
    pub fn thread_record_count(&self) -> usize {
        let mut count = 0;
        let mut curr = self.thread_list.load(Ordering::Acquire);
        while !curr.is_null() {
            count += 1;
            curr = unsafe { (*curr).next.load(Ordering::Relaxed) };
        }

        count
    }

    #[inline]
    pub(crate) fn guard_pool(&self) -> &BlockPool<GuardBlock> {
        &self.guard_pool
    }

    pub(crate) fn attach_record(&self) -> NonNull<ThreadRecord> {
        let tid = os::current_thread_id();

        // try to adopt an unowned record before allocating a new one
        // (REG:2) this `Acquire` load synchronizes-with the `Release` CAS in (REG:1)
        let mut curr = self.thread_list.load(Ordering::Acquire);
        while let Some(record) = unsafe { curr.as_ref() } {
            // (OWN:1) the `AcqRel` CAS transfers over the record's contents
            // from its releasing previous owner
            if record
                .owner
                .compare_exchange(ThreadId::NULL, tid, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                record.free.store(false, Ordering::Release);
                unsafe { self.init_record(record) };
                return NonNull::from(record);
            }

            curr = record.next.load(Ordering::Relaxed);
        }

        // no record could be adopted, create and insert a new one
        let record = ThreadRecord::create(tid, self.initial_hazard_count, &self.alloc);
        unsafe { self.init_record(record.as_ref()) };

        let backoff = Backoff::new();
        let mut head = self.thread_list.load(Ordering::Relaxed);
        loop {
            unsafe { record.as_ref().next.store(head, Ordering::Relaxed) };

            // (REG:1) this `Release` CAS synchronizes-with the `Acquire` loads in (REG:2)
            match self.thread_list.compare_exchange_weak(
                head,
                record.as_ptr(),
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => return record,
                Err(curr) => head = curr,
            }

            backoff.spin();
        }
    }

    /// Detaches the record from its current owner.
    ///
    /// # Safety
    ///
    /// `record` must be owned by the calling thread and no guard acquired
    /// from it may be alive.
    pub(crate) unsafe fn detach(&self, record: NonNull<ThreadRecord>) {
        let rec = record.as_ref();

        rec.hazards.clear();
        self.scan(record);
        self.help_scan(record);

        let retired = &mut *rec.retired();
        if retired.is_empty() {
            retired.fini(&self.retired_pool);
            // (FRE:1) the `Release` store publishes the drained retired
            // array to the `Acquire` load in (FRE:2)
            rec.free.store(true, Ordering::Release);
        } else {
            // keep the non-empty prefix for whoever adopts the record later
            retired.trim_trailing(&self.retired_pool);
        }

        rec.hazards.release_extended(&self.guard_pool);

        // (OWN:2) the `Release` store hands the record over to the `AcqRel`
        // CAS of the next owner in (OWN:1)/(OWN:3)
        rec.owner.store(ThreadId::NULL, Ordering::Release);
    }

    /// Appends `retired` to the record's retired array, reclaiming and/or
    /// growing the array when it is full.
    ///
    /// # Safety
    ///
    /// `record` must be owned by the calling thread.
    pub(crate) unsafe fn retire(&self, record: NonNull<ThreadRecord>, retired: RetiredPtr) {
        let retired = match (*record.as_ref().retired()).push(retired) {
            Ok(()) => return,
            Err(retired) => retired,
        };

        self.scan(record);

        let retired = match (*record.as_ref().retired()).push(retired) {
            Ok(()) => return,
            Err(retired) => retired,
        };

        let array = &mut *record.as_ref().retired();
        array.extend(&self.retired_pool);
        array.safe_push(retired);
    }

    /// Reclaims every retired pointer of `record` that is not protected by
    /// any thread's hazard cells.
    ///
    /// # Safety
    ///
    /// `record` must be owned by the calling thread.
    pub(crate) unsafe fn scan(&self, record: NonNull<ThreadRecord>) {
        // Stage 1: snapshot the hazard cells of every attached thread
        let hint = self.last_plist_size.load(Ordering::Relaxed);
        let mut plist: Vec<usize> = Vec::with_capacity(hint);

        // (SMR:1) this `SeqCst` fence forms a total order with the `SeqCst`
        // hazard publications in (HZD:1): every cell armed before the fence
        // is observed by the relaxed loads below
        atomic::fence(Ordering::SeqCst);

        // (REG:2)
        let mut curr = self.thread_list.load(Ordering::Acquire);
        while let Some(rec) = curr.as_ref() {
            // records acquired after the fence are skipped: their hazards
            // can only protect pointers that are still reachable and hence
            // not yet retired
            if !rec.owner.load(Ordering::Relaxed).is_null() {
                let hazards = rec.hazards.iter().filter_map(|h| h.protected(Ordering::Relaxed));
                plist.extend(hazards.map(|protected| protected.as_ptr() as usize));
            }

            curr = rec.next.load(Ordering::Relaxed);
        }

        // remember the snapshot size; the hint is best-effort, losing a race
        // against another scanning thread is acceptable
        if plist.len() > hint {
            let _ = self.last_plist_size.compare_exchange_weak(
                hint,
                plist.len(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            );
        }

        plist.sort_unstable();

        // Stage 2: re-examine the retired pointers, rewinding the write
        // cursor and compacting the still protected ones in place
        let array = &mut *record.as_ref().retired();
        let (last_block, last_index) = (array.current_block, array.current_index);
        array.current_block = array.list_head;
        array.current_index = 0;

        let mut freed = 0;
        let mut block = array.list_head;
        loop {
            let end = if block == last_block { last_index } else { RETIRED_BLOCK_CAPACITY };
            for idx in 0..end {
                let retired = RetiredBlock::read(block, idx);
                if plist.binary_search(&retired.address()).is_ok() {
                    array.safe_push(retired);
                } else {
                    retired.free();
                    freed += 1;
                }
            }

            if block == last_block {
                break;
            }

            block = RetiredBlock::next(block);
        }

        // nothing was reclaimable and the array is completely full: grow it
        // so the next retire does not immediately re-enter scan
        if freed == 0 && last_block == array.list_tail && last_index == RETIRED_BLOCK_CAPACITY {
            array.extend(&self.retired_pool);
        }
    }

    /// Adopts the retired pointers of every record whose owner has detached
    /// or terminated and reclaims them on its behalf.
    ///
    /// # Safety
    ///
    /// `record` must be owned by the calling thread.
    pub(crate) unsafe fn help_scan(&self, record: NonNull<ThreadRecord>) {
        debug_assert!(!record.as_ref().owner.load(Ordering::Relaxed).is_null());
        let tid = os::current_thread_id();

        // (REG:2)
        let mut curr = self.thread_list.load(Ordering::Acquire);
        while let Some(rec) = curr.as_ref() {
            let next = rec.next.load(Ordering::Relaxed);

            if ptr::eq(rec, record.as_ptr()) {
                curr = next;
                continue;
            }

            // (FRE:2) free records are known to have empty retired arrays
            if rec.free.load(Ordering::Acquire) {
                curr = next;
                continue;
            }

            let owner = rec.owner.load(Ordering::Relaxed);
            if !owner.is_null() && (self.is_thread_alive)(owner) {
                curr = next;
                continue;
            }

            // (OWN:3) transiently take over the abandoned record; several
            // threads may attempt this concurrently for the same record
            if rec.owner.compare_exchange(owner, tid, Ordering::AcqRel, Ordering::Relaxed).is_err()
            {
                curr = next;
                continue;
            }

            // move the stolen retired pointers into the caller's own array;
            // the abandoned hazard cells are deliberately left untouched: a
            // crashed owner's armed cells must keep protecting their targets
            let src = &mut *rec.retired();
            let (last_block, last_index) = (src.current_block, src.current_index);

            let mut block = src.list_head;
            loop {
                let end = if block == last_block { last_index } else { RETIRED_BLOCK_CAPACITY };
                for idx in 0..end {
                    self.retire(record, RetiredBlock::read(block, idx));
                }

                if block == last_block {
                    break;
                }

                block = RetiredBlock::next(block);
            }

            src.fini(&self.retired_pool);
            rec.free.store(true, Ordering::Relaxed);
            // (OWN:2)
            rec.owner.store(ThreadId::NULL, Ordering::Release);

            curr = next;
        }

        self.scan(record);
    }

    /// Detaches every record that is still owned, reclaiming or adopting
    /// its retired pointers.
    ///
    /// # Safety
    ///
    /// No other thread may use the instance concurrently or afterwards; the
    /// probe configured with [`is_thread_alive`][crate::ConfigBuilder::is_thread_alive]
    /// decides whether seemingly owned records may be recovered.
    pub unsafe fn detach_all(&self) {
        let mut curr = self.thread_list.load(Ordering::Acquire);
        while let Some(rec) = curr.as_ref() {
            let next = rec.next.load(Ordering::Relaxed);
            if !rec.owner.load(Ordering::Relaxed).is_null() {
                self.detach(NonNull::from(rec));
            }

            curr = next;
        }
    }

    pub(crate) fn allocator(&self) -> RawAllocator {
        self.alloc
    }

    /// Initializes the (new or adopted) record's hazard free list and
    /// retired array.
    unsafe fn init_record(&self, record: &ThreadRecord) {
        record.hazards.init();
        (*record.retired()).init(&self.retired_pool);
    }
}

/********** impl Drop *****************************************************************************/

impl Drop for Smr {
    fn drop(&mut self) {
        let mut curr = *self.thread_list.get_mut();
        while !curr.is_null() {
            unsafe {
                let record = &*curr;
                let next = record.next.load(Ordering::Relaxed);

                // free all pending retired pointers in retirement order
                let array = &mut *record.retired();
                if !array.list_head.is_null() {
                    let mut block = array.list_head;
                    loop {
                        let end = if block == array.current_block {
                            array.current_index
                        } else {
                            RETIRED_BLOCK_CAPACITY
                        };
                        for idx in 0..end {
                            RetiredBlock::read(block, idx).free();
                        }

                        if block == array.current_block {
                            break;
                        }

                        block = RetiredBlock::next(block);
                    }

                    array.current_block = array.list_head;
                    array.current_index = 0;
                    array.release_all(&self.retired_pool);
                }

                record.hazards.clear();
                record.hazards.release_extended(&self.guard_pool);
                record.free.store(true, Ordering::Relaxed);

                ThreadRecord::destroy(
                    NonNull::new_unchecked(curr),
                    self.initial_hazard_count,
                    &self.alloc,
                );

                curr = next;
            }
        }

        // both block pools are drained by their own destructors
    }
}

/********** impl Default **************************************************************************/

impl Default for Smr {
    #[inline]
    fn default() -> Self {
        Self::new(Config::default())
    }
}
