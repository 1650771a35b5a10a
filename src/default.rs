//! The process-wide default instance and its per-thread attachment state.
//!
//! The instance has an explicit lifecycle: [`construct`] must be called
//! before any thread attaches and [`destruct`] only after every thread has
//! detached (or with `detach_all` requested).
//! Attachment is tracked in a thread-local slot holding the calling
//! thread's record, which is the only piece of ambient state besides the
//! instance itself.

use core::alloc::Layout;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, Ordering};

use std::cell::Cell;
use std::sync::RwLock;

use conquer_once::Lazy;

use crate::alloc::RawAllocator;
use crate::config::{Config, ConfigBuilder};
use crate::global::Smr;
use crate::guard::Guard;
use crate::local::ThreadRecord;
use crate::retired::RetiredPtr;

/// The raw allocator staged for the next [`construct`] call.
static ALLOCATOR: Lazy<RwLock<RawAllocator>> = Lazy::new(Default::default);
/// The constructed instance.
static INSTANCE: AtomicPtr<Smr> = AtomicPtr::new(ptr::null_mut());

std::thread_local!(static TLS: Cell<*mut ThreadRecord> = Cell::new(ptr::null_mut()));

/// Installs the raw allocator used by the default instance for every block
/// and record allocation.
///
/// # Panics
///
/// Panics if the default instance is already constructed.
pub fn set_memory_allocator(
    alloc: unsafe fn(Layout) -> *mut u8,
    dealloc: unsafe fn(*mut u8, Layout),
) {
    assert!(
        INSTANCE.load(Ordering::Acquire).is_null(),
        "the memory allocator must be installed before `construct`"
    );

    *ALLOCATOR.write().unwrap() = RawAllocator::new(alloc, dealloc);
}

/// Constructs the default instance with the given number of inline hazard
/// cells per thread record (clamped to at least 16).
///
/// The call is idempotent; only the first construction takes effect.
#[inline]
pub fn construct(initial_hazard_count: usize) {
    construct_with(ConfigBuilder::new().initial_hazard_count(initial_hazard_count).build());
}

/// Constructs the default instance from `config`.
///
/// The call is idempotent; only the first construction takes effect.
pub fn construct_with(config: Config) {
    if !INSTANCE.load(Ordering::Relaxed).is_null() {
        return;
    }

    let alloc = *ALLOCATOR.read().unwrap();
    let smr = alloc.allocate_one::<Smr>();
    unsafe { smr.as_ptr().write(Smr::with_allocator(config, alloc)) };

    // (DEF:1) the `Release` CAS publishes the instance to the `Acquire`
    // loads in (DEF:2)
    if INSTANCE
        .compare_exchange(ptr::null_mut(), smr.as_ptr(), Ordering::Release, Ordering::Relaxed)
        .is_err()
    {
        // lost the construction race, revert the speculative allocation
        unsafe {
            ptr::drop_in_place(smr.as_ptr());
            alloc.deallocate_one(smr);
        }
    }
}

/// Tears down the default instance, freeing every pending retired pointer
/// and deallocating all records and pooled blocks.
///
/// If `detach_all` is given, records still owned at this point are detached
/// first, as if their owners had called [`detach_thread`].
/// The call is idempotent.
///
/// # Safety
///
/// No thread may use the default instance concurrently with or after this
/// call; in particular, every attached thread other than the caller must
/// have detached.
pub unsafe fn destruct(detach_all: bool) {
    TLS.with(|tls| tls.set(ptr::null_mut()));

    // (DEF:2)
    let smr = INSTANCE.swap(ptr::null_mut(), Ordering::Acquire);
    if !smr.is_null() {
        if detach_all {
            (*smr).detach_all();
        }

        let alloc = (*smr).allocator();
        ptr::drop_in_place(smr);
        alloc.deallocate_one(NonNull::new_unchecked(smr));
    }
}

/// Attaches the calling thread to the default instance.
///
/// The call is idempotent; an attached thread remains attached.
///
/// # Panics
///
/// Panics if the default instance is not constructed.
pub fn attach_thread() {
    TLS.with(|tls| {
        if tls.get().is_null() {
            tls.set(instance().attach_record().as_ptr());
        }
    });
}

/// Detaches the calling thread from the default instance.
///
/// The thread's hazards are cleared, its retired pointers are reclaimed or
/// left for adoption by other threads and its record is released for reuse.
/// The call is idempotent and a no-op on threads that never attached.
///
/// # Safety
///
/// No guard acquired by the calling thread may be alive.
pub unsafe fn detach_thread() {
    TLS.with(|tls| {
        let record = tls.get();
        tls.set(ptr::null_mut());
        if !record.is_null() {
            // safe: the record in the slot was attached by this thread
            unsafe { instance().detach(NonNull::new_unchecked(record)) };
        }
    });
}

/// Acquires a [`Guard`] backed by one of the calling thread's hazard cells.
///
/// # Panics
///
/// Panics if the calling thread is not attached.
#[inline]
pub fn guard() -> Guard<'static> {
    let (smr, record) = tls();
    // safe: the record in the thread-local slot is owned by this thread
    let cell = unsafe { record.as_ref().hazards.alloc_guard(smr.guard_pool()) };
    Guard::new(cell, record)
}

/// Hands `retired` over to the default instance for deferred reclamation.
///
/// # Panics
///
/// Panics if the calling thread is not attached.
#[inline]
pub fn retire(retired: RetiredPtr) {
    let (smr, record) = tls();
    unsafe { smr.retire(record, retired) };
}

/// Eagerly reclaims every retired pointer of the calling thread that is not
/// currently protected by any hazard cell.
///
/// # Panics
///
/// Panics if the calling thread is not attached.
#[inline]
pub fn scan() {
    let (smr, record) = tls();
    unsafe { smr.scan(record) };
}

/// Returns the default instance and the calling thread's record.
#[inline]
fn tls() -> (&'static Smr, NonNull<ThreadRecord>) {
    let record = TLS.with(Cell::get);
    assert!(!record.is_null(), "the current thread is not attached");
    (instance(), unsafe { NonNull::new_unchecked(record) })
}

#[inline]
fn instance() -> &'static Smr {
    // (DEF:2)
    let smr = INSTANCE.load(Ordering::Acquire);
    assert!(!smr.is_null(), "the default SMR instance is not constructed");
    unsafe { &*smr }
}
