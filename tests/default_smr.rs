//! Lifecycle test for the process-wide default instance.
//!
//! All steps live in a single test function because the default instance is
//! shared process state and the harness runs tests concurrently.

use std::alloc::Layout;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use dhp::{default, RetiredPtr};

static ALLOCATED: AtomicUsize = AtomicUsize::new(0);
static DEALLOCATED: AtomicUsize = AtomicUsize::new(0);
static FREED: AtomicUsize = AtomicUsize::new(0);

unsafe fn counting_alloc(layout: Layout) -> *mut u8 {
    ALLOCATED.fetch_add(1, Ordering::Relaxed);
    std::alloc::alloc(layout)
}

unsafe fn counting_dealloc(ptr: *mut u8, layout: Layout) {
    DEALLOCATED.fetch_add(1, Ordering::Relaxed);
    std::alloc::dealloc(ptr, layout);
}

unsafe fn count_free(_: *mut (), _: *mut ()) {
    FREED.fetch_add(1, Ordering::Relaxed);
}

#[test]
fn default_instance_lifecycle() {
    const THREADS: usize = 8;
    const RETIRES: usize = 32;

    default::set_memory_allocator(counting_alloc, counting_dealloc);
    default::construct(32);
    // construction is idempotent
    default::construct(64);

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            thread::spawn(|| {
                default::attach_thread();
                // attaching twice is fine
                default::attach_thread();

                let records: Vec<_> =
                    (0..RETIRES).map(|value| Box::into_raw(Box::new(value))).collect();

                {
                    let guard = default::guard();
                    for record in &records {
                        guard.set(std::ptr::NonNull::new(*record).unwrap());
                        default::retire(unsafe {
                            RetiredPtr::new(
                                *record as *mut (),
                                count_free,
                                std::ptr::null_mut(),
                            )
                        });
                    }
                    default::scan();
                }

                for record in records {
                    // count_free does not drop, the box is still live here
                    drop(unsafe { Box::from_raw(record) });
                }

                unsafe { default::detach_thread() };
                // detaching twice is fine as well
                unsafe { default::detach_thread() };
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    unsafe { default::destruct(true) };
    // destruction is idempotent
    unsafe { default::destruct(true) };

    assert_eq!(FREED.load(Ordering::Relaxed), THREADS * RETIRES);
    assert_eq!(
        ALLOCATED.load(Ordering::Relaxed),
        DEALLOCATED.load(Ordering::Relaxed),
        "teardown must return every raw allocation"
    );
    assert!(ALLOCATED.load(Ordering::Relaxed) > 0);
}
