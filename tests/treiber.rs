//! A Treiber stack built on top of the reclamation scheme, exercising the
//! full protect/retire protocol under contention.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crossbeam_utils::thread;

use dhp::{Config, LocalHandle, RetiredPtr, Smr};

const THREADS: usize = 8;
const PER_THREAD: usize = 1_000;

struct Node {
    value: usize,
    next: *mut Node,
}

struct Stack {
    head: AtomicPtr<Node>,
}

unsafe fn drop_node(ptr: *mut (), context: *mut ()) {
    (*(context as *const AtomicUsize)).fetch_add(1, Ordering::Relaxed);
    drop(Box::from_raw(ptr as *mut Node));
}

impl Stack {
    fn new() -> Self {
        Self { head: AtomicPtr::new(ptr::null_mut()) }
    }

    fn push(&self, value: usize) {
        let node = Box::into_raw(Box::new(Node { value, next: ptr::null_mut() }));
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            unsafe { (*node).next = head };
            match self.head.compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(curr) => head = curr,
            }
        }
    }

    fn pop(&self, local: &LocalHandle<'_>, freed: &AtomicUsize) -> Option<usize> {
        let guard = local.guard();
        loop {
            let head = guard.protect(&self.head, Ordering::Acquire);
            if head.is_null() {
                return None;
            }

            // the guard keeps `head` from being reclaimed, so reading its
            // fields and the un-reused address for the CAS are both sound
            let next = unsafe { (*head).next };
            if self
                .head
                .compare_exchange_weak(head, next, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                let value = unsafe { (*head).value };
                local.retire(unsafe {
                    RetiredPtr::new(head as *mut (), drop_node, freed as *const _ as *mut ())
                });
                return Some(value);
            }
        }
    }
}

#[test]
fn treiber_stack_stress() {
    let freed = AtomicUsize::new(0);
    let popped = AtomicUsize::new(0);
    let smr = Smr::new(Config::default());
    let stack = Stack::new();

    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|_| {
                let local = smr.attach();

                for value in 0..PER_THREAD {
                    stack.push(value);
                    if value % 2 == 0 {
                        if stack.pop(&local, &freed).is_some() {
                            popped.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }
    })
    .unwrap();

    // drain the remainder on the main thread
    let local = smr.attach();
    let mut drained = 0;
    while stack.pop(&local, &freed).is_some() {
        drained += 1;
    }
    drop(local);

    assert_eq!(popped.load(Ordering::Relaxed) + drained, THREADS * PER_THREAD);

    // dropping the instance reclaims whatever is still pending
    drop(smr);
    assert_eq!(freed.load(Ordering::Relaxed), THREADS * PER_THREAD);
}
