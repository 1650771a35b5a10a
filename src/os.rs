//! Thread identity for thread record ownership.
//!
//! Records in the global registry are owned through process-unique thread
//! ids with a reserved null sentinel.
//! The standard library neither exposes a stable integral thread id nor any
//! way to probe whether an arbitrary thread is still alive, so ids are
//! assigned from a process-wide counter on first use and liveness probing
//! is delegated to an injectable probe function (see
//! [`Config`][crate::Config]), which conservatively defaults to reporting
//! every thread as alive.

use core::sync::atomic::{AtomicU64, Ordering};

use std::cell::Cell;

/// The id counter, starting past the null sentinel.
static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

////////////////////////////////////////////////////////////////////////////////////////////////////
// ThreadId
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An opaque, process-unique identifier for an OS thread.
///
/// Ids are never reused during the lifetime of the process.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ThreadId(u64);

/********** impl inherent *************************************************************************/

impl ThreadId {
    /// The reserved sentinel id that is never assigned to any thread.
    pub const NULL: Self = Self(0);

    /// Returns `true` if the id is the reserved null sentinel.
    #[inline]
    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

/// Returns the id of the calling thread, assigning one on first use.
#[inline]
pub fn current_thread_id() -> ThreadId {
    std::thread_local!(static ID: Cell<u64> = Cell::new(0));

    ID.with(|id| {
        let mut curr = id.get();
        if curr == 0 {
            curr = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
            id.set(curr);
        }

        ThreadId(curr)
    })
}

/// The conservative liveness probe assuming every thread to be alive.
///
/// With this probe, help-scan only ever recovers records whose owners have
/// explicitly detached.
#[inline]
pub fn assume_thread_alive(_: ThreadId) -> bool {
    true
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// AtomicThreadId
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An atomic memory location holding a [`ThreadId`].
#[derive(Debug)]
pub(crate) struct AtomicThreadId(AtomicU64);

/********** impl inherent *************************************************************************/

impl AtomicThreadId {
    #[inline]
    pub fn new(id: ThreadId) -> Self {
        Self(AtomicU64::new(id.0))
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> ThreadId {
        ThreadId(self.0.load(order))
    }

    #[inline]
    pub fn store(&self, id: ThreadId, order: Ordering) {
        self.0.store(id.0, order);
    }

    #[inline]
    pub fn compare_exchange(
        &self,
        current: ThreadId,
        new: ThreadId,
        success: Ordering,
        failure: Ordering,
    ) -> Result<ThreadId, ThreadId> {
        self.0
            .compare_exchange(current.0, new.0, success, failure)
            .map(ThreadId)
            .map_err(ThreadId)
    }
}
