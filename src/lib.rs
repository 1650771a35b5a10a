//! Dynamic hazard pointer (DHP) based concurrent memory reclamation.
//!
//! # Hazard Pointers
//!
//! Whenever a thread reads a pointer to a shared record it has to publish
//! that pointer in one of its hazard cells before the record can be safely
//! dereferenced.
//! Records that are unlinked from a data structure are not deallocated but
//! *retired*, and a retired record is only freed once no hazard cell of any
//! thread protects it anymore.
//!
//! # Dynamic Arrays
//!
//! Unlike the classical scheme with a fixed number of hazard pointers per
//! thread, every thread owns a dynamically growable hazard array: a number
//! of cells allocated inline with the thread's record plus an arbitrary
//! number of pool-recycled extension blocks.
//! Retired pointers are likewise stored in pool-recycled blocks, so neither
//! the number of guards nor the number of retired records per thread is
//! bounded up front.
//!
//! # Reclamation
//!
//! A thread whose retired list fills up *scans*: it snapshots every
//! attached thread's hazard cells and frees all of its own retired pointers
//! that do not appear in the snapshot.
//! A detaching thread additionally *help-scans*, adopting the leftover
//! retired pointers of threads that have detached or terminated earlier, so
//! reclamation can never be stalled indefinitely by an exited thread.
//!
//! # Instances
//!
//! All state belongs to an [`Smr`] instance.
//! Most applications use a single process-wide instance through the
//! [`default`] module's explicit `construct`/`destruct` lifecycle, but
//! separate instances are fully independent and can be embedded and torn
//! down individually.

mod alloc;
mod config;
mod global;
mod guard;
mod hazard;
mod local;
mod os;
mod pool;
mod queue;
mod retired;

pub mod default;

#[cfg(test)]
mod tests;

pub use crate::alloc::RawAllocator;
pub use crate::config::{Config, ConfigBuilder};
pub use crate::global::Smr;
pub use crate::guard::Guard;
pub use crate::local::LocalHandle;
pub use crate::os::{current_thread_id, ThreadId};
pub use crate::retired::RetiredPtr;
