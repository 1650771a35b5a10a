//! Scenario tests exercising scan, help-scan and the record lifecycle on
//! owned [`Smr`] instances.

use core::ptr::NonNull;

use std::sync::Mutex;

use crate::config::{Config, ConfigBuilder};
use crate::global::Smr;
use crate::hazard::GUARD_BLOCK_CAPACITY;
use crate::retired::{RetiredPtr, RETIRED_BLOCK_CAPACITY};

/// A log of the addresses freed by [`free_into_log`], in deletion order.
#[derive(Debug, Default)]
struct FreedLog(Mutex<Vec<usize>>);

impl FreedLog {
    fn freed(&self) -> Vec<usize> {
        self.0.lock().unwrap().clone()
    }

    fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

unsafe fn free_into_log(ptr: *mut (), context: *mut ()) {
    let log = &*(context as *const FreedLog);
    log.0.lock().unwrap().push(ptr as usize);
    drop(Box::from_raw(ptr as *mut usize));
}

/// Allocates a dummy record and returns its (leaked) address.
fn dummy_record(value: usize) -> NonNull<usize> {
    NonNull::new(Box::into_raw(Box::new(value))).unwrap()
}

fn logged(ptr: NonNull<usize>, log: &FreedLog) -> RetiredPtr {
    unsafe {
        RetiredPtr::new(ptr.as_ptr() as *mut (), free_into_log, log as *const _ as *mut ())
    }
}

#[test]
fn scan_frees_only_unprotected() {
    let log = FreedLog::default();
    let smr = Smr::new(Config::default());
    let local = smr.attach();

    let records: Vec<_> = (0..5).map(dummy_record).collect();
    let guards: Vec<_> = records[..4]
        .iter()
        .map(|record| {
            let guard = local.guard();
            guard.set(*record);
            guard
        })
        .collect();

    for record in &records {
        local.retire(logged(*record, &log));
    }

    // only the unguarded record must be reclaimed
    local.scan();
    assert_eq!(log.freed(), vec![records[4].as_ptr() as usize]);

    // retracting one guard releases exactly its record
    guards[2].release();
    local.scan();
    assert_eq!(log.freed()[1], records[2].as_ptr() as usize);

    // the rest is reclaimed during teardown
    drop(guards);
    drop(local);
    drop(smr);

    let mut freed = log.freed();
    freed.sort_unstable();
    let mut expected: Vec<_> = records.iter().map(|record| record.as_ptr() as usize).collect();
    expected.sort_unstable();
    assert_eq!(freed, expected);
}

#[test]
fn help_scan_recovers_dead_owner_records() {
    const RETIRES: usize = 300;

    let log = FreedLog::default();
    let config = ConfigBuilder::new().is_thread_alive(|_| false).build();
    let smr = Smr::new(config);

    let crashed = smr.attach();
    for value in 0..RETIRES {
        crashed.retire(logged(dummy_record(value), &log));
    }

    // filling the first block triggered exactly one scan, which freed its
    // entire (unprotected) contents
    assert_eq!(log.len(), RETIRED_BLOCK_CAPACITY);

    // simulate owner termination without detaching
    core::mem::forget(crashed);

    // a second thread's detach adopts and reclaims the leftovers
    let helper = smr.attach();
    assert_eq!(smr.thread_record_count(), 2);
    drop(helper);

    assert_eq!(log.len(), RETIRES);
}

#[test]
fn hazard_array_grows_and_reuses_cells() {
    const GUARDS: usize = 50;

    let smr = Smr::new(Config::default());
    let local = smr.attach();
    let record = local.record();
    let hazards = unsafe { &record.as_ref().hazards };

    let guards: Vec<_> = (0..GUARDS).map(|_| local.guard()).collect();
    let grown = (GUARDS - Config::default().initial_hazard_count + GUARD_BLOCK_CAPACITY - 1)
        / GUARD_BLOCK_CAPACITY;
    assert_eq!(hazards.extended_len(), grown);

    // freed cells are handed out again without any further growth
    drop(guards);
    let guards: Vec<_> = (0..GUARDS).map(|_| local.guard()).collect();
    assert_eq!(hazards.extended_len(), grown);

    drop(guards);
}

#[test]
fn scan_back_pressure_extends_instead_of_spinning() {
    const RETIRES: usize = 300;

    let log = FreedLog::default();
    let smr = Smr::new(Config::default());
    let local = smr.attach();

    // every retired record is also hazard-protected, so no amount of
    // scanning can reclaim anything
    let mut guards = Vec::with_capacity(RETIRES);
    for value in 0..RETIRES {
        let record = dummy_record(value);
        let guard = local.guard();
        guard.set(record);
        guards.push(guard);
        local.retire(logged(record, &log));
    }

    let blocks = unsafe { (*local.record().as_ref().retired()).block_count };
    assert_eq!(log.len(), 0, "no protected record may be reclaimed");
    assert_eq!(blocks, 2, "the retired array must have grown under pressure");

    drop(guards);
    local.scan();
    assert_eq!(log.len(), RETIRES);
}

#[test]
fn detached_records_are_reused() {
    let smr = Smr::new(Config::default());

    let first = smr.attach();
    let record = first.record();
    drop(first);

    let second = smr.attach();
    assert_eq!(second.record(), record, "the clean record must be adopted");
    assert_eq!(smr.thread_record_count(), 1);
}

#[test]
fn dirty_records_keep_their_retired_pointers() {
    let log = FreedLog::default();
    let smr = Smr::new(Config::default());

    // two attachments from the same thread create two independent records
    let holder = smr.attach();
    let retirer = smr.attach();
    assert_ne!(holder.record(), retirer.record());
    assert_eq!(smr.thread_record_count(), 2);

    let record = dummy_record(1);
    let guard = holder.guard();
    guard.set(record);

    retirer.retire(logged(record, &log));
    retirer.scan();
    assert_eq!(log.len(), 0);

    // detaching leaves the record dirty: unowned, not free, pointer pending
    let dirty = retirer.record();
    drop(retirer);
    assert_eq!(log.len(), 0);

    // the dirty record is adopted, pending retired pointers and all
    let adopter = smr.attach();
    assert_eq!(adopter.record(), dirty);
    assert_eq!(smr.thread_record_count(), 2);

    guard.release();
    adopter.scan();
    assert_eq!(log.freed(), vec![record.as_ptr() as usize]);
}

#[test]
fn retired_pointers_are_freed_exactly_once() {
    let log = FreedLog::default();
    let smr = Smr::new(Config::default());
    let local = smr.attach();

    let records: Vec<_> = (0..64).map(dummy_record).collect();
    for record in &records {
        local.retire(logged(*record, &log));
    }

    local.scan();
    local.scan();
    drop(local);
    drop(smr);

    let mut freed = log.freed();
    freed.sort_unstable();
    freed.dedup();
    assert_eq!(freed.len(), records.len());
}
