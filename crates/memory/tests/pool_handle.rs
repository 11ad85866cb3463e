//! Integration tests for pool-backed handles
//!
//! Runs against a counting in-memory pool: entries live in a map keyed by
//! id, frees of unknown ids panic (double-free detection), and every call
//! is tallied so the tests can assert exactly-once semantics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;

use cairn_memory::{pool, DynamicPool, MemoryError, PoolHandle, PoolId};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

/// In-memory stand-in for the engine's dynamic pool.
struct TestPool {
    capacity: usize,
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, usize>>,
    alloc_calls: AtomicUsize,
    free_calls: AtomicUsize,
}

impl TestPool {
    fn leaked(capacity: usize) -> &'static TestPool {
        Box::leak(Box::new(TestPool {
            capacity,
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
            alloc_calls: AtomicUsize::new(0),
            free_calls: AtomicUsize::new(0),
        }))
    }

    fn entry_size(&self, id: PoolId) -> Option<usize> {
        self.entries.lock().get(&id.to_raw()).copied()
    }

    fn live_entries(&self) -> usize {
        self.entries.lock().len()
    }
}

impl DynamicPool for TestPool {
    fn alloc(&self, size: usize, _label: &str) -> PoolId {
        self.alloc_calls.fetch_add(1, Ordering::Relaxed);

        let mut entries = self.entries.lock();
        let used: usize = entries.values().sum();
        if used + size > self.capacity {
            return PoolId::INVALID;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        entries.insert(id, size);
        PoolId::from_raw(id)
    }

    fn realloc(&self, id: PoolId, size: usize) -> PoolId {
        let mut entries = self.entries.lock();
        let old = *entries.get(&id.to_raw()).expect("realloc of unknown pool id");

        let used: usize = entries.values().sum();
        if used - old + size > self.capacity {
            return PoolId::INVALID;
        }
        entries.insert(id.to_raw(), size);
        id
    }

    fn free(&self, id: PoolId) {
        self.free_calls.fetch_add(1, Ordering::Relaxed);
        let removed = self.entries.lock().remove(&id.to_raw());
        assert!(removed.is_some(), "double free of pool id {id:?}");
    }

    fn available_memory(&self) -> usize {
        self.capacity - self.total_usage()
    }

    fn total_usage(&self) -> usize {
        self.entries.lock().values().sum()
    }
}

#[test]
fn fresh_handle_resize_produces_valid_backing() {
    let pool = TestPool::leaked(1 << 20);
    let mut handle = PoolHandle::new_in(pool, PoolId::INVALID);
    assert!(!handle.is_valid());

    handle.resize(128).unwrap();
    assert!(handle.is_valid());
    assert_eq!(pool.entry_size(handle.id()), Some(128));

    // growth keeps the handle valid and never undershoots the request
    handle.resize(4096).unwrap();
    assert!(handle.is_valid());
    assert_eq!(pool.entry_size(handle.id()), Some(4096));

    handle.unref();
    assert_eq!(pool.live_entries(), 0);
}

#[test]
fn resize_to_zero_frees_entry_and_is_idempotent() {
    let pool = TestPool::leaked(1 << 20);
    let mut handle = PoolHandle::new_in(pool, PoolId::INVALID);
    handle.resize(256).unwrap();
    assert_eq!(pool.live_entries(), 1);

    handle.resize(0).unwrap();
    assert!(!handle.is_valid());
    assert_eq!(pool.live_entries(), 0);
    assert_eq!(pool.free_calls.load(Ordering::Relaxed), 1);

    // second resize(0) succeeds and frees nothing further
    handle.resize(0).unwrap();
    assert_eq!(pool.free_calls.load(Ordering::Relaxed), 1);

    // the handle stays reusable after the entry went away
    handle.resize(64).unwrap();
    assert!(handle.is_valid());
    assert_eq!(pool.entry_size(handle.id()), Some(64));
}

#[test]
fn clones_share_one_backing_entry() {
    let pool = TestPool::leaked(1 << 20);
    let mut first = PoolHandle::new_in(pool, PoolId::INVALID);
    first.resize(100).unwrap();

    let second = first.clone();
    assert_eq!(first.id(), second.id());
    assert_eq!(first.ref_count(), 2);

    // a resize through one copy is visible to the other
    first.resize(900).unwrap();
    assert_eq!(second.id(), first.id());
    assert_eq!(pool.entry_size(second.id()), Some(900));
    assert_eq!(pool.alloc_calls.load(Ordering::Relaxed), 1);
}

#[test]
fn two_copies_release_exactly_once() {
    let pool = TestPool::leaked(1 << 20);
    let mut first = PoolHandle::new_in(pool, PoolId::INVALID);
    first.resize(512).unwrap();
    let mut second = first.clone();

    first.unref();
    // entry survives while the second copy is alive
    assert_eq!(pool.live_entries(), 1);
    assert_eq!(pool.free_calls.load(Ordering::Relaxed), 0);

    second.unref();
    assert_eq!(pool.live_entries(), 0);
    assert_eq!(pool.free_calls.load(Ordering::Relaxed), 1);

    // further unrefs on either emptied copy are safe no-ops
    first.unref();
    second.unref();
    assert_eq!(pool.free_calls.load(Ordering::Relaxed), 1);
}

#[test]
fn realloc_requires_backing() {
    let pool = TestPool::leaked(1 << 20);

    let unbacked = PoolHandle::new_in(pool, PoolId::INVALID);
    assert_eq!(
        unbacked.realloc(64),
        Err(MemoryError::invalid_parameter(
            "reallocating an unbacked handle"
        ))
    );

    let mut backed = PoolHandle::new_in(pool, PoolId::INVALID);
    backed.resize(64).unwrap();
    backed.realloc(2048).unwrap();
    assert_eq!(pool.entry_size(backed.id()), Some(2048));
}

#[test]
fn pool_exhaustion_surfaces_out_of_memory() {
    let pool = TestPool::leaked(1024);
    let mut handle = PoolHandle::new_in(pool, PoolId::INVALID);
    handle.resize(512).unwrap();
    let id_before = handle.id();

    let err = handle.resize(4096).unwrap_err();
    assert!(err.is_out_of_memory());
    // the previous entry is untouched after a failed grow
    assert_eq!(handle.id(), id_before);
    assert_eq!(pool.entry_size(handle.id()), Some(512));

    let err = PoolHandle::new_in(pool, PoolId::INVALID)
        .resize(4096)
        .unwrap_err();
    assert!(err.is_out_of_memory());
}

#[test]
fn allocate_constructor_wraps_pool_entry() {
    let pool = TestPool::leaked(1 << 20);

    let handle = PoolHandle::allocate_in(pool, 300, "streamed mesh data");
    assert!(handle.is_valid());
    assert_eq!(pool.entry_size(handle.id()), Some(300));

    // a failed pool allocation still yields a handle, just unbacked
    let exhausted = TestPool::leaked(16);
    let failed = PoolHandle::allocate_in(exhausted, 64, "too big");
    assert!(!failed.is_valid());
}

#[test]
fn global_pool_service() {
    let pool = TestPool::leaked(1 << 20);
    pool::install(pool).unwrap();
    assert!(pool::try_global().is_some());

    // lazy control-block path: empty handle, first non-empty resize binds
    // to the installed pool
    let mut handle = PoolHandle::empty();
    handle.resize(150).unwrap();
    assert!(handle.is_valid());
    assert_eq!(pool::total_usage(), 150);
    assert_eq!(pool::available_memory(), (1 << 20) - 150);

    let labeled = PoolHandle::allocate(50, "global entry");
    assert!(labeled.is_valid());
    assert_eq!(pool::total_usage(), 200);

    // a second install is rejected
    assert!(pool::install(pool).is_err());
}

#[test]
fn concurrent_clone_and_unref_balance() {
    let pool = TestPool::leaked(1 << 20);
    let mut origin = PoolHandle::new_in(pool, PoolId::INVALID);
    origin.resize(64).unwrap();

    let mut workers = Vec::new();
    for _ in 0..8 {
        let seed = origin.clone();
        workers.push(thread::spawn(move || {
            let mut local = Vec::new();
            for _ in 0..1000 {
                local.push(seed.clone());
                if local.len() > 4 {
                    drop(local.remove(0));
                }
            }
            drop(local);
            drop(seed);
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    // every clone is gone; only the origin's reference remains
    assert_eq!(origin.ref_count(), 1);
    assert_eq!(pool.live_entries(), 1);
    assert_eq!(pool.free_calls.load(Ordering::Relaxed), 0);

    origin.unref();
    assert_eq!(pool.live_entries(), 0);
    assert_eq!(pool.free_calls.load(Ordering::Relaxed), 1);
}
