//! Chained table behind striped locks: one singly-linked chain per bucket,
//! new items prepended at the head.
//!
//! A single hash function places each key; the stripe lock covering the
//! bucket serialises every chain access, so nodes carry plain fields and are
//! freed only when their table is dropped.

use crate::sync::{AtomicBool, AtomicPtr, AtomicU64, Ordering};
use crate::table::locks::StripeLocks;
use crate::table::{hash1, initial_locks, Backend, INVALID_KEY, INVALID_VALUE, MAX_CHAIN_SIZE};
use crate::worker::WorkerCtx;
use std::ptr;

struct Node {
    key: u64,
    value: u64,
    next: *mut Node,
}

struct Table {
    buckets: Box<[AtomicPtr<Node>]>,
    locks: StripeLocks,
    num_items: AtomicU64,
}

impl Table {
    fn new(num_buckets: usize, num_locks: usize) -> Table {
        Table {
            buckets: (0..num_buckets).map(|_| AtomicPtr::new(ptr::null_mut())).collect(),
            locks: StripeLocks::new(num_locks),
            num_items: AtomicU64::new(0),
        }
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        for head in self.buckets.iter() {
            let mut curr = head.load(Ordering::Relaxed);
            while !curr.is_null() {
                // SAFETY: nodes are created by `Box::into_raw` and reachable
                // from exactly one chain; dropping the table is the only
                // place they are freed.
                let node = unsafe { Box::from_raw(curr) };
                curr = node.next;
            }
        }
    }
}

/// Chained store behind striped locks.
pub struct ChainedStore {
    table: AtomicPtr<Table>,
    next: AtomicPtr<Table>,
    resize_needed: AtomicBool,
    resize_enabled: bool,
}

impl ChainedStore {
    pub fn new(initial_buckets: usize, resize_enabled: bool) -> Self {
        let table = Table::new(initial_buckets, initial_locks(initial_buckets));
        ChainedStore {
            table: AtomicPtr::new(Box::into_raw(Box::new(table))),
            next: AtomicPtr::new(ptr::null_mut()),
            resize_needed: AtomicBool::new(false),
            resize_enabled,
        }
    }

    /// Items in the table.
    pub fn len(&self) -> usize {
        self.current().num_items.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn current(&self) -> &Table {
        // SAFETY: the handle is swapped and the old table freed only by the
        // resize coordinator, which runs while every worker is parked at a
        // barrier; no operation holds this reference across a resize.
        unsafe { &*self.table.load(Ordering::Acquire) }
    }

    /// Prepend without the duplicate scan or depth gate: a rebuild visits
    /// each key exactly once.
    fn rebuild_insert(table: &Table, key: u64, value: u64) {
        let bucket = hash1(key, table.buckets.len());
        let _guard = table.locks.lock(bucket);

        let head = table.buckets[bucket].load(Ordering::Relaxed);
        let node = Box::into_raw(Box::new(Node { key, value, next: head }));
        table.buckets[bucket].store(node, Ordering::Release);
    }
}

impl Backend for ChainedStore {
    fn lookup(&self, key: u64) -> u64 {
        if key == INVALID_KEY {
            return INVALID_VALUE;
        }

        let table = self.current();
        let bucket = hash1(key, table.buckets.len());
        let _guard = table.locks.lock(bucket);

        let mut curr = table.buckets[bucket].load(Ordering::Relaxed);
        while !curr.is_null() {
            // SAFETY: the stripe lock serialises every access to this chain.
            let node = unsafe { &*curr };
            if node.key == key {
                return node.value;
            }
            curr = node.next;
        }

        INVALID_VALUE
    }

    fn insert(&self, _ctx: &mut WorkerCtx, key: u64, value: u64) {
        if key == INVALID_KEY || value == INVALID_VALUE {
            return;
        }

        let table = self.current();
        let bucket = hash1(key, table.buckets.len());
        let depth;
        {
            let _guard = table.locks.lock(bucket);

            let head = table.buckets[bucket].load(Ordering::Relaxed);
            let mut curr = head;
            let mut walked = 0;
            while !curr.is_null() {
                // SAFETY: the stripe lock serialises every access to this
                // chain, including this in-place overwrite.
                let node = unsafe { &mut *curr };
                if node.key == key {
                    node.value = value;
                    return;
                }
                walked += 1;
                curr = node.next;
            }

            let node = Box::into_raw(Box::new(Node { key, value, next: head }));
            table.buckets[bucket].store(node, Ordering::Release);
            depth = walked;
        }

        table.num_items.fetch_add(1, Ordering::Relaxed);

        if self.resize_enabled
            && depth >= MAX_CHAIN_SIZE
            && !self.resize_needed.load(Ordering::Relaxed)
        {
            self.resize_needed.store(true, Ordering::Release);
        }
    }

    fn resize_needed(&self) -> bool {
        self.resize_needed.load(Ordering::Acquire)
    }

    fn begin_resize(&self) {
        let old = self.current();
        let doubled = Table::new(old.buckets.len() * 2, old.locks.len() * 2);
        doubled.num_items.store(old.num_items.load(Ordering::Relaxed), Ordering::Relaxed);
        log::info!("chained resize: {} -> {} buckets", old.buckets.len(), old.buckets.len() * 2);
        self.next.store(Box::into_raw(Box::new(doubled)), Ordering::Release);
    }

    fn rebuild_range(&self, ctx: &mut WorkerCtx, num_workers: usize) {
        let old = self.current();
        // SAFETY: `next` was published by `begin_resize` before the rebuild
        // barrier and is not retired until every worker has left this phase.
        let new = unsafe { &*self.next.load(Ordering::Acquire) };

        let mut bucket = ctx.id();
        while bucket < old.buckets.len() {
            let mut curr = old.buckets[bucket].load(Ordering::Relaxed);
            while !curr.is_null() {
                // SAFETY: the old table is quiescent; this worker owns the
                // bucket range it is walking.
                let node = unsafe { &*curr };
                Self::rebuild_insert(new, node.key, node.value);
                curr = node.next;
            }
            bucket += num_workers;
        }
    }

    fn finish_resize(&self, _ctx: &mut WorkerCtx) {
        let next = self.next.swap(ptr::null_mut(), Ordering::AcqRel);
        let old = self.table.swap(next, Ordering::AcqRel);
        self.resize_needed.store(false, Ordering::Release);
        // SAFETY: every worker is parked at the coordinator barrier; nothing
        // can still reference the retired table.
        unsafe { drop(Box::from_raw(old)) };
    }
}

impl Drop for ChainedStore {
    fn drop(&mut self) {
        let table = self.table.load(Ordering::Relaxed);
        if !table.is_null() {
            unsafe { drop(Box::from_raw(table)) };
        }
        let next = self.next.load(Ordering::Relaxed);
        if !next.is_null() {
            unsafe { drop(Box::from_raw(next)) };
        }
    }
}
