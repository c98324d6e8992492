//! Chained table with no locks.
//!
//! Inserts race on the bucket head with compare-exchange; lookups walk the
//! chain as published and linearise at their load of the head. A prepend
//! that lands ahead of a walking lookup is invisible to that lookup, which
//! is the accepted cost of the lock-free head.
//!
//! Nothing is ever unlinked while workers run: duplicate keys are overwritten
//! through an atomic value cell, and nodes are freed only when their table is
//! dropped. A lookup that has reached a node therefore owes nothing to any
//! reclamation scheme.

use crate::sync::{AtomicBool, AtomicPtr, AtomicU64, Ordering};
use crate::table::{hash1, Backend, INVALID_KEY, INVALID_VALUE, MAX_CHAIN_SIZE};
use crate::worker::WorkerCtx;
use std::ptr;

struct Node {
    key: u64,
    value: AtomicU64,
    next: *mut Node,
}

struct Table {
    buckets: Box<[AtomicPtr<Node>]>,
    num_items: AtomicU64,
}

impl Table {
    fn new(num_buckets: usize) -> Table {
        Table {
            buckets: (0..num_buckets).map(|_| AtomicPtr::new(ptr::null_mut())).collect(),
            num_items: AtomicU64::new(0),
        }
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        for head in self.buckets.iter() {
            let mut curr = head.load(Ordering::Relaxed);
            while !curr.is_null() {
                // SAFETY: nodes reachable from a chain are owned by it; the
                // table being dropped is the only point of reclamation.
                let node = unsafe { Box::from_raw(curr) };
                curr = node.next;
            }
        }
    }
}

/// Chained store with compare-and-swap head updates.
pub struct LockFreeStore {
    table: AtomicPtr<Table>,
    next: AtomicPtr<Table>,
    resize_needed: AtomicBool,
    resize_enabled: bool,
}

impl LockFreeStore {
    pub fn new(initial_buckets: usize, resize_enabled: bool) -> Self {
        LockFreeStore {
            table: AtomicPtr::new(Box::into_raw(Box::new(Table::new(initial_buckets)))),
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

    /// Prepend without the key scan or depth gate: a rebuild visits each key
    /// exactly once.
    fn rebuild_insert(table: &Table, key: u64, value: u64) {
        let head = &table.buckets[hash1(key, table.buckets.len())];
        let node = Box::into_raw(Box::new(Node {
            key,
            value: AtomicU64::new(value),
            next: ptr::null_mut(),
        }));

        loop {
            let expected = head.load(Ordering::Acquire);
            // SAFETY: the node is unpublished; this thread still owns it.
            unsafe { (*node).next = expected };
            if head.compare_exchange(expected, node, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                return;
            }
        }
    }
}

impl Backend for LockFreeStore {
    fn lookup(&self, key: u64) -> u64 {
        if key == INVALID_KEY {
            return INVALID_VALUE;
        }

        let table = self.current();
        let mut curr = table.buckets[hash1(key, table.buckets.len())].load(Ordering::Acquire);
        while !curr.is_null() {
            // SAFETY: published nodes are never unlinked or freed while
            // workers run.
            let node = unsafe { &*curr };
            if node.key == key {
                return node.value.load(Ordering::Acquire);
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
        let head = &table.buckets[hash1(key, table.buckets.len())];
        let node = Box::into_raw(Box::new(Node {
            key,
            value: AtomicU64::new(value),
            next: ptr::null_mut(),
        }));

        let depth;
        loop {
            let expected = head.load(Ordering::Acquire);

            let mut curr = expected;
            let mut walked = 0;
            let mut overwrote = false;
            while !curr.is_null() {
                // SAFETY: published nodes are never unlinked or freed while
                // workers run.
                let existing = unsafe { &*curr };
                if existing.key == key {
                    existing.value.store(value, Ordering::Release);
                    overwrote = true;
                    break;
                }
                walked += 1;
                curr = existing.next;
            }
            if overwrote {
                // SAFETY: the unpublished node is still owned here.
                unsafe { drop(Box::from_raw(node)) };
                return;
            }

            // SAFETY: the node is unpublished; this thread still owns it.
            unsafe { (*node).next = expected };
            if head.compare_exchange(expected, node, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                depth = walked;
                break;
            }
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
        let doubled = Table::new(old.buckets.len() * 2);
        doubled.num_items.store(old.num_items.load(Ordering::Relaxed), Ordering::Relaxed);
        log::info!("lock-free resize: {} -> {} buckets", old.buckets.len(), old.buckets.len() * 2);
        self.next.store(Box::into_raw(Box::new(doubled)), Ordering::Release);
    }

    fn rebuild_range(&self, ctx: &mut WorkerCtx, num_workers: usize) {
        let old = self.current();
        // SAFETY: `next` was published by `begin_resize` before the rebuild
        // barrier and is not retired until every worker has left this phase.
        let new = unsafe { &*self.next.load(Ordering::Acquire) };

        let mut bucket = ctx.id();
        while bucket < old.buckets.len() {
            let mut curr = old.buckets[bucket].load(Ordering::Acquire);
            while !curr.is_null() {
                // SAFETY: the old table is quiescent; this worker owns the
                // bucket range it is walking.
                let node = unsafe { &*curr };
                Self::rebuild_insert(new, node.key, node.value.load(Ordering::Relaxed));
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

impl Drop for LockFreeStore {
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
