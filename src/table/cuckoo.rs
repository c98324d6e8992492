//! Bucketized cuckoo table behind striped locks.
//!
//! Every key has two candidate buckets of [`BUCKET_SIZE`] slots. An insert
//! that finds both full evicts a random occupant, parks it in the worker's
//! publication slot and re-homes it in the occupant's alternate bucket, up
//! to [`MAX_KICKS`] times before handing the in-flight item to the recovery
//! queue and requesting a rebuild.

use crate::sync::{AtomicBool, AtomicPtr, AtomicU64, Ordering};
use crate::table::locks::StripeLocks;
use crate::table::publication::PublicationSlots;
use crate::table::recovery::RecoveryQueue;
use crate::table::{
    hash1, hash2, initial_locks, Backend, BUCKET_SIZE, INVALID_KEY, INVALID_VALUE, MAX_KICKS,
};
use crate::worker::WorkerCtx;
use parking_lot::Mutex;
use std::ptr;

struct SlotCell {
    key: AtomicU64,
    value: AtomicU64,
}

impl SlotCell {
    fn empty() -> Self {
        SlotCell {
            key: AtomicU64::new(INVALID_KEY),
            value: AtomicU64::new(INVALID_VALUE),
        }
    }
}

struct Bucket {
    slots: [SlotCell; BUCKET_SIZE],
}

struct Table {
    buckets: Box<[Bucket]>,
    locks: StripeLocks,
}

impl Table {
    fn new(num_buckets: usize, num_locks: usize) -> Table {
        Table {
            buckets: (0..num_buckets)
                .map(|_| Bucket { slots: std::array::from_fn(|_| SlotCell::empty()) })
                .collect(),
            locks: StripeLocks::new(num_locks),
        }
    }

    /// Slot index holding `key` in `bucket`, if any. Runs under the stripe
    /// lock, which also makes it the free-slot scan when probing for
    /// [`INVALID_KEY`].
    fn find(&self, bucket: usize, key: u64) -> Option<usize> {
        let slots = &self.buckets[bucket].slots;
        (0..BUCKET_SIZE).find(|&index| slots[index].key.load(Ordering::Relaxed) == key)
    }

    fn store(&self, bucket: usize, slot: usize, key: u64, value: u64) {
        let cell = &self.buckets[bucket].slots[slot];
        cell.value.store(value, Ordering::Relaxed);
        cell.key.store(key, Ordering::Relaxed);
    }
}

/// Cuckoo store: the published table handle plus the cross-table state that
/// survives a resize.
pub struct CuckooStore {
    table: AtomicPtr<Table>,
    next: AtomicPtr<Table>,
    publication: PublicationSlots,
    recovery: RecoveryQueue,
    resize_needed: AtomicBool,
    /// Items drained from the recovery queue when a resize begins, waiting
    /// to be re-inserted into the new table.
    drained: Mutex<Vec<(u64, u64)>>,
}

impl CuckooStore {
    pub fn new(initial_buckets: usize, num_workers: usize) -> Self {
        let table = Table::new(initial_buckets, initial_locks(initial_buckets));
        CuckooStore {
            table: AtomicPtr::new(Box::into_raw(Box::new(table))),
            next: AtomicPtr::new(ptr::null_mut()),
            publication: PublicationSlots::new(num_workers),
            recovery: RecoveryQueue::new(num_workers),
            resize_needed: AtomicBool::new(false),
            drained: Mutex::new(Vec::new()),
        }
    }

    /// Items currently parked in the recovery queue.
    pub fn pending_recovery(&self) -> usize {
        self.recovery.len()
    }

    fn current(&self) -> &Table {
        // SAFETY: the handle is swapped and the old table freed only by the
        // resize coordinator, which runs while every worker is parked at a
        // barrier; no operation holds this reference across a resize.
        unsafe { &*self.table.load(Ordering::Acquire) }
    }

    /// Full insert path against one table. `Err` carries the item left in
    /// flight after the last kick.
    fn insert_into(
        table: &Table,
        publication: &PublicationSlots,
        ctx: &mut WorkerCtx,
        key: u64,
        value: u64,
    ) -> Result<(), (u64, u64)> {
        let mut curr_key = key;
        let mut curr_value = value;

        publication.clear(ctx.id());

        for _ in 0..MAX_KICKS {
            let first_bucket = hash1(curr_key, table.buckets.len());
            let second_bucket = hash2(curr_key, table.buckets.len());
            let guard = table.locks.lock_pair(first_bucket, second_bucket);

            // update in place, first candidate then second
            if let Some(slot) = table.find(first_bucket, curr_key) {
                table.store(first_bucket, slot, curr_key, curr_value);
                publication.clear(ctx.id());
                return Ok(());
            }
            if let Some(slot) = table.find(second_bucket, curr_key) {
                table.store(second_bucket, slot, curr_key, curr_value);
                publication.clear(ctx.id());
                return Ok(());
            }

            // another worker may hold this key mid-kick; update it there
            if publication.update_other(ctx.id(), curr_key, curr_value) {
                publication.clear(ctx.id());
                return Ok(());
            }

            // free slot, first candidate then second
            if let Some(slot) = table.find(first_bucket, INVALID_KEY) {
                table.store(first_bucket, slot, curr_key, curr_value);
                publication.clear(ctx.id());
                return Ok(());
            }
            if let Some(slot) = table.find(second_bucket, INVALID_KEY) {
                table.store(second_bucket, slot, curr_key, curr_value);
                publication.clear(ctx.id());
                return Ok(());
            }

            // both candidates full: evict a uniformly chosen occupant, park
            // it in our publication slot and take its place
            let choice = ctx.random_slot(2 * BUCKET_SIZE);
            let (victim_bucket, victim_slot) = if choice < BUCKET_SIZE {
                (first_bucket, choice)
            } else {
                (second_bucket, choice % BUCKET_SIZE)
            };
            let cell = &table.buckets[victim_bucket].slots[victim_slot];
            let kicked_key = cell.key.load(Ordering::Relaxed);
            let kicked_value = cell.value.load(Ordering::Relaxed);

            publication.publish(ctx.id(), kicked_key, kicked_value);
            table.store(victim_bucket, victim_slot, curr_key, curr_value);

            curr_key = kicked_key;
            curr_value = kicked_value;
            drop(guard);
        }

        Err((curr_key, curr_value))
    }

    /// Rebuild-time insert. A rebuild visits each key exactly once and runs
    /// with no concurrent lookups, so the duplicate and publication scans can
    /// never hit and the evicted item is safe in a local while the locks are
    /// cycled.
    fn rebuild_insert(
        table: &Table,
        ctx: &mut WorkerCtx,
        key: u64,
        value: u64,
    ) -> Result<(), (u64, u64)> {
        let mut curr_key = key;
        let mut curr_value = value;

        for _ in 0..MAX_KICKS {
            let first_bucket = hash1(curr_key, table.buckets.len());
            let second_bucket = hash2(curr_key, table.buckets.len());
            let guard = table.locks.lock_pair(first_bucket, second_bucket);

            if let Some(slot) = table.find(first_bucket, INVALID_KEY) {
                table.store(first_bucket, slot, curr_key, curr_value);
                return Ok(());
            }
            if let Some(slot) = table.find(second_bucket, INVALID_KEY) {
                table.store(second_bucket, slot, curr_key, curr_value);
                return Ok(());
            }

            let choice = ctx.random_slot(2 * BUCKET_SIZE);
            let (victim_bucket, victim_slot) = if choice < BUCKET_SIZE {
                (first_bucket, choice)
            } else {
                (second_bucket, choice % BUCKET_SIZE)
            };
            let cell = &table.buckets[victim_bucket].slots[victim_slot];
            let kicked_key = cell.key.load(Ordering::Relaxed);
            let kicked_value = cell.value.load(Ordering::Relaxed);
            table.store(victim_bucket, victim_slot, curr_key, curr_value);

            curr_key = kicked_key;
            curr_value = kicked_value;
            drop(guard);
        }

        Err((curr_key, curr_value))
    }
}

impl Backend for CuckooStore {
    fn lookup(&self, key: u64) -> u64 {
        if key == INVALID_KEY {
            return INVALID_VALUE;
        }

        let table = self.current();
        let first_bucket = hash1(key, table.buckets.len());
        let second_bucket = hash2(key, table.buckets.len());
        let _guard = table.locks.lock_pair(first_bucket, second_bucket);

        if let Some(slot) = table.find(first_bucket, key) {
            return table.buckets[first_bucket].slots[slot].value.load(Ordering::Relaxed);
        }
        if let Some(slot) = table.find(second_bucket, key) {
            return table.buckets[second_bucket].slots[slot].value.load(Ordering::Relaxed);
        }

        // an item mid-kick sits in a publication slot, not in any bucket
        if let Some(value) = self.publication.find(key) {
            return value;
        }

        INVALID_VALUE
    }

    fn insert(&self, ctx: &mut WorkerCtx, key: u64, value: u64) {
        if key == INVALID_KEY || value == INVALID_VALUE {
            return;
        }

        let table = self.current();
        if let Err((stuck_key, stuck_value)) =
            Self::insert_into(table, &self.publication, ctx, key, value)
        {
            self.recovery.push(stuck_key, stuck_value);
            self.resize_needed.store(true, Ordering::Release);
        }
    }

    fn resize_needed(&self) -> bool {
        self.resize_needed.load(Ordering::Acquire)
    }

    fn begin_resize(&self) {
        let old = self.current();
        let doubled = Table::new(old.buckets.len() * 2, old.locks.len());
        self.next.store(Box::into_raw(Box::new(doubled)), Ordering::Release);

        // capture pre-resize overflow; anything deposited during the rebuild
        // stays queued for the next cycle
        let drained = self.recovery.drain();
        log::info!(
            "cuckoo resize: {} -> {} buckets, {} recovered item(s)",
            old.buckets.len(),
            old.buckets.len() * 2,
            drained.len()
        );
        *self.drained.lock() = drained;
    }

    fn rebuild_range(&self, ctx: &mut WorkerCtx, num_workers: usize) {
        let old = self.current();
        // SAFETY: `next` was published by `begin_resize` before the rebuild
        // barrier and is not retired until every worker has left this phase.
        let new = unsafe { &*self.next.load(Ordering::Acquire) };

        let mut bucket = ctx.id();
        while bucket < old.buckets.len() {
            for cell in &old.buckets[bucket].slots {
                let key = cell.key.load(Ordering::Relaxed);
                if key == INVALID_KEY {
                    continue;
                }
                let value = cell.value.load(Ordering::Relaxed);
                if let Err((stuck_key, stuck_value)) = Self::rebuild_insert(new, ctx, key, value) {
                    self.recovery.push(stuck_key, stuck_value);
                }
            }
            bucket += num_workers;
        }
    }

    fn finish_resize(&self, ctx: &mut WorkerCtx) {
        let next = self.next.swap(ptr::null_mut(), Ordering::AcqRel);
        let old = self.table.swap(next, Ordering::AcqRel);
        self.resize_needed.store(false, Ordering::Release);

        // items that ran out of kicks before the rebuild belong in the new
        // table
        let drained = std::mem::take(&mut *self.drained.lock());
        // SAFETY: `next` is the table just published; the coordinator is the
        // only thread running.
        let new = unsafe { &*next };
        for (key, value) in drained {
            if let Err((stuck_key, stuck_value)) =
                Self::insert_into(new, &self.publication, ctx, key, value)
            {
                self.recovery.push(stuck_key, stuck_value);
            }
        }

        // a rebuild that overflowed again must drain on the next cycle
        if self.recovery.len() > 0 {
            self.resize_needed.store(true, Ordering::Release);
        }

        // SAFETY: every worker is parked at the coordinator barrier; nothing
        // can still reference the retired table.
        unsafe { drop(Box::from_raw(old)) };
    }
}

impl Drop for CuckooStore {
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
