use crate::sync::{AtomicU64, Ordering};
use crate::table::{INVALID_KEY, INVALID_VALUE};
use crossbeam::utils::CachePadded;

/// One slot per worker holding the item that worker is re-homing mid-kick.
///
/// The slot is an extension of the key space: while an item sits here it is
/// in no bucket, so lookups scan every slot and a duplicate-key insert
/// overwrites the slot value in place. Only the owning worker writes its own
/// key cell, which keeps at most one in-flight copy of any key. Slots are
/// padded to a cache line so neighbouring workers do not share one.
pub(crate) struct PublicationSlots {
    slots: Box<[CachePadded<Slot>]>,
}

struct Slot {
    key: AtomicU64,
    value: AtomicU64,
}

impl PublicationSlots {
    pub(crate) fn new(num_workers: usize) -> Self {
        PublicationSlots {
            slots: (0..num_workers)
                .map(|_| {
                    CachePadded::new(Slot {
                        key: AtomicU64::new(INVALID_KEY),
                        value: AtomicU64::new(INVALID_VALUE),
                    })
                })
                .collect(),
        }
    }

    /// Empty the worker's own slot. The key is retired first so no reader
    /// can match it against a half-cleared pair.
    pub(crate) fn clear(&self, worker: usize) {
        let slot = &self.slots[worker];
        slot.key.store(INVALID_KEY, Ordering::Release);
        slot.value.store(INVALID_VALUE, Ordering::Release);
    }

    /// Publish the item the worker just evicted. The value lands before the
    /// key becomes visible, so a reader matching the key always sees the
    /// paired value.
    pub(crate) fn publish(&self, worker: usize, key: u64, value: u64) {
        let slot = &self.slots[worker];
        slot.value.store(value, Ordering::Release);
        slot.key.store(key, Ordering::Release);
    }

    /// Scan every slot for `key`.
    pub(crate) fn find(&self, key: u64) -> Option<u64> {
        for slot in self.slots.iter() {
            if slot.key.load(Ordering::Acquire) == key {
                return Some(slot.value.load(Ordering::Acquire));
            }
        }
        None
    }

    /// Overwrite the value of another worker's slot currently holding `key`.
    ///
    /// The caller's own slot is excluded: mid-kick it holds exactly the item
    /// the caller is re-homing, and matching it would drop that item.
    pub(crate) fn update_other(&self, worker: usize, key: u64, value: u64) -> bool {
        for (index, slot) in self.slots.iter().enumerate() {
            if index != worker && slot.key.load(Ordering::Acquire) == key {
                slot.value.store(value, Ordering::Release);
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn published_items_are_visible_to_all() {
        let slots = PublicationSlots::new(4);
        assert_eq!(slots.find(7), None);

        slots.publish(2, 7, 70);
        assert_eq!(slots.find(7), Some(70));

        slots.clear(2);
        assert_eq!(slots.find(7), None);
    }

    #[test]
    fn update_hits_only_another_workers_slot() {
        let slots = PublicationSlots::new(2);
        slots.publish(0, 5, 50);

        assert!(slots.update_other(1, 5, 51));
        assert_eq!(slots.find(5), Some(51));
        assert!(!slots.update_other(1, 6, 60));
        // the owner's own in-flight item must never satisfy its own insert
        assert!(!slots.update_other(0, 5, 52));
        assert_eq!(slots.find(5), Some(51));
    }

    #[test]
    fn cleared_slots_never_match_the_sentinel_probe() {
        let slots = PublicationSlots::new(2);
        // a lookup for the sentinel key is rejected before the scan, but the
        // scan itself must not treat an empty slot as a hit for a real key
        assert_eq!(slots.find(3), None);
        slots.publish(1, 3, 30);
        slots.clear(1);
        assert_eq!(slots.find(3), None);
    }
}
