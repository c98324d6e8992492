use crate::sync::{AtomicU64, AtomicUsize, Ordering};
use crate::table::{INVALID_KEY, INVALID_VALUE};

/// Bounded queue for items whose kick cascade ran out of moves.
///
/// Capacity equals the worker count and the coordinator drains the queue at
/// every resize, so the append index passing the end is an invariant
/// violation, not a recoverable condition.
pub(crate) struct RecoveryQueue {
    items: Box<[Deposit]>,
    count: AtomicUsize,
}

struct Deposit {
    key: AtomicU64,
    value: AtomicU64,
}

impl RecoveryQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        RecoveryQueue {
            items: (0..capacity)
                .map(|_| Deposit {
                    key: AtomicU64::new(INVALID_KEY),
                    value: AtomicU64::new(INVALID_VALUE),
                })
                .collect(),
            count: AtomicUsize::new(0),
        }
    }

    /// Append an item. Each worker claims a distinct index with one atomic
    /// increment.
    pub(crate) fn push(&self, key: u64, value: u64) {
        let index = self.count.fetch_add(1, Ordering::AcqRel);
        assert!(
            index < self.items.len(),
            "recovery queue overflow: more than {} items between resizes",
            self.items.len()
        );
        let deposit = &self.items[index];
        deposit.key.store(key, Ordering::Release);
        deposit.value.store(value, Ordering::Release);
    }

    pub(crate) fn len(&self) -> usize {
        self.count.load(Ordering::Acquire).min(self.items.len())
    }

    /// Remove and return every queued item. Callers run at quiescence, with
    /// no concurrent pushes in flight.
    pub(crate) fn drain(&self) -> Vec<(u64, u64)> {
        let count = self.count.swap(0, Ordering::AcqRel);
        (0..count)
            .map(|index| {
                let deposit = &self.items[index];
                (deposit.key.load(Ordering::Acquire), deposit.value.load(Ordering::Acquire))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_empties_the_queue() {
        let queue = RecoveryQueue::new(4);
        queue.push(1, 10);
        queue.push(2, 20);
        assert_eq!(queue.len(), 2);

        let items = queue.drain();
        assert_eq!(items, vec![(1, 10), (2, 20)]);
        assert_eq!(queue.len(), 0);
        assert!(queue.drain().is_empty());
    }

    #[test]
    #[should_panic(expected = "recovery queue overflow")]
    fn overflow_is_fatal() {
        let queue = RecoveryQueue::new(1);
        queue.push(1, 10);
        queue.push(2, 20);
    }
}
