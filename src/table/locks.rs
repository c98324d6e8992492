use crossbeam::utils::CachePadded;
use parking_lot::{Mutex, MutexGuard};

/// Striped mutual-exclusion locks: bucket `b` is guarded by lock
/// `b % num_locks`, so one lock serves a whole stripe of buckets. Each lock
/// sits on its own cache line.
pub(crate) struct StripeLocks {
    locks: Box<[CachePadded<Mutex<()>>]>,
}

/// Guards for the one or two stripes covering a pair of buckets, released
/// on drop.
pub(crate) struct PairGuard<'a> {
    _first: MutexGuard<'a, ()>,
    _second: Option<MutexGuard<'a, ()>>,
}

impl StripeLocks {
    pub(crate) fn new(num_locks: usize) -> Self {
        StripeLocks {
            locks: (0..num_locks).map(|_| CachePadded::new(Mutex::new(()))).collect(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }

    #[inline]
    fn lock_idx(&self, bucket: usize) -> usize {
        bucket % self.locks.len()
    }

    /// Lock the stripe covering a single bucket.
    pub(crate) fn lock(&self, bucket: usize) -> MutexGuard<'_, ()> {
        self.locks[self.lock_idx(bucket)].lock()
    }

    /// Lock the stripes covering both candidate buckets of one key.
    ///
    /// A coinciding stripe is taken exactly once. Distinct stripes are taken
    /// in ascending index order; two workers contending on overlapping pairs
    /// therefore always block on the lower stripe first and cannot deadlock.
    pub(crate) fn lock_pair(&self, first_bucket: usize, second_bucket: usize) -> PairGuard<'_> {
        let first = self.lock_idx(first_bucket);
        let second = self.lock_idx(second_bucket);

        if first == second {
            PairGuard {
                _first: self.locks[first].lock(),
                _second: None,
            }
        } else {
            let (low, high) = if first < second { (first, second) } else { (second, first) };
            let low_guard = self.locks[low].lock();
            let high_guard = self.locks[high].lock();
            PairGuard {
                _first: low_guard,
                _second: Some(high_guard),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn coinciding_stripes_lock_once() {
        let locks = StripeLocks::new(8);
        // same bucket, and distinct buckets sharing a stripe
        let _same = locks.lock_pair(3, 3);
        drop(_same);
        let _striped = locks.lock_pair(1, 9);
    }

    #[test]
    fn reacquire_after_release() {
        let locks = StripeLocks::new(4);
        for _ in 0..3 {
            let guard = locks.lock_pair(0, 1);
            drop(guard);
        }
    }

    // Termination is the assertion: unordered acquisition would wedge two
    // threads wanting the same stripes in opposite order.
    #[test]
    fn random_pairs_do_not_deadlock() {
        const THREADS: usize = 8;
        const ITERATIONS: usize = 20_000;

        let locks = Arc::new(StripeLocks::new(8));
        let handles: Vec<_> = (0..THREADS)
            .map(|seed| {
                let locks = Arc::clone(&locks);
                thread::spawn(move || {
                    let mut rng = SmallRng::seed_from_u64(seed as u64);
                    for _ in 0..ITERATIONS {
                        let first = rng.gen_range(0..64);
                        let second = rng.gen_range(0..64);
                        let _guard = locks.lock_pair(first, second);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
