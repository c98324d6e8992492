//! The three table implementations and the machinery they share.

pub(crate) mod locks;
pub(crate) mod publication;
pub(crate) mod recovery;

pub mod chained;
pub mod cuckoo;
pub mod lockfree;

use crate::worker::WorkerCtx;
use std::str::FromStr;
use std::sync::Arc;

/// Key marking a slot as unoccupied; never stored as real data.
pub const INVALID_KEY: u64 = u64::MAX;
/// Value returned by lookups that found nothing; never stored as real data.
pub const INVALID_VALUE: u64 = u64::MAX;

/// Slots per cuckoo bucket.
pub const BUCKET_SIZE: usize = 4;
/// Eviction rounds before an insert gives its item to the recovery queue.
pub const MAX_KICKS: usize = 256;
/// Chain depth that raises the resize flag in the chained tables.
pub const MAX_CHAIN_SIZE: usize = 8;

/// Buckets per stripe lock at table creation.
pub(crate) const LOCK_STRIPE_RATIO: usize = 8;

#[inline]
pub(crate) fn hash1(key: u64, num_buckets: usize) -> usize {
    (key.wrapping_mul(37).wrapping_add(13) % num_buckets as u64) as usize
}

#[inline]
pub(crate) fn hash2(key: u64, num_buckets: usize) -> usize {
    (key.wrapping_mul(31).wrapping_add(11) % num_buckets as u64) as usize
}

#[inline]
pub(crate) fn initial_locks(num_buckets: usize) -> usize {
    (num_buckets / LOCK_STRIPE_RATIO).max(1)
}

/// Operation contract shared by the three table implementations.
///
/// `lookup` and `insert` may run concurrently from any number of workers.
/// The resize methods follow the coordinator protocol in [`crate::driver`]:
/// `begin_resize` and `finish_resize` run on a single thread while every
/// other worker waits at a barrier; `rebuild_range` runs on all workers
/// between those barriers.
pub trait Backend: Send + Sync {
    /// Value last inserted for `key`, or [`INVALID_VALUE`].
    fn lookup(&self, key: u64) -> u64;

    /// Insert `key -> value`, overwriting in place on a duplicate key.
    /// Sentinel keys and values are dropped without effect.
    fn insert(&self, ctx: &mut WorkerCtx, key: u64, value: u64);

    /// True once some worker has requested a table rebuild.
    fn resize_needed(&self) -> bool;

    /// Allocate the doubled table. Coordinator only.
    fn begin_resize(&self);

    /// Rehash old buckets `ctx.id(), ctx.id() + num_workers, ..` into the
    /// new table.
    fn rebuild_range(&self, ctx: &mut WorkerCtx, num_workers: usize);

    /// Publish the new table, retire the old one and clear the flag.
    /// Coordinator only.
    fn finish_resize(&self, ctx: &mut WorkerCtx);
}

/// Which table implementation a run drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Cuckoo,
    Chained,
    LockFree,
}

impl BackendKind {
    pub fn build(
        self,
        initial_buckets: usize,
        num_workers: usize,
        resize_enabled: bool,
    ) -> Arc<dyn Backend> {
        match self {
            BackendKind::Cuckoo => Arc::new(cuckoo::CuckooStore::new(initial_buckets, num_workers)),
            BackendKind::Chained => {
                Arc::new(chained::ChainedStore::new(initial_buckets, resize_enabled))
            }
            BackendKind::LockFree => {
                Arc::new(lockfree::LockFreeStore::new(initial_buckets, resize_enabled))
            }
        }
    }
}

impl FromStr for BackendKind {
    type Err = ();

    fn from_str(mode: &str) -> Result<Self, ()> {
        match mode {
            "cuckoo" => Ok(BackendKind::Cuckoo),
            "chained" => Ok(BackendKind::Chained),
            "lockfree" => Ok(BackendKind::LockFree),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixers_stay_in_range() {
        for key in [0, 1, 21, u64::MAX - 1] {
            assert!(hash1(key, 64) < 64);
            assert!(hash2(key, 64) < 64);
        }
        // wrapping arithmetic near the top of the key space: -37 + 13 mod 64
        assert_eq!(hash1(u64::MAX, 64), 40);
        assert_eq!(hash2(u64::MAX, 64), 44);
    }

    #[test]
    fn candidate_buckets_may_coincide() {
        // 37k + 13 and 31k + 11 agree mod 64 whenever 6k + 2 does.
        assert_eq!(hash1(21, 64), hash2(21, 64));
        assert_ne!(hash1(1, 64), hash2(1, 64));
    }

    #[test]
    fn stripe_ratio_never_yields_zero_locks() {
        assert_eq!(initial_locks(64), 8);
        assert_eq!(initial_locks(2), 1);
        assert_eq!(initial_locks(1), 1);
    }

    #[test]
    fn backend_kind_from_str() {
        assert_eq!("cuckoo".parse(), Ok(BackendKind::Cuckoo));
        assert_eq!("chained".parse(), Ok(BackendKind::Chained));
        assert_eq!("lockfree".parse(), Ok(BackendKind::LockFree));
        assert_eq!("btree".parse::<BackendKind>(), Err(()));
    }
}
