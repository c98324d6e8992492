use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::time::{SystemTime, UNIX_EPOCH};

/// Per-worker state threaded through inserts: the worker's slot index and a
/// private generator for eviction choices.
///
/// Each worker owns its generator; sharing one would serialize the pool on
/// the generator state. The seed is derived from the worker id so two workers
/// never walk the same eviction sequence.
pub struct WorkerCtx {
    id: usize,
    rng: SmallRng,
}

impl WorkerCtx {
    pub fn new(id: usize) -> Self {
        let init_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        WorkerCtx {
            id,
            rng: SmallRng::seed_from_u64(id as u64 * 31 + init_time),
        }
    }

    /// Index of this worker's publication slot.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Uniform draw from `0..choices`.
    #[inline]
    pub(crate) fn random_slot(&mut self, choices: usize) -> usize {
        self.rng.gen_range(0..choices)
    }
}
