use crate::sync::{AtomicU64, Ordering};

/// Run totals shared across the pool.
///
/// Workers tally into a [`TaskMetrics`] while a task runs and fold it in
/// here with one atomic add per counter at task end, so the shared cache
/// lines are touched once per chunk rather than once per record.
pub struct RunMetrics {
    total_ops: AtomicU64,
    total_lookups: AtomicU64,
    successful_lookups: AtomicU64,
    missed_lookups: AtomicU64,
    total_inserts: AtomicU64,
    failed_matches: AtomicU64,
}

impl RunMetrics {
    pub fn new() -> Self {
        RunMetrics {
            total_ops: AtomicU64::new(0),
            total_lookups: AtomicU64::new(0),
            successful_lookups: AtomicU64::new(0),
            missed_lookups: AtomicU64::new(0),
            total_inserts: AtomicU64::new(0),
            failed_matches: AtomicU64::new(0),
        }
    }

    pub(crate) fn absorb(&self, task: &TaskMetrics) {
        self.total_ops.fetch_add(task.total_ops, Ordering::Relaxed);
        self.total_lookups.fetch_add(task.total_lookups, Ordering::Relaxed);
        self.successful_lookups.fetch_add(task.successful_lookups, Ordering::Relaxed);
        self.missed_lookups.fetch_add(task.missed_lookups, Ordering::Relaxed);
        self.total_inserts.fetch_add(task.total_inserts, Ordering::Relaxed);
        self.failed_matches.fetch_add(task.failed_matches, Ordering::Relaxed);
    }

    pub fn total_ops(&self) -> u64 {
        self.total_ops.load(Ordering::Relaxed)
    }

    pub fn total_lookups(&self) -> u64 {
        self.total_lookups.load(Ordering::Relaxed)
    }

    pub fn successful_lookups(&self) -> u64 {
        self.successful_lookups.load(Ordering::Relaxed)
    }

    pub fn missed_lookups(&self) -> u64 {
        self.missed_lookups.load(Ordering::Relaxed)
    }

    pub fn total_inserts(&self) -> u64 {
        self.total_inserts.load(Ordering::Relaxed)
    }

    pub fn failed_matches(&self) -> u64 {
        self.failed_matches.load(Ordering::Relaxed)
    }
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-local tallies for one chunk of records.
#[derive(Default)]
pub(crate) struct TaskMetrics {
    pub total_ops: u64,
    pub total_lookups: u64,
    pub successful_lookups: u64,
    pub missed_lookups: u64,
    pub total_inserts: u64,
    pub failed_matches: u64,
}
