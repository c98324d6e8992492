//! Concurrent in-memory store mapping 64-bit keys to 64-bit values, driven by
//! a pool of workers replaying lookup/insert records from a trace file.
//! Three table implementations share one operation contract: bucketized
//! cuckoo hashing behind striped locks, chained hashing behind striped locks,
//! and chained hashing with lock-free head updates.

pub mod config;
pub mod driver;
pub mod metrics;
mod reader;
mod sync;
pub mod table;
pub mod worker;

pub use crate::config::RunConfig;
pub use crate::metrics::RunMetrics;
pub use crate::table::{Backend, BackendKind, INVALID_KEY, INVALID_VALUE};
pub use crate::worker::WorkerCtx;
