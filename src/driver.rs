//! Dispatcher and worker pool.
//!
//! The run proceeds in rounds. In each round one thread reads newline-aligned
//! chunks into a task queue while every thread, reader included, drains it.
//! The reader stops enqueuing when the input is exhausted, the task pool cap
//! is reached, or a rebuild has been requested; the pool then joins on the
//! outstanding-task count, meets at a barrier, runs the resize coordinator if
//! the flag is up, and crosses a terminal barrier into the next round.

use crate::config::RunConfig;
use crate::metrics::{RunMetrics, TaskMetrics};
use crate::reader::{next_chunk, records, Record};
use crate::sync::{AtomicBool, AtomicUsize, Ordering};
use crate::table::{Backend, INVALID_VALUE};
use crate::worker::WorkerCtx;
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use std::fs::File;
use std::io;
use std::sync::Barrier;
use std::thread;

/// Outstanding chunks the reader may enqueue before yielding to the pool.
pub(crate) const MAX_TASK_POOL: usize = 256;

struct Shared<'a> {
    backend: &'a dyn Backend,
    config: &'a RunConfig,
    metrics: &'a RunMetrics,
    tasks: SegQueue<Vec<u8>>,
    outstanding: AtomicUsize,
    round_done: AtomicBool,
    end_of_file: AtomicBool,
    barrier: Barrier,
    read_error: Mutex<Option<io::Error>>,
}

/// Process the whole input file against `backend` with the configured pool.
pub fn run(config: &RunConfig, backend: &dyn Backend, metrics: &RunMetrics) -> io::Result<()> {
    let file = File::open(&config.data_file)?;

    let shared = Shared {
        backend,
        config,
        metrics,
        tasks: SegQueue::new(),
        outstanding: AtomicUsize::new(0),
        round_done: AtomicBool::new(false),
        end_of_file: AtomicBool::new(false),
        barrier: Barrier::new(config.num_threads),
        read_error: Mutex::new(None),
    };

    thread::scope(|scope| {
        let shared = &shared;
        let mut file = Some(file);
        for id in 0..config.num_threads {
            let file = file.take();
            scope.spawn(move || worker_loop(shared, id, file));
        }
    });

    match shared.read_error.into_inner() {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

fn worker_loop(shared: &Shared<'_>, id: usize, mut file: Option<File>) {
    let mut ctx = WorkerCtx::new(id);
    let num_workers = shared.config.num_threads;
    let coordinator = id == 0;

    while !shared.end_of_file.load(Ordering::Acquire) {
        if let Some(file) = file.as_mut() {
            read_round(shared, file);
        }

        drain_tasks(shared, &mut ctx);

        // taskwait: stragglers may still be inside a chunk
        while shared.outstanding.load(Ordering::Acquire) != 0 {
            thread::yield_now();
        }
        shared.barrier.wait();

        if shared.backend.resize_needed() {
            if coordinator {
                shared.backend.begin_resize();
            }
            shared.barrier.wait();
            shared.backend.rebuild_range(&mut ctx, num_workers);
            shared.barrier.wait();
            if coordinator {
                shared.backend.finish_resize(&mut ctx);
            }
        }

        if coordinator {
            shared.round_done.store(false, Ordering::Release);
        }
        // nobody may leave with a stale table handle or round flag
        shared.barrier.wait();
    }
}

/// Reader half of a round: enqueue chunks until the input runs dry, the pool
/// cap is hit, or a rebuild is requested.
fn read_round(shared: &Shared<'_>, file: &mut File) {
    let mut count = 0;
    loop {
        match next_chunk(file) {
            Err(error) => {
                *shared.read_error.lock() = Some(error);
                shared.end_of_file.store(true, Ordering::Release);
                break;
            }
            Ok(None) => {
                shared.end_of_file.store(true, Ordering::Release);
                break;
            }
            Ok(Some(chunk)) => {
                shared.outstanding.fetch_add(1, Ordering::AcqRel);
                shared.tasks.push(chunk);
            }
        }

        count += 1;
        if count >= MAX_TASK_POOL - 1 {
            log::debug!("task pool full after {count} chunks, joining round");
            break;
        }
        if shared.backend.resize_needed() {
            log::debug!("resize requested after {count} chunks, joining round");
            break;
        }
    }
    shared.round_done.store(true, Ordering::Release);
}

fn drain_tasks(shared: &Shared<'_>, ctx: &mut WorkerCtx) {
    loop {
        if let Some(chunk) = shared.tasks.pop() {
            process_chunk(shared, ctx, &chunk);
            shared.outstanding.fetch_sub(1, Ordering::AcqRel);
        } else if shared.round_done.load(Ordering::Acquire) {
            break;
        } else {
            thread::yield_now();
        }
    }
}

fn process_chunk(shared: &Shared<'_>, ctx: &mut WorkerCtx, chunk: &[u8]) {
    let mut local = TaskMetrics::default();

    for record in records(chunk) {
        local.total_ops += 1;
        match record {
            Record::Lookup { key, expected } => {
                local.total_lookups += 1;
                let found = shared.backend.lookup(key);
                if !shared.config.speed_test {
                    if found == INVALID_VALUE {
                        local.missed_lookups += 1;
                    } else {
                        local.successful_lookups += 1;
                        if found != expected {
                            local.failed_matches += 1;
                        }
                    }
                }
            }
            Record::Insert { key, value } => {
                local.total_inserts += 1;
                shared.backend.insert(ctx, key, value);
            }
            Record::Other => {}
        }
    }

    if !shared.config.speed_test {
        shared.metrics.absorb(&local);
    }
}
