use std::process::exit;
use std::time::Instant;
use tracekv::{driver, RunConfig, RunMetrics};

fn usage(program: &str) {
    eprintln!(
        "usage: {program} [-f data_file] [-b initial_buckets] [-t num_threads] \
         [-m cuckoo|chained|lockfree] [-r] [-s]"
    );
}

fn main() {
    env_logger::init();

    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "tracekv".to_string());
    let config = match RunConfig::from_args(args) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{message}");
            usage(&program);
            exit(1);
        }
    };

    log::info!(
        "replaying {} with {:?} table: {} buckets, {} threads",
        config.data_file.display(),
        config.backend,
        config.initial_buckets,
        config.num_threads
    );

    let backend = config.backend.build(config.initial_buckets, config.num_threads, config.resize_enabled);
    let metrics = RunMetrics::new();

    let start = Instant::now();
    if let Err(error) = driver::run(&config, backend.as_ref(), &metrics) {
        eprintln!("{}: {error}", config.data_file.display());
        exit(1);
    }
    let elapsed = start.elapsed();

    println!("execution time: {:.6} seconds", elapsed.as_secs_f64());
    if !config.speed_test {
        println!("total_ops: {}", metrics.total_ops());
        println!("total_lookups: {}", metrics.total_lookups());
        println!("successful_lookups: {}", metrics.successful_lookups());
        println!("failed_lookups: {}", metrics.missed_lookups());
        println!("total_inserts: {}", metrics.total_inserts());
        println!("failed_matches: {}", metrics.failed_matches());
    }
}
