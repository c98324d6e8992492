use crate::table::BackendKind;
use std::path::PathBuf;

pub const DEFAULT_NUM_BUCKETS: usize = 64;
pub const DEFAULT_NUM_THREADS: usize = 16;

/// Settings for one run, assembled from the command line.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub data_file: PathBuf,
    pub initial_buckets: usize,
    pub num_threads: usize,
    pub resize_enabled: bool,
    pub speed_test: bool,
    pub backend: BackendKind,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            data_file: PathBuf::from("output.txt"),
            initial_buckets: DEFAULT_NUM_BUCKETS,
            num_threads: DEFAULT_NUM_THREADS,
            resize_enabled: true,
            speed_test: false,
            backend: BackendKind::Chained,
        }
    }
}

impl RunConfig {
    /// Parse the flag list (program name already consumed). Out-of-range
    /// numbers fall back to their defaults with a warning, like the original
    /// tool; anything unreadable is an error for the caller to report.
    pub fn from_args<I>(args: I) -> Result<RunConfig, String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let mut config = RunConfig::default();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-f" => {
                    let path = args.next().ok_or("-f requires a file path")?;
                    config.data_file = PathBuf::from(path);
                }
                "-b" => {
                    let raw = args.next().ok_or("-b requires a bucket count")?;
                    let buckets: i64 =
                        raw.parse().map_err(|_| format!("invalid bucket count: {raw}"))?;
                    if buckets <= 0 {
                        log::warn!("start buckets must be > 0, setting to default");
                        config.initial_buckets = DEFAULT_NUM_BUCKETS;
                    } else {
                        config.initial_buckets = buckets as usize;
                    }
                }
                "-t" => {
                    let raw = args.next().ok_or("-t requires a thread count")?;
                    let threads: i64 =
                        raw.parse().map_err(|_| format!("invalid thread count: {raw}"))?;
                    if threads < 1 {
                        log::warn!("number of threads must be >= 1, setting to default");
                        config.num_threads = DEFAULT_NUM_THREADS;
                    } else {
                        config.num_threads = threads as usize;
                    }
                }
                "-m" => {
                    let raw = args.next().ok_or("-m requires a mode")?;
                    config.backend = raw
                        .parse()
                        .map_err(|_| format!("unknown mode: {raw} (cuckoo, chained or lockfree)"))?;
                }
                "-r" => config.resize_enabled = false,
                "-s" => config.speed_test = true,
                other => return Err(format!("unknown argument: {other}")),
            }
        }

        Ok(config)
    }
}
