//! Default configuration values

use std::{num::NonZeroUsize, thread};

use super::types::{Config, ParallelismConfig, QueueConfig, ThreadConfig};

#[allow(clippy::derivable_impls)]
impl Default for Config {
    fn default() -> Self {
        Self {
            parallelism: ParallelismConfig::default(),
            queue: QueueConfig::default(),
            threads: ThreadConfig::default(),
        }
    }
}

impl Default for ParallelismConfig {
    fn default() -> Self {
        Self {
            max_workers: thread::available_parallelism().map_or(1, NonZeroUsize::get),
            parallel_projects: true,
        }
    }
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            name_prefix: "leasehold".to_string(),
        }
    }
}
