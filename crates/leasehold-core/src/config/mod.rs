//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config: `<config dir>/leasehold/config.toml`
//! 3. Project config: `<project>/leasehold.toml`
//! 4. Environment variables: `LEASEHOLD_*`
//!
//! # Example Config
//!
//! ```toml
//! [parallelism]
//! max_workers = 8
//! parallel_projects = true
//!
//! [queue]
//! max_workers = 4
//!
//! [threads]
//! name_prefix = "build"
//! ```
//!
//! # Module Structure
//!
//! - `types`: Configuration structure definitions
//! - `defaults`: Default value implementations
//! - `load`: Loading from files and environment
//! - `merge`: Layering partial configuration over a complete one
//! - `validate`: Validation

mod defaults;
mod load;
mod merge;
mod types;
mod validate;

#[cfg(test)]
mod tests_loading;

pub use load::{
    global_config_path, load_config, load_config_from, load_toml_file, project_config_path,
    ENV_MAX_WORKERS, ENV_PARALLEL_PROJECTS, ENV_QUEUE_MAX_WORKERS, ENV_THREAD_PREFIX,
};
pub use types::{
    Config, ParallelismConfig, PartialConfig, PartialParallelismConfig, PartialQueueConfig,
    PartialThreadConfig, QueueConfig, ThreadConfig,
};
