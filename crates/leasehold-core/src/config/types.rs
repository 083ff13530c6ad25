//! Configuration type definitions
//!
//! Complete configuration lives in [`Config`]. Files are read into the
//! `Partial*` mirrors, where every field is optional, and layered on top.

use serde::{Deserialize, Serialize};

/// Root configuration structure
///
/// Loaded from defaults → global → project → env vars
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub parallelism: ParallelismConfig,
    pub queue: QueueConfig,
    pub threads: ThreadConfig,
}

/// How much work may run at once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ParallelismConfig {
    /// Capacity of the root worker lease.
    pub max_workers: usize,
    /// Lock each project separately instead of the whole build.
    pub parallel_projects: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueConfig {
    /// Pool size of conditional execution queues; unset means `max_workers`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ThreadConfig {
    pub name_prefix: String,
}

// ═══════════════════════════════════════════════════════════════════════════
// PARTIAL LAYERS (one per config file)
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PartialConfig {
    pub parallelism: PartialParallelismConfig,
    pub queue: PartialQueueConfig,
    pub threads: PartialThreadConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PartialParallelismConfig {
    pub max_workers: Option<usize>,
    pub parallel_projects: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PartialQueueConfig {
    pub max_workers: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PartialThreadConfig {
    pub name_prefix: Option<String>,
}

impl Config {
    /// Effective pool size of conditional execution queues.
    pub fn queue_max_workers(&self) -> usize {
        self.queue.max_workers.unwrap_or(self.parallelism.max_workers)
    }
}
