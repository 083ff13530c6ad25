//! Configuration merging logic (Immutable functional pattern)
//!
//! A layer only overrides the values it sets; everything it leaves out keeps
//! the value from the layers below.

use super::types::{
    Config, ParallelismConfig, PartialConfig, PartialParallelismConfig, PartialQueueConfig,
    PartialThreadConfig, QueueConfig, ThreadConfig,
};

impl Config {
    /// Layer `other` over this config.
    pub fn merge(self, other: PartialConfig) -> Self {
        Self {
            parallelism: self.parallelism.merge(other.parallelism),
            queue: self.queue.merge(other.queue),
            threads: self.threads.merge(other.threads),
        }
    }
}

impl ParallelismConfig {
    fn merge(self, other: PartialParallelismConfig) -> Self {
        Self {
            max_workers: other.max_workers.unwrap_or(self.max_workers),
            parallel_projects: other.parallel_projects.unwrap_or(self.parallel_projects),
        }
    }
}

impl QueueConfig {
    fn merge(self, other: PartialQueueConfig) -> Self {
        Self {
            max_workers: other.max_workers.or(self.max_workers),
        }
    }
}

impl ThreadConfig {
    fn merge(self, other: PartialThreadConfig) -> Self {
        Self {
            name_prefix: other.name_prefix.unwrap_or(self.name_prefix),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_layer_changes_nothing() {
        let base = Config::default();
        assert_eq!(base.clone().merge(PartialConfig::default()), base);
    }

    #[test]
    fn test_layer_overrides_only_what_it_sets() {
        let base = Config::default();
        let layer = PartialConfig {
            parallelism: PartialParallelismConfig {
                max_workers: Some(3),
                parallel_projects: None,
            },
            ..PartialConfig::default()
        };

        let merged = base.clone().merge(layer);

        assert_eq!(merged.parallelism.max_workers, 3);
        assert_eq!(
            merged.parallelism.parallel_projects,
            base.parallelism.parallel_projects
        );
        assert_eq!(merged.threads, base.threads);
    }

    #[test]
    fn test_later_layer_wins() {
        let global = PartialConfig {
            threads: PartialThreadConfig {
                name_prefix: Some("global".to_string()),
            },
            ..PartialConfig::default()
        };
        let project = PartialConfig {
            threads: PartialThreadConfig {
                name_prefix: Some("project".to_string()),
            },
            ..PartialConfig::default()
        };

        let merged = Config::default().merge(global).merge(project);
        assert_eq!(merged.threads.name_prefix, "project");
    }
}
