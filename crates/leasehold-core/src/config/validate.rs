//! Configuration validation

use super::types::Config;
use crate::{Error, Result};

impl Config {
    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any values are out of range or invalid
    pub fn validate(&self) -> Result<()> {
        if self.parallelism.max_workers == 0 {
            return Err(Error::invalid_config(
                "parallelism.max_workers must be at least 1",
            ));
        }

        if self.queue.max_workers == Some(0) {
            return Err(Error::invalid_config(
                "queue.max_workers must be at least 1 - unset it to follow parallelism.max_workers",
            ));
        }

        if self.threads.name_prefix.trim().is_empty() {
            return Err(Error::invalid_config("threads.name_prefix cannot be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_max_workers_rejected() {
        let mut config = Config::default();
        config.parallelism.max_workers = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_queue_workers_rejected() {
        let mut config = Config::default();
        config.queue.max_workers = Some(0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_blank_thread_prefix_rejected() {
        let mut config = Config::default();
        config.threads.name_prefix = "   ".to_string();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
