//! Loading of the parallelism, queue and thread settings.
//!
//! Each layer is read into a `PartialConfig` and merged over the previous
//! result; nothing is mutated in place.

use std::path::{Path, PathBuf};

use super::types::{Config, PartialConfig};
use crate::{Error, Result};

pub const ENV_MAX_WORKERS: &str = "LEASEHOLD_MAX_WORKERS";
pub const ENV_PARALLEL_PROJECTS: &str = "LEASEHOLD_PARALLEL_PROJECTS";
pub const ENV_QUEUE_MAX_WORKERS: &str = "LEASEHOLD_QUEUE_MAX_WORKERS";
pub const ENV_THREAD_PREFIX: &str = "LEASEHOLD_THREAD_PREFIX";

const PROJECT_CONFIG_FILE: &str = "leasehold.toml";

// ═══════════════════════════════════════════════════════════════════════════
// PUBLIC API
// ═══════════════════════════════════════════════════════════════════════════

/// Load configuration for the project in the current directory.
///
/// # Errors
///
/// Returns error if:
/// - The current directory cannot be determined
/// - A config file is malformed TOML
/// - Config values fail validation
pub fn load_config() -> Result<Config> {
    let project_dir = std::env::current_dir()
        .map_err(|e| Error::io_error(format!("Failed to get current directory: {e}")))?;
    load_config_from(&project_dir)
}

/// Load configuration for the project rooted at `project_dir`.
///
/// # Errors
///
/// Same as [`load_config`].
pub fn load_config_from(project_dir: &Path) -> Result<Config> {
    // 1. Start with built-in defaults
    let config = Config::default();

    // 2. Global config if it exists
    let config = match global_config_path() {
        Some(path) if path.exists() => config.merge(load_toml_file(&path)?),
        _ => config,
    };

    // 3. Project config if it exists
    let project_path = project_config_path(project_dir);
    let config = if project_path.exists() {
        config.merge(load_toml_file(&project_path)?)
    } else {
        config
    };

    // 4. Environment variable overrides
    let config = config.apply_env_vars()?;

    // 5. Validate
    config.validate()?;
    tracing::debug!(?config, "loaded configuration");
    Ok(config)
}

// ═══════════════════════════════════════════════════════════════════════════
// PATH HELPERS
// ═══════════════════════════════════════════════════════════════════════════

/// Get path to global config file
pub fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "leasehold")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Get path to the config file of the project rooted at `project_dir`
pub fn project_config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(PROJECT_CONFIG_FILE)
}

/// Load one config file as a partial layer
///
/// # Errors
///
/// Returns error if:
/// - Path is a directory instead of a file
/// - File cannot be read
/// - TOML is malformed or has unknown keys
pub fn load_toml_file(path: &Path) -> Result<PartialConfig> {
    if path.is_dir() {
        return Err(Error::io_error(format!(
            "Config path is a directory, not a file: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::io_error(format!(
            "Failed to read config file {}: {e}",
            path.display()
        ))
    })?;

    toml::from_str(&content).map_err(|e| {
        Error::invalid_config(format!(
            "Failed to parse config file {}: {e}",
            path.display()
        ))
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// ENVIRONMENT VARIABLE OVERRIDES (Immutable pattern)
// ═══════════════════════════════════════════════════════════════════════════

impl Config {
    /// Apply `LEASEHOLD_*` environment variable overrides
    ///
    /// # Errors
    ///
    /// Returns error if environment variable values are invalid
    pub fn apply_env_vars(self) -> Result<Self> {
        self.apply_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up by environment variable name
    ///
    /// # Errors
    ///
    /// Returns error if a value cannot be parsed
    pub fn apply_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MAX_WORKERS) {
            self.parallelism.max_workers = parse_env(ENV_MAX_WORKERS, &value)?;
        }

        if let Some(value) = lookup(ENV_PARALLEL_PROJECTS) {
            self.parallelism.parallel_projects = parse_env(ENV_PARALLEL_PROJECTS, &value)?;
        }

        if let Some(value) = lookup(ENV_QUEUE_MAX_WORKERS) {
            self.queue.max_workers = Some(parse_env(ENV_QUEUE_MAX_WORKERS, &value)?);
        }

        if let Some(value) = lookup(ENV_THREAD_PREFIX) {
            if value.is_empty() {
                return Err(Error::invalid_config(format!(
                    "{ENV_THREAD_PREFIX} cannot be empty - unset the variable or provide a prefix"
                )));
            }
            self.threads.name_prefix = value;
        }

        Ok(self)
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::invalid_config(format!("Invalid {key} value '{value}': {e}")))
}
