//! Loading-focused tests for configuration
//!
//! Tests for configuration file loading, parsing, layering, and environment overrides.

#[cfg(test)]
mod loading_tests {
    use std::io::Write;

    use serial_test::serial;

    use crate::config::{
        load_config_from, load_toml_file, project_config_path, Config, ENV_MAX_WORKERS,
        ENV_PARALLEL_PROJECTS, ENV_QUEUE_MAX_WORKERS, ENV_THREAD_PREFIX,
    };
    use crate::{Error, Result};

    const ALL_ENV: [&str; 4] = [
        ENV_MAX_WORKERS,
        ENV_PARALLEL_PROJECTS,
        ENV_QUEUE_MAX_WORKERS,
        ENV_THREAD_PREFIX,
    ];

    fn clear_env() {
        for key in ALL_ENV {
            std::env::remove_var(key);
        }
    }

    fn write_file(path: &std::path::Path, content: &str) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }

    #[test]
    #[serial]
    fn test_project_file_overrides_defaults() -> Result<()> {
        clear_env();
        let temp_dir = tempfile::tempdir()?;
        write_file(
            &project_config_path(temp_dir.path()),
            "[parallelism]\nmax_workers = 3\nparallel_projects = false\n",
        )?;

        let config = load_config_from(temp_dir.path())?;

        assert_eq!(config.parallelism.max_workers, 3);
        assert!(!config.parallelism.parallel_projects);
        assert_eq!(config.queue_max_workers(), 3);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_env_overrides_project_file() -> Result<()> {
        clear_env();
        let temp_dir = tempfile::tempdir()?;
        write_file(
            &project_config_path(temp_dir.path()),
            "[parallelism]\nmax_workers = 3\n",
        )?;

        std::env::set_var(ENV_MAX_WORKERS, "6");
        std::env::set_var(ENV_QUEUE_MAX_WORKERS, "2");
        std::env::set_var(ENV_THREAD_PREFIX, "ci");
        let config = load_config_from(temp_dir.path());
        clear_env();

        let config = config?;
        assert_eq!(config.parallelism.max_workers, 6);
        assert_eq!(config.queue_max_workers(), 2);
        assert_eq!(config.threads.name_prefix, "ci");
        Ok(())
    }

    #[test]
    #[serial]
    fn test_invalid_env_value_is_rejected() -> Result<()> {
        clear_env();
        let temp_dir = tempfile::tempdir()?;

        std::env::set_var(ENV_PARALLEL_PROJECTS, "sometimes");
        let result = load_config_from(temp_dir.path());
        clear_env();

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        Ok(())
    }

    #[test]
    #[serial]
    fn test_env_zero_workers_fails_validation() -> Result<()> {
        clear_env();
        let temp_dir = tempfile::tempdir()?;

        std::env::set_var(ENV_MAX_WORKERS, "0");
        let result = load_config_from(temp_dir.path());
        clear_env();

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        Ok(())
    }

    #[test]
    fn test_overrides_from_lookup() -> Result<()> {
        let config = Config::default().apply_env_overrides(|key| match key {
            ENV_MAX_WORKERS => Some(" 4 ".to_string()),
            ENV_PARALLEL_PROJECTS => Some("false".to_string()),
            _ => None,
        })?;

        assert_eq!(config.parallelism.max_workers, 4);
        assert!(!config.parallelism.parallel_projects);
        Ok(())
    }

    #[test]
    fn test_empty_thread_prefix_env_rejected() {
        let result = Config::default().apply_env_overrides(|key| {
            (key == ENV_THREAD_PREFIX).then(String::new)
        });
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_malformed_toml_returns_parse_error() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("bad_config.toml");
        write_file(&config_path, "max_workers = \n invalid toml [[[")?;

        let result = load_toml_file(&config_path);
        assert!(
            matches!(&result, Err(Error::InvalidConfig(msg)) if msg.contains("Failed to parse"))
        );
        Ok(())
    }

    #[test]
    fn test_unknown_key_is_rejected() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("typo.toml");
        write_file(&config_path, "[parallelism]\nmax_worker = 2\n")?;

        assert!(load_toml_file(&config_path).is_err());
        Ok(())
    }

    #[test]
    fn test_directory_path_is_rejected() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let result = load_toml_file(temp_dir.path());
        assert!(matches!(result, Err(Error::Io(_))));
        Ok(())
    }

    #[test]
    fn test_project_config_path() {
        let path = project_config_path(std::path::Path::new("/work/app"));
        assert!(path.ends_with("leasehold.toml"));
    }
}
