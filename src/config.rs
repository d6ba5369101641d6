//! Driver configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.

use serde::Deserialize;
use std::os::fd::RawFd;
use std::path::Path;

use crate::error::Error;
use crate::types::IoEngine;

/// Upper bound on fixed table size, matching the kernel's limit.
pub const MAX_FIXED_FILES_LIMIT: u32 = 1 << 20;

/// Driver configuration loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Backend selection: "auto", "emulated" or "uring".
    #[serde(default)]
    pub engine: IoEngine,

    /// Submissions that may be queued before `submit` reports a full queue.
    #[serde(default = "default_sq_entries")]
    pub sq_entries: u32,

    /// Worker threads executing operations (0 = number of CPUs).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Largest fixed file table that may be registered.
    #[serde(default = "default_max_fixed_files")]
    pub max_fixed_files: u32,

    /// Lowest descriptor number used for the fixed table's private
    /// duplicates. Regular descriptors below it are never shadowed.
    #[serde(default = "default_fixed_fd_floor")]
    pub fixed_fd_floor: RawFd,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: IoEngine::default(),
            sq_entries: default_sq_entries(),
            workers: default_workers(),
            max_fixed_files: default_max_fixed_files(),
            fixed_fd_floor: default_fixed_fd_floor(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_sq_entries() -> u32 {
    256
}

fn default_workers() -> usize {
    4
}

fn default_max_fixed_files() -> u32 {
    1024
}

fn default_fixed_fd_floor() -> RawFd {
    512
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(contents: &str) -> Result<Self, Error> {
        let config: Config = toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), Error> {
        if self.sq_entries == 0 {
            return Err(Error::Config("sq_entries must be at least 1".to_string()));
        }
        if self.max_fixed_files == 0 || self.max_fixed_files > MAX_FIXED_FILES_LIMIT {
            return Err(Error::Config(format!(
                "max_fixed_files must be between 1 and {}",
                MAX_FIXED_FILES_LIMIT
            )));
        }
        if self.fixed_fd_floor < 3 {
            return Err(Error::Config(
                "fixed_fd_floor must leave stdin, stdout and stderr alone".to_string(),
            ));
        }
        self.logging.validate()?;
        Ok(())
    }

    /// Worker threads to spawn, resolving 0 to the CPU count.
    pub fn threads(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.workers
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level or filter directive (e.g. "info", "fixed_fd=debug").
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include the event target (module path).
    #[serde(default = "LoggingConfig::default_true")]
    pub target: bool,

    /// Include thread names.
    #[serde(default)]
    pub thread_names: bool,

    /// Include timestamps.
    #[serde(default = "LoggingConfig::default_true")]
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            format: LogFormat::default(),
            target: true,
            thread_names: false,
            timestamps: true,
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }

    fn default_true() -> bool {
        true
    }

    fn validate(&self) -> Result<(), Error> {
        tracing_subscriber::EnvFilter::try_new(&self.level)
            .map_err(|e| Error::Config(format!("invalid log level '{}': {e}", self.level)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.engine, IoEngine::Auto);
        assert_eq!(config.sq_entries, 256);
        assert_eq!(config.workers, 4);
        assert_eq!(config.max_fixed_files, 1024);
        assert_eq!(config.fixed_fd_floor, 512);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(
            r#"
            engine = "emulated"
            sq_entries = 8
            workers = 2
            max_fixed_files = 16
            fixed_fd_floor = 100

            [logging]
            level = "debug"
            format = "json"
            timestamps = false
            "#,
        )
        .unwrap();
        assert_eq!(config.engine, IoEngine::Emulated);
        assert_eq!(config.sq_entries, 8);
        assert_eq!(config.threads(), 2);
        assert_eq!(config.max_fixed_files, 16);
        assert_eq!(config.fixed_fd_floor, 100);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(!config.logging.timestamps);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(
            Config::parse("bogus = 1"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_validate() {
        assert!(Config::parse("sq_entries = 0").is_err());
        assert!(Config::parse("max_fixed_files = 0").is_err());
        assert!(Config::parse("max_fixed_files = 2000000").is_err());
        assert!(Config::parse("fixed_fd_floor = 2").is_err());
        assert!(Config::parse("[logging]\nlevel = \"=bad=\"").is_err());
    }

    #[test]
    fn test_zero_workers_uses_cpus() {
        let config = Config::parse("workers = 0").unwrap();
        assert!(config.threads() >= 1);
    }
}
