//! Driver builder with fluent API.

use std::os::fd::RawFd;

use crate::config::{Config, MAX_FIXED_FILES_LIMIT};
use crate::driver::IoDriver;
use crate::error::Error;
use crate::types::IoEngine;

/// Builder for creating a fixed file driver with custom configuration.
///
/// # Example
///
/// ```ignore
/// use fixed_fd::{Driver, IoEngine};
///
/// let driver = Driver::builder()
///     .engine(IoEngine::Emulated)
///     .workers(2)
///     .max_fixed_files(64)
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct DriverBuilder {
    engine: IoEngine,
    sq_entries: u32,
    workers: usize,
    max_fixed_files: u32,
    fixed_fd_floor: RawFd,
}

impl Default for DriverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::from_config(&Config::default())
    }

    /// Start from a loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            engine: config.engine,
            sq_entries: config.sq_entries,
            workers: config.threads(),
            max_fixed_files: config.max_fixed_files,
            fixed_fd_floor: config.fixed_fd_floor,
        }
    }

    /// Set the backend.
    ///
    /// - `Auto`: kernel fixed fd install when available, else emulated (default)
    /// - `Emulated`: in-process table and worker pool
    /// - `Uring`: io_uring (Linux with the `io_uring` feature)
    pub fn engine(mut self, engine: IoEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Set the submission queue depth.
    ///
    /// Default: 256
    pub fn sq_entries(mut self, entries: u32) -> Self {
        self.sq_entries = entries;
        self
    }

    /// Set the number of worker threads.
    ///
    /// Only applies to the emulated backend.
    /// Default: 4
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the largest fixed file table that may be registered.
    ///
    /// Default: 1024
    pub fn max_fixed_files(mut self, max: u32) -> Self {
        self.max_fixed_files = max;
        self
    }

    /// Set the lowest descriptor number used for slot duplicates.
    ///
    /// Only applies to the emulated backend.
    /// Default: 512
    pub fn fixed_fd_floor(mut self, floor: RawFd) -> Self {
        self.fixed_fd_floor = floor;
        self
    }

    /// Build the driver with the configured settings.
    pub fn build(self) -> Result<Box<dyn IoDriver>, Error> {
        self.validate()?;
        match self.engine {
            IoEngine::Auto => {
                #[cfg(all(target_os = "linux", feature = "io_uring"))]
                {
                    if crate::uring::is_supported() {
                        return self.build_uring();
                    }
                    tracing::debug!("kernel lacks fixed fd install, using emulated driver");
                }
                self.build_emulated()
            }
            IoEngine::Emulated => self.build_emulated(),
            IoEngine::Uring => {
                #[cfg(all(target_os = "linux", feature = "io_uring"))]
                {
                    if !crate::uring::is_supported() {
                        return Err(Error::Unsupported(
                            "io_uring fixed fd install requires Linux 6.8+".to_string(),
                        ));
                    }
                    self.build_uring()
                }
                #[cfg(not(all(target_os = "linux", feature = "io_uring")))]
                {
                    Err(Error::Unsupported(
                        "io_uring is only available on Linux with the io_uring feature"
                            .to_string(),
                    ))
                }
            }
        }
    }

    fn validate(&self) -> Result<(), Error> {
        if self.sq_entries == 0 {
            return Err(Error::InvalidArgument(
                "sq_entries must be at least 1".to_string(),
            ));
        }
        if self.max_fixed_files == 0 || self.max_fixed_files > MAX_FIXED_FILES_LIMIT {
            return Err(Error::InvalidArgument(format!(
                "max_fixed_files must be between 1 and {}",
                MAX_FIXED_FILES_LIMIT
            )));
        }
        if self.fixed_fd_floor < 3 {
            return Err(Error::InvalidArgument(
                "fixed_fd_floor must be at least 3".to_string(),
            ));
        }
        Ok(())
    }

    fn build_emulated(self) -> Result<Box<dyn IoDriver>, Error> {
        Ok(Box::new(crate::emulated::EmulatedDriver::with_config(
            self.sq_entries,
            self.workers,
            self.max_fixed_files,
            self.fixed_fd_floor,
        )?))
    }

    #[cfg(all(target_os = "linux", feature = "io_uring"))]
    fn build_uring(self) -> Result<Box<dyn IoDriver>, Error> {
        Ok(Box::new(crate::uring::UringDriver::with_config(
            self.sq_entries,
            self.max_fixed_files,
        )?))
    }
}
