//! fixed-fd - fixed (direct) file descriptor table with install and
//! close-direct operations.
//!
//! A fixed file table is a second descriptor namespace, separate from the
//! process's regular descriptor table. Operations address it by slot index
//! when the submission is tagged [`SqeFlags::FIXED_FILE`]. Two operations
//! cross between the namespaces:
//!
//! - **fixed fd install** binds the lowest free regular descriptor to the
//!   open file description in a slot. The new descriptor is close-on-exec
//!   only when [`INSTALL_CLOEXEC`] is passed.
//!   The slot is left as it was.
//! - **close direct** empties a slot. Regular descriptors installed from it
//!   keep working, since they hold their own reference to the description.
//!
//! Results only ever arrive as completions: a non-negative value on success,
//! a negated errno on failure.
//!
//! # Quick Start
//!
//! ```ignore
//! use fixed_fd::{Driver, Sqe, INSTALL_CLOEXEC};
//!
//! let mut driver = Driver::new()?;
//! driver.register_files(&[pipe_read_end])?;
//!
//! driver.submit(Sqe::fixed_fd_install(0, INSTALL_CLOEXEC).user_data(1))?;
//! let fd = driver.wait_cqe()?.result()? as i32;
//!
//! driver.submit(Sqe::close_direct(0).user_data(2))?;
//! driver.wait_cqe()?;
//!
//! // `fd` still reads from the pipe.
//! driver.submit(Sqe::read(fd, 64).user_data(3))?;
//! let cqe = driver.wait_cqe()?;
//! ```
//!
//! # Backend Selection
//!
//! - **Linux 6.8+ with the `io_uring` feature**: the kernel's fixed file
//!   table, driven through io_uring
//! - **Everywhere else**: an in-process table whose slots hold private
//!   duplicates, with operations executed on a worker pool
//!
//! ```ignore
//! use fixed_fd::{Driver, IoEngine};
//!
//! let driver = Driver::builder()
//!     .engine(IoEngine::Emulated)
//!     .build()?;
//! ```

mod builder;
mod completion;
mod driver;
mod error;
mod file;
mod table;
mod types;
mod worker;

pub mod config;
pub mod emulated;
pub mod logging;
pub mod op;
pub mod regular;

#[cfg(all(target_os = "linux", feature = "io_uring"))]
pub mod uring;

// Re-exports
pub use builder::DriverBuilder;
pub use completion::{Cqe, CqeData, OpTag, UserData};
pub use driver::IoDriver;
pub use error::{Error, OpError};
pub use file::{OpenFile, ShadowFds};
pub use table::FixedFileTable;
pub use types::{FILE_INDEX_ALLOC, INSTALL_CLOEXEC, IoEngine, MAX_RW_LEN, Opcode, Sqe, SqeFlags};

/// Convenience wrapper for creating drivers.
pub struct Driver;

impl Driver {
    /// Create a new driver with default settings.
    ///
    /// Automatically selects the best available backend.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Result<Box<dyn IoDriver>, Error> {
        DriverBuilder::new().build()
    }

    /// Create a builder for configuring the driver.
    pub fn builder() -> DriverBuilder {
        DriverBuilder::new()
    }
}

/// Check if the kernel fixed fd install path is available.
pub fn uring_available() -> bool {
    #[cfg(all(target_os = "linux", feature = "io_uring"))]
    {
        uring::is_supported()
    }
    #[cfg(not(all(target_os = "linux", feature = "io_uring")))]
    {
        false
    }
}
