//! I/O driver trait definition.

use std::ops::Range;
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::io::RawFd;

use crate::completion::Cqe;
use crate::error::Error;
use crate::types::{IoEngine, Sqe};

/// Driver trait - abstracts over the emulated and kernel backends.
///
/// Both backends own a fixed file table and speak the same submission
/// vocabulary. Results of submitted operations arrive only as completions.
///
/// # Usage Pattern
///
/// ```ignore
/// let mut driver = Driver::new()?;
///
/// driver.register_files(&[read_end])?;
///
/// driver.submit(Sqe::fixed_fd_install(0, INSTALL_CLOEXEC).user_data(1))?;
/// let cqe = driver.wait_cqe()?;
/// let fd = cqe.result()?;
///
/// driver.submit(Sqe::close_direct(0).user_data(2))?;
/// assert_eq!(driver.wait_cqe()?.res(), 0);
/// ```
pub trait IoDriver: Send {
    // === Fixed file table ===

    /// Register a fixed file table with one slot per descriptor.
    ///
    /// Each slot takes its own reference to the descriptor's open file
    /// description; the caller's descriptors stay open and independent.
    /// `-1` leaves a slot empty.
    fn register_files(&mut self, fds: &[RawFd]) -> Result<(), Error>;

    /// Register a fixed file table of `count` empty slots.
    fn register_files_sparse(&mut self, count: u32) -> Result<(), Error>;

    /// Bind `fds[i]` to slot `offset + i`. `-1` clears a slot.
    ///
    /// Returns the number of slots updated.
    fn register_files_update(&mut self, offset: u32, fds: &[RawFd]) -> Result<u32, Error>;

    /// Release every slot and drop the table.
    fn unregister_files(&mut self) -> Result<(), Error>;

    /// Release every slot in `range`; already empty slots are skipped.
    fn unregister_range(&mut self, range: Range<u32>) -> Result<(), Error> {
        let clear = vec![-1; range.len()];
        self.register_files_update(range.start, &clear)?;
        Ok(())
    }

    // === Submission ===

    /// Queue an operation. Its outcome is reported by exactly one completion
    /// carrying the submission's `user_data`.
    fn submit(&mut self, sqe: Sqe) -> Result<(), Error>;

    // === Completion ===

    /// Block until a completion is available and consume it.
    fn wait_cqe(&mut self) -> Result<Cqe, Error>;

    /// Like `wait_cqe` but gives up after `timeout`.
    fn wait_cqe_timeout(&mut self, timeout: Duration) -> Result<Option<Cqe>, Error>;

    /// Consume a completion if one is ready.
    fn peek_cqe(&mut self) -> Option<Cqe>;

    /// Submissions whose completions have not been consumed yet.
    fn in_flight(&self) -> usize;

    /// Which backend this is.
    fn engine(&self) -> IoEngine;
}
