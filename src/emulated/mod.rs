//! Userspace fixed file driver.
//!
//! Submissions go through a bounded queue to a pool of worker threads that
//! execute them against a shared [`FixedFileTable`]. Completions come back
//! on an unbounded queue, so a worker never blocks on a slow consumer.
//!
//! Completion order follows execution order, not submission order: two
//! submissions racing on different workers may complete either way round.
//! Callers that need ordering wait for one completion before submitting the
//! next, as they would with a kernel ring.

use std::ops::Range;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::completion::Cqe;
use crate::driver::IoDriver;
use crate::error::Error;
use crate::table::FixedFileTable;
use crate::types::{IoEngine, Sqe};
use crate::worker;

/// Driver that executes operations on worker threads.
pub struct EmulatedDriver {
    table: Arc<FixedFileTable>,
    sq: Option<Sender<Sqe>>,
    cq: Receiver<Cqe>,
    workers: Vec<JoinHandle<()>>,
    in_flight: Arc<AtomicUsize>,
}

impl EmulatedDriver {
    /// Create a driver with default settings.
    pub fn new() -> Result<Self, Error> {
        let config = crate::config::Config::default();
        Self::with_config(
            config.sq_entries,
            config.threads(),
            config.max_fixed_files,
            config.fixed_fd_floor,
        )
    }

    /// Create a driver.
    ///
    /// `sq_entries` bounds the submissions queued ahead of the workers.
    /// Fixed slots are backed by duplicates numbered from `fd_floor`.
    pub fn with_config(
        sq_entries: u32,
        workers: usize,
        max_fixed_files: u32,
        fd_floor: RawFd,
    ) -> Result<Self, Error> {
        if sq_entries == 0 {
            return Err(Error::InvalidArgument(
                "sq_entries must be at least 1".to_string(),
            ));
        }
        worker::ensure_nofile_limit(fd_floor, max_fixed_files)?;

        let table = Arc::new(FixedFileTable::new(fd_floor, max_fixed_files));
        let (sq_tx, sq_rx) = crossbeam_channel::bounded(sq_entries as usize);
        let (cq_tx, cq_rx) = crossbeam_channel::unbounded();
        let threads = workers.max(1);
        let handles = worker::launch(threads, table.clone(), sq_rx, cq_tx)?;

        tracing::debug!(
            sq_entries,
            workers = threads,
            max_fixed_files,
            fd_floor,
            "emulated driver started"
        );

        Ok(Self {
            table,
            sq: Some(sq_tx),
            cq: cq_rx,
            workers: handles,
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// The fixed file table shared with the workers.
    pub fn table(&self) -> &Arc<FixedFileTable> {
        &self.table
    }

    /// A handle that submits from other threads.
    ///
    /// Completions for its submissions are still consumed through this
    /// driver.
    pub fn submitter(&self) -> Result<Submitter, Error> {
        let sq = self.sq.clone().ok_or(Error::Shutdown)?;
        Ok(Submitter {
            sq,
            in_flight: self.in_flight.clone(),
        })
    }

    /// Stop accepting submissions, let the workers drain the queue and join
    /// them.
    ///
    /// Outstanding [`Submitter`]s keep the queue open, so drop them first.
    /// Completions produced while draining stay readable through
    /// [`IoDriver::peek_cqe`].
    pub fn shutdown(&mut self) -> Result<(), Error> {
        drop(self.sq.take());
        let mut panicked = 0;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            tracing::error!(panicked, "workers panicked");
            return Err(Error::Shutdown);
        }
        tracing::debug!("emulated driver shut down");
        Ok(())
    }

    fn consumed(&self, cqe: Cqe) -> Cqe {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        cqe
    }
}

impl Drop for EmulatedDriver {
    fn drop(&mut self) {
        // Workers may be parked in a blocking read; dropping the queue lets
        // them exit once it returns, without making drop wait for that.
        drop(self.sq.take());
    }
}

impl IoDriver for EmulatedDriver {
    fn register_files(&mut self, fds: &[RawFd]) -> Result<(), Error> {
        self.table.register(fds)
    }

    fn register_files_sparse(&mut self, count: u32) -> Result<(), Error> {
        self.table.register_sparse(count)
    }

    fn register_files_update(&mut self, offset: u32, fds: &[RawFd]) -> Result<u32, Error> {
        self.table.update(offset, fds)
    }

    fn unregister_files(&mut self) -> Result<(), Error> {
        self.table.unregister()
    }

    fn unregister_range(&mut self, range: Range<u32>) -> Result<(), Error> {
        self.table.unregister_range(range)?;
        Ok(())
    }

    fn submit(&mut self, sqe: Sqe) -> Result<(), Error> {
        let sq = self.sq.as_ref().ok_or(Error::Shutdown)?;
        push(sq, &self.in_flight, sqe)
    }

    fn wait_cqe(&mut self) -> Result<Cqe, Error> {
        let cqe = self.cq.recv().map_err(|_| Error::Shutdown)?;
        Ok(self.consumed(cqe))
    }

    fn wait_cqe_timeout(&mut self, timeout: Duration) -> Result<Option<Cqe>, Error> {
        match self.cq.recv_timeout(timeout) {
            Ok(cqe) => Ok(Some(self.consumed(cqe))),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Shutdown),
        }
    }

    fn peek_cqe(&mut self) -> Option<Cqe> {
        self.cq.try_recv().ok().map(|cqe| self.consumed(cqe))
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    fn engine(&self) -> IoEngine {
        IoEngine::Emulated
    }
}

/// Cloneable submission handle for an [`EmulatedDriver`].
#[derive(Clone)]
pub struct Submitter {
    sq: Sender<Sqe>,
    in_flight: Arc<AtomicUsize>,
}

impl Submitter {
    /// Queue an operation; see [`IoDriver::submit`].
    pub fn submit(&self, sqe: Sqe) -> Result<(), Error> {
        push(&self.sq, &self.in_flight, sqe)
    }
}

fn push(sq: &Sender<Sqe>, in_flight: &AtomicUsize, sqe: Sqe) -> Result<(), Error> {
    // Count before sending so a fast worker can't complete it first.
    in_flight.fetch_add(1, Ordering::AcqRel);
    match sq.try_send(sqe) {
        Ok(()) => Ok(()),
        Err(e) => {
            in_flight.fetch_sub(1, Ordering::AcqRel);
            match e {
                TrySendError::Full(_) => Err(Error::SubmissionQueueFull),
                TrySendError::Disconnected(_) => Err(Error::Shutdown),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::pipe;
    use crate::types::INSTALL_CLOEXEC;
    use std::os::fd::AsRawFd;

    fn driver() -> EmulatedDriver {
        EmulatedDriver::with_config(8, 2, 16, 128).unwrap()
    }

    #[test]
    fn test_nop_round_trip() {
        let mut driver = driver();
        driver.submit(Sqe::nop().user_data(7)).unwrap();
        assert_eq!(driver.in_flight(), 1);
        let cqe = driver.wait_cqe().unwrap();
        assert_eq!(cqe.user_data(), 7);
        assert_eq!(cqe.res(), 0);
        assert_eq!(driver.in_flight(), 0);
        assert_eq!(driver.engine(), IoEngine::Emulated);
    }

    #[test]
    fn test_install_through_driver() {
        let mut driver = driver();
        let (rd, _wr) = pipe();
        driver.register_files(&[rd.as_raw_fd()]).unwrap();

        driver
            .submit(Sqe::fixed_fd_install(0, INSTALL_CLOEXEC).user_data(1))
            .unwrap();
        let cqe = driver.wait_cqe().unwrap();
        let fd = cqe.result().unwrap() as RawFd;
        assert!(crate::regular::is_open(fd));
        assert!(crate::regular::is_cloexec(fd).unwrap());
        crate::regular::close(fd).unwrap();
    }

    #[test]
    fn test_peek_and_timeout_when_idle() {
        let mut driver = driver();
        assert!(driver.peek_cqe().is_none());
        assert!(
            driver
                .wait_cqe_timeout(Duration::from_millis(10))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_submitter_shares_in_flight() {
        let mut driver = driver();
        let submitter = driver.submitter().unwrap();
        std::thread::spawn(move || submitter.submit(Sqe::nop().user_data(3)))
            .join()
            .unwrap()
            .unwrap();
        let cqe = driver.wait_cqe().unwrap();
        assert_eq!(cqe.user_data(), 3);
        assert_eq!(driver.in_flight(), 0);
    }

    #[test]
    fn test_shutdown() {
        let mut driver = driver();
        driver.submit(Sqe::nop().user_data(1)).unwrap();
        driver.shutdown().unwrap();
        assert!(matches!(
            driver.submit(Sqe::nop()),
            Err(Error::Shutdown)
        ));
        assert!(matches!(driver.submitter(), Err(Error::Shutdown)));
        assert_eq!(driver.peek_cqe().map(|c| c.user_data()), Some(1));
        assert!(matches!(driver.wait_cqe(), Err(Error::Shutdown)));
    }

    #[test]
    fn test_zero_sq_entries_rejected() {
        assert!(matches!(
            EmulatedDriver::with_config(0, 1, 16, 128),
            Err(Error::InvalidArgument(_))
        ));
    }
}
