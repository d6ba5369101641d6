use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};

use crate::completion::Cqe;
use crate::error::Error;
use crate::op;
use crate::table::FixedFileTable;
use crate::types::Sqe;

/// Spawn `threads` workers that execute submissions against `table`.
///
/// Workers exit once every submission sender is dropped and the queue is
/// drained, or when the completion receiver goes away.
pub(crate) fn launch(
    threads: usize,
    table: Arc<FixedFileTable>,
    sq_rx: Receiver<Sqe>,
    cq_tx: Sender<Cqe>,
) -> Result<Vec<thread::JoinHandle<()>>, Error> {
    let mut handles = Vec::with_capacity(threads);

    for worker_id in 0..threads {
        let table = table.clone();
        let sq_rx = sq_rx.clone();
        let cq_tx = cq_tx.clone();

        let handle = thread::Builder::new()
            .name(format!("fixed-fd-worker-{worker_id}"))
            .spawn(move || run(worker_id, &table, sq_rx, cq_tx))
            .map_err(Error::Io)?;

        handles.push(handle);
    }

    Ok(handles)
}

fn run(worker_id: usize, table: &FixedFileTable, sq_rx: Receiver<Sqe>, cq_tx: Sender<Cqe>) {
    tracing::debug!(worker_id, "worker started");
    while let Ok(sqe) = sq_rx.recv() {
        let cqe = op::execute(table, sqe);
        if cq_tx.send(cqe).is_err() {
            break;
        }
    }
    tracing::debug!(worker_id, "worker stopped");
}

/// Ensure RLIMIT_NOFILE leaves room for the fixed table's duplicates.
///
/// Duplicates are numbered from `fd_floor` upward, so the soft limit must
/// exceed the floor for any registration to work at all, and should cover
/// `fd_floor + max_files` for a full table. The first is an error, the
/// second only a warning: small tables still work.
pub(crate) fn ensure_nofile_limit(fd_floor: RawFd, max_files: u32) -> Result<(), Error> {
    let mut rlim: libc::rlimit = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rlim) };
    if ret != 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }

    // Headroom for stdio, pipes and the caller's own descriptors.
    let overhead: u64 = 64;
    let minimum = fd_floor as u64 + overhead;
    let wanted = fd_floor as u64 + max_files as u64 + overhead;

    let soft = rlim.rlim_cur;
    let hard = rlim.rlim_max;

    if soft >= wanted {
        return Ok(());
    }

    let target = if hard == libc::RLIM_INFINITY {
        wanted
    } else {
        std::cmp::min(wanted, hard)
    };

    if target < minimum {
        return Err(Error::ResourceLimit(format!(
            "RLIMIT_NOFILE too low: fixed files start at {} but hard limit is {} (soft: {}). \
             Raise it with: ulimit -n {}",
            fd_floor, hard, soft, wanted
        )));
    }

    if target > soft {
        rlim.rlim_cur = target;
        let ret = unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &rlim) };
        if ret != 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        tracing::info!(from = soft, to = target, "raised RLIMIT_NOFILE");
    }

    if target < wanted {
        tracing::warn!(
            limit = target,
            wanted,
            "RLIMIT_NOFILE caps the fixed file table below max_fixed_files"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_nofile_limit_small() {
        ensure_nofile_limit(64, 16).unwrap();
        let mut rlim: libc::rlimit = unsafe { std::mem::zeroed() };
        assert_eq!(unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rlim) }, 0);
        assert!(rlim.rlim_cur >= 64 + 64);
    }

    #[test]
    fn test_ensure_nofile_limit_impossible_floor() {
        let err = ensure_nofile_limit(RawFd::MAX - 128, 16).unwrap_err();
        assert!(matches!(err, Error::ResourceLimit(_)));
    }

    #[test]
    fn test_workers_drain_and_exit() {
        let table = Arc::new(FixedFileTable::new(64, 16));
        let (sq_tx, sq_rx) = crossbeam_channel::unbounded();
        let (cq_tx, cq_rx) = crossbeam_channel::unbounded();
        let handles = launch(2, table, sq_rx, cq_tx).unwrap();

        for i in 0..10 {
            sq_tx.send(Sqe::nop().user_data(i)).unwrap();
        }
        drop(sq_tx);
        for handle in handles {
            handle.join().unwrap();
        }

        let mut seen: Vec<u64> = cq_rx.try_iter().map(|cqe| cqe.user_data()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }
}
