//! io_uring backed fixed file driver.
//!
//! Uses the kernel's own fixed file table: registration goes through
//! `io_uring_register`, and installs, direct closes and reads run as ring
//! operations. Requires Linux 6.8+ for `IORING_OP_FIXED_FD_INSTALL`.
//!
//! Buffers for in-flight operations live in a slab keyed by the kernel
//! user_data, so they stay put until the completion is reaped.

use std::collections::VecDeque;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use io_uring::opcode;
use io_uring::types::{Fd, Fixed, SubmitArgs, Timespec};
use io_uring::{IoUring, Probe, cqueue, squeue};
use slab::Slab;

use crate::completion::{Cqe, CqeData};
use crate::driver::IoDriver;
use crate::error::{Error, OpError};
use crate::op::InstallRequest;
use crate::types::{FILE_INDEX_ALLOC, IoEngine, MAX_RW_LEN, Opcode, Sqe};

/// `install_fd_flags` bit asking for a descriptor without close-on-exec.
const IORING_FIXED_FD_NO_CLOEXEC: u32 = 1 << 0;

/// Read and write offset meaning "use the file position".
const CURRENT_POSITION: u64 = u64::MAX;

/// State kept alive until an operation's completion is reaped.
struct Pending {
    user_data: u64,
    kind: PendingKind,
}

enum PendingKind {
    Plain,
    Read(Vec<u8>),
    Write(#[allow(dead_code)] Vec<u8>),
    Update { fds: Vec<RawFd>, alloc: bool },
}

/// io_uring driver.
pub struct UringDriver {
    // Dropped first so the kernel is done with `pending` buffers.
    ring: IoUring<squeue::Entry, cqueue::Entry>,
    pending: Slab<Pending>,
    /// Completions produced without a trip through the kernel, or reaped
    /// but not yet consumed.
    ready: VecDeque<Cqe>,
    capacity: Option<u32>,
    max_fixed_files: u32,
}

impl UringDriver {
    /// Create a driver with a ring of `sq_entries` entries.
    pub fn with_config(sq_entries: u32, max_fixed_files: u32) -> Result<Self, Error> {
        if !is_supported() {
            return Err(Error::Unsupported(
                "io_uring fixed fd install requires Linux 6.8+".to_string(),
            ));
        }
        // The kernel caps a fixed table at RLIMIT_NOFILE.
        crate::worker::ensure_nofile_limit(0, max_fixed_files)?;

        let ring = IoUring::builder().build(sq_entries)?;
        tracing::debug!(sq_entries, max_fixed_files, "io_uring driver started");

        Ok(Self {
            ring,
            pending: Slab::with_capacity(sq_entries as usize),
            ready: VecDeque::new(),
            capacity: None,
            max_fixed_files,
        })
    }

    fn check_size(&self, requested: usize) -> Result<(), Error> {
        if requested as u64 > self.max_fixed_files as u64 {
            return Err(Error::TooManyFiles {
                requested: requested.min(u32::MAX as usize) as u32,
                max: self.max_fixed_files,
            });
        }
        Ok(())
    }

    fn complete_locally(&mut self, user_data: u64, error: OpError) {
        self.ready.push_back(Cqe::from_result(user_data, Err(error)));
    }

    /// Translate a submission into a ring entry, or fail it without one.
    fn prepare(&mut self, sqe: Sqe) -> Result<(usize, squeue::Entry), OpError> {
        let fixed = sqe.is_fixed();
        let Sqe {
            opcode,
            fd,
            user_data,
            ..
        } = sqe;

        let (entry, kind) = match opcode {
            Opcode::Nop => (opcode::Nop::new().build(), PendingKind::Plain),
            Opcode::Read { len, offset } => {
                let len = len.min(MAX_RW_LEN);
                let mut buf = vec![0u8; len as usize];
                let off = offset.unwrap_or(CURRENT_POSITION);
                let entry = if fixed {
                    opcode::Read::new(fixed_index(fd)?, buf.as_mut_ptr(), len)
                        .offset(off)
                        .build()
                } else {
                    opcode::Read::new(Fd(fd), buf.as_mut_ptr(), len)
                        .offset(off)
                        .build()
                };
                (entry, PendingKind::Read(buf))
            }
            Opcode::Write { data, offset } => {
                let len = u32::try_from(data.len()).map_err(|_| OpError::InvalidArgument)?;
                let off = offset.unwrap_or(CURRENT_POSITION);
                let entry = if fixed {
                    opcode::Write::new(fixed_index(fd)?, data.as_ptr(), len)
                        .offset(off)
                        .build()
                } else {
                    opcode::Write::new(Fd(fd), data.as_ptr(), len)
                        .offset(off)
                        .build()
                };
                (entry, PendingKind::Write(data))
            }
            Opcode::FixedFdInstall { flags, reserved } => {
                let cloexec = InstallRequest {
                    source_index: fd,
                    flags,
                    reserved,
                }
                .validate()?;
                // The opcode always carries the fixed tag; an untagged
                // request is answered here the way the kernel would.
                if !fixed {
                    return Err(OpError::BadDescriptor);
                }
                let install_flags = if cloexec {
                    0
                } else {
                    IORING_FIXED_FD_NO_CLOEXEC
                };
                let entry = opcode::FixedFdInstall::new(fixed_index(fd)?, install_flags).build();
                (entry, PendingKind::Plain)
            }
            Opcode::CloseDirect => {
                if !fixed {
                    return Err(OpError::BadDescriptor);
                }
                let entry = opcode::Close::new(fixed_index(fd)?).build();
                (entry, PendingKind::Plain)
            }
            Opcode::Close => {
                if fixed || fd < 0 {
                    return Err(OpError::BadDescriptor);
                }
                (opcode::Close::new(Fd(fd)).build(), PendingKind::Plain)
            }
            Opcode::FilesUpdate { offset, mut fds } => {
                if fds.is_empty() {
                    return Err(OpError::InvalidArgument);
                }
                let len = u32::try_from(fds.len()).map_err(|_| OpError::InvalidArgument)?;
                let alloc = offset == FILE_INDEX_ALLOC;
                let entry = opcode::FilesUpdate::new(fds.as_mut_ptr(), len)
                    .offset(offset as i32)
                    .build();
                (entry, PendingKind::Update { fds, alloc })
            }
        };

        let key = self.pending.insert(Pending { user_data, kind });
        Ok((key, entry.user_data(key as u64)))
    }

    fn push(&mut self, entry: squeue::Entry) -> Result<(), Error> {
        // SAFETY: every pointer in `entry` refers to a buffer owned by
        // `self.pending`, which outlives the operation.
        if unsafe { self.ring.submission().push(&entry) }.is_ok() {
            return Ok(());
        }
        self.ring.submit()?;
        if unsafe { self.ring.submission().push(&entry) }.is_ok() {
            return Ok(());
        }
        Err(Error::SubmissionQueueFull)
    }

    /// Move every available kernel completion into `ready`.
    fn reap(&mut self) {
        let entries: Vec<cqueue::Entry> = self.ring.completion().collect();
        for entry in entries {
            let key = entry.user_data() as usize;
            let Some(pending) = self.pending.try_remove(key) else {
                tracing::warn!(key, "completion for unknown operation");
                continue;
            };
            let res = entry.result();
            let data = match pending.kind {
                PendingKind::Read(mut buf) if res >= 0 => {
                    buf.truncate(res as usize);
                    CqeData::Buf(buf)
                }
                PendingKind::Update { fds, alloc: true } if res >= 0 => CqeData::Slots(
                    fds.into_iter()
                        .take(res as usize)
                        .map(|slot| slot as u32)
                        .collect(),
                ),
                _ => CqeData::None,
            };
            self.ready.push_back(Cqe::new(pending.user_data, res, data));
        }
    }
}

fn fixed_index(index: i32) -> Result<Fixed, OpError> {
    u32::try_from(index)
        .map(Fixed)
        .map_err(|_| OpError::BadDescriptor)
}

/// Map registration failures onto the driver's error variants.
fn register_error(e: io::Error) -> Error {
    match e.raw_os_error() {
        Some(libc::EBUSY) => Error::AlreadyRegistered,
        Some(libc::ENXIO) => Error::NotRegistered,
        Some(libc::EBADF) => Error::BadDescriptor(-1),
        _ => Error::Io(e),
    }
}

impl IoDriver for UringDriver {
    fn register_files(&mut self, fds: &[RawFd]) -> Result<(), Error> {
        if fds.is_empty() {
            return Err(Error::InvalidArgument("empty file set".to_string()));
        }
        self.check_size(fds.len())?;
        self.ring
            .submitter()
            .register_files(fds)
            .map_err(register_error)?;
        self.capacity = Some(fds.len() as u32);
        tracing::debug!(count = fds.len(), "registered fixed files");
        Ok(())
    }

    fn register_files_sparse(&mut self, count: u32) -> Result<(), Error> {
        if count == 0 {
            return Err(Error::InvalidArgument("empty file set".to_string()));
        }
        self.check_size(count as usize)?;
        self.ring
            .submitter()
            .register_files_sparse(count)
            .map_err(register_error)?;
        self.capacity = Some(count);
        tracing::debug!(count, "registered sparse fixed files");
        Ok(())
    }

    fn register_files_update(&mut self, offset: u32, fds: &[RawFd]) -> Result<u32, Error> {
        let capacity = self.capacity.ok_or(Error::NotRegistered)?;
        let end = offset as u64 + fds.len() as u64;
        if end > capacity as u64 {
            return Err(Error::SlotOutOfRange {
                offset,
                end,
                capacity,
            });
        }
        let updated = self
            .ring
            .submitter()
            .register_files_update(offset, fds)
            .map_err(register_error)?;
        Ok(updated as u32)
    }

    fn unregister_files(&mut self) -> Result<(), Error> {
        if self.capacity.is_none() {
            return Err(Error::NotRegistered);
        }
        self.ring
            .submitter()
            .unregister_files()
            .map_err(register_error)?;
        self.capacity = None;
        tracing::debug!("unregistered fixed files");
        Ok(())
    }

    fn submit(&mut self, sqe: Sqe) -> Result<(), Error> {
        let user_data = sqe.user_data;
        match self.prepare(sqe) {
            Ok((key, entry)) => {
                if let Err(e) = self.push(entry) {
                    self.pending.try_remove(key);
                    return Err(e);
                }
                self.ring.submit()?;
            }
            Err(e) => self.complete_locally(user_data, e),
        }
        Ok(())
    }

    fn wait_cqe(&mut self) -> Result<Cqe, Error> {
        loop {
            if let Some(cqe) = self.ready.pop_front() {
                return Ok(cqe);
            }
            match self.ring.submit_and_wait(1) {
                Ok(_) => {}
                Err(e) if e.raw_os_error() == Some(libc::EINTR) => {}
                Err(e) => return Err(e.into()),
            }
            self.reap();
        }
    }

    fn wait_cqe_timeout(&mut self, timeout: Duration) -> Result<Option<Cqe>, Error> {
        if self.ready.is_empty() {
            self.reap();
        }
        if let Some(cqe) = self.ready.pop_front() {
            return Ok(Some(cqe));
        }

        let ts = Timespec::new()
            .sec(timeout.as_secs())
            .nsec(timeout.subsec_nanos());
        let args = SubmitArgs::new().timespec(&ts);
        match self.ring.submitter().submit_with_args(1, &args) {
            Ok(_) => {}
            Err(e) if matches!(e.raw_os_error(), Some(libc::ETIME | libc::EINTR)) => {}
            Err(e) => return Err(e.into()),
        }
        self.reap();
        Ok(self.ready.pop_front())
    }

    fn peek_cqe(&mut self) -> Option<Cqe> {
        if self.ready.is_empty() {
            self.reap();
        }
        self.ready.pop_front()
    }

    fn in_flight(&self) -> usize {
        self.pending.len() + self.ready.len()
    }

    fn engine(&self) -> IoEngine {
        IoEngine::Uring
    }
}

/// Check if the kernel supports fixed fd install through io_uring.
pub fn is_supported() -> bool {
    match IoUring::<squeue::Entry, cqueue::Entry>::builder().build(8) {
        Ok(ring) => {
            let mut probe = Probe::new();
            if ring.submitter().register_probe(&mut probe).is_err() {
                return false;
            }
            // FIXED_FD_INSTALL arrived in 6.8, after everything else we use.
            probe.is_supported(opcode::FixedFdInstall::CODE)
        }
        Err(_) => false,
    }
}
