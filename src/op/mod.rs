//! Operation execution.
//!
//! Every submission turns into exactly one [`Cqe`]. Failures never escape as
//! Rust errors; they become a negated errno in the completion.

mod close;
mod install;
mod rw;
mod update;

pub use install::{InstallRequest, InstallStage};

use std::os::fd::RawFd;
use std::sync::Arc;

use crate::completion::{Cqe, CqeData};
use crate::error::OpError;
use crate::file::OpenFile;
use crate::table::FixedFileTable;
use crate::types::{Opcode, Sqe};

/// Success value and extra completion data.
pub(crate) type OpResult = Result<(u32, CqeData), OpError>;

/// Run one submission against `table` and build its completion.
pub fn execute(table: &FixedFileTable, sqe: Sqe) -> Cqe {
    let Sqe {
        opcode,
        fd,
        flags,
        user_data,
    } = sqe;
    let fixed = flags.contains(crate::types::SqeFlags::FIXED_FILE);
    let name = opcode.name();

    let result = match opcode {
        Opcode::Nop => Ok((0, CqeData::None)),
        Opcode::Read { len, offset } => rw::read(table, fd, fixed, len, offset),
        Opcode::Write { data, offset } => rw::write(table, fd, fixed, &data, offset),
        Opcode::FixedFdInstall { flags, reserved } => install::run(
            table,
            InstallRequest {
                source_index: fd,
                flags,
                reserved,
            },
            fixed,
        ),
        Opcode::CloseDirect => close::close_direct(table, fd, fixed),
        Opcode::Close => close::close(fd, fixed),
        Opcode::FilesUpdate { offset, fds } => update::files_update(table, offset, &fds),
    };

    match &result {
        Ok((value, _)) => tracing::trace!(op = name, fd, fixed, user_data, res = value, "complete"),
        Err(e) => tracing::debug!(op = name, fd, fixed, user_data, errno = e.errno(), "failed"),
    }

    Cqe::from_result(user_data, result)
}

/// Where a descriptor-bearing operation sends its I/O.
#[derive(Debug)]
pub(crate) enum Target {
    /// A fixed slot's file, kept alive for the operation's duration.
    Fixed(Arc<OpenFile>),
    /// A regular descriptor, owned by the process table.
    Regular(RawFd),
}

/// Resolve `fd` in the namespace selected by the fixed tag.
///
/// A fixed-tagged lookup never falls back to the regular table, and a
/// regular lookup never lands on one of the fixed table's private
/// duplicates.
pub(crate) fn resolve(table: &FixedFileTable, fd: i32, fixed: bool) -> Result<Target, OpError> {
    if fixed {
        return table
            .lookup(fd)
            .map(Target::Fixed)
            .map_err(|_| OpError::BadDescriptor);
    }
    if fd < 0 || table.is_shadow(fd) {
        return Err(OpError::BadDescriptor);
    }
    Ok(Target::Regular(fd))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::pipe;
    use crate::types::SqeFlags;
    use std::os::fd::AsRawFd;

    #[test]
    fn test_nop() {
        let table = FixedFileTable::new(64, 16);
        let cqe = execute(&table, Sqe::nop().user_data(42));
        assert_eq!(cqe.user_data(), 42);
        assert_eq!(cqe.res(), 0);
    }

    #[test]
    fn test_resolve_fixed_never_falls_back() {
        let table = FixedFileTable::new(64, 16);
        let (rd, _wr) = pipe();
        // A valid regular descriptor number is not a valid fixed slot.
        assert!(matches!(
            resolve(&table, rd.as_raw_fd(), true),
            Err(OpError::BadDescriptor)
        ));
        assert!(matches!(
            resolve(&table, rd.as_raw_fd(), false),
            Ok(Target::Regular(_))
        ));
    }

    #[test]
    fn test_resolve_regular_skips_shadow() {
        let table = FixedFileTable::new(64, 16);
        let (rd, _wr) = pipe();
        table.register(&[rd.as_raw_fd()]).unwrap();
        let shadow = table.lookup(0).unwrap().as_raw_fd();

        assert!(matches!(
            resolve(&table, shadow, false),
            Err(OpError::BadDescriptor)
        ));
        assert!(matches!(resolve(&table, 0, true), Ok(Target::Fixed(_))));
    }

    #[test]
    fn test_execute_fixed_read() {
        let table = FixedFileTable::new(64, 16);
        let (rd, wr) = pipe();
        table.register(&[rd.as_raw_fd()]).unwrap();
        crate::file::write_raw(wr.as_raw_fd(), b"Hello", None).unwrap();

        let cqe = execute(&table, Sqe::read(0, 32).flags(SqeFlags::FIXED_FILE));
        assert_eq!(cqe.res(), 5);
        assert_eq!(cqe.buf(), Some(&b"Hello"[..]));
    }
}
