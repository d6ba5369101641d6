//! Promote a fixed slot into a regular descriptor.
//!
//! Stages run in a fixed order: flags are validated before the table is
//! consulted, so a malformed request fails the same way whatever the table
//! holds. A failure at any stage leaves both tables unchanged.

use std::fmt;

use super::OpResult;
use crate::completion::CqeData;
use crate::error::OpError;
use crate::regular;
use crate::table::FixedFileTable;
use crate::types::INSTALL_CLOEXEC;

/// Decoded fixed fd install request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallRequest {
    pub source_index: i32,
    pub flags: u32,
    pub reserved: u64,
}

/// Progress of an install; reported with failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStage {
    Validating,
    Resolving,
    Allocating,
    Completed,
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallStage::Validating => write!(f, "validating"),
            InstallStage::Resolving => write!(f, "resolving"),
            InstallStage::Allocating => write!(f, "allocating"),
            InstallStage::Completed => write!(f, "completed"),
        }
    }
}

impl InstallRequest {
    /// Check the flag word and reserved field.
    ///
    /// Returns whether the new descriptor should be close-on-exec.
    pub fn validate(&self) -> Result<bool, OpError> {
        if self.flags & !INSTALL_CLOEXEC != 0 || self.reserved != 0 {
            return Err(OpError::InvalidArgument);
        }
        Ok(self.flags & INSTALL_CLOEXEC != 0)
    }
}

pub(crate) fn run(table: &FixedFileTable, req: InstallRequest, fixed: bool) -> OpResult {
    let mut stage = InstallStage::Validating;
    let result = (|| -> Result<i32, OpError> {
        let cloexec = req.validate()?;

        stage = InstallStage::Resolving;
        // Without the fixed tag the index is not a fixed slot at all.
        if !fixed {
            return Err(OpError::BadDescriptor);
        }
        let file = table
            .lookup(req.source_index)
            .map_err(|_| OpError::BadDescriptor)?;

        stage = InstallStage::Allocating;
        Ok(regular::install(&file, cloexec)?)
    })();

    match result {
        Ok(fd) => {
            tracing::debug!(
                slot = req.source_index,
                fd,
                cloexec = req.flags & INSTALL_CLOEXEC != 0,
                stage = %InstallStage::Completed,
                "installed fixed file"
            );
            Ok((fd as u32, CqeData::None))
        }
        Err(e) => {
            tracing::debug!(
                slot = req.source_index,
                flags = req.flags,
                %stage,
                errno = e.errno(),
                "install failed"
            );
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::pipe;
    use std::os::fd::AsRawFd;

    fn request(source_index: i32, flags: u32) -> InstallRequest {
        InstallRequest {
            source_index,
            flags,
            reserved: 0,
        }
    }

    #[test]
    fn test_validate_flags() {
        assert_eq!(request(0, 0).validate(), Ok(false));
        assert_eq!(request(0, INSTALL_CLOEXEC).validate(), Ok(true));
        assert_eq!(
            request(0, libc::O_APPEND as u32).validate(),
            Err(OpError::InvalidArgument)
        );
        assert_eq!(
            request(0, INSTALL_CLOEXEC | libc::O_NONBLOCK as u32).validate(),
            Err(OpError::InvalidArgument)
        );
        let reserved = InstallRequest {
            reserved: 1,
            ..request(0, 0)
        };
        assert_eq!(reserved.validate(), Err(OpError::InvalidArgument));
    }

    #[test]
    fn test_bad_flags_before_lookup() {
        // No table at all: flag validation still wins.
        let table = FixedFileTable::new(64, 16);
        assert_eq!(
            run(&table, request(500, libc::O_APPEND as u32), true),
            Err(OpError::InvalidArgument)
        );
        assert_eq!(
            run(&table, request(500, 0), true),
            Err(OpError::BadDescriptor)
        );
    }

    #[test]
    fn test_untagged_is_bad_descriptor() {
        let table = FixedFileTable::new(64, 16);
        let (rd, _wr) = pipe();
        table.register(&[rd.as_raw_fd()]).unwrap();
        assert_eq!(run(&table, request(0, 0), false), Err(OpError::BadDescriptor));
    }

    #[test]
    fn test_install_keeps_fixed_slot() {
        let table = FixedFileTable::new(64, 16);
        let (rd, _wr) = pipe();
        table.register(&[rd.as_raw_fd()]).unwrap();

        let (fd, _) = run(&table, request(0, INSTALL_CLOEXEC), true).unwrap();
        let fd = fd as i32;
        assert!(regular::is_cloexec(fd).unwrap());
        assert!(!table.is_shadow(fd));
        assert!(table.lookup(0).is_ok());
        regular::close(fd).unwrap();
        assert!(table.lookup(0).is_ok());
    }
}
