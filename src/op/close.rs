use super::OpResult;
use crate::completion::CqeData;
use crate::error::OpError;
use crate::file::ShadowFds;
use crate::table::FixedFileTable;

/// Release fixed slot `index`.
///
/// Only the slot's reference goes away. Regular descriptors installed from
/// the slot earlier share the open file description and keep working.
pub(crate) fn close_direct(table: &FixedFileTable, index: i32, fixed: bool) -> OpResult {
    if !fixed {
        return Err(OpError::BadDescriptor);
    }
    let file = table.take(index).map_err(|_| OpError::BadDescriptor)?;
    tracing::debug!(slot = index, "closed fixed file");
    drop(file);
    Ok((0, CqeData::None))
}

/// Close regular descriptor `fd`.
///
/// Descriptors owned by a slot of any table in the process are refused.
pub(crate) fn close(fd: i32, fixed: bool) -> OpResult {
    // Fixed slots are released with close_direct.
    if fixed {
        return Err(OpError::BadDescriptor);
    }
    ShadowFds::global().close_unowned(fd)?;
    Ok((0, CqeData::None))
}
