use std::os::fd::RawFd;

use super::OpResult;
use crate::completion::CqeData;
use crate::error::OpError;
use crate::table::FixedFileTable;
use crate::types::FILE_INDEX_ALLOC;

/// Asynchronous form of a registered files update.
///
/// With [`FILE_INDEX_ALLOC`] every descriptor goes to a free slot and the
/// chosen slots come back in the completion.
pub(crate) fn files_update(table: &FixedFileTable, offset: u32, fds: &[RawFd]) -> OpResult {
    if fds.is_empty() {
        return Err(OpError::InvalidArgument);
    }
    if offset == FILE_INDEX_ALLOC {
        let slots = table.update_alloc(fds)?;
        return Ok((slots.len() as u32, CqeData::Slots(slots)));
    }
    let count = table.update(offset, fds)?;
    Ok((count, CqeData::None))
}
