use super::{OpResult, Target, resolve};
use crate::completion::CqeData;
use crate::file;
use crate::table::FixedFileTable;
use crate::types::MAX_RW_LEN;

pub(crate) fn read(
    table: &FixedFileTable,
    fd: i32,
    fixed: bool,
    len: u32,
    offset: Option<u64>,
) -> OpResult {
    let target = resolve(table, fd, fixed)?;
    let mut buf = vec![0u8; len.min(MAX_RW_LEN) as usize];
    let n = match &target {
        Target::Fixed(file) => file.read(&mut buf, offset)?,
        Target::Regular(raw) => file::read_raw(*raw, &mut buf, offset)?,
    };
    buf.truncate(n);
    Ok((n as u32, CqeData::Buf(buf)))
}

pub(crate) fn write(
    table: &FixedFileTable,
    fd: i32,
    fixed: bool,
    data: &[u8],
    offset: Option<u64>,
) -> OpResult {
    let target = resolve(table, fd, fixed)?;
    let n = match &target {
        Target::Fixed(file) => file.write(data, offset)?,
        Target::Regular(raw) => file::write_raw(*raw, data, offset)?,
    };
    Ok((n as u32, CqeData::None))
}
