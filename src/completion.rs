//! Completion entries and user_data encoding.

use crate::error::OpError;

/// Extra data carried by a completion.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CqeData {
    #[default]
    None,
    /// Bytes filled by a read, truncated to the result.
    Buf(Vec<u8>),
    /// Slots chosen by an allocating files update.
    Slots(Vec<u32>),
}

/// A completion queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cqe {
    user_data: u64,
    res: i32,
    data: CqeData,
}

impl Cqe {
    pub(crate) fn new(user_data: u64, res: i32, data: CqeData) -> Self {
        Self {
            user_data,
            res,
            data,
        }
    }

    pub(crate) fn from_result(user_data: u64, result: Result<(u32, CqeData), OpError>) -> Self {
        match result {
            Ok((value, data)) => Self::new(user_data, value as i32, data),
            Err(e) => Self::new(user_data, e.to_res(), CqeData::None),
        }
    }

    /// The submission's correlation value.
    #[inline]
    pub fn user_data(&self) -> u64 {
        self.user_data
    }

    /// Raw result: non-negative on success, negated errno on failure.
    #[inline]
    pub fn res(&self) -> i32 {
        self.res
    }

    /// Decoded result.
    pub fn result(&self) -> Result<u32, OpError> {
        if self.res < 0 {
            Err(OpError::from_errno(-self.res))
        } else {
            Ok(self.res as u32)
        }
    }

    /// Data read by a successful read.
    pub fn buf(&self) -> Option<&[u8]> {
        match &self.data {
            CqeData::Buf(buf) => Some(buf),
            _ => None,
        }
    }

    /// Slots picked by an allocating files update.
    pub fn slots(&self) -> Option<&[u32]> {
        match &self.data {
            CqeData::Slots(slots) => Some(slots),
            _ => None,
        }
    }

    /// Take ownership of the read buffer.
    pub fn into_buf(self) -> Option<Vec<u8>> {
        match self.data {
            CqeData::Buf(buf) => Some(buf),
            _ => None,
        }
    }
}

/// Operation tag stored in the top byte of an encoded user_data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpTag {
    Nop = 0,
    Read = 1,
    Write = 2,
    Install = 3,
    CloseDirect = 4,
    Close = 5,
    FilesUpdate = 6,
}

impl OpTag {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => OpTag::Nop,
            1 => OpTag::Read,
            2 => OpTag::Write,
            3 => OpTag::Install,
            4 => OpTag::CloseDirect,
            5 => OpTag::Close,
            6 => OpTag::FilesUpdate,
            _ => return None,
        })
    }
}

/// Structured user_data.
///
/// Layout (64 bits total):
/// - bits 56-63: tag (8 bits)
/// - bits 32-55: slot or descriptor (24 bits)
/// - bits 0-31: payload (32 bits), e.g. a sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserData(u64);

impl UserData {
    #[inline]
    pub fn encode(tag: OpTag, index: u32, payload: u32) -> Self {
        Self(((tag as u64) << 56) | ((index as u64 & 0xFF_FFFF) << 32) | payload as u64)
    }

    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn tag(self) -> Option<OpTag> {
        OpTag::from_u8((self.0 >> 56) as u8)
    }

    #[inline]
    pub fn index(self) -> u32 {
        ((self.0 >> 32) & 0xFF_FFFF) as u32
    }

    #[inline]
    pub fn payload(self) -> u32 {
        self.0 as u32
    }
}
