use std::io;

/// Errors returned synchronously by the fixed file driver.
///
/// Operation failures never show up here: they are delivered as a negative
/// errno in the operation's completion (see [`OpError`]).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying system call failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Descriptor passed for registration is not open.
    #[error("bad file descriptor: {0}")]
    BadDescriptor(i32),
    /// Malformed request.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Registration targets slots past the end of the table.
    #[error("slots {offset}..{end} out of range for table of {capacity}")]
    SlotOutOfRange { offset: u32, end: u64, capacity: u32 },
    /// A fixed file table is already registered.
    #[error("fixed file table already registered")]
    AlreadyRegistered,
    /// No fixed file table is registered.
    #[error("no fixed file table registered")]
    NotRegistered,
    /// Requested table is larger than the configured maximum.
    #[error("too many fixed files: requested {requested}, max {max}")]
    TooManyFiles { requested: u32, max: u32 },
    /// No empty slot left for an allocating update.
    #[error("fixed file table full")]
    TableFull,
    /// No room left in the submission queue.
    #[error("submission queue full")]
    SubmissionQueueFull,
    /// Driver has been shut down.
    #[error("driver shut down")]
    Shutdown,
    /// Process resource limits are too low.
    #[error("resource limit: {0}")]
    ResourceLimit(String),
    /// Backend is not available on this system.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// Configuration could not be loaded or is invalid.
    #[error("config: {0}")]
    Config(String),
}

impl Error {
    /// The errno a kernel engine would report for this error.
    pub fn errno(&self) -> i32 {
        match self {
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            Error::BadDescriptor(_) => libc::EBADF,
            Error::InvalidArgument(_) | Error::SlotOutOfRange { .. } | Error::Config(_) => {
                libc::EINVAL
            }
            Error::AlreadyRegistered => libc::EBUSY,
            Error::NotRegistered => libc::ENXIO,
            Error::TooManyFiles { .. } | Error::ResourceLimit(_) => libc::EMFILE,
            Error::TableFull => libc::ENFILE,
            Error::SubmissionQueueFull => libc::EBUSY,
            Error::Shutdown => libc::EBADFD,
            Error::Unsupported(_) => libc::EOPNOTSUPP,
        }
    }
}

/// Failure carried by a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OpError {
    /// Disallowed flag bits or non-zero reserved fields.
    #[error("invalid argument")]
    InvalidArgument,
    /// Empty or out-of-range slot, missing fixed tag, or closed descriptor.
    #[error("bad file descriptor")]
    BadDescriptor,
    /// Any other errno.
    #[error("os error {0}")]
    Os(i32),
}

impl OpError {
    /// Decode a positive errno.
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::EINVAL => OpError::InvalidArgument,
            libc::EBADF => OpError::BadDescriptor,
            other => OpError::Os(other),
        }
    }

    /// Positive errno for this error.
    pub fn errno(self) -> i32 {
        match self {
            OpError::InvalidArgument => libc::EINVAL,
            OpError::BadDescriptor => libc::EBADF,
            OpError::Os(errno) => errno,
        }
    }

    /// Value placed in a completion's `res` field.
    #[inline]
    pub fn to_res(self) -> i32 {
        -self.errno()
    }
}

impl From<io::Error> for OpError {
    fn from(e: io::Error) -> Self {
        OpError::from_errno(e.raw_os_error().unwrap_or(libc::EIO))
    }
}

impl From<Error> for OpError {
    fn from(e: Error) -> Self {
        OpError::from_errno(e.errno())
    }
}
