//! Submission types shared by every driver backend.

use bitflags::bitflags;

#[cfg(unix)]
use std::os::unix::io::RawFd;

// ============================================================================
// Flags
// ============================================================================

bitflags! {
    /// Per-submission flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SqeFlags: u8 {
        /// Resolve `fd` through the fixed file table instead of the
        /// regular descriptor table.
        const FIXED_FILE = 1 << 0;
    }
}

/// The only flag accepted by [`Opcode::FixedFdInstall`].
pub const INSTALL_CLOEXEC: u32 = libc::O_CLOEXEC as u32;

/// Offset for [`Opcode::FilesUpdate`] that asks the table to pick free slots.
pub const FILE_INDEX_ALLOC: u32 = u32::MAX;

/// Largest buffer a single [`Opcode::Read`] allocates. Longer reads are
/// short, as if the file had returned fewer bytes.
pub const MAX_RW_LEN: u32 = 1 << 20;

// ============================================================================
// Operations
// ============================================================================

/// Operation carried by a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opcode {
    /// Completes with 0.
    Nop,
    /// Read up to `len` bytes. `offset` of `None` uses the file position.
    Read { len: u32, offset: Option<u64> },
    /// Write `data`. `offset` of `None` uses the file position.
    Write { data: Vec<u8>, offset: Option<u64> },
    /// Install the fixed slot `fd` into the regular descriptor table.
    FixedFdInstall { flags: u32, reserved: u64 },
    /// Release the fixed slot `fd`.
    CloseDirect,
    /// Close the regular descriptor `fd`.
    Close,
    /// Update fixed slots starting at `offset` with `fds`; `-1` clears a slot.
    FilesUpdate { offset: u32, fds: Vec<RawFd> },
}

impl Opcode {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Nop => "nop",
            Opcode::Read { .. } => "read",
            Opcode::Write { .. } => "write",
            Opcode::FixedFdInstall { .. } => "fixed_fd_install",
            Opcode::CloseDirect => "close_direct",
            Opcode::Close => "close",
            Opcode::FilesUpdate { .. } => "files_update",
        }
    }
}

/// A submission queue entry.
///
/// `fd` is a fixed slot index when `flags` contains
/// [`SqeFlags::FIXED_FILE`], and a regular descriptor otherwise.
/// `user_data` is returned untouched in the matching completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sqe {
    pub opcode: Opcode,
    pub fd: i32,
    pub flags: SqeFlags,
    pub user_data: u64,
}

impl Sqe {
    fn new(opcode: Opcode, fd: i32) -> Self {
        Self {
            opcode,
            fd,
            flags: SqeFlags::empty(),
            user_data: 0,
        }
    }

    /// No-op submission.
    pub fn nop() -> Self {
        Self::new(Opcode::Nop, -1)
    }

    /// Read up to `len` bytes from `fd`, capped at [`MAX_RW_LEN`].
    pub fn read(fd: i32, len: u32) -> Self {
        Self::new(Opcode::Read { len, offset: None }, fd)
    }

    /// Write `data` to `fd`.
    pub fn write(fd: i32, data: impl Into<Vec<u8>>) -> Self {
        Self::new(
            Opcode::Write {
                data: data.into(),
                offset: None,
            },
            fd,
        )
    }

    /// Install fixed slot `index` as a new regular descriptor.
    ///
    /// The submission is tagged [`SqeFlags::FIXED_FILE`].
    pub fn fixed_fd_install(index: i32, flags: u32) -> Self {
        Self::new(Opcode::FixedFdInstall { flags, reserved: 0 }, index).fixed()
    }

    /// Release fixed slot `index`.
    ///
    /// The submission is tagged [`SqeFlags::FIXED_FILE`].
    pub fn close_direct(index: i32) -> Self {
        Self::new(Opcode::CloseDirect, index).fixed()
    }

    /// Close the regular descriptor `fd`.
    pub fn close(fd: i32) -> Self {
        Self::new(Opcode::Close, fd)
    }

    /// Update fixed slots starting at `offset`.
    pub fn files_update(offset: u32, fds: Vec<RawFd>) -> Self {
        Self::new(Opcode::FilesUpdate { offset, fds }, -1)
    }

    /// Set the correlation value returned in the completion.
    pub fn user_data(mut self, user_data: u64) -> Self {
        self.user_data = user_data;
        self
    }

    /// Add [`SqeFlags::FIXED_FILE`].
    pub fn fixed(mut self) -> Self {
        self.flags |= SqeFlags::FIXED_FILE;
        self
    }

    /// Replace all flags.
    pub fn flags(mut self, flags: SqeFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set an explicit file offset on a read or write.
    pub fn offset(mut self, off: u64) -> Self {
        match &mut self.opcode {
            Opcode::Read { offset, .. } | Opcode::Write { offset, .. } => *offset = Some(off),
            _ => {}
        }
        self
    }

    /// Whether `fd` names a fixed slot.
    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.flags.contains(SqeFlags::FIXED_FILE)
    }
}

// ============================================================================
// Engine selection
// ============================================================================

/// Which backend drives the fixed file table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoEngine {
    /// Use the kernel when it supports fixed fd install, else emulate.
    #[default]
    Auto,

    /// In-process table and worker pool.
    Emulated,

    /// Kernel io_uring (Linux with the `io_uring` feature).
    Uring,
}

impl std::fmt::Display for IoEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoEngine::Auto => write!(f, "auto"),
            IoEngine::Emulated => write!(f, "emulated"),
            IoEngine::Uring => write!(f, "uring"),
        }
    }
}

impl std::str::FromStr for IoEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(IoEngine::Auto),
            "emulated" | "emu" | "userspace" => Ok(IoEngine::Emulated),
            "uring" | "io_uring" | "io-uring" | "kernel" => Ok(IoEngine::Uring),
            _ => Err(format!("unknown io engine: {}", s)),
        }
    }
}
