//! Gateway to the process's regular descriptor table.

use std::io;
use std::os::fd::{AsRawFd, RawFd};

use crate::file::OpenFile;

/// Bind the lowest free regular descriptor to `file`'s open file description.
pub fn install(file: &OpenFile, cloexec: bool) -> io::Result<RawFd> {
    let cmd = if cloexec {
        libc::F_DUPFD_CLOEXEC
    } else {
        libc::F_DUPFD
    };
    let fd = unsafe { libc::fcntl(file.as_raw_fd(), cmd, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

/// Close a regular descriptor.
pub fn close(fd: RawFd) -> io::Result<()> {
    // Linux releases the descriptor even when close reports EINTR, so
    // retrying could close an unrelated, freshly allocated descriptor.
    let ret = unsafe { libc::close(fd) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
    Ok(())
}

/// Whether `fd` is open.
pub fn is_open(fd: RawFd) -> bool {
    unsafe { libc::fcntl(fd, libc::F_GETFD) >= 0 }
}

/// Whether `fd` has `FD_CLOEXEC` set.
pub fn is_cloexec(fd: RawFd) -> io::Result<bool> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(flags & libc::FD_CLOEXEC != 0)
}

pub use crate::file::{read_raw as read, write_raw as write};
