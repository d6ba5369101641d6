//! Open file objects held by the fixed file table.
//!
//! A slot cannot hold an open file description directly from userspace, so
//! each slot owns a private duplicate of the registered descriptor. The
//! duplicate keeps the description alive exactly as long as the slot (and
//! any in-flight operation holding the `Arc`) does. Duplicates are placed at
//! or above a configurable floor and recorded in [`ShadowFds`] so regular
//! operations can refuse to touch them.

use std::collections::HashSet;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::sync::LazyLock;

use parking_lot::Mutex;

static SHADOW_FDS: LazyLock<ShadowFds> = LazyLock::new(ShadowFds::default);

/// Descriptor numbers currently owned by fixed slots, across every table in
/// the process.
///
/// Every change to one of these descriptors happens under the set's lock
/// together with the matching set update, so a number is in the set exactly
/// while a slot owns it.
#[derive(Debug, Default)]
pub struct ShadowFds {
    fds: Mutex<HashSet<RawFd>>,
}

impl ShadowFds {
    /// The process-wide set.
    pub fn global() -> &'static ShadowFds {
        &SHADOW_FDS
    }

    /// Whether `fd` is a private duplicate owned by a fixed table.
    pub fn contains(&self, fd: RawFd) -> bool {
        self.fds.lock().contains(&fd)
    }

    /// Number of live duplicates.
    pub fn len(&self) -> usize {
        self.fds.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn duplicate(&self, fd: RawFd, floor: RawFd) -> io::Result<OwnedFd> {
        let mut fds = self.fds.lock();
        let raw = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, floor) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        fds.insert(raw);
        // SAFETY: fcntl returned a fresh descriptor that nothing else owns.
        Ok(unsafe { OwnedFd::from_raw_fd(raw) })
    }

    fn release(&self, fd: OwnedFd) {
        let mut fds = self.fds.lock();
        let raw = fd.as_raw_fd();
        drop(fd);
        fds.remove(&raw);
    }

    /// Close regular descriptor `fd` unless a fixed slot owns it, in which
    /// case it is left open and EBADF is returned.
    pub(crate) fn close_unowned(&self, fd: RawFd) -> io::Result<()> {
        let fds = self.fds.lock();
        if fd < 0 || fds.contains(&fd) {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        crate::regular::close(fd)
    }
}

/// A reference to an open file description.
#[derive(Debug)]
pub struct OpenFile {
    fd: Option<OwnedFd>,
    raw: RawFd,
}

impl OpenFile {
    /// Take a new reference to the description behind `fd`.
    ///
    /// The duplicate is close-on-exec, numbered at or above `floor` and
    /// recorded in [`ShadowFds::global`]. `fd` itself is left untouched.
    pub fn duplicate(fd: RawFd, floor: RawFd) -> io::Result<Self> {
        if fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        let fd = ShadowFds::global().duplicate(fd, floor)?;
        Ok(Self {
            raw: fd.as_raw_fd(),
            fd: Some(fd),
        })
    }

    /// Read into `buf`, at `offset` if given, otherwise at the file position.
    pub fn read(&self, buf: &mut [u8], offset: Option<u64>) -> io::Result<usize> {
        read_raw(self.raw, buf, offset)
    }

    /// Write `data`, at `offset` if given, otherwise at the file position.
    pub fn write(&self, data: &[u8], offset: Option<u64>) -> io::Result<usize> {
        write_raw(self.raw, data, offset)
    }
}

impl AsRawFd for OpenFile {
    fn as_raw_fd(&self) -> RawFd {
        self.raw
    }
}

impl AsFd for OpenFile {
    fn as_fd(&self) -> BorrowedFd<'_> {
        // SAFETY: `raw` stays open until `self` is dropped.
        unsafe { BorrowedFd::borrow_raw(self.raw) }
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        if let Some(fd) = self.fd.take() {
            ShadowFds::global().release(fd);
        }
    }
}

/// `read(2)`/`pread(2)` retrying on EINTR.
pub fn read_raw(fd: RawFd, buf: &mut [u8], offset: Option<u64>) -> io::Result<usize> {
    loop {
        let ret = unsafe {
            match offset {
                Some(off) => libc::pread(
                    fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    off as libc::off_t,
                ),
                None => libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()),
            }
        };
        if ret >= 0 {
            return Ok(ret as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// `write(2)`/`pwrite(2)` retrying on EINTR.
pub fn write_raw(fd: RawFd, data: &[u8], offset: Option<u64>) -> io::Result<usize> {
    loop {
        let ret = unsafe {
            match offset {
                Some(off) => libc::pwrite(
                    fd,
                    data.as_ptr() as *const libc::c_void,
                    data.len(),
                    off as libc::off_t,
                ),
                None => libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()),
            }
        };
        if ret >= 0 {
            return Ok(ret as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::pipe;

    #[test]
    fn test_duplicate_shares_description() {
        let (rd, wr) = pipe();

        let file = OpenFile::duplicate(rd.as_raw_fd(), 64).unwrap();
        assert!(file.as_raw_fd() >= 64);
        assert!(ShadowFds::global().contains(file.as_raw_fd()));

        // Closing the original leaves the duplicate usable.
        drop(rd);
        write_raw(wr.as_raw_fd(), b"abc", None).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(file.read(&mut buf, None).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
    }

    #[test]
    fn test_drop_forgets_shadow() {
        let (rd, _wr) = pipe();

        // Other tests duplicate at lower floors, so nothing else lands here.
        let file = OpenFile::duplicate(rd.as_raw_fd(), 960).unwrap();
        let raw = file.as_raw_fd();
        drop(file);
        assert!(!ShadowFds::global().contains(raw));
        assert!(!crate::regular::is_open(raw));
    }

    #[test]
    fn test_duplicate_bad_fd() {
        let err = OpenFile::duplicate(-1, 64).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }

    #[test]
    fn test_close_unowned_refuses_slot_fd() {
        let (rd, _wr) = pipe();
        let file = OpenFile::duplicate(rd.as_raw_fd(), 64).unwrap();

        let err = ShadowFds::global()
            .close_unowned(file.as_raw_fd())
            .unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
        assert!(crate::regular::is_open(file.as_raw_fd()));

        let err = ShadowFds::global().close_unowned(-1).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));

        let fd = crate::regular::install(&file, true).unwrap();
        ShadowFds::global().close_unowned(fd).unwrap();
        assert!(!crate::regular::is_open(fd));
    }
}
