//! Fixed (direct) file table.
//!
//! Maps slot indices to references to open file descriptions. Each slot is
//! either empty or holds an `Arc<OpenFile>`; lookups clone the `Arc`, so an
//! operation that resolved a slot keeps the file alive even if the slot is
//! released while it runs.
//!
//! The slot array is created at registration time and replaced only by
//! register/unregister, which take the outer write lock. Every other
//! mutation locks just the slot it touches.

use std::ops::Range;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::error::Error;
use crate::file::{OpenFile, ShadowFds};

type Slot = Mutex<Option<Arc<OpenFile>>>;

/// Process-wide table of fixed file slots.
pub struct FixedFileTable {
    slots: RwLock<Option<Box<[Slot]>>>,
    fd_floor: RawFd,
    max_files: u32,
    /// Where the next allocating update starts looking for an empty slot.
    alloc_hint: AtomicU32,
}

impl FixedFileTable {
    /// Create an unregistered table.
    ///
    /// Slot duplicates are numbered at or above `fd_floor`; no table larger
    /// than `max_files` can be registered.
    pub fn new(fd_floor: RawFd, max_files: u32) -> Self {
        Self {
            slots: RwLock::new(None),
            fd_floor,
            max_files,
            alloc_hint: AtomicU32::new(0),
        }
    }

    /// Register a table with one slot per descriptor. `-1` leaves a slot empty.
    pub fn register(&self, fds: &[RawFd]) -> Result<(), Error> {
        if fds.is_empty() {
            return Err(Error::InvalidArgument("empty file set".to_string()));
        }
        self.check_size(fds.len())?;
        if self.slots.read().is_some() {
            return Err(Error::AlreadyRegistered);
        }

        let files = self.duplicate_all(fds)?;
        let count = files.len();
        self.install_table(files.into_iter().map(|f| Mutex::new(f.map(Arc::new))).collect())?;
        tracing::debug!(count, "registered fixed file table");
        Ok(())
    }

    /// Register a table of `count` empty slots.
    pub fn register_sparse(&self, count: u32) -> Result<(), Error> {
        if count == 0 {
            return Err(Error::InvalidArgument("empty file set".to_string()));
        }
        self.check_size(count as usize)?;
        self.install_table((0..count).map(|_| Mutex::new(None)).collect())?;
        tracing::debug!(count, "registered sparse fixed file table");
        Ok(())
    }

    fn install_table(&self, table: Box<[Slot]>) -> Result<(), Error> {
        let mut slots = self.slots.write();
        if slots.is_some() {
            return Err(Error::AlreadyRegistered);
        }
        *slots = Some(table);
        self.alloc_hint.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Bind `fds[i]` to slot `offset + i`, replacing what was there.
    ///
    /// `-1` clears the slot. The caller's descriptors are not consumed.
    /// Either every slot is updated or, on error, none is.
    pub fn update(&self, offset: u32, fds: &[RawFd]) -> Result<u32, Error> {
        let guard = self.slots.read();
        let slots = guard.as_ref().ok_or(Error::NotRegistered)?;

        let end = offset as u64 + fds.len() as u64;
        if end > slots.len() as u64 {
            return Err(Error::SlotOutOfRange {
                offset,
                end,
                capacity: slots.len() as u32,
            });
        }

        let files = self.duplicate_all(fds)?;
        for (i, file) in files.into_iter().enumerate() {
            let slot = &slots[offset as usize + i];
            let old = std::mem::replace(&mut *slot.lock(), file.map(Arc::new));
            drop(old);
        }
        tracing::debug!(offset, count = fds.len(), "updated fixed files");
        Ok(fds.len() as u32)
    }

    /// Place each descriptor into a free slot and return the chosen slots.
    pub fn update_alloc(&self, fds: &[RawFd]) -> Result<Vec<u32>, Error> {
        let guard = self.slots.read();
        let slots = guard.as_ref().ok_or(Error::NotRegistered)?;

        if let Some(&fd) = fds.iter().find(|&&fd| fd < 0) {
            return Err(Error::BadDescriptor(fd));
        }
        let files = self.duplicate_all(fds)?;

        let capacity = slots.len() as u32;
        let mut placed: Vec<u32> = Vec::with_capacity(files.len());
        let mut cursor = self.alloc_hint.load(Ordering::Relaxed) % capacity;
        let mut scanned = 0;

        for file in files.into_iter().flatten() {
            let mut file = Some(Arc::new(file));
            while file.is_some() && scanned < capacity {
                let mut slot = slots[cursor as usize].lock();
                if slot.is_none() {
                    *slot = file.take();
                    placed.push(cursor);
                }
                drop(slot);
                cursor = (cursor + 1) % capacity;
                scanned += 1;
            }
            if file.is_some() {
                for &index in &placed {
                    let old = slots[index as usize].lock().take();
                    drop(old);
                }
                return Err(Error::TableFull);
            }
        }

        self.alloc_hint.store(cursor, Ordering::Relaxed);
        tracing::debug!(slots = ?placed, "allocated fixed files");
        Ok(placed)
    }

    /// Drop the whole table, releasing every occupied slot.
    pub fn unregister(&self) -> Result<(), Error> {
        let table = self.slots.write().take().ok_or(Error::NotRegistered)?;
        let released = table.iter().filter(|slot| slot.lock().is_some()).count();
        drop(table);
        tracing::debug!(released, "unregistered fixed file table");
        Ok(())
    }

    /// Release every occupied slot in `range`; empty slots are skipped.
    ///
    /// Returns how many slots were released.
    pub fn unregister_range(&self, range: Range<u32>) -> Result<u32, Error> {
        let guard = self.slots.read();
        let slots = guard.as_ref().ok_or(Error::NotRegistered)?;

        if range.end as usize > slots.len() {
            return Err(Error::SlotOutOfRange {
                offset: range.start,
                end: range.end as u64,
                capacity: slots.len() as u32,
            });
        }

        let mut released = 0;
        for index in range.clone() {
            if let Some(file) = slots[index as usize].lock().take() {
                drop(file);
                released += 1;
            }
        }
        tracing::debug!(?range, released, "released fixed slots");
        Ok(released)
    }

    /// The file bound to slot `index`.
    pub fn lookup(&self, index: i32) -> Result<Arc<OpenFile>, Error> {
        self.with_slot(index, |slot| slot.clone())
    }

    /// Unbind slot `index` and return what it held.
    pub fn take(&self, index: i32) -> Result<Arc<OpenFile>, Error> {
        self.with_slot(index, |slot| slot.take())
    }

    fn with_slot<F>(&self, index: i32, f: F) -> Result<Arc<OpenFile>, Error>
    where
        F: FnOnce(&mut Option<Arc<OpenFile>>) -> Option<Arc<OpenFile>>,
    {
        let guard = self.slots.read();
        let slot = guard
            .as_ref()
            .and_then(|slots| usize::try_from(index).ok().and_then(|i| slots.get(i)))
            .ok_or(Error::BadDescriptor(index))?;
        let file = f(&mut slot.lock());
        file.ok_or(Error::BadDescriptor(index))
    }

    /// Number of slots, 0 when unregistered.
    pub fn capacity(&self) -> u32 {
        self.slots
            .read()
            .as_ref()
            .map(|slots| slots.len() as u32)
            .unwrap_or(0)
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.slots
            .read()
            .as_ref()
            .map(|slots| slots.iter().filter(|slot| slot.lock().is_some()).count())
            .unwrap_or(0)
    }

    pub fn is_registered(&self) -> bool {
        self.slots.read().is_some()
    }

    /// Whether `fd` is a private duplicate owned by this or any other fixed
    /// table in the process.
    #[inline]
    pub fn is_shadow(&self, fd: RawFd) -> bool {
        ShadowFds::global().contains(fd)
    }

    pub fn fd_floor(&self) -> RawFd {
        self.fd_floor
    }

    pub fn max_files(&self) -> u32 {
        self.max_files
    }

    fn check_size(&self, requested: usize) -> Result<(), Error> {
        if requested > self.max_files as usize {
            return Err(Error::TooManyFiles {
                requested: requested.min(u32::MAX as usize) as u32,
                max: self.max_files,
            });
        }
        Ok(())
    }

    fn duplicate_all(&self, fds: &[RawFd]) -> Result<Vec<Option<OpenFile>>, Error> {
        fds.iter()
            .map(|&fd| {
                if fd == -1 {
                    return Ok(None);
                }
                OpenFile::duplicate(fd, self.fd_floor)
                    .map(Some)
                    .map_err(|e| match e.raw_os_error() {
                        Some(libc::EBADF) => Error::BadDescriptor(fd),
                        Some(libc::EINVAL) | Some(libc::EMFILE) => Error::ResourceLimit(format!(
                            "no descriptor available at or above {} ({e})",
                            self.fd_floor
                        )),
                        _ => Error::Io(e),
                    })
            })
            .collect()
    }
}
