//! Random-access byte devices backing a store.
//!
//! The engine never touches the filesystem directly; everything goes through
//! [`BlockDevice`], a positioned-I/O trait with explicit length and resize.
//! [`FileDevice`] is the production implementation, [`MemDevice`] backs tests
//! and throwaway stores.

use std::fmt;
use std::fs::File;
use std::io::{self, ErrorKind};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// Random-access byte-addressable device a store is mapped onto.
///
/// Reads and writes are positioned and must transfer the full buffer; a
/// short transfer surfaces as an I/O error. Implementations own any retry
/// policy; the engine performs none.
pub trait BlockDevice: Send + Sync + 'static {
    /// Reads exactly `dst.len()` bytes starting at `off`.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` starting at `off`, growing the device if needed.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Flushes all written data to durable storage.
    fn sync(&self) -> Result<()>;
    /// Returns the current device length in bytes.
    fn len(&self) -> Result<u64>;
    /// Returns true if the device holds no bytes yet.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    /// Truncates or extends the device to exactly `len` bytes.
    fn resize(&self, len: u64) -> Result<()>;
}

#[cfg(unix)]
fn read_exact_at(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    while !dst.is_empty() {
        let read = file.read_at(dst, off)?;
        if read == 0 {
            return Err(io::Error::new(ErrorKind::UnexpectedEof, "read_at reached EOF"));
        }
        let (_, tail) = dst.split_at_mut(read);
        dst = tail;
        off += read as u64;
    }
    Ok(())
}

#[cfg(unix)]
fn write_all_at(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    while !src.is_empty() {
        let written = file.write_at(src, off)?;
        if written == 0 {
            return Err(io::Error::new(ErrorKind::WriteZero, "write_at wrote zero bytes"));
        }
        src = &src[written..];
        off += written as u64;
    }
    Ok(())
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !dst.is_empty() {
        let read = file.seek_read(dst, off)?;
        if read == 0 {
            return Err(io::Error::new(ErrorKind::UnexpectedEof, "seek_read reached EOF"));
        }
        let (_, tail) = dst.split_at_mut(read);
        dst = tail;
        off += read as u64;
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !src.is_empty() {
        let written = file.seek_write(src, off)?;
        if written == 0 {
            return Err(io::Error::new(ErrorKind::WriteZero, "seek_write wrote zero bytes"));
        }
        src = &src[written..];
        off += written as u64;
    }
    Ok(())
}

/// File-backed device using positioned reads and writes.
#[derive(Clone)]
pub struct FileDevice {
    inner: Arc<File>,
}

impl FileDevice {
    /// Wraps an already open file handle.
    pub fn new(file: File) -> Self {
        Self { inner: Arc::new(file) }
    }

    /// Opens (or creates) `path` for read-write access.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(crate::StoreError::from)?;
        Ok(Self::new(file))
    }
}

impl fmt::Debug for FileDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileDevice").finish_non_exhaustive()
    }
}

impl BlockDevice for FileDevice {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        Ok(read_exact_at(&self.inner, off, dst)?)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        Ok(write_all_at(&self.inner, off, src)?)
    }

    fn sync(&self) -> Result<()> {
        Ok(self.inner.sync_all()?)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.inner.metadata()?.len())
    }

    fn resize(&self, len: u64) -> Result<()> {
        Ok(self.inner.set_len(len)?)
    }
}

/// Growable in-memory device. Survives close/reopen of a store as long as
/// the caller keeps the `Arc` alive.
#[derive(Default)]
pub struct MemDevice {
    bytes: Mutex<Vec<u8>>,
}

impl MemDevice {
    /// Creates an empty in-memory device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites a byte range directly, bypassing the store. Test hook for
    /// damaging files on purpose.
    pub fn corrupt(&self, off: u64, src: &[u8]) {
        let mut bytes = self.bytes.lock();
        let off = off as usize;
        if off + src.len() <= bytes.len() {
            bytes[off..off + src.len()].copy_from_slice(src);
        }
    }
}

impl fmt::Debug for MemDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemDevice")
            .field("len", &self.bytes.lock().len())
            .finish()
    }
}

impl BlockDevice for MemDevice {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.lock();
        let off = off as usize;
        let end = off.checked_add(dst.len()).ok_or_else(|| {
            io::Error::new(ErrorKind::InvalidInput, "read offset overflow")
        })?;
        if end > bytes.len() {
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                "read past end of memory device",
            )
            .into());
        }
        dst.copy_from_slice(&bytes[off..end]);
        Ok(())
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.lock();
        let off = off as usize;
        let end = off.checked_add(src.len()).ok_or_else(|| {
            io::Error::new(ErrorKind::InvalidInput, "write offset overflow")
        })?;
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[off..end].copy_from_slice(src);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.bytes.lock().len() as u64)
    }

    fn resize(&self, len: u64) -> Result<()> {
        self.bytes.lock().resize(len as usize, 0);
        Ok(())
    }
}
