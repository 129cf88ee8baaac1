#![forbid(unsafe_code)]

use std::{
    fs::{File, OpenOptions},
    io::{self, ErrorKind},
    path::Path,
    sync::Arc,
};

use parking_lot::Mutex;

use crate::types::{GraphError, Result};

/// Positioned I/O over the single storage file.
pub trait FileIo: Send + Sync + 'static {
    /// Reads exactly `dst.len()` bytes starting at `off`.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` starting at `off`, extending the file if needed.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Flushes data and metadata to stable storage.
    fn sync_all(&self) -> Result<()>;
    /// Current length of the file in bytes.
    fn len(&self) -> Result<u64>;
    /// Returns true if the file is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    /// Truncates or extends the file to `len` bytes. New bytes read as zero.
    fn truncate(&self, len: u64) -> Result<()>;

    /// Like [`FileIo::read_at`], but bytes past the end of the file read as zero.
    fn read_at_padded(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        let len = self.len()?;
        if off >= len {
            dst.fill(0);
            return Ok(());
        }
        let available = ((len - off) as usize).min(dst.len());
        let (head, tail) = dst.split_at_mut(available);
        self.read_at(off, head)?;
        tail.fill(0);
        Ok(())
    }
}

/// [`FileIo`] backed by a real file.
#[derive(Clone)]
pub struct StdFileIo {
    inner: Arc<File>,
}

impl StdFileIo {
    /// Wraps an already opened file.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    /// Opens `path` read-write, creating it when missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self::new(file))
    }

    #[cfg(unix)]
    fn pread(&self, off: u64, dst: &mut [u8]) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self.inner.as_ref(), dst, off)
    }

    #[cfg(unix)]
    fn pwrite(&self, off: u64, src: &[u8]) -> io::Result<usize> {
        std::os::unix::fs::FileExt::write_at(self.inner.as_ref(), src, off)
    }

    #[cfg(windows)]
    fn pread(&self, off: u64, dst: &mut [u8]) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self.inner.as_ref(), dst, off)
    }

    #[cfg(windows)]
    fn pwrite(&self, off: u64, src: &[u8]) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_write(self.inner.as_ref(), src, off)
    }

    #[cfg(not(any(unix, windows)))]
    fn pread(&self, _off: u64, _dst: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(
            ErrorKind::Unsupported,
            "positioned reads unsupported on this platform",
        ))
    }

    #[cfg(not(any(unix, windows)))]
    fn pwrite(&self, _off: u64, _src: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            ErrorKind::Unsupported,
            "positioned writes unsupported on this platform",
        ))
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, mut off: u64, mut dst: &mut [u8]) -> Result<()> {
        while !dst.is_empty() {
            let read = self.pread(off, dst)?;
            if read == 0 {
                return Err(GraphError::Io(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "read reached end of storage file",
                )));
            }
            dst = &mut std::mem::take(&mut dst)[read..];
            off += read as u64;
        }
        Ok(())
    }

    fn write_at(&self, mut off: u64, mut src: &[u8]) -> Result<()> {
        while !src.is_empty() {
            let written = self.pwrite(off, src)?;
            if written == 0 {
                return Err(GraphError::Io(io::Error::new(
                    ErrorKind::WriteZero,
                    "storage file accepted zero bytes",
                )));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        self.inner.sync_all()?;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.inner.metadata()?.len())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.inner.set_len(len)?;
        Ok(())
    }
}

/// In-memory [`FileIo`] with crash injection, used to exercise recovery.
///
/// Clones share the same buffer, so a test can keep a handle, "crash" the
/// engine by dropping it, and reopen over the surviving bytes.
#[derive(Clone, Default)]
pub struct MemFileIo {
    inner: Arc<Mutex<MemState>>,
}

#[derive(Default)]
struct MemState {
    data: Vec<u8>,
    writes: u64,
    writes_left: Option<u64>,
    torn: Option<(u64, usize)>,
    syncs: u64,
    syncs_left: Option<u64>,
}

impl MemFileIo {
    /// Creates an empty in-memory file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows `n` more writes to succeed; every write after that fails without
    /// touching the buffer.
    pub fn fail_after_writes(&self, n: u64) {
        self.inner.lock().writes_left = Some(n);
    }

    /// Makes the next write persist only its first `len` bytes and then fail,
    /// imitating a torn sector write.
    pub fn tear_next_write(&self, len: usize) {
        self.tear_write_after(0, len);
    }

    /// Lets `skip` writes through untouched, then tears the one after them
    /// like [`MemFileIo::tear_next_write`].
    pub fn tear_write_after(&self, skip: u64, len: usize) {
        self.inner.lock().torn = Some((skip, len));
    }

    /// Allows `n` more syncs to succeed; every sync after that fails. Writes
    /// already made stay in the buffer.
    pub fn fail_syncs_after(&self, n: u64) {
        self.inner.lock().syncs_left = Some(n);
    }

    /// Clears all injected failures.
    pub fn heal(&self) {
        let mut state = self.inner.lock();
        state.writes_left = None;
        state.torn = None;
        state.syncs_left = None;
    }

    /// Number of writes that reached the buffer.
    pub fn writes(&self) -> u64 {
        self.inner.lock().writes
    }

    /// Number of `sync_all` calls observed.
    pub fn syncs(&self) -> u64 {
        self.inner.lock().syncs
    }

    /// Copy of the current file contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.inner.lock().data.clone()
    }

    /// Flips every bit of the byte at `off`.
    pub fn corrupt_byte(&self, off: u64) {
        let mut state = self.inner.lock();
        if let Some(byte) = state.data.get_mut(off as usize) {
            *byte ^= 0xFF;
        }
    }
}

fn injected_failure() -> GraphError {
    GraphError::Io(io::Error::new(ErrorKind::Other, "injected write failure"))
}

fn injected_sync_failure() -> GraphError {
    GraphError::Io(io::Error::new(ErrorKind::Other, "injected sync failure"))
}

impl FileIo for MemFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        let state = self.inner.lock();
        let start = off as usize;
        let end = start
            .checked_add(dst.len())
            .ok_or(GraphError::Invalid("read range overflow"))?;
        if end > state.data.len() {
            return Err(GraphError::Io(io::Error::new(
                ErrorKind::UnexpectedEof,
                "read past end of in-memory file",
            )));
        }
        dst.copy_from_slice(&state.data[start..end]);
        Ok(())
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        let mut state = self.inner.lock();
        if let Some(left) = state.writes_left {
            if left == 0 {
                return Err(injected_failure());
            }
            state.writes_left = Some(left - 1);
        }
        let torn_len = match state.torn.take() {
            Some((0, len)) => Some(len),
            Some((skip, len)) => {
                state.torn = Some((skip - 1, len));
                None
            }
            None => None,
        };
        let (persisted, torn) = match torn_len {
            Some(len) => (&src[..len.min(src.len())], true),
            None => (src, false),
        };
        let start = off as usize;
        let end = start + persisted.len();
        if state.data.len() < end {
            state.data.resize(end, 0);
        }
        state.data[start..end].copy_from_slice(persisted);
        state.writes += 1;
        if torn {
            return Err(injected_failure());
        }
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        let mut state = self.inner.lock();
        if let Some(left) = state.syncs_left {
            if left == 0 {
                return Err(injected_sync_failure());
            }
            state.syncs_left = Some(left - 1);
        }
        state.syncs += 1;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.inner.lock().data.len() as u64)
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.inner.lock().data.resize(len as usize, 0);
        Ok(())
    }
}
