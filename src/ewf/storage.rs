//! Backing storage abstraction: a random-access byte medium the reader and
//! writer hold a reference to, never own outright.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

/// A random-access byte medium.
///
/// Implementations are free to be files, in-memory buffers, or anything else
/// that can seek and transfer bytes. Operations are synchronous; there are
/// no concurrency guarantees (see the crate-level concurrency notes) — a
/// caller sharing one `BackingStorage` across threads must serialize access
/// itself.
pub trait BackingStorage {
    /// Reads up to `length` bytes starting at `offset`. Returns fewer bytes
    /// than requested only at end-of-medium; this is not an error.
    fn read(&self, offset: u64, length: usize) -> io::Result<Vec<u8>>;

    /// Writes `data` at `offset`, extending the medium if necessary.
    fn write(&self, offset: u64, data: &[u8]) -> io::Result<()>;
}

// A shared reference to a medium is itself a medium: this lets a reader and
// a writer borrow the same `BackingStorage` (e.g. in tests, where a value
// needs to outlive both) without requiring `Clone` or interior-mutability
// gymnastics at every call site.
impl<T: BackingStorage + ?Sized> BackingStorage for &T {
    fn read(&self, offset: u64, length: usize) -> io::Result<Vec<u8>> {
        (**self).read(offset, length)
    }

    fn write(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        (**self).write(offset, data)
    }
}

/// A `BackingStorage` over a `std::fs::File`.
///
/// Wrapped in a `Mutex` because `Read`/`Seek`/`Write` all require `&mut
/// File`, while `BackingStorage` intentionally takes `&self` so that a
/// single storage instance can be shared between a reader's cache lookups
/// without the caller threading `&mut` through the whole traversal.
pub struct FileBackingStorage {
    file: Mutex<File>,
}

impl FileBackingStorage {
    /// Wraps an already-open file.
    pub fn new(file: File) -> Self {
        Self {
            file: Mutex::new(file),
        }
    }
}

impl BackingStorage for FileBackingStorage {
    fn read(&self, offset: u64, length: usize) -> io::Result<Vec<u8>> {
        let mut guard = self.file.lock().expect("backing file mutex poisoned");
        guard.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; length];
        let mut total = 0;
        loop {
            match guard.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    if total == buf.len() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        buf.truncate(total);
        Ok(buf)
    }

    fn write(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut guard = self.file.lock().expect("backing file mutex poisoned");
        guard.seek(SeekFrom::Start(offset))?;
        guard.write_all(data)
    }
}

/// A `BackingStorage` over an in-memory buffer.
///
/// Used by the test suite so that round-trip and property tests never touch
/// the filesystem.
#[derive(Default)]
pub struct MemoryBackingStorage {
    buf: Mutex<Vec<u8>>,
}

impl MemoryBackingStorage {
    /// Creates an empty in-memory medium.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot copy of the full medium contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.buf.lock().expect("memory storage mutex poisoned").clone()
    }
}

impl BackingStorage for MemoryBackingStorage {
    fn read(&self, offset: u64, length: usize) -> io::Result<Vec<u8>> {
        let guard = self.buf.lock().expect("memory storage mutex poisoned");
        let offset = offset as usize;
        if offset >= guard.len() {
            return Ok(Vec::new());
        }
        let end = std::cmp::min(guard.len(), offset + length);
        Ok(guard[offset..end].to_vec())
    }

    fn write(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut guard = self.buf.lock().expect("memory storage mutex poisoned");
        let offset = offset as usize;
        let end = offset + data.len();
        if guard.len() < end {
            guard.resize(end, 0);
        }
        guard[offset..end].copy_from_slice(data);
        Ok(())
    }
}
