//! Audio Source Reader: yields an asset as a sequence of bounded byte chunks.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Sequential byte source owned by exactly one session.
///
/// The underlying handle stays open until [`AudioSource::close`] or drop.
pub struct AudioSource {
    inner: Option<Box<dyn Read + Send>>,
    chunk_size: usize,
    bytes_read: u64,
}

impl AudioSource {
    /// Open a file that has already been resolved by [`crate::library::SoundLibrary`].
    pub fn open(path: &Path, chunk_size: usize) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::from_reader(BufReader::new(file), chunk_size))
    }

    pub fn from_reader(reader: impl Read + Send + 'static, chunk_size: usize) -> Self {
        Self {
            inner: Some(Box::new(reader)),
            chunk_size: chunk_size.max(1),
            bytes_read: 0,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Read the next chunk.
    ///
    /// Returns `Ok(None)` at end of input. A returned chunk shorter than `chunk_size` means
    /// the input ended inside it, so callers can finish without another read.
    pub fn read_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        let Some(reader) = self.inner.as_mut() else {
            return Ok(None);
        };
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0usize;
        while filled < buf.len() {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        self.bytes_read += filled as u64;
        Ok(Some(buf))
    }

    /// Release the handle. Idempotent.
    pub fn close(&mut self) {
        self.inner = None;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

impl std::fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSource")
            .field("chunk_size", &self.chunk_size)
            .field("bytes_read", &self.bytes_read)
            .field("closed", &self.is_closed())
            .finish()
    }
}
