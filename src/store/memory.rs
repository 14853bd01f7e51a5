//! In-memory byte store

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{closed_error, ByteStore};

#[derive(Debug, Default)]
struct MemoryInner {
    data: Vec<u8>,
    position: usize,
    closed: bool,
}

/// Growable in-memory store.
///
/// Cloning produces another handle to the same buffer, so a caller can hand
/// one handle to a document and keep another to inspect the contents later.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-filled with `bytes`
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryInner {
                data: bytes.into(),
                position: 0,
                closed: false,
            })),
        }
    }

    /// Copy of the current contents (available even after close)
    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().data.clone()
    }

    /// Whether `close()` has been called through any handle
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl ByteStore for MemoryStore {
    fn length(&mut self) -> io::Result<u64> {
        let inner = self.inner.lock();
        if inner.closed {
            return Err(closed_error());
        }
        Ok(inner.data.len() as u64)
    }

    fn seek(&mut self, offset: u64) -> io::Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(closed_error());
        }
        inner.position = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))?;
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(closed_error());
        }
        let start = inner.position.min(inner.data.len());
        let count = buf.len().min(inner.data.len() - start);
        buf[..count].copy_from_slice(&inner.data[start..start + count]);
        inner.position = start + count;
        Ok(count)
    }

    fn write_byte(&mut self, value: u8) -> io::Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(closed_error());
        }
        let position = inner.position;
        if position < inner.data.len() {
            inner.data[position] = value;
        } else {
            // Seeking past the end leaves a zero-filled gap, like a file
            inner.data.resize(position, 0);
            inner.data.push(value);
        }
        inner.position = position + 1;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner.lock().closed = true;
        Ok(())
    }
}
