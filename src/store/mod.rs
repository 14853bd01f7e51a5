//! Backing stores for documents
//!
//! A [`ByteStore`] is a random-access byte container. Implementations are not
//! expected to be safe for unsynchronized concurrent use; the document wraps
//! its store in a lock and only ever touches it through that lock.
//!
//! - `MemoryStore`: growable in-memory buffer with a cloneable handle
//! - `FileStore`: a file on disk

mod file;
mod memory;

use std::io;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Random-access byte storage used by a document
pub trait ByteStore: Send {
    /// Current length of the store in bytes
    fn length(&mut self) -> io::Result<u64>;

    /// Move the cursor to an absolute offset
    fn seek(&mut self, offset: u64) -> io::Result<()>;

    /// Read up to `buf.len()` bytes at the cursor, returning how many were read
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write one byte at the cursor and advance it
    fn write_byte(&mut self, value: u8) -> io::Result<()>;

    /// Release the store. Further operations fail.
    fn close(&mut self) -> io::Result<()>;
}

impl<S: ByteStore + ?Sized> ByteStore for Box<S> {
    fn length(&mut self) -> io::Result<u64> {
        (**self).length()
    }

    fn seek(&mut self, offset: u64) -> io::Result<()> {
        (**self).seek(offset)
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_chunk(buf)
    }

    fn write_byte(&mut self, value: u8) -> io::Result<()> {
        (**self).write_byte(value)
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

pub(crate) fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "store is closed")
}
