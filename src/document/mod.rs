//! Document - a byte store with one streaming writer and late-joining readers
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//! ┌────────┐    ┌───────────────────┐    ┌──────────────┐    ┌───────────────┐
//! │ source │───►│ persist (lock,    │───►│ ReplayBuffer │───►│ joined        │
//! │ stream │    │ seek, write byte) │    │ (per write)  │    │ readers       │
//! └────────┘    └───────────────────┘    └──────────────┘    └───────────────┘
//!
//! Read Path:
//! ┌─────────────────────────┐    ┌──────────────────┐    ┌──────────────────┐
//! │ activate: length L +    │───►│ read [0, L) in   │───►│ live bytes with  │
//! │ join active write (lock)│    │ chunks (per lock)│    │ offset >= L      │
//! └─────────────────────────┘    └──────────────────┘    └──────────────────┘
//! ```
//!
//! The store, the write cursor and the write state live behind one lock.
//! A reader records the store length and subscribes to the active write
//! under that lock, so every byte is either below `L` (read from the store)
//! or persisted afterwards and delivered by the subscription.

mod config;
mod read;
mod write;

use std::mem;
use std::sync::Arc;

use futures::stream::Stream;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::replay::ReplayBuffer;
use crate::store::ByteStore;
use crate::types::{DocumentError, DocumentResult, PersistedByte, UpstreamError};

pub use config::{DocumentConfig, KEEP_ALIVE_ENV, READ_CHUNK_SIZE_ENV};
pub use read::ReadStream;
pub use write::WriteHandle;

use read::ReadSnapshot;
use write::{persisting, supervise, Persist, WriteSession};

/// Whether a write currently owns the document
enum WriteState {
    Idle,
    Writing {
        /// Next store offset to write
        cursor: u64,
        session: Arc<WriteSession>,
    },
}

struct Inner {
    store: Box<dyn ByteStore>,
    state: WriteState,
    disposed: bool,
    next_session_id: u64,
}

/// State shared between the document, its write tasks and its readers
pub(crate) struct Shared {
    inner: Mutex<Inner>,
    pub(crate) config: DocumentConfig,
}

impl Shared {
    /// Persist one byte for `session_id` at the write cursor
    pub(crate) fn persist(&self, session_id: u64, value: u8) -> Persist {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let (cursor, session) = match &mut inner.state {
            WriteState::Writing { cursor, session } if session.id == session_id => {
                (cursor, session)
            }
            _ => return Persist::Stale,
        };

        let offset = *cursor;
        let written = inner
            .store
            .seek(offset)
            .and_then(|_| inner.store.write_byte(value));

        match written {
            Ok(()) => {
                *cursor += 1;
                // A reader joining later starts past this offset, so the
                // unclaimed backlog is never replayed
                session.replay.discard_unclaimed();
                Persist::Written(PersistedByte { offset, value })
            }
            Err(e) => {
                let err = UpstreamError::new(format!("store write failed at {}: {}", offset, e));
                session.record_store_error(e);
                Persist::Failed(err)
            }
        }
    }

    /// Capture the store length and join the active write, atomically
    pub(crate) fn snapshot(&self) -> DocumentResult<ReadSnapshot> {
        let mut inner = self.inner.lock();
        if inner.disposed {
            return Err(DocumentError::Disposed);
        }

        let length = inner.store.length()?;
        let join = match &inner.state {
            WriteState::Writing { session, .. } => Some(session.replay.subscribe()),
            WriteState::Idle => None,
        };

        Ok(ReadSnapshot { length, join })
    }

    /// Read stored bytes starting at `offset` into `buf`
    pub(crate) fn read_chunk(&self, offset: u64, buf: &mut [u8]) -> DocumentResult<usize> {
        let mut inner = self.inner.lock();
        if inner.disposed {
            return Err(DocumentError::Disposed);
        }

        inner.store.seek(offset)?;
        Ok(inner.store.read_chunk(buf)?)
    }

    /// Release the write state if `session` still owns it, returning the
    /// final cursor
    pub(crate) fn finish_write(&self, session: &WriteSession) -> u64 {
        let mut inner = self.inner.lock();
        let owns = matches!(
            &inner.state,
            WriteState::Writing { session: active, .. } if active.id == session.id
        );
        if !owns {
            return session.start_offset;
        }

        match mem::replace(&mut inner.state, WriteState::Idle) {
            WriteState::Writing { cursor, .. } => cursor,
            WriteState::Idle => session.start_offset,
        }
    }

    /// Cancel `session` if it is still the active write
    pub(crate) fn cancel_write(&self, session: &WriteSession) {
        let mut inner = self.inner.lock();
        let owns = matches!(
            &inner.state,
            WriteState::Writing { session: active, .. } if active.id == session.id
        );
        if owns {
            inner.state = WriteState::Idle;
            session.cancel();
            tracing::debug!(start = session.start_offset, "write cancel requested");
        }
    }
}

/// A byte document backed by a [`ByteStore`].
///
/// At most one write may be active. Any number of reads may run at the same
/// time, each seeing the full contents followed by whatever the active
/// write produces.
///
/// Dropping the document disposes it.
pub struct Document {
    shared: Arc<Shared>,
}

impl Document {
    /// Create a document that owns `store` and closes it on dispose
    pub fn new<S: ByteStore + 'static>(store: S) -> Self {
        Self::with_config(store, DocumentConfig::default())
    }

    /// Create a document that leaves `store` open on dispose
    pub fn keep_alive<S: ByteStore + 'static>(store: S) -> Self {
        Self::with_config(store, DocumentConfig::default().with_keep_alive(true))
    }

    /// Create a document with custom config
    pub fn with_config<S: ByteStore + 'static>(store: S, config: DocumentConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    store: Box::new(store),
                    state: WriteState::Idle,
                    disposed: false,
                    next_session_id: 0,
                }),
                config,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &DocumentConfig {
        &self.shared.config
    }

    /// Append the bytes produced by `source` to the end of the document.
    ///
    /// Fails immediately with [`DocumentError::Disposed`] or
    /// [`DocumentError::WriteAlreadyInProgress`] without touching `source`.
    /// Otherwise the source is consumed on a background task and the
    /// returned handle resolves once it completes, fails, or the write is
    /// cancelled.
    ///
    /// The source is driven on the current Tokio runtime; outside one this
    /// fails with [`DocumentError::NoRuntime`].
    pub fn write<S, E>(&self, source: S) -> DocumentResult<WriteHandle>
    where
        S: Stream<Item = Result<u8, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| DocumentError::NoRuntime)?;
        let mut inner = self.shared.inner.lock();
        if inner.disposed {
            return Err(DocumentError::Disposed);
        }
        if matches!(inner.state, WriteState::Writing { .. }) {
            return Err(DocumentError::WriteAlreadyInProgress);
        }

        let cursor = inner.store.length()?;
        let id = inner.next_session_id;
        inner.next_session_id += 1;

        let replay = ReplayBuffer::with_handle(
            persisting(self.shared.clone(), id, source),
            runtime.clone(),
        );
        let session = Arc::new(WriteSession::new(id, cursor, replay));

        // The pump blocks on our lock until the session is installed below
        let connection = session.replay.connect()?;
        session.set_abort_handle(connection.abort_handle());
        inner.state = WriteState::Writing {
            cursor,
            session: session.clone(),
        };
        drop(inner);

        tracing::debug!(start = cursor, "write started");

        let (done_tx, done_rx) = oneshot::channel();
        runtime.spawn(supervise(
            self.shared.clone(),
            session.clone(),
            connection,
            done_tx,
        ));

        Ok(WriteHandle {
            shared: self.shared.clone(),
            session,
            done: done_rx,
        })
    }

    /// Read the whole document, joining the active write if there is one.
    ///
    /// Fails immediately with [`DocumentError::Disposed`]. The returned
    /// stream is lazy; see [`ReadStream`].
    pub fn read(&self) -> DocumentResult<ReadStream> {
        if self.is_disposed() {
            return Err(DocumentError::Disposed);
        }
        Ok(ReadStream::new(self.shared.clone()))
    }

    /// Cancel any active write and, unless kept alive, close the store.
    ///
    /// Only the first call does anything; a store close failure is returned
    /// from that call alone.
    pub fn dispose(&self) -> DocumentResult<()> {
        let mut inner = self.shared.inner.lock();
        if inner.disposed {
            return Ok(());
        }
        inner.disposed = true;

        if let WriteState::Writing { session, cursor } =
            mem::replace(&mut inner.state, WriteState::Idle)
        {
            session.cancel();
            tracing::debug!(
                start = session.start_offset,
                cursor,
                "disposed during write"
            );
        }

        if !self.shared.config.keep_alive {
            inner.store.close()?;
        }
        Ok(())
    }

    /// Current length of the stored bytes
    pub fn len(&self) -> DocumentResult<u64> {
        let mut inner = self.shared.inner.lock();
        if inner.disposed {
            return Err(DocumentError::Disposed);
        }
        Ok(inner.store.length()?)
    }

    /// Whether the store holds no bytes
    pub fn is_empty(&self) -> DocumentResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Whether a write is currently active
    pub fn is_writing(&self) -> bool {
        matches!(self.shared.inner.lock().state, WriteState::Writing { .. })
    }

    /// Whether `dispose()` has been called
    pub fn is_disposed(&self) -> bool {
        self.shared.inner.lock().disposed
    }
}

impl Drop for Document {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            tracing::warn!(error = %e, "failed to close store while dropping document");
        }
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("config", &self.shared.config)
            .field("writing", &self.is_writing())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use futures::{stream, StreamExt, TryStreamExt};
    use std::convert::Infallible;
    use std::time::Duration;

    fn bytes(data: &[u8]) -> impl Stream<Item = Result<u8, Infallible>> + Send + 'static {
        stream::iter(data.to_vec().into_iter().map(Ok))
    }

    fn delayed(count: u8, delay: Duration) -> impl Stream<Item = Result<u8, Infallible>> {
        async_stream::stream! {
            for i in 0..count {
                tokio::time::sleep(delay).await;
                yield Ok(i);
            }
        }
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let document = Document::new(MemoryStore::new());
        let summary = document.write(bytes(&[1, 2, 3])).unwrap().await.unwrap();
        assert_eq!(summary.start_offset, 0);
        assert_eq!(summary.bytes_written, 3);
        assert!(!document.is_writing());

        let read: Vec<u8> = document.read().unwrap().try_collect().await.unwrap();
        assert_eq!(read, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_second_write_appends() {
        let document = Document::new(MemoryStore::new());
        document.write(bytes(&[1, 2])).unwrap().await.unwrap();
        let summary = document.write(bytes(&[3])).unwrap().await.unwrap();
        assert_eq!(summary.start_offset, 2);
        assert_eq!(summary.end_offset(), 3);
        assert_eq!(document.len().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_small_chunks_read_everything() {
        let config = DocumentConfig::new().with_read_chunk_size(2);
        let document = Document::with_config(MemoryStore::from_bytes(vec![5, 6, 7, 8, 9]), config);
        let read: Vec<u8> = document.read().unwrap().try_collect().await.unwrap();
        assert_eq!(read, vec![5, 6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn test_write_while_writing_is_rejected() {
        let document = Document::new(MemoryStore::new());
        let first = document
            .write(delayed(5, Duration::from_millis(10)))
            .unwrap();
        assert!(document.is_writing());

        let second = document.write(bytes(&[99]));
        assert!(matches!(second, Err(DocumentError::WriteAlreadyInProgress)));

        first.await.unwrap();
        assert_eq!(document.len().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_cancel_allows_new_write() {
        let store = MemoryStore::new();
        let document = Document::new(store.clone());
        let handle = document
            .write(delayed(50, Duration::from_millis(10)))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(35)).await;

        handle.cancel();
        assert!(!document.is_writing());
        assert!(matches!(handle.await, Err(DocumentError::WriteCancelled)));

        let written = store.contents().len();
        assert!(written < 50);

        let summary = document.write(bytes(&[200])).unwrap().await.unwrap();
        assert_eq!(summary.start_offset, written as u64);
    }

    #[tokio::test]
    async fn test_read_is_lazy() {
        let document = Document::new(MemoryStore::new());
        let reader = document.read().unwrap();

        document.write(bytes(&[4, 5])).unwrap().await.unwrap();

        // Activation happens on first poll, after the write finished
        let read: Vec<u8> = reader.try_collect().await.unwrap();
        assert_eq!(read, vec![4, 5]);
    }

    #[tokio::test]
    async fn test_dispose_then_operations_fail() {
        let document = Document::new(MemoryStore::new());
        document.dispose().unwrap();
        document.dispose().unwrap();

        assert!(document.is_disposed());
        assert!(matches!(document.read(), Err(DocumentError::Disposed)));
        assert!(matches!(
            document.write(bytes(&[1])),
            Err(DocumentError::Disposed)
        ));
        assert!(matches!(document.len(), Err(DocumentError::Disposed)));
    }

    #[tokio::test]
    async fn test_unread_write_keeps_backlog_bounded() {
        const N: usize = 10_000;
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Result<u8, Infallible>>();
        let document = Document::new(MemoryStore::new());
        let write = document
            .write(tokio_stream::wrappers::UnboundedReceiverStream::new(rx))
            .unwrap();

        for i in 0..N {
            tx.send(Ok((i % 251) as u8)).unwrap();
        }
        tokio::time::timeout(Duration::from_secs(5), async {
            while document.len().unwrap() < N as u64 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let backlog = match &document.shared.inner.lock().state {
            WriteState::Writing { session, .. } => session.replay.buffered_len(),
            WriteState::Idle => panic!("write should still be active"),
        };
        assert!(backlog <= 1, "backlog grew to {}", backlog);

        // A reader joining now still sees every byte exactly once
        let reader = document.read().unwrap();
        let reader = tokio::spawn(reader.try_collect::<Vec<u8>>());
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(Ok(7)).unwrap();
        drop(tx);

        let read = reader.await.unwrap().unwrap();
        write.await.unwrap();
        assert_eq!(read.len(), N + 1);
        assert_eq!(&read[..3], &[0, 1, 2]);
        assert_eq!(read.last(), Some(&7));
    }

    #[tokio::test]
    async fn test_dispose_interrupts_history_on_kept_store() {
        let config = DocumentConfig::new()
            .with_read_chunk_size(1)
            .with_keep_alive(true);
        let store = MemoryStore::from_bytes(vec![1, 2, 3]);
        let document = Document::with_config(store.clone(), config);

        let mut reader = document.read().unwrap();
        assert_eq!(reader.next().await.unwrap().unwrap(), 1);
        document.dispose().unwrap();

        assert!(matches!(reader.next().await, Some(Err(DocumentError::Disposed))));
        assert!(reader.next().await.is_none());
        assert!(!store.is_closed());
    }

    #[test]
    fn test_write_outside_runtime_fails() {
        let store = MemoryStore::new();
        let document = Document::new(store.clone());
        assert!(matches!(
            document.write(bytes(&[1])),
            Err(DocumentError::NoRuntime)
        ));
        assert!(!document.is_writing());
        assert!(store.contents().is_empty());
    }

    #[tokio::test]
    async fn test_reader_activated_after_dispose_fails() {
        let document = Document::keep_alive(MemoryStore::from_bytes(vec![1]));
        let reader = document.read().unwrap();
        document.dispose().unwrap();

        let result: DocumentResult<Vec<u8>> = reader.try_collect().await;
        assert!(matches!(result, Err(DocumentError::Disposed)));
    }
}
