//! Read side of a document: historical scan followed by a live join

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{BoxStream, Stream, StreamExt};

use super::Shared;
use crate::replay::Subscription;
use crate::types::{DocumentError, DocumentResult, PersistedByte};

/// What a reader captured when it activated
pub(crate) struct ReadSnapshot {
    /// Store length at activation; everything below it is read from the store
    pub(crate) length: u64,
    /// Join to the write that was active at activation, if any
    pub(crate) join: Option<Subscription<PersistedByte>>,
}

/// Lazy byte sequence returned by [`Document::read`](super::Document::read).
///
/// Nothing is captured until the stream is first polled. At that point it
/// records the store length and, if a write is active, joins it. It then
/// yields the stored bytes followed by every byte the active write
/// persists until it terminates.
///
/// Each stored chunk is read under the document lock and checks for
/// disposal first. Disposing the document while a reader is still in its
/// stored-bytes phase ends that reader with [`DocumentError::Disposed`],
/// even on a `keep_alive` document whose store stays open. A reader
/// already following the live write sees plain completion instead.
pub struct ReadStream {
    inner: BoxStream<'static, DocumentResult<u8>>,
}

impl ReadStream {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        let inner = async_stream::stream! {
            let snapshot = match shared.snapshot() {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            let length = snapshot.length;
            tracing::debug!(length, joined = snapshot.join.is_some(), "read activated");

            let chunk_size = shared.config.read_chunk_size.max(1);
            let mut buffer = vec![0u8; chunk_size];
            let mut position = 0u64;

            while position < length {
                let want = (length - position).min(chunk_size as u64) as usize;
                let read = match shared.read_chunk(position, &mut buffer[..want]) {
                    Ok(0) => {
                        yield Err(DocumentError::Store(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("store ended at {} of {} bytes", position, length),
                        )));
                        return;
                    }
                    Ok(read) => read,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                for &value in &buffer[..read] {
                    yield Ok(value);
                }
                position += read as u64;
            }

            if let Some(mut join) = snapshot.join {
                while let Some(item) = join.next().await {
                    match item {
                        // Persisted before activation, already read from the store
                        Ok(byte) if byte.offset < length => continue,
                        Ok(byte) => {
                            yield Ok(byte.value);
                        }
                        Err(e) => {
                            yield Err(DocumentError::UpstreamFailure(e));
                            return;
                        }
                    }
                }
            }
        };

        Self {
            inner: inner.boxed(),
        }
    }
}

impl Stream for ReadStream {
    type Item = DocumentResult<u8>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
