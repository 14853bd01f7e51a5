//! Consumer side of a replay buffer

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::gate::{Gate, LiveReceiver};
use crate::types::UpstreamError;

/// A consumer attached to a [`ReplayBuffer`](super::ReplayBuffer).
///
/// Yields every item the consumer is entitled to, then ends after the
/// upstream completes. An upstream error is yielded as the last item.
/// Dropping the subscription detaches only this consumer.
pub struct Subscription<T> {
    inner: BoxStream<'static, Result<T, UpstreamError>>,
}

/// Detaches a subscriber from the gate when its stream is dropped
struct Detach<T: Clone> {
    gate: Arc<Gate<T>>,
    id: u64,
}

impl<T: Clone> Drop for Detach<T> {
    fn drop(&mut self) {
        self.gate.detach(self.id);
    }
}

impl<T: Clone + Send + 'static> Subscription<T> {
    /// First subscriber: drain the backlog batch by batch, then go live
    pub(crate) fn replay(gate: Arc<Gate<T>>, id: u64) -> Self {
        let detach = Detach {
            gate: gate.clone(),
            id,
        };
        let inner = async_stream::stream! {
            let _detach = detach;
            let (tx, rx) = mpsc::unbounded_channel();

            while let Some(batch) = gate.swap(id, &tx) {
                for signal in batch {
                    let terminal = signal.is_terminal();
                    if let Some(item) = signal.into_item() {
                        yield item;
                    }
                    if terminal {
                        return;
                    }
                }
                tokio::task::yield_now().await;
            }
            drop(tx);

            tracing::trace!(subscriber = id, "replay caught up, switching to live");
            let mut live = UnboundedReceiverStream::new(rx);
            while let Some(signal) = live.next().await {
                let terminal = signal.is_terminal();
                if let Some(item) = signal.into_item() {
                    yield item;
                }
                if terminal {
                    return;
                }
            }
        };

        Self {
            inner: inner.boxed(),
        }
    }

    /// Later subscriber: live items only
    pub(crate) fn live(gate: Arc<Gate<T>>, id: u64, rx: LiveReceiver<T>) -> Self {
        let detach = Detach { gate, id };
        let inner = async_stream::stream! {
            let _detach = detach;
            let mut live = UnboundedReceiverStream::new(rx);
            while let Some(signal) = live.next().await {
                let terminal = signal.is_terminal();
                if let Some(item) = signal.into_item() {
                    yield item;
                }
                if terminal {
                    return;
                }
            }
        };

        Self {
            inner: inner.boxed(),
        }
    }
}

impl<T> Stream for Subscription<T> {
    type Item = Result<T, UpstreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
