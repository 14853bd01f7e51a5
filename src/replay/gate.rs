//! Shared state behind a replay buffer
//!
//! Every mutation of the backlog queue and of the live subscriber list happens
//! under one lock, so enqueueing an item and swapping the queue out can never
//! interleave.

use std::collections::VecDeque;
use std::mem;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::types::UpstreamError;

/// Item or terminal notification flowing through a replay buffer
#[derive(Debug, Clone)]
pub(crate) enum Signal<T> {
    Next(T),
    Completed,
    Failed(UpstreamError),
}

impl<T> Signal<T> {
    pub(crate) fn is_terminal(&self) -> bool {
        !matches!(self, Signal::Next(_))
    }

    /// The value a subscriber yields for this signal (`None` for completion)
    pub(crate) fn into_item(self) -> Option<Result<T, UpstreamError>> {
        match self {
            Signal::Next(item) => Some(Ok(item)),
            Signal::Completed => None,
            Signal::Failed(e) => Some(Err(e)),
        }
    }
}

pub(crate) type LiveSender<T> = mpsc::UnboundedSender<Signal<T>>;
pub(crate) type LiveReceiver<T> = mpsc::UnboundedReceiver<Signal<T>>;

/// How a new subscriber was registered
pub(crate) enum Claim<T> {
    /// First subscriber: drains the backlog before going live
    Replay { id: u64 },
    /// Any later subscriber: live items only
    Live { id: u64, rx: LiveReceiver<T> },
}

struct GateState<T> {
    /// Backlog for the first subscriber; `None` once buffering has ended
    queue: Option<VecDeque<Signal<T>>>,
    /// Id of the subscriber that owns the backlog
    first: Option<u64>,
    live: Vec<(u64, LiveSender<T>)>,
    terminal: Option<Signal<T>>,
    next_id: u64,
}

pub(crate) struct Gate<T> {
    state: Mutex<GateState<T>>,
}

impl<T: Clone> Gate<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                queue: Some(VecDeque::new()),
                first: None,
                live: Vec::new(),
                terminal: None,
                next_id: 0,
            }),
        }
    }

    /// Deliver an upstream item
    pub(crate) fn push(&self, item: T) {
        let mut state = self.state.lock();
        if state.terminal.is_some() {
            return;
        }
        if let Some(queue) = state.queue.as_mut() {
            queue.push_back(Signal::Next(item.clone()));
        }
        state
            .live
            .retain(|(_, tx)| tx.send(Signal::Next(item.clone())).is_ok());
    }

    /// Deliver the terminal signal. Only the first call has any effect.
    pub(crate) fn terminate(&self, signal: Signal<T>) {
        debug_assert!(signal.is_terminal());
        let mut state = self.state.lock();
        if state.terminal.is_some() {
            return;
        }
        if let Some(queue) = state.queue.as_mut() {
            queue.push_back(signal.clone());
        }
        for (_, tx) in state.live.drain(..) {
            let _ = tx.send(signal.clone());
        }
        state.terminal = Some(signal);
    }

    /// Register a subscriber
    pub(crate) fn claim(&self) -> Claim<T> {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;

        if state.first.is_none() && state.queue.is_some() {
            state.first = Some(id);
            return Claim::Replay { id };
        }

        let (tx, rx) = mpsc::unbounded_channel();
        match state.terminal.clone() {
            Some(terminal) => {
                let _ = tx.send(terminal);
            }
            None => state.live.push((id, tx)),
        }
        Claim::Live { id, rx }
    }

    /// Take the pending backlog, leaving an empty queue behind.
    ///
    /// Returns `None` when the swap observes an empty queue: buffering ends for
    /// good and `tx` is attached to the live list under the same lock, so the
    /// next item pushed reaches it directly.
    pub(crate) fn swap(&self, id: u64, tx: &LiveSender<T>) -> Option<VecDeque<Signal<T>>> {
        let mut state = self.state.lock();
        if let Some(queue) = state.queue.as_mut() {
            if !queue.is_empty() {
                return Some(mem::take(queue));
            }
        }

        state.queue = None;
        match state.terminal.clone() {
            Some(terminal) => {
                let _ = tx.send(terminal);
            }
            None => state.live.push((id, tx.clone())),
        }
        None
    }

    /// Remove a subscriber. A first subscriber leaving before it caught up
    /// discards the backlog.
    pub(crate) fn detach(&self, id: u64) {
        let mut state = self.state.lock();
        state.live.retain(|(live_id, _)| *live_id != id);
        if state.first == Some(id) {
            state.queue = None;
        }
    }

    /// Drop queued items while no subscriber has claimed the backlog.
    /// A queued terminal signal is kept.
    pub(crate) fn discard_unclaimed(&self) {
        let mut state = self.state.lock();
        if state.first.is_some() {
            return;
        }
        if let Some(queue) = state.queue.as_mut() {
            queue.retain(Signal::is_terminal);
        }
    }

    pub(crate) fn is_buffering(&self) -> bool {
        self.state.lock().queue.is_some()
    }

    pub(crate) fn buffered_len(&self) -> usize {
        self.state.lock().queue.as_ref().map_or(0, VecDeque::len)
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        let state = self.state.lock();
        let draining = state.first.is_some() && state.queue.is_some();
        state.live.len() + usize::from(draining)
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.state.lock().terminal.is_some()
    }
}
