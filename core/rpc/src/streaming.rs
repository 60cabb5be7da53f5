// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Flow-controlled streaming calls bridged to a [`Stream`].
//!
//! The transport pushes messages through a [`StreamingSink`]; the consumer
//! pulls them from the matching [`ResponseStream`]. Demand expressed by the
//! consumer, explicitly with [`ResponseStream::request`] or implicitly by
//! polling an empty stream, is forwarded to the transport flow-control
//! handle. Demand expressed before the transport hands over its handle is
//! accumulated and flushed in a single request.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::Stream;
use futures::stream::FusedStream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{CallError, Failure};
use crate::observer::{ClientResponseObserver, FlowControl, MAX_REQUEST, ResponseObserver};

const NOT_STARTED: u8 = 0;
const ACTIVE: u8 = 1;
const COMPLETED: u8 = 2;
const ERRORED: u8 = 3;
const CANCELLED: u8 = 4;

const CANCEL_REASON: &str = "cancelled by the consumer";

/// Lifecycle of a streaming call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    NotStarted,
    Active,
    Completed,
    Errored,
    Cancelled,
}

impl StreamState {
    fn from_u8(state: u8) -> Self {
        match state {
            NOT_STARTED => StreamState::NotStarted,
            ACTIVE => StreamState::Active,
            COMPLETED => StreamState::Completed,
            ERRORED => StreamState::Errored,
            _ => StreamState::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamState::Completed | StreamState::Errored | StreamState::Cancelled
        )
    }
}

enum Signal<T> {
    Next(T),
    Error(CallError),
    Completed,
}

#[derive(Default)]
struct Demand {
    handle: Option<Arc<dyn FlowControl>>,
    // demand recorded before the handle was available
    pending: u64,
    cancel_sent: bool,
}

struct Shared {
    state: AtomicU8,
    demand: Mutex<Demand>,
    // requested by the consumer and not yet received
    outstanding: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Shared {
            state: AtomicU8::new(NOT_STARTED),
            demand: Mutex::new(Demand::default()),
            outstanding: AtomicU64::new(0),
        }
    }

    fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn is_terminal(&self) -> bool {
        self.state.load(Ordering::Acquire) >= COMPLETED
    }

    /// Move to a terminal state. Succeeds for the first caller only.
    fn terminate(&self, to: u8) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= COMPLETED {
                return false;
            }
            match self
                .state
                .compare_exchange_weak(current, to, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn request(&self, count: u64) {
        if count == 0 || self.is_terminal() {
            return;
        }

        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_add(count))
            });

        let handle = {
            let mut demand = self.demand.lock();
            match &demand.handle {
                Some(handle) => handle.clone(),
                None => {
                    demand.pending = demand.pending.saturating_add(count);
                    return;
                }
            }
        };

        handle.request(clamp_request(count));
    }

    /// Record one message handed to the consumer.
    fn received(&self) {
        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            });
    }

    fn cancel(&self) {
        if !self.terminate(CANCELLED) {
            return;
        }

        let handle = {
            let mut demand = self.demand.lock();
            match demand.handle.clone() {
                Some(handle) if !demand.cancel_sent => {
                    demand.cancel_sent = true;
                    handle
                }
                // applied when the handle arrives
                _ => return,
            }
        };

        tracing::debug!("cancelling streaming call");
        handle.cancel(CANCEL_REASON);
    }

    fn start(&self, handle: Arc<dyn FlowControl>) {
        handle.disable_auto_inbound_flow_control();

        let (cancelled, pending) = {
            let mut demand = self.demand.lock();
            if demand.handle.is_some() {
                tracing::warn!("flow-control handle already set, ignoring the new one");
                return;
            }
            demand.handle = Some(handle.clone());

            if self.state.load(Ordering::Acquire) == CANCELLED && !demand.cancel_sent {
                demand.cancel_sent = true;
                (true, 0)
            } else {
                (false, std::mem::take(&mut demand.pending))
            }
        };

        if cancelled {
            tracing::debug!("streaming call cancelled before start");
            handle.cancel(CANCEL_REASON);
            return;
        }

        let _ = self.state.compare_exchange(
            NOT_STARTED,
            ACTIVE,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        if pending > 0 {
            tracing::trace!(pending, "flushing demand recorded before start");
            handle.request(clamp_request(pending));
        }
    }
}

fn clamp_request(count: u64) -> u32 {
    count.min(MAX_REQUEST as u64) as u32
}

/// Transport side of a streaming call.
pub struct StreamingSink<T> {
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<Signal<T>>,
}

impl<T> Clone for StreamingSink<T> {
    fn clone(&self) -> Self {
        StreamingSink {
            shared: self.shared.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<T> StreamingSink<T> {
    fn send(&self, signal: Signal<T>) {
        // the stream may already be gone
        let _ = self.tx.send(signal);
    }
}

impl<T: Send> ResponseObserver<T> for StreamingSink<T> {
    fn on_next(&self, value: T) {
        if self.shared.is_terminal() {
            tracing::trace!(state = ?self.shared.state(), "ignoring message on a finished stream");
            return;
        }
        self.send(Signal::Next(value));
    }

    fn on_error(&self, failure: Failure) {
        let err = CallError::from_failure(failure);
        if self.shared.terminate(ERRORED) {
            tracing::debug!(error = %err, "streaming call failed");
            self.send(Signal::Error(err));
        } else {
            tracing::debug!(error = %err, state = ?self.shared.state(), "ignoring error on a finished stream");
        }
    }

    fn on_completed(&self) {
        if self.shared.terminate(COMPLETED) {
            self.send(Signal::Completed);
        }
    }
}

impl<T: Send> ClientResponseObserver<T> for StreamingSink<T> {
    fn before_start(&self, handle: Arc<dyn FlowControl>) {
        self.shared.start(handle);
    }
}

/// Consumer side of a streaming call.
///
/// Yields the messages of the call in arrival order, then ends after
/// completion or after yielding the call error. Dropping the stream cancels
/// the call.
pub struct ResponseStream<T> {
    shared: Arc<Shared>,
    rx: mpsc::UnboundedReceiver<Signal<T>>,
    done: bool,
}

impl<T> Unpin for ResponseStream<T> {}

impl<T> ResponseStream<T> {
    /// Ask the transport for `count` more messages.
    pub fn request(&self, count: u64) {
        self.shared.request(count);
    }

    /// Cancel the call. Buffered messages are discarded and the stream ends.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    pub fn state(&self) -> StreamState {
        self.shared.state()
    }
}

impl<T> Stream for ResponseStream<T> {
    type Item = Result<T, CallError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            if this.shared.state.load(Ordering::Acquire) == CANCELLED {
                this.done = true;
                return Poll::Ready(None);
            }

            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(Signal::Next(value))) => {
                    this.shared.received();
                    return Poll::Ready(Some(Ok(value)));
                }
                Poll::Ready(Some(Signal::Error(err))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(Some(Signal::Completed)) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Ready(None) => {
                    this.done = true;
                    if this.shared.terminate(ERRORED) {
                        tracing::warn!("streaming call dropped by the transport");
                        return Poll::Ready(Some(Err(CallError::Abandoned)));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => {
                    if this.shared.is_terminal()
                        || this.shared.outstanding.load(Ordering::Acquire) > 0
                    {
                        return Poll::Pending;
                    }
                    // pulling an empty stream asks for one message
                    this.shared.request(1);
                }
            }
        }
    }
}

impl<T> FusedStream for ResponseStream<T> {
    fn is_terminated(&self) -> bool {
        self.done
    }
}

impl<T> Drop for ResponseStream<T> {
    fn drop(&mut self) {
        self.shared.cancel();
    }
}

/// Streaming call adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingCall;

impl StreamingCall {
    pub fn new() -> Self {
        StreamingCall
    }

    /// Start a streaming call
    ///
    /// `call` is invoked right away with the sink the transport reports to.
    /// The transport is expected to hand over its flow-control handle through
    /// [`ClientResponseObserver::before_start`] before delivering messages.
    ///
    /// # Arguments
    /// * `call` - Starts the remote operation reporting to the given sink
    ///
    /// # Returns
    /// The stream of messages of the call
    pub fn invoke<T, F>(&self, call: F) -> ResponseStream<T>
    where
        T: Send,
        F: FnOnce(StreamingSink<T>),
    {
        let shared = Arc::new(Shared::new());
        let (tx, rx) = mpsc::unbounded_channel();

        call(StreamingSink {
            shared: shared.clone(),
            tx,
        });

        ResponseStream {
            shared,
            rx,
            done: false,
        }
    }
}
