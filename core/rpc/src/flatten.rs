// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Re-emission of wire items as a flat sequence of decoded items.
//!
//! A [`FlatteningSubscriber`] pulls one upstream item at a time, maps it to
//! zero or more downstream items and emits all of them before pulling again.
//! The mapper may keep state across items, e.g. to merge chunked values that
//! span several wire messages.
//!
//! Backpressure is only partial: upstream demand is one item at a time, but
//! every item produced from it is emitted at once, regardless of how much the
//! downstream asked for.

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::error::CallError;

/// Downstream receiver of flattened items.
pub trait Emitter<R> {
    fn next(&mut self, item: R);

    fn error(&mut self, err: CallError);

    fn complete(&mut self);

    /// Whether the downstream lost interest. Checked before each emission
    /// and before each upstream pull.
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl<R> Emitter<R> for mpsc::UnboundedSender<Result<R, CallError>> {
    fn next(&mut self, item: R) {
        let _ = self.send(Ok(item));
    }

    fn error(&mut self, err: CallError) {
        let _ = self.send(Err(err));
    }

    fn complete(&mut self) {}

    fn is_cancelled(&self) -> bool {
        self.is_closed()
    }
}

pub struct FlatteningSubscriber<F> {
    mapper: F,
}

impl<F> FlatteningSubscriber<F> {
    pub fn new(mapper: F) -> Self {
        FlatteningSubscriber { mapper }
    }

    /// Drain `upstream` into `downstream`.
    ///
    /// Errors and completion are forwarded as they are. Returns the emitter
    /// once the upstream is finished or the downstream is cancelled.
    pub async fn subscribe<T, I, R, S, E>(mut self, upstream: S, mut downstream: E) -> E
    where
        F: FnMut(T) -> I,
        I: IntoIterator<Item = R>,
        S: Stream<Item = Result<T, CallError>>,
        E: Emitter<R>,
    {
        let mut upstream = std::pin::pin!(upstream);
        let mut pulled = 0u64;

        loop {
            if downstream.is_cancelled() {
                tracing::debug!(pulled, "downstream cancelled, stop pulling");
                return downstream;
            }

            match upstream.next().await {
                Some(Ok(item)) => {
                    pulled += 1;
                    for out in (self.mapper)(item) {
                        if downstream.is_cancelled() {
                            break;
                        }
                        downstream.next(out);
                    }
                }
                Some(Err(err)) => {
                    downstream.error(err);
                    return downstream;
                }
                None => {
                    tracing::trace!(pulled, "upstream completed");
                    downstream.complete();
                    return downstream;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use tonic::Status;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        items: Vec<String>,
        errors: Vec<CallError>,
        completed: bool,
        limit: Option<usize>,
    }

    impl Emitter<String> for Recorder {
        fn next(&mut self, item: String) {
            self.items.push(item);
        }

        fn error(&mut self, err: CallError) {
            self.errors.push(err);
        }

        fn complete(&mut self) {
            self.completed = true;
        }

        fn is_cancelled(&self) -> bool {
            self.limit.is_some_and(|limit| self.items.len() >= limit)
        }
    }

    fn ok(items: &[&str]) -> Vec<Result<String, CallError>> {
        items.iter().map(|s| Ok(s.to_string())).collect()
    }

    #[tokio::test]
    async fn test_each_item_expanded_in_order() {
        let upstream = stream::iter(vec![Ok(1), Ok(2), Ok(3)]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _tx = FlatteningSubscriber::new(|i: u32| [i, i])
            .subscribe(upstream, tx)
            .await;

        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item.unwrap());
        }
        assert_eq!(out, vec![1, 1, 2, 2, 3, 3]);
    }

    #[tokio::test]
    async fn test_stateful_mapper_merges_chunks() {
        // a trailing '+' means the value continues in the next message
        let mut partial = String::new();
        let mapper = move |message: String| {
            let mut rows = Vec::new();
            for part in message.split(',') {
                match part.strip_suffix('+') {
                    Some(head) => partial.push_str(head),
                    None => {
                        partial.push_str(part);
                        rows.push(std::mem::take(&mut partial));
                    }
                }
            }
            rows
        };

        let upstream = stream::iter(ok(&["a,b,ca+", "rr+", "ot,d"]));
        let recorder = FlatteningSubscriber::new(mapper)
            .subscribe(upstream, Recorder::default())
            .await;

        assert_eq!(recorder.items, vec!["a", "b", "carrot", "d"]);
        assert!(recorder.completed);
        assert!(recorder.errors.is_empty());
    }

    #[tokio::test]
    async fn test_empty_expansion() {
        let upstream = stream::iter(ok(&["", "x", ""]));
        let recorder = FlatteningSubscriber::new(|s: String| {
            if s.is_empty() { None } else { Some(s) }
        })
        .subscribe(upstream, Recorder::default())
        .await;

        assert_eq!(recorder.items, vec!["x"]);
        assert!(recorder.completed);
    }

    #[tokio::test]
    async fn test_error_forwarded() {
        let mut items = ok(&["a"]);
        items.push(Err(Status::permission_denied("denied").into()));
        items.extend(ok(&["never"]));

        let recorder = FlatteningSubscriber::new(|s: String| [s])
            .subscribe(stream::iter(items), Recorder::default())
            .await;

        assert_eq!(recorder.items, vec!["a"]);
        assert_eq!(recorder.errors.len(), 1);
        assert!(matches!(recorder.errors[0], CallError::PermissionDenied(_)));
        assert!(!recorder.completed);
    }

    #[tokio::test]
    async fn test_stops_pulling_when_cancelled() {
        let mut pulled = 0;
        let upstream = stream::iter(ok(&["a,b", "c,d", "e,f"])).inspect(|_| pulled += 1);

        let recorder = FlatteningSubscriber::new(|s: String| {
            s.split(',').map(str::to_string).collect::<Vec<_>>()
        })
        .subscribe(
            upstream,
            Recorder {
                limit: Some(3),
                ..Default::default()
            },
        )
        .await;

        assert_eq!(recorder.items, vec!["a", "b", "c"]);
        assert!(!recorder.completed);
        assert_eq!(pulled, 2);
    }

    #[tokio::test]
    async fn test_closed_channel_is_cancelled() {
        let (tx, rx) = mpsc::unbounded_channel::<Result<u32, CallError>>();
        drop(rx);

        let upstream = stream::iter(vec![Ok(1u32)]);
        let tx = FlatteningSubscriber::new(|i: u32| [i])
            .subscribe(upstream, tx)
            .await;
        assert!(tx.is_closed());
    }
}
