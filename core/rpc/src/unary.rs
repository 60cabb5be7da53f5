// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Single-response calls bridged to a future.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::RetryConfig;
use crate::error::{CallError, Failure};
use crate::observer::ResponseObserver;
use crate::retry::RetryPolicy;

struct SinkInner<T> {
    // set by the first value or error
    terminal: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<Result<T, CallError>>>>,
}

/// Result sink handed to a unary invocation.
///
/// The first value or error settles the call. Anything delivered after that
/// is dropped. Dropping every clone of the sink without a terminal event
/// settles the call with [`CallError::Abandoned`].
pub struct UnarySink<T> {
    inner: Arc<SinkInner<T>>,
}

impl<T> Clone for UnarySink<T> {
    fn clone(&self) -> Self {
        UnarySink {
            inner: self.inner.clone(),
        }
    }
}

impl<T> UnarySink<T> {
    fn new(tx: oneshot::Sender<Result<T, CallError>>) -> Self {
        UnarySink {
            inner: Arc::new(SinkInner {
                terminal: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
            }),
        }
    }

    /// Settle the call with `result`, handing it back when the call was
    /// already settled.
    fn deliver(&self, result: Result<T, CallError>) -> Option<Result<T, CallError>> {
        if self.inner.terminal.swap(true, Ordering::AcqRel) {
            return Some(result);
        }

        if let Some(tx) = self.inner.tx.lock().take() {
            // the caller may have stopped waiting
            let _ = tx.send(result);
        }
        None
    }
}

impl<T: Send> ResponseObserver<T> for UnarySink<T> {
    fn on_next(&self, value: T) {
        if self.deliver(Ok(value)).is_some() {
            tracing::debug!("ignoring value received after the call was settled");
        }
    }

    fn on_error(&self, failure: Failure) {
        if let Some(Err(err)) = self.deliver(Err(CallError::from_failure(failure))) {
            tracing::debug!(error = %err, "ignoring error received after the call was settled");
        }
    }

    fn on_completed(&self) {
        if self.inner.terminal.load(Ordering::Acquire) {
            return;
        }

        if self.deliver(Err(CallError::IncompleteCall)).is_none() {
            tracing::debug!("unary call completed without a value");
        }
    }
}

/// Bridge a single unary call to a future, without retry.
///
/// `call` is invoked once, when the returned future is first polled.
pub async fn unary_call<T, F>(call: F) -> Result<T, CallError>
where
    F: FnOnce(UnarySink<T>),
{
    let (tx, rx) = oneshot::channel();
    call(UnarySink::new(tx));

    rx.await.unwrap_or(Err(CallError::Abandoned))
}

/// Unary call adapter with transient-failure retry.
#[derive(Debug, Clone, Default)]
pub struct UnaryCall {
    policy: RetryPolicy,
}

impl UnaryCall {
    pub fn new(config: RetryConfig) -> Self {
        UnaryCall {
            policy: RetryPolicy::new(config),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Make a unary call
    ///
    /// Nothing happens until the returned future is polled. Every attempt
    /// invokes `call` with a fresh [`UnarySink`]; attempts failing with a
    /// transient error are retried according to the configured policy.
    ///
    /// # Arguments
    /// * `call` - Starts one remote operation reporting to the given sink
    ///
    /// # Returns
    /// The value of the first successful attempt, or the last error
    pub async fn invoke<T, F>(&self, call: F) -> Result<T, CallError>
    where
        F: Fn(UnarySink<T>),
    {
        let call = &call;
        self.policy.retry(move || unary_call(call)).await
    }

    /// Poll a long-running operation
    ///
    /// Repeatedly invokes `call`, each time under the retry policy, waiting
    /// `interval` between invocations, until `is_done` holds for the
    /// returned value.
    ///
    /// # Arguments
    /// * `call` - Fetches the current state of the operation
    /// * `is_done` - Tells whether the operation is finished
    /// * `interval` - Pause between two polls
    /// * `timeout` - Overall time limit, retries included
    ///
    /// # Returns
    /// The first finished value, or [`CallError::DeadlineExceeded`] once
    /// `timeout` has elapsed
    pub async fn poll_until<T, F, P>(
        &self,
        call: F,
        is_done: P,
        interval: Duration,
        timeout: Duration,
    ) -> Result<T, CallError>
    where
        F: Fn(UnarySink<T>),
        P: Fn(&T) -> bool,
    {
        let poll = async {
            let mut polls = 0u32;
            loop {
                let value = self.invoke(&call).await?;
                polls += 1;
                if is_done(&value) {
                    tracing::debug!(polls, "operation done");
                    return Ok(value);
                }
                tokio::time::sleep(interval).await;
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "operation polling timed out");
                Err(CallError::DeadlineExceeded(timeout))
            }
        }
    }
}
