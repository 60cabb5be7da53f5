// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Callback seams between a transport and the adapters.
//!
//! A transport delivers the outcome of a call by invoking a
//! [`ResponseObserver`]. Streaming calls additionally hand over a
//! [`FlowControl`] handle before the first message, through which the
//! adapter pulls items and cancels the call.

use std::sync::Arc;

use crate::error::Failure;

/// Largest demand forwarded to the transport in a single request, the size of
/// the largest HTTP/2 flow-control window.
pub const MAX_REQUEST: u32 = i32::MAX as u32;

/// Receives the events of one remote call.
///
/// Callbacks may arrive on any transport thread, but never concurrently
/// for the same call.
pub trait ResponseObserver<T>: Send + Sync {
    fn on_next(&self, value: T);

    fn on_error(&self, failure: Failure);

    fn on_completed(&self);
}

/// Observer of a call whose inbound messages are flow controlled.
pub trait ClientResponseObserver<T>: ResponseObserver<T> {
    /// Called once by the transport when the call has been accepted, before
    /// any message is delivered.
    fn before_start(&self, handle: Arc<dyn FlowControl>);
}

/// Per-call flow-control capability exposed by the transport.
pub trait FlowControl: Send + Sync {
    /// Stop the transport from requesting messages on its own.
    fn disable_auto_inbound_flow_control(&self);

    /// Ask for up to `count` more messages.
    fn request(&self, count: u32);

    /// Cancel the remote call.
    fn cancel(&self, reason: &str);
}
