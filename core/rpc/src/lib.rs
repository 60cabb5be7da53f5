// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

pub mod classifier;
pub mod error;
pub mod flatten;
pub mod observer;
pub mod retry;
pub mod streaming;
pub mod unary;

#[cfg(test)]
pub(crate) mod testutils;

pub use callbridge_config::backoff::exponential::Config as RetryConfig;
pub use classifier::{Classification, classify};
pub use error::{CallError, Failure};
pub use flatten::{Emitter, FlatteningSubscriber};
pub use observer::{ClientResponseObserver, FlowControl, MAX_REQUEST, ResponseObserver};
pub use retry::{RetryContext, RetryPolicy};
pub use streaming::{ResponseStream, StreamState, StreamingCall, StreamingSink};
pub use unary::{UnaryCall, UnarySink, unary_call};
