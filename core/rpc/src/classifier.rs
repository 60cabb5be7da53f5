// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Transient-failure classification for transport errors.
//!
//! Only two kinds of [`Status`] are considered transient:
//! - `INTERNAL` whose message carries one of the known connection-reset
//!   fragments in [`TRANSIENT_MESSAGES`];
//! - `RESOURCE_EXHAUSTED` carrying a `google.rpc.RetryInfo` with a delay,
//!   either in the status details or in the `google.rpc.retryinfo-bin` trailer.
//!
//! Anything else, including errors that are not a [`Status`], is fatal.

use std::error::Error;
use std::time::Duration;

use prost::Message;
use tonic::{Code, Status};

/// Message fragments of `INTERNAL` failures caused by a dropped connection.
pub const TRANSIENT_MESSAGES: [&str; 3] = [
    "HTTP/2 error code: INTERNAL_ERROR",
    "Connection closed with unknown cause",
    "Received unexpected EOS on DATA frame from server",
];

/// Trailer carrying a binary-encoded `google.rpc.RetryInfo`.
pub const RETRY_INFO_TRAILER: &str = "google.rpc.retryinfo-bin";

pub const RETRY_INFO_TYPE_URL: &str = "type.googleapis.com/google.rpc.RetryInfo";

/// Wire types of the `google.rpc` error model.
pub mod pb {
    /// `google.rpc.Status`, as carried in [`tonic::Status::details`].
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct RpcStatus {
        #[prost(int32, tag = "1")]
        pub code: i32,
        #[prost(string, tag = "2")]
        pub message: String,
        #[prost(message, repeated, tag = "3")]
        pub details: Vec<prost_types::Any>,
    }

    /// `google.rpc.RetryInfo`
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct RetryInfo {
        #[prost(message, optional, tag = "1")]
        pub retry_delay: Option<prost_types::Duration>,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Classification {
    pub retryable: bool,
    pub retry_after: Option<Duration>,
}

impl Classification {
    pub fn fatal() -> Self {
        Classification::default()
    }

    pub fn retryable(retry_after: Option<Duration>) -> Self {
        Classification {
            retryable: true,
            retry_after,
        }
    }
}

/// Classify an arbitrary failure.
pub fn classify(failure: &(dyn Error + 'static)) -> Classification {
    match failure.downcast_ref::<Status>() {
        Some(status) => classify_status(status),
        None => Classification::fatal(),
    }
}

pub fn classify_status(status: &Status) -> Classification {
    match status.code() {
        Code::Internal
            if TRANSIENT_MESSAGES
                .iter()
                .any(|fragment| status.message().contains(fragment)) =>
        {
            Classification::retryable(None)
        }
        Code::ResourceExhausted => match retry_delay(status) {
            Some(delay) => Classification::retryable(Some(delay)),
            None => Classification::fatal(),
        },
        _ => Classification::fatal(),
    }
}

/// Server-suggested retry delay carried by `status`, if any.
pub fn retry_delay(status: &Status) -> Option<Duration> {
    details_retry_info(status)
        .and_then(delay_of)
        .or_else(|| trailer_retry_info(status).and_then(delay_of))
}

fn details_retry_info(status: &Status) -> Option<pb::RetryInfo> {
    if status.details().is_empty() {
        return None;
    }

    let rpc_status = pb::RpcStatus::decode(status.details()).ok()?;
    rpc_status
        .details
        .iter()
        .find(|any| any.type_url == RETRY_INFO_TYPE_URL)
        .and_then(|any| pb::RetryInfo::decode(any.value.as_slice()).ok())
}

fn trailer_retry_info(status: &Status) -> Option<pb::RetryInfo> {
    let raw = status.metadata().get_bin(RETRY_INFO_TRAILER)?;
    let bytes = raw.to_bytes().ok()?;

    pb::RetryInfo::decode(bytes).ok()
}

fn delay_of(info: pb::RetryInfo) -> Option<Duration> {
    info.retry_delay.and_then(|d| Duration::try_from(d).ok())
}
