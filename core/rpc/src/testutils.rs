// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use prost::Message;
use tonic::{Code, Status};

use crate::classifier::{RETRY_INFO_TYPE_URL, pb};
use crate::observer::FlowControl;

/// `RESOURCE_EXHAUSTED` status carrying a `RetryInfo` in its details.
pub(crate) fn exhausted_with_retry_info(delay: Duration) -> Status {
    let info = pb::RetryInfo {
        retry_delay: Some(delay.try_into().unwrap()),
    };
    let details = pb::RpcStatus {
        code: Code::ResourceExhausted as i32,
        message: "quota exceeded".to_string(),
        details: vec![prost_types::Any {
            type_url: RETRY_INFO_TYPE_URL.to_string(),
            value: info.encode_to_vec(),
        }],
    };

    Status::with_details(
        Code::ResourceExhausted,
        "quota exceeded",
        details.encode_to_vec().into(),
    )
}

/// Flow-control handle recording every call made on it.
#[derive(Default)]
pub(crate) struct RecordingFlowControl {
    auto_disabled: AtomicBool,
    requests: Mutex<Vec<u32>>,
    cancels: Mutex<Vec<String>>,
}

impl RecordingFlowControl {
    pub(crate) fn auto_disabled(&self) -> bool {
        self.auto_disabled.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<u32> {
        self.requests.lock().clone()
    }

    pub(crate) fn cancels(&self) -> Vec<String> {
        self.cancels.lock().clone()
    }
}

impl FlowControl for RecordingFlowControl {
    fn disable_auto_inbound_flow_control(&self) {
        self.auto_disabled.store(true, Ordering::SeqCst);
    }

    fn request(&self, count: u32) {
        self.requests.lock().push(count);
    }

    fn cancel(&self, reason: &str) {
        self.cancels.lock().push(reason.to_string());
    }
}
