// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use thiserror::Error;
use tonic::{Code, Status};

use crate::classifier;

/// A failure reported by the transport. Usually a [`tonic::Status`], but any
/// error type is accepted and classified as non-transient.
pub type Failure = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Terminal error of a bridged call. Every variant built from a transport
/// failure keeps that failure as its source.
#[derive(Error, Debug)]
pub enum CallError {
    #[error("transient transport failure: {source}")]
    Transient {
        #[source]
        source: Failure,
        retry_after: Option<Duration>,
    },

    #[error("data integrity violation: {0}")]
    DataIntegrityViolation(#[source] Failure),

    #[error("bad grammar: {0}")]
    BadGrammar(#[source] Failure),

    #[error("permission denied: {0}")]
    PermissionDenied(#[source] Failure),

    #[error("non-transient failure: {0}")]
    NonTransient(#[source] Failure),

    #[error("unary call completed without yielding a value or an error")]
    IncompleteCall,

    #[error("call dropped by the transport without a terminal event")]
    Abandoned,

    #[error("operation did not complete within {0:?}")]
    DeadlineExceeded(Duration),
}

impl CallError {
    /// Classify a transport failure.
    pub fn from_failure(failure: Failure) -> Self {
        let classification = classifier::classify(failure.as_ref());
        if classification.retryable {
            return CallError::Transient {
                source: failure,
                retry_after: classification.retry_after,
            };
        }

        match failure.downcast_ref::<Status>().map(Status::code) {
            Some(Code::AlreadyExists) => CallError::DataIntegrityViolation(failure),
            Some(Code::InvalidArgument) => CallError::BadGrammar(failure),
            Some(Code::PermissionDenied) => CallError::PermissionDenied(failure),
            _ => CallError::NonTransient(failure),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, CallError::Transient { .. })
    }

    /// Server-suggested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CallError::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// The transport failure this error was built from.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            CallError::Transient { source, .. }
            | CallError::DataIntegrityViolation(source)
            | CallError::BadGrammar(source)
            | CallError::PermissionDenied(source)
            | CallError::NonTransient(source) => Some(source),
            CallError::IncompleteCall
            | CallError::Abandoned
            | CallError::DeadlineExceeded(_) => None,
        }
    }

    /// The transport status, when the call failed with one.
    pub fn status(&self) -> Option<&Status> {
        self.failure()?.downcast_ref::<Status>()
    }
}

impl From<Status> for CallError {
    fn from(status: Status) -> Self {
        CallError::from_failure(Box::new(status))
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_permanent_failures_by_code() {
        let err = CallError::from(Status::already_exists("row exists"));
        assert!(matches!(err, CallError::DataIntegrityViolation(_)));

        let err = CallError::from(Status::invalid_argument("syntax error near FROM"));
        assert!(matches!(err, CallError::BadGrammar(_)));

        let err = CallError::from(Status::permission_denied("nope"));
        assert!(matches!(err, CallError::PermissionDenied(_)));

        let err = CallError::from(Status::not_found("missing"));
        assert!(matches!(err, CallError::NonTransient(_)));
        assert!(!err.is_transient());
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn test_transient_failure_keeps_status() {
        let err = CallError::from(Status::internal("HTTP/2 error code: INTERNAL_ERROR"));
        assert!(err.is_transient());

        let status = err.status().expect("status kept as source");
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "HTTP/2 error code: INTERNAL_ERROR");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_foreign_failure_is_non_transient() {
        let failure: Failure = Box::new(std::io::Error::other("oh no"));
        let err = CallError::from_failure(failure);

        assert!(matches!(err, CallError::NonTransient(_)));
        assert!(err.status().is_none());
        assert_eq!(err.to_string(), "non-transient failure: oh no");
    }

    #[test]
    fn test_local_errors_have_no_failure() {
        assert!(CallError::IncompleteCall.failure().is_none());
        assert!(CallError::Abandoned.failure().is_none());
        assert_eq!(
            CallError::IncompleteCall.to_string(),
            "unary call completed without yielding a value or an error"
        );
    }
}
