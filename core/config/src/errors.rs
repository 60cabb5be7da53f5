// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use thiserror::Error;

use crate::provider::ProviderError;

/// Errors for Config.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("yaml parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("backoff base must be at least 1, got {0}")]
    InvalidBase(u64),
    #[error("initial delay {initial:?} exceeds max delay {max:?}")]
    InvalidDelayBounds { initial: Duration, max: Duration },
    #[error("backoff factor must be at least 1, got {0}")]
    InvalidFactor(u64),
    #[error("jitter must be within [0, 1], got {0}")]
    InvalidJitter(f64),
    #[error("total timeout must be greater than zero")]
    ZeroTotalTimeout,
    #[error("max attempts must be at least 1")]
    InvalidMaxAttempts,
}
