// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use duration_string::DurationString;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_retry::strategy::ExponentialBackoff;

use super::{Strategy, default_max_attempts};
use crate::configuration::Configuration;
use crate::errors::ConfigError;

/// Retry settings for unary calls: exponential backoff with jitter, bounded
/// by a total timeout measured from the first attempt.
///
/// The delay before retry `k` (starting at 0) is `factor * base^(k + 1)`
/// milliseconds, capped at `max_delay`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(default)]
pub struct Config {
    /// Growth rate of the delay between retries.
    base: u64,

    /// Scale of the delay, in milliseconds.
    factor: u64,

    /// Upper bound for a single delay.
    #[schemars(with = "String")]
    max_delay: DurationString,

    /// No retry is started once this much time has passed since the first attempt.
    #[schemars(with = "String")]
    total_timeout: DurationString,

    /// Total number of attempts, the first one included.
    #[serde(default = "default_max_attempts")]
    max_attempts: usize,

    /// Relative jitter in [0, 1]. A delay `d` becomes a uniform pick in
    /// `[d * (1 - jitter), d * (1 + jitter)]`.
    jitter: f64,

    /// Seed for the jitter generator. Random when unset.
    jitter_seed: Option<u64>,
}

impl Config {
    pub fn new(
        base: u64,
        factor: u64,
        max_delay: Duration,
        total_timeout: Duration,
        jitter: f64,
    ) -> Self {
        Config {
            base,
            factor,
            max_delay: max_delay.into(),
            total_timeout: total_timeout.into(),
            max_attempts: default_max_attempts(),
            jitter,
            jitter_seed: None,
        }
    }

    pub fn with_max_attempts(self, max_attempts: usize) -> Self {
        Config {
            max_attempts,
            ..self
        }
    }

    pub fn with_jitter_seed(self, seed: u64) -> Self {
        Config {
            jitter_seed: Some(seed),
            ..self
        }
    }

    pub fn with_total_timeout(self, total_timeout: Duration) -> Self {
        Config {
            total_timeout: total_timeout.into(),
            ..self
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn factor(&self) -> u64 {
        self.factor
    }

    /// Delay before the first retry, before jitter.
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.factor.saturating_mul(self.base))
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay.into()
    }

    pub fn total_timeout(&self) -> Duration {
        self.total_timeout.into()
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    pub fn jitter_seed(&self) -> Option<u64> {
        self.jitter_seed
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            base: 2,
            factor: 500,
            max_delay: Duration::from_secs(32).into(),
            total_timeout: Duration::from_secs(60).into(),
            max_attempts: default_max_attempts(),
            jitter: 0.5,
            jitter_seed: None,
        }
    }
}

impl Strategy for Config {
    fn get_strategy(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        let ret = ExponentialBackoff::from_millis(self.base)
            .factor(self.factor)
            .max_delay(self.max_delay());

        // one delay sits between two attempts
        Box::new(ret.take(self.max_attempts.saturating_sub(1)))
    }
}

impl Configuration for Config {
    type Error = ConfigError;

    fn validate(&self) -> Result<(), ConfigError> {
        if self.base == 0 {
            return Err(ConfigError::InvalidBase(self.base));
        }
        if self.factor == 0 {
            return Err(ConfigError::InvalidFactor(self.factor));
        }

        let initial_delay = self.initial_delay();
        let max_delay = self.max_delay();
        if initial_delay > max_delay {
            return Err(ConfigError::InvalidDelayBounds {
                initial: initial_delay,
                max: max_delay,
            });
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::InvalidJitter(self.jitter));
        }
        if self.total_timeout().is_zero() {
            return Err(ConfigError::ZeroTotalTimeout);
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts);
        }

        Ok(())
    }
}
