// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Retry of transient failures with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;

use callbridge_config::backoff::Strategy;
use callbridge_config::backoff::exponential::Config as RetryConfig;

use crate::error::CallError;

/// Shortest delay ever scheduled between two attempts.
pub const MIN_DELAY: Duration = Duration::from_millis(1);

/// Retries an operation while it fails with [`CallError::Transient`].
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        RetryPolicy { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds, fails permanently, or the retry
    /// budget is spent. Each call to `operation` must start a fresh attempt.
    pub async fn retry<T, F, Fut>(&self, mut operation: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut context = RetryContext::new(&self.config);

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match context.next_delay(&err) {
                Some(delay) => {
                    tracing::debug!(
                        attempt = context.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying",
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    if err.is_transient() {
                        tracing::warn!(
                            attempts = context.attempts(),
                            elapsed_ms = context.elapsed().as_millis() as u64,
                            error = %err,
                            "retry budget exhausted",
                        );
                    }
                    return Err(err);
                }
            }
        }
    }
}

/// State of one retry loop.
pub struct RetryContext {
    started: Instant,
    attempts: u32,
    last_delay: Option<Duration>,
    delays: Box<dyn Iterator<Item = Duration> + Send>,
    rng: StdRng,
    jitter: f64,
    max_delay: Duration,
    total_timeout: Duration,
}

impl RetryContext {
    /// Start a context for an attempt that is about to be made.
    pub fn new(config: &RetryConfig) -> Self {
        let rng = match config.jitter_seed() {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        RetryContext {
            started: Instant::now(),
            attempts: 1,
            last_delay: None,
            delays: config.get_strategy(),
            rng,
            jitter: config.jitter().clamp(0.0, 1.0),
            max_delay: config.max_delay(),
            total_timeout: config.total_timeout(),
        }
    }

    /// Delay before the next attempt, or `None` when `error` must be
    /// returned to the caller.
    pub fn next_delay(&mut self, error: &CallError) -> Option<Duration> {
        if !error.is_transient() {
            return None;
        }

        let elapsed = self.elapsed();
        if elapsed >= self.total_timeout {
            return None;
        }

        // the strategy runs dry once max attempts are reached
        let backoff = self.delays.next()?;
        let delay = match error.retry_after() {
            Some(server_delay) => server_delay,
            None => apply_jitter(backoff, self.jitter, self.max_delay, &mut self.rng),
        };

        if elapsed.saturating_add(delay) > self.total_timeout {
            return None;
        }

        self.attempts += 1;
        self.last_delay = Some(delay);
        Some(delay)
    }

    /// Attempts made so far, including the one in flight.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_delay(&self) -> Option<Duration> {
        self.last_delay
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Scale `delay` by a uniform factor in `[1 - jitter, 1 + jitter]`, keeping
/// the result within `[MIN_DELAY, max]`.
pub fn apply_jitter<R: Rng>(delay: Duration, jitter: f64, max: Duration, rng: &mut R) -> Duration {
    let upper = max.max(MIN_DELAY);
    if jitter <= 0.0 {
        return delay.clamp(MIN_DELAY, upper);
    }

    let jitter = jitter.min(1.0);
    let scale = rng.random_range((1.0 - jitter)..=(1.0 + jitter));

    // out of range once scaled past Duration::MAX
    Duration::try_from_secs_f64(delay.as_secs_f64() * scale)
        .unwrap_or(upper)
        .clamp(MIN_DELAY, upper)
}
