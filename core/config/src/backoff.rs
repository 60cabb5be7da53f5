// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

pub mod exponential;

use std::time::Duration;

pub trait Strategy {
    /// Delays to wait between consecutive attempts, before jitter is applied.
    /// The iterator ends when no further attempt is allowed.
    fn get_strategy(&self) -> Box<dyn Iterator<Item = Duration> + Send>;
}

pub(crate) fn default_max_attempts() -> usize {
    usize::MAX
}
