// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

pub mod backoff;
pub mod configuration;
pub mod errors;
pub mod provider;
