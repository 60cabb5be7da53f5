// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

pub mod file;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::configuration::Configuration;
use crate::errors::ConfigError;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Source of raw configuration text.
pub trait ConfigProvider {
    fn load(&self, path: &str) -> Result<String, ProviderError>;
}

/// Load a YAML document through `provider` and validate it.
pub fn load_yaml<T, P>(provider: &P, path: &str) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Configuration<Error = ConfigError>,
    P: ConfigProvider,
{
    let raw = provider.load(path)?;
    let config: T = serde_yaml::from_str(&raw)?;
    config.validate()?;

    Ok(config)
}
