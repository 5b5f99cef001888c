use std::collections::HashMap;

use rust_cli_config::builder::{ConfigBuilder, DefaultState};
use rust_cli_config::{Config, ConfigError, Environment};
use thiserror::Error;
use tracing::info;

use crate::shared::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_MAX_CONNECTIONS, DEFAULT_PROVISION_TIMEOUT_MS,
    DEFAULT_REFERENCE, DEFAULT_TEARDOWN_TIMEOUT_MS, DEFAULT_TRANSACTION_DATABASE, DEFAULT_URL,
    TestingDbConfig, ValidationError,
};

/// Prefix for environment variable configuration.
const ENV_PREFIX: &str = "TESTING_DB";

/// Separator between environment variable prefix and the key.
const ENV_PREFIX_SEPARATOR: &str = "_";

/// Name of the environment variable holding the server url.
pub const URL_ENV_NAME: &str = "TESTING_DB_URL";

/// Errors that can occur while loading the testing database configuration.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    /// Failed to initialize the configuration builder with defaults.
    #[error("failed to initialize configuration builder: {0}")]
    Builder(#[source] ConfigError),

    /// Environment variables could not be merged into the configuration.
    #[error("failed to load configuration from environment variables: {0}")]
    EnvironmentVariables(#[source] ConfigError),

    /// The merged configuration could not be deserialized.
    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] ConfigError),

    /// The configuration was parsed but is not usable.
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),
}

/// Loads the [`TestingDbConfig`] from `TESTING_DB_`-prefixed environment variables.
///
/// Every unset or empty key falls back to its default, e.g. `TESTING_DB_URL` to [`DEFAULT_URL`] and
/// `TESTING_DB_REF` to [`DEFAULT_REFERENCE`]. The result is validated before being returned.
pub fn load_testing_db_config() -> Result<TestingDbConfig, LoadConfigError> {
    let config = build_config(Environment::with_prefix(ENV_PREFIX))?;

    if std::env::var(URL_ENV_NAME).map_or(true, |url| url.is_empty()) {
        info!("env {URL_ENV_NAME} is empty, using default value: {DEFAULT_URL}");
    }

    Ok(config)
}

/// Loads the [`TestingDbConfig`] from an explicit set of variables instead of the process
/// environment.
///
/// Keys are full variable names, such as `TESTING_DB_REF`.
pub fn load_testing_db_config_from(
    variables: HashMap<String, String>,
) -> Result<TestingDbConfig, LoadConfigError> {
    build_config(Environment::with_prefix(ENV_PREFIX).source(Some(variables)))
}

fn build_config(environment: Environment) -> Result<TestingDbConfig, LoadConfigError> {
    let environment_source = environment
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .ignore_empty(true)
        .try_parsing(true);

    let builder = with_defaults(Config::builder()).map_err(LoadConfigError::Builder)?;

    let settings = builder
        .add_source(environment_source)
        .build()
        .map_err(LoadConfigError::EnvironmentVariables)?;

    let config = settings
        .try_deserialize::<TestingDbConfig>()
        .map_err(LoadConfigError::Deserialization)?;

    config.validate()?;

    Ok(config)
}

fn with_defaults(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_default("url", DEFAULT_URL)?
        .set_default("ref", DEFAULT_REFERENCE)?
        .set_default("tx", DEFAULT_TRANSACTION_DATABASE)?
        .set_default("max_connections", i64::from(DEFAULT_MAX_CONNECTIONS))?
        .set_default("connect_timeout_ms", DEFAULT_CONNECT_TIMEOUT_MS as i64)?
        .set_default("provision_timeout_ms", DEFAULT_PROVISION_TIMEOUT_MS as i64)?
        .set_default("teardown_timeout_ms", DEFAULT_TEARDOWN_TIMEOUT_MS as i64)
}
