use std::sync::LazyLock;
use std::time::Duration;

use config::load_testing_db_config;
use config::shared::TestingDbConfig;
use secrecy::ExposeSecret;

use crate::endpoint::Endpoint;
use crate::error::{IsolationError, IsolationResult};
use crate::identifier::quote_name;
use crate::pool::PoolSettings;

/// The reference every isolation unit is provisioned from, loaded once per test binary.
static SHARED: LazyLock<IsolationResult<Reference>> = LazyLock::new(|| {
    let config = load_testing_db_config()?;
    Reference::from_config(&config)
});

/// The server endpoint together with the template database (or reference schema) that seeds
/// every isolation unit.
///
/// Immutable once built. Strategies read it, none of them ever modifies the template.
#[derive(Debug, Clone)]
pub struct Reference {
    endpoint: Endpoint,
    name: String,
    transaction_database: String,
    pool_settings: PoolSettings,
    provision_timeout: Duration,
    teardown_timeout: Duration,
}

impl Reference {
    /// Builds a reference from an already loaded configuration.
    ///
    /// Fails with [`crate::error::ErrorKind::ConfigurationError`] for an invalid configuration
    /// and with [`crate::error::ErrorKind::InvalidEndpoint`] for a malformed server url.
    pub fn from_config(config: &TestingDbConfig) -> IsolationResult<Reference> {
        config.validate()?;
        let endpoint = Endpoint::parse(config.url.expose_secret())?;

        Ok(Reference {
            endpoint,
            name: config.reference.clone(),
            transaction_database: config.transaction_database.clone(),
            pool_settings: PoolSettings::from(config),
            provision_timeout: config.provision_timeout(),
            teardown_timeout: config.teardown_timeout(),
        })
    }

    /// Returns the process-wide reference read from the `TESTING_DB_` environment.
    ///
    /// The environment is read on the first call only. A configuration error is returned to
    /// every caller.
    pub fn shared() -> Result<&'static Reference, IsolationError> {
        SHARED.as_ref().map_err(Clone::clone)
    }

    /// Endpoint of the server, used for administrative statements.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Name of the template database or reference schema.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn quoted_name(&self) -> IsolationResult<String> {
        quote_name(&self.name)
    }

    pub fn transaction_database(&self) -> &str {
        &self.transaction_database
    }

    pub fn pool_settings(&self) -> PoolSettings {
        self.pool_settings
    }

    pub fn provision_timeout(&self) -> Duration {
        self.provision_timeout
    }

    pub fn teardown_timeout(&self) -> Duration {
        self.teardown_timeout
    }
}
