//! Lazily opened connection pools bound to one endpoint.

use std::sync::Arc;
use std::time::Duration;

use config::shared::TestingDbConfig;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tokio::sync::Mutex;
use tracing::debug;

use crate::bail;
use crate::deadline;
use crate::endpoint::{Endpoint, IntoConnectOptions};
use crate::error::{ErrorKind, IsolationResult};
use crate::isolation_error;
use crate::lifecycle::{Teardown, TestHandle};

/// Sizing and deadlines of the pools handed to tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub connect_timeout: Duration,
    /// Deadline for a long running statement over the pool, such as a migration run.
    pub statement_timeout: Duration,
    pub close_timeout: Duration,
}

impl From<&TestingDbConfig> for PoolSettings {
    fn from(config: &TestingDbConfig) -> Self {
        PoolSettings {
            max_connections: config.max_connections,
            connect_timeout: config.connect_timeout(),
            statement_timeout: config.provision_timeout(),
            close_timeout: config.teardown_timeout(),
        }
    }
}

#[derive(Debug)]
enum PoolState {
    Unopened,
    Open(PgPool),
    Closed,
}

/// Hands out one [`PgPool`] for an endpoint, connecting on first use.
///
/// All callers share the first pool opened. Concurrent first calls wait for a single connection
/// attempt instead of racing their own. The pool is closed when the owning test finishes.
#[derive(Debug, Clone)]
pub struct PoolProvider {
    endpoint: Endpoint,
    settings: PoolSettings,
    state: Arc<Mutex<PoolState>>,
}

impl PoolProvider {
    /// Creates a provider for `endpoint` and registers its close with `test`.
    ///
    /// No connection is made until [`PoolProvider::pool`] is called.
    pub async fn register(
        endpoint: Endpoint,
        settings: PoolSettings,
        test: &dyn TestHandle,
    ) -> IsolationResult<PoolProvider> {
        let provider = PoolProvider {
            endpoint,
            settings,
            state: Arc::new(Mutex::new(PoolState::Unopened)),
        };

        let closing = provider.clone();
        test.register(Teardown::new(
            format!("close pool for {}", provider.endpoint),
            move || async move { closing.close().await },
        ))
        .await?;

        Ok(provider)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Returns the pool, connecting on the first call.
    ///
    /// Connecting is bounded by the connect timeout. Expiry is a [`ErrorKind::TimeoutError`],
    /// a refused connection a [`ErrorKind::ConnectionFailed`]. Neither is retried.
    pub async fn pool(&self) -> IsolationResult<PgPool> {
        let mut state = self.state.lock().await;

        match &*state {
            PoolState::Open(pool) => return Ok(pool.clone()),
            PoolState::Closed => bail!(
                ErrorKind::InvalidState,
                "Pool was already closed",
                self.endpoint.to_string()
            ),
            PoolState::Unopened => {}
        }

        let pool = self.connect().await?;
        *state = PoolState::Open(pool.clone());

        Ok(pool)
    }

    /// Closes the pool, waiting for checked out connections up to the close timeout.
    ///
    /// Closing an unopened provider only marks it closed.
    pub async fn close(&self) -> IsolationResult<()> {
        let previous = std::mem::replace(&mut *self.state.lock().await, PoolState::Closed);

        if let PoolState::Open(pool) = previous {
            deadline::within(
                self.settings.close_timeout,
                "closing the pool",
                async move {
                    pool.close().await;
                    Ok(())
                },
            )
            .await?;
            debug!(endpoint = %self.endpoint, "pool closed");
        }

        Ok(())
    }

    async fn connect(&self) -> IsolationResult<PgPool> {
        let options: PgConnectOptions = self.endpoint.to_connect_options()?;
        let connect = PgPoolOptions::new()
            .max_connections(self.settings.max_connections)
            .acquire_timeout(self.settings.connect_timeout)
            .connect_with(options);

        let pool = deadline::within(self.settings.connect_timeout, "connecting", async {
            connect.await.map_err(|err| {
                isolation_error!(
                    ErrorKind::ConnectionFailed,
                    "Connecting to the endpoint failed",
                    self.endpoint.to_string(),
                    source: err
                )
            })
        })
        .await?;

        debug!(endpoint = %self.endpoint, "pool opened");

        Ok(pool)
    }
}
