use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tracing::info;

use crate::deadline;
use crate::endpoint::{Endpoint, IntoConnectOptions};
use crate::error::{ErrorKind, IsolationResult};
use crate::isolation_error;
use crate::pool::PoolSettings;

/// Brings a freshly isolated database or schema up to date.
#[async_trait]
pub trait ApplyMigrations: Send + Sync {
    /// Applies every pending migration to `endpoint`.
    ///
    /// Connecting is bounded by the connect timeout of `settings`, the run itself by its
    /// statement timeout.
    async fn apply_pending_migrations(
        &self,
        endpoint: &Endpoint,
        settings: &PoolSettings,
    ) -> IsolationResult<()>;
}

#[async_trait]
impl ApplyMigrations for Migrator {
    /// Runs every pending migration over a single-connection pool to `endpoint`.
    ///
    /// The bookkeeping table is created in the first schema of the endpoint's search path, so a
    /// schema-scoped endpoint keeps its migration history inside the isolated schema.
    async fn apply_pending_migrations(
        &self,
        endpoint: &Endpoint,
        settings: &PoolSettings,
    ) -> IsolationResult<()> {
        let options: PgConnectOptions = endpoint.to_connect_options()?;
        let connect = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(settings.connect_timeout)
            .connect_with(options);

        let pool = deadline::within(
            settings.connect_timeout,
            "connecting for migrations",
            async {
                connect.await.map_err(|err| {
                    isolation_error!(
                        ErrorKind::ConnectionFailed,
                        "Connecting for migrations failed",
                        endpoint.to_string(),
                        source: err
                    )
                })
            },
        )
        .await?;

        let applied = deadline::within(settings.statement_timeout, "applying migrations", async {
            self.run(&pool).await?;
            Ok(())
        })
        .await;
        pool.close().await;
        applied?;

        info!(endpoint = %endpoint, migrations = self.iter().count(), "applied pending migrations");

        Ok(())
    }
}
