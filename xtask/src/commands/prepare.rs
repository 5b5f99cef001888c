use anyhow::{Context, Result};
use clap::Args;
use config::load_testing_db_config;
use isolation::Reference;
use isolation::driver::{Driver, PgClient};
use isolation::migrate::ApplyMigrations;
use pg_escape::{quote_identifier, quote_literal};
use tracing::info;

#[derive(Args)]
pub(crate) struct PrepareArgs {
    /// Drop and recreate the databases when they already exist
    #[arg(long)]
    recreate: bool,

    /// Only create the databases, leave their schema untouched
    #[arg(long)]
    skip_migrations: bool,
}

impl PrepareArgs {
    pub(crate) async fn run(self) -> Result<()> {
        let config = load_testing_db_config().context("loading the testing database config")?;
        let reference = Reference::from_config(&config)?;

        let admin = PgClient::connect(reference.endpoint())
            .await
            .with_context(|| format!("connecting to {}", reference.endpoint()))?;

        for database in [reference.name(), reference.transaction_database()] {
            self.ensure_database(&admin, database).await?;

            if self.skip_migrations {
                continue;
            }

            let endpoint = reference.endpoint().with_database_name(database)?;
            demo::MIGRATOR
                .apply_pending_migrations(&endpoint, &reference.pool_settings())
                .await
                .with_context(|| format!("migrating database {database}"))?;
        }

        admin.close().await?;
        info!("testing databases are ready");

        Ok(())
    }

    async fn ensure_database(&self, admin: &PgClient, database: &str) -> Result<()> {
        let exists = admin
            .query_one_text(&format!(
                "select datname::text from pg_database where datname = {}",
                quote_literal(database)
            ))
            .await?
            .is_some();

        if exists && !self.recreate {
            info!(database, "database already exists");
            return Ok(());
        }

        let quoted = quote_identifier(database);
        if exists {
            admin
                .execute(&format!("drop database {quoted} with (force)"))
                .await
                .with_context(|| format!("dropping database {database}"))?;
        }

        admin
            .execute(&format!("create database {quoted}"))
            .await
            .with_context(|| format!("creating database {database}"))?;
        info!(database, "created database");

        Ok(())
    }
}
