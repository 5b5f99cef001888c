//! The connection driver the strategies talk to the server through.
//!
//! Strategies only ever need three things from a connection: run a statement, read a single
//! text value and close. [`Driver`] captures that shape and is implemented for a sqlx pool and
//! for a tokio-postgres client.

use std::borrow::Cow;

use async_trait::async_trait;
use sqlx::{Executor, PgPool};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::{debug, warn};

use crate::endpoint::{Endpoint, IntoConnectOptions};
use crate::error::IsolationResult;

/// SQLSTATE raised when a database is still accessed by other sessions (`object_in_use`).
pub const OBJECT_IN_USE: &str = "55006";

/// Errors raised by a [`Driver`].
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("tokio-postgres error: {0}")]
    TokioPostgres(#[from] tokio_postgres::Error),

    #[error("the connection was already closed")]
    Closed,
}

impl DriverError {
    /// Returns the SQLSTATE reported by the server, if the error came from the server.
    pub fn code(&self) -> Option<Cow<'_, str>> {
        match self {
            DriverError::Sqlx(err) => err.as_database_error().and_then(|err| err.code()),
            DriverError::TokioPostgres(err) => err.code().map(|state| Cow::Borrowed(state.code())),
            DriverError::Closed => None,
        }
    }

    /// Returns `true` if the statement failed because another session uses the target object,
    /// e.g. a template database that still has connections.
    pub fn is_object_in_use(&self) -> bool {
        self.code().as_deref() == Some(OBJECT_IN_USE)
    }
}

/// A connection to the server.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Runs `statement` and returns the number of affected rows.
    async fn execute(&self, statement: &str) -> Result<u64, DriverError>;

    /// Runs `statement` and returns the first column of the first row as text.
    ///
    /// Returns `None` when there are no rows or the value is `NULL`.
    async fn query_one_text(&self, statement: &str) -> Result<Option<String>, DriverError>;

    /// Closes the connection. Statements issued afterwards fail.
    async fn close(&self) -> Result<(), DriverError>;
}

#[async_trait]
impl Driver for PgPool {
    async fn execute(&self, statement: &str) -> Result<u64, DriverError> {
        let result = Executor::execute(self, statement).await?;

        Ok(result.rows_affected())
    }

    async fn query_one_text(&self, statement: &str) -> Result<Option<String>, DriverError> {
        let value: Option<Option<String>> = sqlx::query_scalar(statement)
            .fetch_optional(self)
            .await?;

        Ok(value.flatten())
    }

    async fn close(&self) -> Result<(), DriverError> {
        PgPool::close(self).await;

        Ok(())
    }
}

/// A single tokio-postgres connection together with the task driving it.
pub struct PgClient {
    client: Mutex<Option<Client>>,
    connection: Mutex<Option<JoinHandle<Result<(), tokio_postgres::Error>>>>,
}

impl PgClient {
    /// Connects to `endpoint` without TLS and spawns the connection task.
    pub async fn connect(endpoint: &Endpoint) -> IsolationResult<PgClient> {
        let config: tokio_postgres::Config = endpoint.to_connect_options()?;
        let (client, connection) = config
            .connect(NoTls)
            .await
            .map_err(DriverError::from)?;

        debug!(endpoint = %endpoint, "connected to postgres");

        Ok(PgClient {
            client: Mutex::new(Some(client)),
            connection: Mutex::new(Some(tokio::spawn(connection))),
        })
    }
}

#[async_trait]
impl Driver for PgClient {
    async fn execute(&self, statement: &str) -> Result<u64, DriverError> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(DriverError::Closed)?;

        let messages = client.simple_query(statement).await?;
        let rows = messages
            .iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::CommandComplete(rows) => Some(*rows),
                _ => None,
            })
            .sum();

        Ok(rows)
    }

    async fn query_one_text(&self, statement: &str) -> Result<Option<String>, DriverError> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or(DriverError::Closed)?;

        let messages = client.simple_query(statement).await?;
        let value = messages.iter().find_map(|message| match message {
            SimpleQueryMessage::Row(row) => Some(row.get(0).map(str::to_owned)),
            _ => None,
        });

        Ok(value.flatten())
    }

    async fn close(&self) -> Result<(), DriverError> {
        // Dropping the client ends the connection task once the server acknowledges.
        drop(self.client.lock().await.take());

        if let Some(connection) = self.connection.lock().await.take() {
            match connection.await {
                Ok(result) => result?,
                Err(err) => warn!(error = %err, "postgres connection task did not finish cleanly"),
            }
        }

        Ok(())
    }
}
