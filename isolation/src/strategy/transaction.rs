use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgConnection, Postgres, Transaction};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::info;

use crate::deadline;
use crate::error::{ErrorKind, IsolationResult};
use crate::identifier::Identifier;
use crate::isolation_error;
use crate::lifecycle::{Teardown, TestHandle};
use crate::pool::PoolProvider;
use crate::reference::Reference;
use crate::strategy::{IsolationStrategy, IsolationUnit, Isolated, StrategyKind};

/// Isolation level every test transaction runs at.
const SET_ISOLATION_LEVEL: &str = "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ";

/// A connection borrowed from the open transaction of a [`TransactionHandle`].
pub type TransactionConnection<'a> = MappedMutexGuard<'a, PgConnection>;

/// Runs each test inside one transaction on the shared transaction database.
///
/// Cheapest of the strategies: no object is created and the teardown always rolls back. It
/// isolates data only. DDL issued inside the transaction still takes catalog locks visible to
/// concurrent tests, and the code under test cannot observe a real commit.
#[derive(Debug, Clone)]
pub struct TransactionScoped {
    reference: Reference,
}

impl TransactionScoped {
    pub fn new(reference: Reference) -> Self {
        TransactionScoped { reference }
    }
}

/// The open transaction of one test.
///
/// There is no commit. The transaction is rolled back when the owning test finishes.
#[derive(Clone)]
pub struct TransactionHandle {
    transaction: Arc<Mutex<Option<Transaction<'static, Postgres>>>>,
    provider: PoolProvider,
}

impl TransactionHandle {
    /// Locks the transaction for running statements in it.
    ///
    /// Fails with [`ErrorKind::InvalidState`] once the transaction was rolled back.
    pub async fn conn(&self) -> IsolationResult<TransactionConnection<'_>> {
        let guard = self.transaction.lock().await;

        MutexGuard::try_map(guard, |slot| slot.as_deref_mut()).map_err(|_| {
            isolation_error!(
                ErrorKind::InvalidState,
                "Transaction was already rolled back"
            )
        })
    }

    /// The provider of the pool the transaction was taken from.
    pub fn pool_provider(&self) -> &PoolProvider {
        &self.provider
    }
}

impl fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IsolationStrategy for TransactionScoped {
    type Handle = TransactionHandle;

    fn kind(&self) -> StrategyKind {
        StrategyKind::Transaction
    }

    async fn provision(
        &self,
        test: &dyn TestHandle,
    ) -> IsolationResult<Isolated<TransactionHandle>> {
        let reference = &self.reference;
        let name = Identifier::generate(test.name())?;
        info!(test = test.name(), transaction = %name, "transaction name for this test");

        let endpoint = reference
            .endpoint()
            .with_database_name(reference.transaction_database())?;
        let provider =
            PoolProvider::register(endpoint.clone(), reference.pool_settings(), test).await?;
        let pool = provider.pool().await?;

        let transaction = deadline::within(
            reference.provision_timeout(),
            "opening the transaction",
            async {
                let mut transaction = pool.begin().await?;
                sqlx::query(SET_ISOLATION_LEVEL)
                    .execute(&mut *transaction)
                    .await?;

                Ok(transaction)
            },
        )
        .await
        .map_err(|err| {
            if err.is_timeout() {
                return err;
            }

            isolation_error!(
                ErrorKind::ProvisioningError,
                "Opening the test transaction failed",
                format!("transaction {name}"),
                source: err
            )
        })?;

        let transaction = Arc::new(Mutex::new(Some(transaction)));
        let rolled_back = transaction.clone();
        let teardown_timeout = reference.teardown_timeout();
        test.register(Teardown::new(
            format!("roll back transaction {name}"),
            move || async move {
                deadline::within(teardown_timeout, "rolling back", async move {
                    let Some(transaction) = rolled_back.lock().await.take() else {
                        return Ok(());
                    };

                    transaction.rollback().await.map_err(|err| {
                        isolation_error!(
                            ErrorKind::TeardownError,
                            "Rolling back the test transaction failed",
                            source: err
                        )
                    })
                })
                .await
            },
        ))
        .await?;

        Ok(Isolated::new(
            IsolationUnit::new(
                name,
                StrategyKind::Transaction,
                reference.transaction_database(),
            ),
            endpoint,
            TransactionHandle {
                transaction,
                provider,
            },
        ))
    }
}
