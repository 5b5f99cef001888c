//! Entry points used by test suites.
//!
//! ```ignore
//! #[tokio::test]
//! async fn test_creates_a_user() {
//!     TestContext::run_current(async |ctx| {
//!         let database = TestDatabase::clone_from_template(ctx).await.unwrap();
//!         let pool = database.pool().await.unwrap();
//!         // ...
//!     })
//!     .await;
//! }
//! ```

use sqlx::PgPool;

use crate::error::IsolationResult;
use crate::lifecycle::TestHandle;
use crate::migrate::ApplyMigrations;
use crate::pool::PoolProvider;
use crate::reference::Reference;
use crate::strategy::{
    CloneFromTemplate, DedicatedSchema, IsolationStrategy, Isolated, TransactionConnection,
    TransactionHandle, TransactionScoped,
};

/// A private database (or schema) for one test.
pub type TestDatabase = Isolated<PoolProvider>;

/// A private transaction for one test.
pub type TestTransaction = Isolated<TransactionHandle>;

impl Isolated<PoolProvider> {
    /// Clones the shared reference's template database for `test`.
    pub async fn clone_from_template(test: &dyn TestHandle) -> IsolationResult<TestDatabase> {
        Self::clone_from_template_with(test, Reference::shared()?).await
    }

    pub async fn clone_from_template_with(
        test: &dyn TestHandle,
        reference: &Reference,
    ) -> IsolationResult<TestDatabase> {
        CloneFromTemplate::new(reference.clone())
            .provision(test)
            .await
    }

    /// Creates an empty lower-case schema for `test` in the shared reference's database.
    pub async fn with_isolated_schema(test: &dyn TestHandle) -> IsolationResult<TestDatabase> {
        Self::with_isolated_schema_with(test, Reference::shared()?).await
    }

    pub async fn with_isolated_schema_with(
        test: &dyn TestHandle,
        reference: &Reference,
    ) -> IsolationResult<TestDatabase> {
        DedicatedSchema::new(reference.clone()).provision(test).await
    }

    /// The connection url of the isolated database, including credentials.
    pub fn url(&self) -> &str {
        self.endpoint().as_str()
    }

    /// Returns the pool bound to the isolated database, connecting on first use.
    pub async fn pool(&self) -> IsolationResult<PgPool> {
        self.handle().pool().await
    }

    /// Applies `migrations` to the isolated database, within the pool's deadlines.
    pub async fn apply_migrations(
        &self,
        migrations: &dyn ApplyMigrations,
    ) -> IsolationResult<()> {
        migrations
            .apply_pending_migrations(self.endpoint(), self.handle().settings())
            .await
    }
}

impl Isolated<TransactionHandle> {
    /// Opens a repeatable-read transaction for `test` on the shared transaction database.
    pub async fn begin(test: &dyn TestHandle) -> IsolationResult<TestTransaction> {
        Self::begin_with(test, Reference::shared()?).await
    }

    pub async fn begin_with(
        test: &dyn TestHandle,
        reference: &Reference,
    ) -> IsolationResult<TestTransaction> {
        TransactionScoped::new(reference.clone())
            .provision(test)
            .await
    }

    /// Locks the open transaction. Statements run through the guard are rolled back at
    /// teardown.
    pub async fn conn(&self) -> IsolationResult<TransactionConnection<'_>> {
        self.handle().conn().await
    }
}
