//! Provisioning algorithms for isolation units.
//!
//! Every strategy follows the same steps: name the unit, run the provisioning statement over an
//! administrative connection to the reference, derive the unit's [`Endpoint`], register the
//! teardown with the owning test and hand back a handle scoped to the unit. They differ only in
//! the statements and in how the endpoint is derived.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::deadline;
use crate::driver::Driver;
use crate::endpoint::Endpoint;
use crate::error::{ErrorKind, IsolationResult};
use crate::identifier::Identifier;
use crate::isolation_error;
use crate::lifecycle::TestHandle;
use crate::pool::{PoolProvider, PoolSettings};
use crate::reference::Reference;

mod schema;
mod template;
mod transaction;

pub use schema::DedicatedSchema;
pub use template::CloneFromTemplate;
pub use transaction::{TransactionConnection, TransactionHandle, TransactionScoped};

/// The algorithm that created an [`IsolationUnit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    CloneFromTemplate,
    DedicatedSchema,
    Transaction,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::CloneFromTemplate => f.write_str("clone-from-template"),
            StrategyKind::DedicatedSchema => f.write_str("dedicated-schema"),
            StrategyKind::Transaction => f.write_str("transaction"),
        }
    }
}

/// One test's private database, schema or transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationUnit {
    name: Identifier,
    strategy: StrategyKind,
    reference: String,
}

impl IsolationUnit {
    pub fn new(name: Identifier, strategy: StrategyKind, reference: impl Into<String>) -> Self {
        IsolationUnit {
            name,
            strategy,
            reference: reference.into(),
        }
    }

    /// The generated name, unique among live units on the server.
    pub fn name(&self) -> &Identifier {
        &self.name
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    /// Name of the database or schema the unit was derived from.
    pub fn reference(&self) -> &str {
        &self.reference
    }
}

/// A provisioned unit together with its endpoint and the handle tests query through.
#[derive(Debug)]
pub struct Isolated<H> {
    unit: IsolationUnit,
    endpoint: Endpoint,
    handle: H,
}

impl<H> Isolated<H> {
    pub fn new(unit: IsolationUnit, endpoint: Endpoint, handle: H) -> Self {
        Isolated {
            unit,
            endpoint,
            handle,
        }
    }

    pub fn unit(&self) -> &IsolationUnit {
        &self.unit
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn into_parts(self) -> (IsolationUnit, Endpoint, H) {
        (self.unit, self.endpoint, self.handle)
    }
}

/// A way of giving a test its own isolated slice of the server.
///
/// Implementations never retry a failed provisioning statement and never modify the reference.
#[async_trait]
pub trait IsolationStrategy: Send + Sync {
    type Handle: Send;

    fn kind(&self) -> StrategyKind;

    /// Provisions a new unit for `test` and registers its teardown there.
    ///
    /// On error, everything already created has been registered for teardown with `test`.
    async fn provision(&self, test: &dyn TestHandle) -> IsolationResult<Isolated<Self::Handle>>;
}

/// Opens the administrative connection provisioning statements run on.
///
/// Registered before anything it creates, so it is closed after their teardowns ran.
async fn admin_provider(
    reference: &Reference,
    test: &dyn TestHandle,
) -> IsolationResult<PoolProvider> {
    let settings = PoolSettings {
        max_connections: 1,
        ..reference.pool_settings()
    };

    PoolProvider::register(reference.endpoint().clone(), settings, test).await
}

/// Runs a create statement for `unit` within `timeout`.
///
/// A server refusing because the template still has sessions is a
/// [`ErrorKind::TemplateInUse`], any other refusal a [`ErrorKind::ProvisioningError`].
async fn provision_with(
    driver: &dyn Driver,
    statement: &str,
    unit: &Identifier,
    timeout: Duration,
) -> IsolationResult<()> {
    deadline::within(timeout, statement, async {
        driver.execute(statement).await.map_err(|err| {
            let kind = if err.is_object_in_use() {
                ErrorKind::TemplateInUse
            } else {
                ErrorKind::ProvisioningError
            };

            isolation_error!(
                kind,
                "Provisioning statement was rejected",
                format!("{statement} for unit {unit}: {err}"),
                source: err
            )
        })?;

        Ok(())
    })
    .await
}

/// Runs a drop statement for `unit` within `timeout`. Attempted once.
async fn tear_down_with(
    driver: &dyn Driver,
    statement: &str,
    unit: &Identifier,
    timeout: Duration,
) -> IsolationResult<()> {
    deadline::within(timeout, statement, async {
        driver.execute(statement).await.map_err(|err| {
            isolation_error!(
                ErrorKind::TeardownError,
                "Teardown statement failed",
                format!("{statement} for unit {unit}: {err}"),
                source: err
            )
        })?;

        Ok(())
    })
    .await
}
