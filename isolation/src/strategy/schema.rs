use async_trait::async_trait;
use tracing::info;

use crate::error::IsolationResult;
use crate::identifier::Identifier;
use crate::lifecycle::{Teardown, TestHandle};
use crate::pool::PoolProvider;
use crate::reference::Reference;
use crate::strategy::{
    IsolationStrategy, IsolationUnit, Isolated, StrategyKind, admin_provider, provision_with,
    tear_down_with,
};

/// Creates a schema per test in the server's database and points the search path at it.
///
/// The schema starts empty, so callers usually apply migrations next. Schema names are always
/// generated in lower case: the search path is passed unquoted and mixed-case names have been
/// observed to misbehave there.
#[derive(Debug, Clone)]
pub struct DedicatedSchema {
    reference: Reference,
}

impl DedicatedSchema {
    pub fn new(reference: Reference) -> Self {
        DedicatedSchema { reference }
    }
}

#[async_trait]
impl IsolationStrategy for DedicatedSchema {
    type Handle = PoolProvider;

    fn kind(&self) -> StrategyKind {
        StrategyKind::DedicatedSchema
    }

    async fn provision(&self, test: &dyn TestHandle) -> IsolationResult<Isolated<PoolProvider>> {
        let reference = &self.reference;
        let name = Identifier::generate_lowercase(test.name())?;
        info!(test = test.name(), schema = %name, "schema name for this test");

        let admin = admin_provider(reference, test).await?;
        let admin_pool = admin.pool().await?;

        provision_with(
            &admin_pool,
            &format!("CREATE SCHEMA {}", name.quoted()),
            &name,
            reference.provision_timeout(),
        )
        .await?;

        let drop_statement = format!("DROP SCHEMA {} CASCADE", name.quoted());
        let teardown_timeout = reference.teardown_timeout();
        let dropped = name.clone();
        test.register(Teardown::new(format!("drop schema {name}"), move || async move {
            let admin_pool = admin.pool().await?;
            tear_down_with(&admin_pool, &drop_statement, &dropped, teardown_timeout).await
        }))
        .await?;

        let endpoint = reference.endpoint().with_search_path(name.as_str());
        let provider =
            PoolProvider::register(endpoint.clone(), reference.pool_settings(), test).await?;
        let database = reference
            .endpoint()
            .database_name()
            .unwrap_or_default();

        Ok(Isolated::new(
            IsolationUnit::new(name, StrategyKind::DedicatedSchema, database),
            endpoint,
            provider,
        ))
    }
}
