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

/// Copies the template database into a new database per test.
///
/// Highest fidelity, highest cost. The server refuses to copy a template that has open
/// sessions; that refusal is reported as [`crate::error::ErrorKind::TemplateInUse`] and is not
/// retried.
#[derive(Debug, Clone)]
pub struct CloneFromTemplate {
    reference: Reference,
}

impl CloneFromTemplate {
    pub fn new(reference: Reference) -> Self {
        CloneFromTemplate { reference }
    }
}

#[async_trait]
impl IsolationStrategy for CloneFromTemplate {
    type Handle = PoolProvider;

    fn kind(&self) -> StrategyKind {
        StrategyKind::CloneFromTemplate
    }

    async fn provision(&self, test: &dyn TestHandle) -> IsolationResult<Isolated<PoolProvider>> {
        let reference = &self.reference;
        let template = reference.quoted_name()?;
        let name = Identifier::generate(test.name())?;
        info!(test = test.name(), database = %name, "database name for this test");

        let admin = admin_provider(reference, test).await?;
        let admin_pool = admin.pool().await?;

        // Runs on the server's own database, the template must not have sessions.
        provision_with(
            &admin_pool,
            &format!("CREATE DATABASE {} WITH TEMPLATE {template}", name.quoted()),
            &name,
            reference.provision_timeout(),
        )
        .await?;

        let drop_statement = format!("DROP DATABASE {} WITH (FORCE)", name.quoted());
        let teardown_timeout = reference.teardown_timeout();
        let dropped = name.clone();
        test.register(Teardown::new(format!("drop database {name}"), move || async move {
            let admin_pool = admin.pool().await?;
            tear_down_with(&admin_pool, &drop_statement, &dropped, teardown_timeout).await
        }))
        .await?;

        let endpoint = reference.endpoint().with_database_name(name.as_str())?;
        let provider =
            PoolProvider::register(endpoint.clone(), reference.pool_settings(), test).await?;

        Ok(Isolated::new(
            IsolationUnit::new(name, StrategyKind::CloneFromTemplate, reference.name()),
            endpoint,
            provider,
        ))
    }
}
