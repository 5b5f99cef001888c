use isolation::driver::Driver;
use isolation::strategy::StrategyKind;
use isolation::{ErrorKind, Reference, TestContext, TestDatabase};
use sqlx::Row;
use telemetry::init_test_tracing;

const CREATE_NO_CONFLICT: &str = r#"CREATE TABLE "no_conflict" (id integer PRIMARY KEY)"#;

#[tokio::test(flavor = "multi_thread")]
async fn test_clone_connects_and_reports_version() {
    init_test_tracing();

    TestContext::run_current(async |ctx| {
        let database = TestDatabase::clone_from_template(ctx).await.unwrap();
        let pool = database.pool().await.unwrap();
        let version = pool.query_one_text("SELECT version()").await.unwrap();

        assert!(version.is_some_and(|version| !version.is_empty()));
        assert_eq!(database.unit().strategy(), StrategyKind::CloneFromTemplate);
        assert_eq!(
            database.unit().reference(),
            Reference::shared().unwrap().name()
        );
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_changes_are_not_visible_in_different_clones() {
    init_test_tracing();

    TestContext::run_current(async |ctx| {
        let first = TestDatabase::clone_from_template(ctx).await.unwrap();
        let second = TestDatabase::clone_from_template(ctx).await.unwrap();

        let first_result = first.pool().await.unwrap().execute(CREATE_NO_CONFLICT).await;
        let second_result = second.pool().await.unwrap().execute(CREATE_NO_CONFLICT).await;

        assert!(first_result.is_ok());
        assert!(second_result.is_ok(), "databases must be isolated for each clone");
        assert_ne!(first.url(), second.url());
        assert_ne!(first.unit().name(), second.unit().name());
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_clone_is_dropped_at_teardown() {
    init_test_tracing();
    let reference = Reference::shared().unwrap();
    let observer = TestContext::new("observer");
    let admin = isolation::pool::PoolProvider::register(
        reference.endpoint().clone(),
        reference.pool_settings(),
        &observer,
    )
    .await
    .unwrap();

    let ctx = TestContext::current();
    let database = TestDatabase::clone_from_template(&ctx).await.unwrap();
    let name = database.unit().name().to_string();
    database.pool().await.unwrap();

    let exists = |name: String| {
        let admin = admin.clone();
        async move {
            let row = sqlx::query("SELECT count(*) FROM pg_database WHERE datname = $1")
                .bind(name)
                .fetch_one(&admin.pool().await.unwrap())
                .await
                .unwrap();
            row.get::<i64, _>(0) == 1
        }
    };

    assert!(exists(name.clone()).await);
    ctx.finish().await.unwrap();
    assert!(!exists(name).await);

    observer.finish().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_template_is_a_provisioning_error() {
    init_test_tracing();
    let mut config = config::load_testing_db_config().unwrap();
    config.reference = "template_that_does_not_exist".to_owned();
    let reference = Reference::from_config(&config).unwrap();

    TestContext::run_current(async |ctx| {
        let err = TestDatabase::clone_from_template_with(ctx, &reference)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ProvisioningError);
        assert!(err.is_provisioning());
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dropping_the_context_tears_down_the_clone() {
    init_test_tracing();
    let name;
    {
        let ctx = TestContext::current();
        let database = TestDatabase::clone_from_template(&ctx).await.unwrap();
        database
            .pool()
            .await
            .unwrap()
            .execute(CREATE_NO_CONFLICT)
            .await
            .unwrap();
        name = database.unit().name().to_string();
    }

    let ctx = TestContext::current();
    let database = TestDatabase::clone_from_template(&ctx).await.unwrap();
    let remaining = database
        .pool()
        .await
        .unwrap()
        .query_one_text(&format!(
            "SELECT datname::text FROM pg_database WHERE datname = {}",
            pg_escape::quote_literal(&name)
        ))
        .await
        .unwrap();

    assert!(remaining.is_none());
    ctx.finish().await.unwrap();
}
