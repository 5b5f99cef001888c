use isolation::driver::Driver;
use isolation::strategy::StrategyKind;
use isolation::{TestContext, TestDatabase};
use telemetry::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn test_schemas_do_not_conflict() {
    init_test_tracing();

    TestContext::run_current(async |ctx| {
        let (first, second) = tokio::join!(
            TestDatabase::with_isolated_schema(ctx),
            TestDatabase::with_isolated_schema(ctx)
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        for database in [&first, &second] {
            database
                .pool()
                .await
                .unwrap()
                .execute("CREATE TABLE no_conflict (id integer PRIMARY KEY)")
                .await
                .unwrap();
        }

        assert_eq!(first.unit().strategy(), StrategyKind::DedicatedSchema);
        assert_ne!(first.unit().name(), second.unit().name());
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_schema_name_is_lowercase_and_active() {
    init_test_tracing();

    TestContext::run("Mixed_Case Test", async |ctx| {
        let database = TestDatabase::with_isolated_schema(ctx).await.unwrap();
        let name = database.unit().name().as_str().to_owned();
        let current = database
            .pool()
            .await
            .unwrap()
            .query_one_text("SELECT current_schema()::text")
            .await
            .unwrap();

        assert_eq!(name, name.to_lowercase());
        assert!(name.starts_with("mixed-case-test-"));
        assert_eq!(current.as_deref(), Some(name.as_str()));
        assert_eq!(database.endpoint().search_path().as_deref(), Some(name.as_str()));
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_schema_is_dropped_at_teardown() {
    init_test_tracing();
    let observer = TestContext::new("observer");
    let watcher = TestDatabase::with_isolated_schema(&observer).await.unwrap();

    let ctx = TestContext::current();
    let database = TestDatabase::with_isolated_schema(&ctx).await.unwrap();
    let name = database.unit().name().as_str().to_owned();
    let query = format!(
        "SELECT nspname::text FROM pg_namespace WHERE nspname = {}",
        pg_escape::quote_literal(&name)
    );

    let pool = watcher.pool().await.unwrap();
    assert_eq!(pool.query_one_text(&query).await.unwrap(), Some(name.clone()));
    ctx.finish().await.unwrap();
    assert_eq!(pool.query_one_text(&query).await.unwrap(), None);

    observer.finish().await.unwrap();
}
