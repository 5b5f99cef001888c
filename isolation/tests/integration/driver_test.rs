use isolation::driver::{Driver, DriverError, PgClient};
use isolation::{Reference, TestContext, TestDatabase};
use telemetry::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn test_tokio_postgres_client_runs_statements() {
    init_test_tracing();

    TestContext::run_current(async |ctx| {
        let database = TestDatabase::clone_from_template(ctx).await.unwrap();

        let client = PgClient::connect(database.endpoint()).await.unwrap();
        client
            .execute("CREATE TABLE driver_rows (id integer PRIMARY KEY)")
            .await
            .unwrap();
        let inserted = client
            .execute("INSERT INTO driver_rows VALUES (1), (2), (3)")
            .await
            .unwrap();
        let count = client
            .query_one_text("SELECT count(*)::text FROM driver_rows")
            .await
            .unwrap();
        client.close().await.unwrap();

        assert_eq!(inserted, 3);
        assert_eq!(count.as_deref(), Some("3"));
        assert!(matches!(
            client.execute("SELECT 1").await,
            Err(DriverError::Closed)
        ));
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "holds a session on the template, which fails concurrent clones"]
async fn test_template_with_sessions_is_reported_as_in_use() {
    init_test_tracing();
    let reference = Reference::shared().unwrap();
    let template = reference
        .endpoint()
        .with_database_name(reference.name())
        .unwrap();
    let session = PgClient::connect(&template).await.unwrap();

    TestContext::run_current(async |ctx| {
        let err = TestDatabase::clone_from_template(ctx).await.unwrap_err();
        session.close().await.unwrap();

        assert_eq!(err.kind(), isolation::ErrorKind::TemplateInUse);
        assert!(err.is_provisioning());
    })
    .await;
}
