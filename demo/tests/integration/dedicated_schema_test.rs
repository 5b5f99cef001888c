use demo::{MIGRATOR, RepositoryError, User, UserRepository};
use isolation::{TestContext, TestDatabase};
use telemetry::init_test_tracing;
use uuid::Uuid;

async fn migrated_schema(ctx: &TestContext) -> TestDatabase {
    let database = TestDatabase::with_isolated_schema(ctx).await.unwrap();
    database.apply_migrations(&MIGRATOR).await.unwrap();

    database
}

#[tokio::test(flavor = "multi_thread")]
async fn test_create_user_in_isolated_schema() {
    init_test_tracing();

    TestContext::run_current(async |ctx| {
        let database = migrated_schema(ctx).await;
        let repository = UserRepository::new(database.pool().await.unwrap());
        let user = User::new("gopher");

        repository.create_user(&user).await.unwrap();

        assert_eq!(repository.read_user(user.id).await.unwrap(), user);
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_duplicate_user_in_isolated_schema() {
    init_test_tracing();

    TestContext::run_current(async |ctx| {
        let database = migrated_schema(ctx).await;
        let repository = UserRepository::new(database.pool().await.unwrap());
        let user = User::new("gopher");
        repository.create_user(&user).await.unwrap();

        let err = repository.create_user(&user).await.unwrap_err();

        assert!(
            err.to_string()
                .contains("duplicate key value violates unique constraint")
        );
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_user_in_isolated_schema() {
    init_test_tracing();

    TestContext::run_current(async |ctx| {
        let database = migrated_schema(ctx).await;
        let repository = UserRepository::new(database.pool().await.unwrap());

        let err = repository.read_user(Uuid::new_v4()).await.unwrap_err();

        assert!(matches!(err, RepositoryError::NotFound(_)));
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_subtests_get_their_own_schemas() {
    init_test_tracing();
    let ctx = TestContext::current();
    let user = User::new("gopher");

    let first = ctx.subtest("first");
    let first_database = migrated_schema(&first).await;
    UserRepository::new(first_database.pool().await.unwrap())
        .create_user(&user)
        .await
        .unwrap();

    let second = ctx.subtest("second");
    let second_database = migrated_schema(&second).await;
    let read = UserRepository::new(second_database.pool().await.unwrap())
        .read_user(user.id)
        .await;

    assert!(matches!(read, Err(RepositoryError::NotFound(_))));
    ctx.finish().await.unwrap();
    assert!(first.is_finished());
    assert!(second.is_finished());
}
