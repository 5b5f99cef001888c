use demo::{RepositoryError, User, UserRepository};
use isolation::{TestContext, TestDatabase};
use telemetry::init_test_tracing;
use uuid::Uuid;

#[tokio::test(flavor = "multi_thread")]
async fn test_create_user_then_read_it_back() {
    init_test_tracing();

    TestContext::run_current(async |ctx| {
        let database = TestDatabase::clone_from_template(ctx).await.unwrap();
        let repository = UserRepository::new(database.pool().await.unwrap());
        let user = User::new("gopher");

        repository.create_user(&user).await.unwrap();
        let read = repository.read_user(user.id).await.unwrap();

        assert_eq!(read, user);
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cannot_create_a_user_with_the_same_id() {
    init_test_tracing();

    TestContext::run_current(async |ctx| {
        let database = TestDatabase::clone_from_template(ctx).await.unwrap();
        let repository = UserRepository::new(database.pool().await.unwrap());
        let user = User::new("gopher");
        repository.create_user(&user).await.unwrap();

        let err = repository.create_user(&user).await.unwrap_err();

        assert!(matches!(err, RepositoryError::Database(_)));
        assert!(
            err.to_string()
                .contains("duplicate key value violates unique constraint")
        );
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reading_a_missing_user_fails() {
    init_test_tracing();

    TestContext::run_current(async |ctx| {
        let database = TestDatabase::clone_from_template(ctx).await.unwrap();
        let repository = UserRepository::new(database.pool().await.unwrap());
        let id = Uuid::new_v4();

        let err = repository.read_user(id).await.unwrap_err();

        assert!(matches!(err, RepositoryError::NotFound(missing) if missing == id));
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rows_stay_in_their_clone() {
    init_test_tracing();

    TestContext::run_current(async |ctx| {
        let first = TestDatabase::clone_from_template(ctx).await.unwrap();
        let second = TestDatabase::clone_from_template(ctx).await.unwrap();
        let user = User::new("gopher");

        UserRepository::new(first.pool().await.unwrap())
            .create_user(&user)
            .await
            .unwrap();

        let in_second = UserRepository::new(second.pool().await.unwrap())
            .read_user(user.id)
            .await;
        assert!(matches!(in_second, Err(RepositoryError::NotFound(_))));
    })
    .await;
}
