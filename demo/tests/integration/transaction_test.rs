use demo::{RepositoryError, User, insert_user, select_user};
use isolation::{TestContext, TestTransaction};
use telemetry::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn test_user_is_visible_inside_the_transaction_only() {
    init_test_tracing();
    let user = User::new("gopher");

    TestContext::run_current(async |ctx| {
        let transaction = TestTransaction::begin(ctx).await.unwrap();
        let mut conn = transaction.conn().await.unwrap();
        insert_user(&mut *conn, &user).await.unwrap();

        assert_eq!(select_user(&mut *conn, user.id).await.unwrap(), user);
    })
    .await;

    TestContext::run_current(async |ctx| {
        let fresh = TestTransaction::begin(ctx).await.unwrap();
        let mut conn = fresh.conn().await.unwrap();
        let read = select_user(&mut *conn, user.id).await;

        assert!(matches!(read, Err(RepositoryError::NotFound(_))));
    })
    .await;
}
