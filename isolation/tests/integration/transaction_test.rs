use isolation::strategy::StrategyKind;
use isolation::{ErrorKind, TestContext, TestTransaction};
use telemetry::init_test_tracing;
use uuid::Uuid;

async fn count_users(transaction: &TestTransaction, user_id: Uuid) -> i64 {
    let mut conn = transaction.conn().await.unwrap();
    sqlx::query_scalar("select count(*) from users where user_id = $1")
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rows_are_rolled_back_after_the_test() {
    init_test_tracing();
    let user_id = Uuid::new_v4();

    TestContext::run_current(async |ctx| {
        let transaction = TestTransaction::begin(ctx).await.unwrap();
        {
            let mut conn = transaction.conn().await.unwrap();
            sqlx::query("insert into users (user_id, username, created_at) values ($1, $2, now())")
                .bind(user_id)
                .bind("rolled-back")
                .execute(&mut *conn)
                .await
                .unwrap();
        }

        assert_eq!(count_users(&transaction, user_id).await, 1);
        assert_eq!(transaction.unit().strategy(), StrategyKind::Transaction);
    })
    .await;

    TestContext::run_current(async |ctx| {
        let fresh = TestTransaction::begin(ctx).await.unwrap();
        assert_eq!(count_users(&fresh, user_id).await, 0);
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_transaction_runs_at_repeatable_read() {
    init_test_tracing();

    TestContext::run_current(async |ctx| {
        let transaction = TestTransaction::begin(ctx).await.unwrap();
        let mut conn = transaction.conn().await.unwrap();
        let level: String = sqlx::query_scalar("SHOW transaction_isolation")
            .fetch_one(&mut *conn)
            .await
            .unwrap();

        assert_eq!(level, "repeatable read");
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_connection_is_unusable_after_rollback() {
    init_test_tracing();
    let ctx = TestContext::current();
    let transaction = TestTransaction::begin(&ctx).await.unwrap();

    ctx.finish().await.unwrap();
    let err = transaction.conn().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidState);
}
