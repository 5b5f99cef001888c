//! Reads the reference database while it is in use as a template.
//!
//! A session on the reference database makes every concurrent clone fail, so these tests live
//! in their own binary and open the session only after cloning.

use demo::{RepositoryError, User, UserRepository, select_user};
use isolation::{Reference, TestContext, TestDatabase};
use sqlx::{Connection, PgConnection};
use telemetry::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn test_rows_written_to_a_clone_never_reach_the_reference() {
    init_test_tracing();
    let reference = Reference::shared().unwrap();

    TestContext::run_current(async |ctx| {
        let database = TestDatabase::clone_from_template(ctx).await.unwrap();
        let user = User::new("gopher");
        UserRepository::new(database.pool().await.unwrap())
            .create_user(&user)
            .await
            .unwrap();

        let template = reference
            .endpoint()
            .with_database_name(reference.name())
            .unwrap();
        let mut conn = PgConnection::connect(template.as_str()).await.unwrap();
        let in_reference = select_user(&mut conn, user.id).await;
        conn.close().await.unwrap();

        assert!(matches!(in_reference, Err(RepositoryError::NotFound(id)) if id == user.id));
    })
    .await;
}
