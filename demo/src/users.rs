use chrono::{DateTime, SubsecRound, Utc};
use sqlx::{FromRow, PgExecutor, PgPool};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct User {
    #[sqlx(rename = "user_id")]
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Creates a user with a random id, created now.
    ///
    /// The timestamp is truncated to microseconds, the precision of `timestamptz`, so a stored
    /// and re-read user compares equal.
    pub fn new(username: impl Into<String>) -> Self {
        User {
            id: Uuid::new_v4(),
            username: username.into(),
            created_at: Utc::now().trunc_subsecs(6),
        }
    }
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("user {0} was not found")]
    NotFound(Uuid),

    #[error("Error while interacting with Postgres for users: {0}")]
    Database(#[from] sqlx::Error),
}

pub async fn insert_user<'c, E>(executor: E, user: &User) -> Result<(), RepositoryError>
where
    E: PgExecutor<'c>,
{
    sqlx::query(
        r#"
        insert into users (user_id, username, created_at)
        values ($1, $2, $3)
        "#,
    )
    .bind(user.id)
    .bind(&user.username)
    .bind(user.created_at)
    .execute(executor)
    .await?;

    debug!(user_id = %user.id, "inserted user");

    Ok(())
}

pub async fn select_user<'c, E>(executor: E, user_id: Uuid) -> Result<User, RepositoryError>
where
    E: PgExecutor<'c>,
{
    sqlx::query_as::<_, User>(
        r#"
        select user_id, username, created_at
        from users
        where user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await?
    .ok_or(RepositoryError::NotFound(user_id))
}

/// Stores users in the `users` table of one database.
#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        UserRepository { pool }
    }

    pub async fn create_user(&self, user: &User) -> Result<(), RepositoryError> {
        insert_user(&self.pool, user).await
    }

    pub async fn read_user(&self, user_id: Uuid) -> Result<User, RepositoryError> {
        select_user(&self.pool, user_id).await
    }
}
