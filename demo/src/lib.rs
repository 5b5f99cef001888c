//! A small user store used to exercise isolated test databases end to end.

use sqlx::migrate::Migrator;

mod users;

pub use users::{RepositoryError, User, UserRepository, insert_user, select_user};

/// Forward-only migrations creating the `users` table.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");
