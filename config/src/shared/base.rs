use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The server url is empty.
    #[error("`url` cannot be empty")]
    EmptyUrl,
    /// A database or schema name is empty.
    #[error("`{0}` cannot be empty")]
    EmptyName(&'static str),
    /// A database or schema name does not fit in a Postgres identifier.
    #[error("`{field}` is {length} bytes long, the maximum is {max}")]
    NameTooLong {
        field: &'static str,
        length: usize,
        max: usize,
    },
    /// The connection pool size cannot be zero.
    #[error("`max_connections` cannot be zero")]
    MaxConnectionsZero,
    /// A deadline cannot be zero.
    #[error("`{0}` cannot be zero")]
    TimeoutZero(&'static str),
}
