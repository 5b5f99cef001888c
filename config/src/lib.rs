//! Configuration for provisioning isolated Postgres test databases.
//!
//! Holds the process-wide [`shared::TestingDbConfig`] together with its validation rules and
//! the loader that reads it from `TESTING_DB_`-prefixed environment variables.

mod load;
pub mod shared;

pub use load::*;

/// A [`secrecy::Secret`] string that can be deserialized from configuration sources.
pub type SerializableSecretString = secrecy::SecretString;
