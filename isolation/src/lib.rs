//! Disposable, isolated PostgreSQL databases, schemas and transactions for concurrent tests.
//!
//! A test asks one of the [`strategy`] implementations for an isolation unit. The unit gets a
//! unique name from the [`identifier`] generator, is created from the [`reference`] over an
//! administrative connection, and is handed back with an [`endpoint`] and a lazily connected
//! [`pool`]. Its teardown is registered with the test's [`lifecycle::TestHandle`] and runs
//! exactly once when the test finishes, whether it passed, failed or panicked.

pub mod database;
pub mod deadline;
pub mod driver;
pub mod endpoint;
pub mod error;
pub mod identifier;
pub mod lifecycle;
mod macros;
pub mod migrate;
pub mod pool;
pub mod reference;
pub mod strategy;

pub use database::{TestDatabase, TestTransaction};
pub use endpoint::Endpoint;
pub use error::{ErrorKind, IsolationError, IsolationResult};
pub use identifier::Identifier;
pub use lifecycle::{Teardown, TestContext, TestHandle};
pub use reference::Reference;
