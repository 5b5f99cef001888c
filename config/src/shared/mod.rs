mod base;
mod testing_db;

pub use base::*;
pub use testing_db::*;
