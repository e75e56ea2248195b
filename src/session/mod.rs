pub mod database;
pub mod executor;
pub(crate) mod persist;
pub mod transaction;

pub use database::Database;
pub use executor::Executor;
pub use transaction::Transaction;
