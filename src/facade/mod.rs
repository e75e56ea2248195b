pub mod database;

pub use database::InMemoryEngine;
