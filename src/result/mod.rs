#[allow(clippy::module_inception)]
mod result;

pub use result::{QueryResult, WriteResult};
