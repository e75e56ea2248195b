pub mod memory;
pub mod table;

pub use memory::InMemoryStorage;
pub use table::{MvccRow, Snapshot, Table, TableSchema};
