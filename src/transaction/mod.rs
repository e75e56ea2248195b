// ============================================================================
// Transaction Management Module
// ============================================================================
//
// MVCC transactions for the embedded engine. Every statement reads through a
// fresh snapshot (read committed); writes are versioned in the tables and
// become visible when the writer leaves the active set.
//
// ============================================================================

pub mod manager;
pub mod state;

pub use manager::{TransactionInfo, TransactionManager};
pub use state::{TransactionId, TransactionRecord, TransactionState};
