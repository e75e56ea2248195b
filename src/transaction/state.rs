// ============================================================================
// Transaction State
// ============================================================================
//
// Lifecycle of one storage transaction: Active -> Committed | Aborted.
// Visibility itself lives in the table versions (xmin/xmax); this record only
// tracks where a transaction is in its lifecycle.
//
// ============================================================================

use crate::core::{DbError, Result};
use std::time::{Duration, Instant};

/// Unique identifier for a transaction within one engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::Aborted)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

#[derive(Debug)]
pub struct TransactionRecord {
    id: TransactionId,
    state: TransactionState,
    statements: usize,
    start_time: Instant,
}

impl TransactionRecord {
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            statements: 0,
            start_time: Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn statement_count(&self) -> usize {
        self.statements
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn record_statement(&mut self) -> Result<()> {
        if !self.state.is_active() {
            return Err(DbError::TransactionClosed(format!("{} ({})", self.id, self.state)));
        }
        self.statements += 1;
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        if !self.state.is_active() {
            return Err(DbError::TransactionClosed(format!(
                "{} is already {}",
                self.id, self.state
            )));
        }
        self.state = TransactionState::Committed;
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        if !self.state.is_active() {
            return Err(DbError::TransactionClosed(format!(
                "{} is already {}",
                self.id, self.state
            )));
        }
        self.state = TransactionState::Aborted;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_lifecycle() {
        let mut txn = TransactionRecord::new(TransactionId(1));

        assert!(txn.state().is_active());
        assert!(!txn.state().is_terminal());

        txn.record_statement().unwrap();
        txn.commit().unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert_eq!(txn.statement_count(), 1);
        assert!(txn.state().is_terminal());
    }

    #[test]
    fn test_cannot_finish_twice() {
        let mut txn = TransactionRecord::new(TransactionId(2));
        txn.rollback().unwrap();
        assert!(txn.commit().is_err());
        assert!(txn.rollback().is_err());
        assert!(matches!(
            txn.record_statement(),
            Err(DbError::TransactionClosed(_))
        ));
    }
}
