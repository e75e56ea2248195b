// ============================================================================
// Transaction Manager
// ============================================================================

use super::{TransactionId, TransactionRecord, TransactionState};
use crate::core::{DbError, Result};
use crate::storage::Snapshot;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Hands out transaction ids and keeps the active/aborted sets that every
/// snapshot is built from.
///
/// Locks are synchronous and held only for the bookkeeping itself, so a
/// transaction can be aborted from a `Drop` implementation.
pub struct TransactionManager {
    next_id: AtomicU64,

    transactions: RwLock<HashMap<TransactionId, TransactionRecord>>,

    // Copy-on-write sets: a snapshot clones the Arc, never the set.
    active_ids: RwLock<Arc<HashSet<u64>>>,
    aborted_ids: RwLock<Arc<HashSet<u64>>>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            transactions: RwLock::new(HashMap::new()),
            active_ids: RwLock::new(Arc::new(HashSet::new())),
            aborted_ids: RwLock::new(Arc::new(HashSet::new())),
        }
    }

    pub fn begin(&self) -> Result<TransactionId> {
        // The id is handed out under the active-set lock, so any snapshot
        // whose bound covers it also finds it active.
        let id = {
            let mut active = self.active_ids.write()?;
            let id = TransactionId(self.next_id.fetch_add(1, Ordering::SeqCst));
            let mut next = (**active).clone();
            next.insert(id.0);
            *active = Arc::new(next);
            id
        };

        self.transactions
            .write()?
            .insert(id, TransactionRecord::new(id));

        Ok(id)
    }

    /// Snapshot for the next statement of `txn_id`. Taken fresh per
    /// statement: read committed.
    pub fn statement_snapshot(&self, txn_id: TransactionId) -> Result<Snapshot> {
        {
            let mut transactions = self.transactions.write()?;
            let record = transactions
                .get_mut(&txn_id)
                .ok_or_else(|| DbError::TransactionClosed(txn_id.to_string()))?;
            record.record_statement()?;
        }

        // Bound first, then active, then aborted: the reverse order of the
        // updates made by `begin` and `finish`.
        let max_tx_id = self.next_id.load(Ordering::SeqCst);
        let active = self.active_ids.read()?.clone();
        let aborted = self.aborted_ids.read()?.clone();
        Ok(Snapshot {
            tx_id: txn_id.0,
            active,
            aborted,
            max_tx_id,
        })
    }

    pub fn commit(&self, txn_id: TransactionId) -> Result<()> {
        self.finish(txn_id, TransactionState::Committed)
    }

    pub fn rollback(&self, txn_id: TransactionId) -> Result<()> {
        self.finish(txn_id, TransactionState::Aborted)
    }

    fn finish(&self, txn_id: TransactionId, outcome: TransactionState) -> Result<()> {
        {
            let mut transactions = self.transactions.write()?;
            let record = transactions
                .get_mut(&txn_id)
                .ok_or_else(|| DbError::TransactionClosed(txn_id.to_string()))?;
            match outcome {
                TransactionState::Committed => record.commit()?,
                _ => record.rollback()?,
            }
            transactions.remove(&txn_id);
        }

        // The aborted set must contain the id before it leaves the active
        // set, otherwise a concurrent snapshot would read it as committed.
        if outcome == TransactionState::Aborted {
            let mut aborted = self.aborted_ids.write()?;
            let mut next = (**aborted).clone();
            next.insert(txn_id.0);
            *aborted = Arc::new(next);
        }

        let mut active = self.active_ids.write()?;
        if active.contains(&txn_id.0) {
            let mut next = (**active).clone();
            next.remove(&txn_id.0);
            *active = Arc::new(next);
        }

        Ok(())
    }

    pub fn is_active(&self, txn_id: TransactionId) -> bool {
        self.transactions
            .read()
            .map(|transactions| transactions.contains_key(&txn_id))
            .unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.active_ids.read().map(|active| active.len()).unwrap_or(0)
    }

    pub fn transaction_info(&self, txn_id: TransactionId) -> Result<Option<TransactionInfo>> {
        let transactions = self.transactions.read()?;
        Ok(transactions.get(&txn_id).map(|txn| TransactionInfo {
            id: txn.id(),
            state: txn.state(),
            statement_count: txn.statement_count(),
            duration: txn.duration(),
        }))
    }
}

#[derive(Debug, Clone)]
pub struct TransactionInfo {
    pub id: TransactionId,
    pub state: TransactionState,
    pub statement_count: usize,
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_tracks_active_and_aborted() {
        let manager = TransactionManager::new();
        let a = manager.begin().unwrap();
        let b = manager.begin().unwrap();

        let snap = manager.statement_snapshot(b).unwrap();
        assert!(snap.active.contains(&a.0));
        assert_eq!(snap.tx_id, b.0);

        manager.rollback(a).unwrap();
        let snap = manager.statement_snapshot(b).unwrap();
        assert!(!snap.active.contains(&a.0));
        assert!(snap.aborted.contains(&a.0));
    }

    #[test]
    fn test_snapshot_never_sees_running_transaction_as_finished() {
        let manager = TransactionManager::new();
        let reader = manager.begin().unwrap();

        // Nothing below ever finishes, so every id under a snapshot's
        // bound must show up as active.
        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..500 {
                    manager.begin().unwrap();
                }
            });
            for _ in 0..500 {
                let snap = manager.statement_snapshot(reader).unwrap();
                for id in 1..snap.max_tx_id {
                    assert!(snap.active.contains(&id), "transaction {} read as finished", id);
                }
            }
        });
    }

    #[test]
    fn test_finished_transaction_rejects_statements() {
        let manager = TransactionManager::new();
        let id = manager.begin().unwrap();
        manager.commit(id).unwrap();

        assert!(!manager.is_active(id));
        assert!(matches!(
            manager.statement_snapshot(id),
            Err(DbError::TransactionClosed(_))
        ));
        assert!(manager.rollback(id).is_err());
    }

    #[test]
    fn test_info_counts_statements() {
        let manager = TransactionManager::new();
        let id = manager.begin().unwrap();
        manager.statement_snapshot(id).unwrap();
        manager.statement_snapshot(id).unwrap();

        let info = manager.transaction_info(id).unwrap().unwrap();
        assert_eq!(info.statement_count, 2);
        assert_eq!(info.state, TransactionState::Active);
        assert_eq!(manager.active_count(), 1);
    }
}
