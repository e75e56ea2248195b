use crate::core::Result;
use crate::executor::{ExecutionContext, ExecutorPipeline};
use crate::query::Statement;
use crate::result::QueryResult;
use crate::storage::InMemoryStorage;
use crate::transaction::{TransactionId, TransactionManager};

/// The embedded relational engine: tables, MVCC bookkeeping and the
/// statement executors. Shared by every connection of a pool.
///
/// All entry points are synchronous and short; callers on an async runtime
/// never hold engine locks across an `.await`.
pub struct InMemoryEngine {
    storage: InMemoryStorage,
    transaction_manager: TransactionManager,
    executor_pipeline: ExecutorPipeline,
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self {
            storage: InMemoryStorage::new(),
            transaction_manager: TransactionManager::new(),
            executor_pipeline: ExecutorPipeline::with_default_executors(),
        }
    }

    pub fn storage(&self) -> &InMemoryStorage {
        &self.storage
    }

    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.transaction_manager
    }

    pub fn begin(&self) -> Result<TransactionId> {
        self.transaction_manager.begin()
    }

    pub fn commit(&self, txn_id: TransactionId) -> Result<()> {
        self.transaction_manager.commit(txn_id)
    }

    pub fn rollback(&self, txn_id: TransactionId) -> Result<()> {
        self.transaction_manager.rollback(txn_id)
    }

    /// Runs one statement inside `txn_id` with a fresh statement snapshot.
    pub fn execute_in(&self, stmt: &Statement, txn_id: TransactionId) -> Result<QueryResult> {
        let snapshot = self.transaction_manager.statement_snapshot(txn_id)?;
        let ctx = ExecutionContext::new(&self.storage, &snapshot);
        self.executor_pipeline.execute(stmt, &ctx)
    }

    /// Runs one statement in its own transaction.
    pub fn execute_autocommit(&self, stmt: &Statement) -> Result<QueryResult> {
        let txn_id = self.begin()?;
        match self.execute_in(stmt, txn_id) {
            Ok(result) => {
                self.commit(txn_id)?;
                Ok(result)
            }
            Err(err) => {
                self.rollback(txn_id)?;
                Err(err)
            }
        }
    }
}
