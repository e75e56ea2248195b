pub mod config;
pub mod pool;

use crate::core::{DbError, Result};
use crate::facade::InMemoryEngine;
use crate::query::Statement;
use crate::result::QueryResult;
use crate::transaction::TransactionId;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Level, debug, warn};

/// Database connection handle
///
/// Outside a transaction every statement commits on its own. Inside one,
/// statements run in submission order and see each other's writes.
pub struct Connection {
    id: u64,
    engine: Arc<InMemoryEngine>,
    state: ConnectionState,
    transaction_id: Option<TransactionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Active,
    InTransaction,
    Closed,
}

impl Connection {
    pub(crate) fn new(id: u64, engine: Arc<InMemoryEngine>) -> Self {
        Self {
            id,
            engine,
            state: ConnectionState::Active,
            transaction_id: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction_id
    }

    pub async fn execute(&mut self, stmt: &Statement) -> Result<QueryResult> {
        if self.state == ConnectionState::Closed {
            return Err(DbError::ExecutionError("Connection is closed".into()));
        }

        let start = Instant::now();
        let result = match self.transaction_id {
            Some(txn_id) => self.engine.execute_in(stmt, txn_id),
            None => self.engine.execute_autocommit(stmt),
        };

        if tracing::enabled!(Level::DEBUG) {
            let rendered = stmt.to_sql();
            let elapsed_us = start.elapsed().as_micros() as u64;
            match &result {
                Ok(output) => debug!(
                    connection = self.id,
                    sql = %rendered.sql,
                    params = rendered.params.len(),
                    rows = output.row_count(),
                    rows_affected = output.rows_affected,
                    elapsed_us,
                    "statement executed"
                ),
                Err(err) => debug!(
                    connection = self.id,
                    sql = %rendered.sql,
                    params = rendered.params.len(),
                    error = %err,
                    elapsed_us,
                    "statement failed"
                ),
            }
        }

        result
    }

    pub async fn begin(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Closed => Err(DbError::ExecutionError("Connection is closed".into())),
            ConnectionState::InTransaction => Err(DbError::ExecutionError("Transaction already active".into())),
            ConnectionState::Active => {
                let txn_id = self.engine.begin()?;
                self.state = ConnectionState::InTransaction;
                self.transaction_id = Some(txn_id);
                debug!(connection = self.id, txn = %txn_id, "BEGIN");
                Ok(())
            }
        }
    }

    pub async fn commit(&mut self) -> Result<()> {
        let txn_id = self.take_transaction()?;
        match self.engine.commit(txn_id) {
            Ok(()) => {
                debug!(connection = self.id, txn = %txn_id, "COMMIT");
                Ok(())
            }
            Err(err) => {
                // Never leave the id in the active set.
                let _ = self.engine.rollback(txn_id);
                Err(err)
            }
        }
    }

    pub async fn rollback(&mut self) -> Result<()> {
        let txn_id = self.take_transaction()?;
        self.engine.rollback(txn_id)?;
        debug!(connection = self.id, txn = %txn_id, "ROLLBACK");
        Ok(())
    }

    /// Synchronous rollback for drop paths. No-op outside a transaction.
    pub(crate) fn abort(&mut self) {
        if let Ok(txn_id) = self.take_transaction() {
            match self.engine.rollback(txn_id) {
                Ok(()) => warn!(connection = self.id, txn = %txn_id, "transaction dropped without commit, rolled back"),
                Err(err) => warn!(connection = self.id, txn = %txn_id, error = %err, "rollback on drop failed"),
            }
        }
    }

    fn take_transaction(&mut self) -> Result<TransactionId> {
        if self.state != ConnectionState::InTransaction {
            return Err(DbError::TransactionClosed(format!(
                "connection {} has no active transaction",
                self.id
            )));
        }
        self.state = ConnectionState::Active;
        self.transaction_id
            .take()
            .ok_or_else(|| DbError::TransactionClosed(format!("connection {}", self.id)))
    }

    pub fn is_in_transaction(&self) -> bool {
        self.state == ConnectionState::InTransaction
    }

    pub fn is_active(&self) -> bool {
        self.state != ConnectionState::Closed
    }

    pub fn close(&mut self) {
        self.abort();
        self.state = ConnectionState::Closed;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.abort();
    }
}
