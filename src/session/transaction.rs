use super::{Executor, persist};
use crate::connection::pool::PoolGuard;
use crate::core::{DbError, Result};
use crate::mapper::Entity;
use crate::query::{Query, Statement};
use crate::relation::{NodeMode, Omit};
use crate::result::{QueryResult, WriteResult};
use crate::schema::SchemaRegistry;
use crate::transaction::TransactionId;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// A unit of work on one pooled connection.
///
/// Statements run in submission order and see each other's writes.
/// `commit` and `rollback` consume the transaction; dropping it unfinished
/// rolls back and returns the connection to the pool.
pub struct Transaction {
    id: TransactionId,
    registry: Arc<SchemaRegistry>,
    guard: Mutex<Option<PoolGuard>>,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, registry: Arc<SchemaRegistry>, guard: PoolGuard) -> Self {
        Self {
            id,
            registry,
            guard: Mutex::new(Some(guard)),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub async fn commit(self) -> Result<()> {
        let mut guard = self.take_guard()?;
        guard.commit().await
    }

    pub async fn rollback(self) -> Result<()> {
        let mut guard = self.take_guard()?;
        guard.rollback().await
    }

    /// Commits on `Ok`, rolls back on `Err` and hands the outcome back.
    pub(crate) async fn finish<R>(self, outcome: Result<R>) -> Result<R> {
        match outcome {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                let id = self.id;
                if let Err(rollback_err) = self.rollback().await {
                    warn!(txn = %id, error = %rollback_err, "rollback after failed unit of work failed");
                }
                Err(err)
            }
        }
    }

    fn take_guard(self) -> Result<PoolGuard> {
        self.guard
            .into_inner()
            .ok_or_else(|| DbError::TransactionClosed(self.id.to_string()))
    }

    pub async fn create<T: Entity>(&self, entity: &mut T) -> Result<WriteResult> {
        self.create_with(entity, Omit::None).await
    }

    pub async fn create_with<T: Entity>(&self, entity: &mut T, omit: Omit) -> Result<WriteResult> {
        persist::write_entity(self, entity, NodeMode::Insert, &omit).await
    }

    pub async fn create_many<T: Entity>(&self, entities: &mut [T]) -> Result<WriteResult> {
        persist::create_batch(self, entities, &Omit::None).await
    }

    pub async fn save<T: Entity>(&self, entity: &mut T) -> Result<WriteResult> {
        self.save_with(entity, Omit::None).await
    }

    pub async fn save_with<T: Entity>(&self, entity: &mut T, omit: Omit) -> Result<WriteResult> {
        persist::write_entity(self, entity, NodeMode::Upsert, &omit).await
    }

    pub async fn delete<T: Entity>(&self, entity: &T) -> Result<WriteResult> {
        persist::delete_entity(self, entity).await
    }

    pub fn query<T: Entity>(&self) -> Query<'_, T> {
        Query::new(self)
    }
}

#[async_trait]
impl Executor for Transaction {
    fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    async fn execute(&self, stmt: &Statement) -> Result<QueryResult> {
        let mut guard = self.guard.lock().await;
        let guard = guard
            .as_mut()
            .ok_or_else(|| DbError::TransactionClosed(self.id.to_string()))?;
        guard.execute(stmt).await
    }
}
