use super::{Executor, Transaction};
use crate::connection::config::ConnectionConfig;
use crate::connection::pool::{ConnectionPool, PoolStats};
use crate::core::{DbError, Result};
use crate::facade::InMemoryEngine;
use crate::mapper::Entity;
use crate::query::{Query, Statement};
use crate::relation::Omit;
use crate::result::{QueryResult, WriteResult};
use crate::schema::SchemaRegistry;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::info;

/// Database client
///
/// Owns the schema registry and a connection pool over the engine. Reads
/// run in autocommit mode; entity writes run in an implicit transaction so
/// an object graph is stored entirely or not at all.
///
/// # Examples
///
/// ```ignore
/// let registry = SchemaRegistry::new().with::<User>()?.with::<Todo>()?;
/// let db = Database::connect(ConnectionConfig::from_env()?, registry)?;
/// db.create_tables().await?;
///
/// let mut user = User::new("1", "Eko");
/// db.create(&mut user).await?;
/// let found = db.query::<User>().filter(col("id").eq("1")).preload("Todos").first().await?;
/// ```
pub struct Database {
    registry: Arc<SchemaRegistry>,
    pool: ConnectionPool,
}

impl Database {
    /// Opens a pool over a fresh engine. The registry is validated and
    /// frozen from here on.
    pub fn connect(config: ConnectionConfig, registry: SchemaRegistry) -> Result<Self> {
        Self::connect_with_engine(config, registry, Arc::new(InMemoryEngine::new()))
    }

    /// Opens a pool over an existing engine, e.g. one shared by two clients.
    pub fn connect_with_engine(
        config: ConnectionConfig,
        registry: SchemaRegistry,
        engine: Arc<InMemoryEngine>,
    ) -> Result<Self> {
        registry.validate()?;
        let pool = ConnectionPool::new_with_engine(config, engine)?;
        info!(
            url = %pool.config().to_url(),
            entities = registry.len(),
            "database connected"
        );
        Ok(Self {
            registry: Arc::new(registry),
            pool,
        })
    }

    /// Connects using `DATABASE_URL` (a `.env` file is honoured).
    pub fn from_env(registry: SchemaRegistry) -> Result<Self> {
        Self::connect(ConnectionConfig::from_env()?, registry)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn engine(&self) -> &Arc<InMemoryEngine> {
        self.pool.engine()
    }

    /// Creates the table of every registered entity, referenced tables first.
    pub async fn create_tables(&self) -> Result<()> {
        self.registry.create_tables(self).await
    }

    /// Starts a manually scoped transaction.
    pub async fn begin(&self) -> Result<Transaction> {
        let mut guard = self.pool.get_connection().await?;
        guard.begin().await?;
        let id = guard
            .connection()?
            .transaction_id()
            .ok_or_else(|| DbError::ExecutionError("BEGIN did not open a transaction".into()))?;
        Ok(Transaction::new(id, Arc::clone(&self.registry), guard))
    }

    /// Runs `f` in a transaction: commit when it returns `Ok`, roll back
    /// and return the error otherwise.
    ///
    /// ```ignore
    /// db.transaction(|tx| Box::pin(async move {
    ///     tx.create(&mut user_a).await?;
    ///     tx.create(&mut user_b).await?;
    ///     Ok(())
    /// })).await?;
    /// ```
    pub async fn transaction<R, F>(&self, f: F) -> Result<R>
    where
        R: Send,
        F: for<'t> FnOnce(&'t Transaction) -> BoxFuture<'t, Result<R>> + Send,
    {
        let tx = self.begin().await?;
        let outcome = f(&tx).await;
        tx.finish(outcome).await
    }

    pub async fn create<T: Entity>(&self, entity: &mut T) -> Result<WriteResult> {
        self.create_with(entity, Omit::None).await
    }

    /// Creates `entity`, leaving out the relationships named by `omit`.
    pub async fn create_with<T: Entity>(&self, entity: &mut T, omit: Omit) -> Result<WriteResult> {
        let tx = self.begin().await?;
        let outcome = tx.create_with(entity, omit).await;
        tx.finish(outcome).await
    }

    /// Batch insert; flat entities go out as one multi-row INSERT.
    pub async fn create_many<T: Entity>(&self, entities: &mut [T]) -> Result<WriteResult> {
        let tx = self.begin().await?;
        let outcome = tx.create_many(entities).await;
        tx.finish(outcome).await
    }

    /// Upsert by primary key, including attached relations.
    pub async fn save<T: Entity>(&self, entity: &mut T) -> Result<WriteResult> {
        self.save_with(entity, Omit::None).await
    }

    pub async fn save_with<T: Entity>(&self, entity: &mut T, omit: Omit) -> Result<WriteResult> {
        let tx = self.begin().await?;
        let outcome = tx.save_with(entity, omit).await;
        tx.finish(outcome).await
    }

    /// Deletes by primary key; soft-deletes when the entity has a
    /// soft-delete column.
    pub async fn delete<T: Entity>(&self, entity: &T) -> Result<WriteResult> {
        super::persist::delete_entity(self, entity).await
    }

    pub fn query<T: Entity>(&self) -> Query<'_, T> {
        Query::new(self)
    }
}

#[async_trait]
impl Executor for Database {
    fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    async fn execute(&self, stmt: &Statement) -> Result<QueryResult> {
        let mut guard = self.pool.get_connection().await?;
        guard.execute(stmt).await
    }
}
