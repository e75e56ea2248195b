use crate::core::Result;
use crate::query::Statement;
use crate::result::QueryResult;
use crate::schema::SchemaRegistry;
use async_trait::async_trait;

/// Anything that can run statements against the registered schema: the
/// database itself (autocommit) or an open transaction.
#[async_trait]
pub trait Executor: Send + Sync {
    fn registry(&self) -> &SchemaRegistry;

    async fn execute(&self, stmt: &Statement) -> Result<QueryResult>;
}
