use super::ExecutionContext;
use super::ddl::CreateTableExecutor;
use super::delete::DeleteExecutor;
use super::dml::InsertExecutor;
use super::query::SelectExecutor;
use super::update::UpdateExecutor;
use crate::core::{DbError, Result};
use crate::query::Statement;
use crate::result::QueryResult;

/// One statement kind of the embedded engine.
pub trait StatementExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_handle(&self, stmt: &Statement) -> bool;

    fn execute(&self, stmt: &Statement, ctx: &ExecutionContext<'_>) -> Result<QueryResult>;
}

pub struct ExecutorPipeline {
    executors: Vec<Box<dyn StatementExecutor>>,
}

impl ExecutorPipeline {
    pub fn new() -> Self {
        Self {
            executors: Vec::new(),
        }
    }

    pub fn with_default_executors() -> Self {
        let mut pipeline = Self::new();
        pipeline.register(Box::new(CreateTableExecutor));
        pipeline.register(Box::new(InsertExecutor));
        pipeline.register(Box::new(UpdateExecutor));
        pipeline.register(Box::new(DeleteExecutor));
        pipeline.register(Box::new(SelectExecutor));
        pipeline
    }

    pub fn register(&mut self, executor: Box<dyn StatementExecutor>) {
        self.executors.push(executor);
    }

    pub fn execute(&self, stmt: &Statement, ctx: &ExecutionContext<'_>) -> Result<QueryResult> {
        for executor in &self.executors {
            if executor.can_handle(stmt) {
                return executor.execute(stmt, ctx);
            }
        }

        Err(DbError::ExecutionError(format!(
            "No executor registered for {}",
            stmt.kind()
        )))
    }
}

impl Default for ExecutorPipeline {
    fn default() -> Self {
        Self::with_default_executors()
    }
}
