use super::{ExecutionContext, StatementExecutor};
use crate::core::{DbError, Result};
use crate::query::{CreateTableStmt, Statement};
use crate::result::QueryResult;
use crate::storage::TableSchema;
use std::collections::HashSet;

pub struct CreateTableExecutor;

impl StatementExecutor for CreateTableExecutor {
    fn name(&self) -> &'static str {
        "CREATE_TABLE"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::CreateTable(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::CreateTable(create) = stmt else {
            unreachable!();
        };

        self.execute_create_table(create, ctx)
    }
}

impl CreateTableExecutor {
    fn execute_create_table(&self, create: &CreateTableStmt, ctx: &ExecutionContext<'_>) -> Result<QueryResult> {
        let mut seen = HashSet::new();
        for column in &create.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(DbError::ExecutionError(format!(
                    "Column '{}' specified more than once in '{}'",
                    column.name, create.table_name
                )));
            }
        }

        // Referenced tables must exist first; a table may reference itself.
        for column in &create.columns {
            if let Some(fk) = &column.references {
                if fk.table == create.table_name {
                    if !seen.contains(fk.column.as_str()) {
                        return Err(DbError::ColumnNotFound(fk.column.clone(), fk.table.clone()));
                    }
                    continue;
                }
                let parent = ctx.storage.get_schema(&fk.table)?;
                parent.column_index(&fk.column)?;
            }
        }

        let schema = TableSchema::new(create.table_name.clone(), create.columns.clone());
        let created = ctx.storage.create_table(schema, create.if_not_exists)?;

        Ok(QueryResult::affected(u64::from(created)))
    }
}
