use super::query::{RowScope, candidate_rows};
use super::{ExecutionContext, StatementExecutor};
use crate::core::{DbError, Result, Row};
use crate::query::{DeleteStmt, Statement};
use crate::result::QueryResult;

pub struct DeleteExecutor;

impl StatementExecutor for DeleteExecutor {
    fn name(&self) -> &'static str {
        "DELETE"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::Delete(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::Delete(delete) = stmt else {
            unreachable!();
        };

        self.execute_delete(delete, ctx)
    }
}

impl DeleteExecutor {
    fn execute_delete(&self, delete: &DeleteStmt, ctx: &ExecutionContext<'_>) -> Result<QueryResult> {
        let handle = ctx.storage.get_table(&delete.table_name)?;
        let schema = ctx.storage.get_schema(&delete.table_name)?;
        let scope = RowScope::new(&schema);

        let selected: Vec<(usize, Row)> = {
            let table = handle.read()?;
            let mut rows = Vec::new();
            for (id, row) in candidate_rows(&table, &scope, delete.selection.as_ref(), ctx.snapshot)? {
                if scope.matches(delete.selection.as_ref(), &row)? {
                    rows.push((id, row));
                }
            }
            rows
        };

        if selected.is_empty() {
            return Ok(QueryResult::affected(0));
        }

        // Referencing rows block the delete (RESTRICT).
        for (child_table, child_column, parent_column) in ctx.storage.referencing_tables(&delete.table_name)? {
            let parent_idx = schema.column_index(&parent_column)?;
            let child = ctx.storage.get_table(&child_table)?;
            let child = child.read()?;
            for (_, row) in &selected {
                let key = &row[parent_idx];
                if key.is_null() {
                    continue;
                }
                if child.has_live_value(&child_column, key, ctx.snapshot)? {
                    return Err(DbError::ConstraintViolation(format!(
                        "update or delete on table '{}' violates foreign key '{}' on table '{}': key {} is still referenced",
                        delete.table_name, child_column, child_table, key
                    )));
                }
            }
        }

        let mut table = handle.write()?;
        let mut undo = Vec::new();
        for (id, _) in selected {
            match table.delete(id, ctx.snapshot) {
                Ok(Some(op)) => undo.push(op),
                Ok(None) => {}
                Err(err) => {
                    table.undo(undo);
                    return Err(err);
                }
            }
        }

        Ok(QueryResult::affected(undo.len() as u64))
    }
}
