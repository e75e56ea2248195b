use super::{ExecutionContext, StatementExecutor};
use crate::core::{DbError, Result, Row, Value};
use crate::query::{InsertStmt, Statement};
use crate::result::QueryResult;
use crate::storage::TableSchema;

pub struct InsertExecutor;

impl StatementExecutor for InsertExecutor {
    fn name(&self) -> &'static str {
        "INSERT"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::Insert(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::Insert(insert) = stmt else {
            unreachable!();
        };

        self.execute_insert(insert, ctx)
    }
}

impl InsertExecutor {
    fn execute_insert(&self, insert: &InsertStmt, ctx: &ExecutionContext<'_>) -> Result<QueryResult> {
        let handle = ctx.storage.get_table(&insert.table_name)?;
        let schema = ctx.storage.get_schema(&insert.table_name)?;

        let positions: Vec<usize> = insert
            .columns
            .iter()
            .map(|column| schema.column_index(column))
            .collect::<Result<_>>()?;

        let width = schema.schema().column_count();
        let mut full_rows = Vec::with_capacity(insert.rows.len());
        for values in &insert.rows {
            if values.len() != positions.len() {
                return Err(DbError::ExecutionError(format!(
                    "INSERT into '{}' has {} target columns but {} values",
                    insert.table_name,
                    positions.len(),
                    values.len()
                )));
            }
            let mut row = vec![Value::Null; width];
            for (idx, value) in positions.iter().zip(values) {
                row[*idx] = value.clone();
            }
            check_references(ctx, &schema, &row, None)?;
            full_rows.push(row);
        }

        // All rows of the statement land, or none do.
        let mut table = handle.write()?;
        let mut undo = Vec::with_capacity(full_rows.len());
        let mut stored = Vec::with_capacity(full_rows.len());
        for row in full_rows {
            match table.insert(row, ctx.snapshot) {
                Ok((row, op)) => {
                    stored.push(row);
                    undo.push(op);
                }
                Err(err) => {
                    table.undo(undo);
                    return Err(err);
                }
            }
        }

        let affected = stored.len() as u64;
        Ok(QueryResult::new(schema.column_names(), stored).with_affected(affected))
    }
}

/// Every non-NULL foreign key of `row` must point at a row visible to the
/// statement that no other open transaction is deleting. `only` restricts
/// the check to the listed column positions.
pub(super) fn check_references(
    ctx: &ExecutionContext<'_>,
    schema: &TableSchema,
    row: &Row,
    only: Option<&[usize]>,
) -> Result<()> {
    for (idx, column) in schema.schema().columns().iter().enumerate() {
        let Some(fk) = &column.references else {
            continue;
        };
        if only.is_some_and(|positions| !positions.contains(&idx)) {
            continue;
        }
        let value = &row[idx];
        if value.is_null() {
            continue;
        }

        let parent = ctx.storage.get_table(&fk.table)?;
        let exists = parent.read()?.holds_stable_key(&fk.column, value, ctx.snapshot)?;
        if !exists {
            return Err(DbError::ConstraintViolation(format!(
                "insert or update on table '{}' violates foreign key '{}': {} references non-existent key in {}({})",
                schema.name(),
                column.name,
                value,
                fk.table,
                fk.column
            )));
        }
    }
    Ok(())
}
