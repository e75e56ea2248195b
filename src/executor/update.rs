use super::dml::check_references;
use super::query::{RowScope, candidate_rows};
use super::{ExecutionContext, StatementExecutor};
use crate::core::{Result, Row};
use crate::query::{Statement, UpdateStmt};
use crate::result::QueryResult;

pub struct UpdateExecutor;

impl StatementExecutor for UpdateExecutor {
    fn name(&self) -> &'static str {
        "UPDATE"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::Update(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::Update(update) = stmt else {
            unreachable!();
        };

        self.execute_update(update, ctx)
    }
}

impl UpdateExecutor {
    fn execute_update(&self, update: &UpdateStmt, ctx: &ExecutionContext<'_>) -> Result<QueryResult> {
        let handle = ctx.storage.get_table(&update.table_name)?;
        let schema = ctx.storage.get_schema(&update.table_name)?;
        let scope = RowScope::new(&schema);

        let assignments: Vec<(usize, _)> = update
            .assignments
            .iter()
            .map(|(column, value)| Ok((schema.column_index(column)?, value.clone())))
            .collect::<Result<_>>()?;
        let assigned: Vec<usize> = assignments.iter().map(|(idx, _)| *idx).collect();

        let apply = |row: &Row| -> Row {
            let mut next = row.clone();
            for (idx, value) in &assignments {
                next[*idx] = value.clone();
            }
            next
        };

        let selected: Vec<usize> = {
            let table = handle.read()?;
            let mut ids = Vec::new();
            for (id, row) in candidate_rows(&table, &scope, update.selection.as_ref(), ctx.snapshot)? {
                if scope.matches(update.selection.as_ref(), &row)? {
                    ids.push(id);
                }
            }
            ids
        };

        // Assigned values are constants: one reference check covers every row.
        if let Some(first) = selected.first() {
            let probe = handle.read()?.visible_row(*first, ctx.snapshot);
            if let Some(row) = probe {
                check_references(ctx, &schema, &apply(&row), Some(assigned.as_slice()))?;
            }
        }

        let mut table = handle.write()?;
        let mut undo = Vec::new();
        for id in selected {
            // Re-read under the write lock; a concurrent commit may have
            // replaced the row since it was selected.
            let Some(current) = table.visible_row(id, ctx.snapshot) else {
                continue;
            };
            let still_matches = match scope.matches(update.selection.as_ref(), &current) {
                Ok(matched) => matched,
                Err(err) => {
                    table.undo(undo);
                    return Err(err);
                }
            };
            if !still_matches {
                continue;
            }

            match table.update(id, apply(&current), ctx.snapshot) {
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
