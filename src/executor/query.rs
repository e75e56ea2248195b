use super::{ExecutionContext, StatementExecutor};
use crate::core::{DbError, Result, Row, Value};
use crate::query::{CompareOp, Condition, JoinClause, SelectStmt, Statement};
use crate::result::QueryResult;
use crate::storage::{Snapshot, Table, TableSchema};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

// ============================================================================
// Column resolution
// ============================================================================

/// Resolves column names against a row of `main`, optionally followed by the
/// columns of a joined table. Names may be bare (`user_id`) or qualified
/// (`user_like_product.user_id`); bare names prefer the main table.
pub(super) struct RowScope<'s> {
    main: &'s TableSchema,
    joined: Option<&'s TableSchema>,
}

impl<'s> RowScope<'s> {
    pub(super) fn new(main: &'s TableSchema) -> Self {
        Self { main, joined: None }
    }

    pub(super) fn with_join(main: &'s TableSchema, joined: &'s TableSchema) -> Self {
        Self {
            main,
            joined: Some(joined),
        }
    }

    pub(super) fn resolve(&self, name: &str) -> Result<usize> {
        let offset = self.main.schema().column_count();

        if let Some((table, column)) = name.split_once('.') {
            if table == self.main.name() {
                return self.main.column_index(column);
            }
            if let Some(joined) = self.joined
                && table == joined.name()
            {
                return Ok(offset + joined.column_index(column)?);
            }
            return Err(DbError::ColumnNotFound(name.to_string(), self.main.name().to_string()));
        }

        match (self.main.schema().find_column_index(name), self.joined) {
            (Some(idx), _) => Ok(idx),
            (None, Some(joined)) => Ok(offset + joined.column_index(name)?),
            (None, None) => Err(DbError::ColumnNotFound(name.to_string(), self.main.name().to_string())),
        }
    }

    /// Bare column name of `name` when it belongs to the main table.
    fn main_column<'n>(&self, name: &'n str) -> Option<&'n str> {
        match name.split_once('.') {
            Some((table, column)) if table == self.main.name() => Some(column),
            Some(_) => None,
            None => self.main.schema().find_column_index(name).map(|_| name),
        }
    }

    pub(super) fn matches(&self, condition: Option<&Condition>, row: &Row) -> Result<bool> {
        let Some(condition) = condition else {
            return Ok(true);
        };
        condition.evaluate(&|name: &str| lookup(self, row, name))
    }
}

fn lookup<'r>(scope: &RowScope<'_>, row: &'r Row, name: &str) -> Result<&'r Value> {
    let idx = scope.resolve(name)?;
    row.get(idx)
        .ok_or_else(|| DbError::ExecutionError(format!("Column '{}' is outside the row", name)))
}

// ============================================================================
// Candidate rows
// ============================================================================

/// Visible rows of `table` that may satisfy `selection`, in insertion order.
/// Equality and IN predicates on indexed columns go through the index; the
/// caller still applies the full predicate.
pub(super) fn candidate_rows(
    table: &Table,
    scope: &RowScope<'_>,
    selection: Option<&Condition>,
    snapshot: &Snapshot,
) -> Result<Vec<(usize, Row)>> {
    if let Some(condition) = selection
        && let Some((column, values)) = index_probe(table, scope, condition)
    {
        let mut found: BTreeMap<usize, Row> = BTreeMap::new();
        for value in values {
            if let Some(rows) = table.lookup(column, value, snapshot)? {
                found.extend(rows);
            }
        }
        return Ok(found.into_iter().collect());
    }

    Ok(table.scan_with_ids(snapshot))
}

fn index_probe<'c>(
    table: &Table,
    scope: &RowScope<'_>,
    condition: &'c Condition,
) -> Option<(&'c str, Vec<&'c Value>)> {
    match condition {
        Condition::Compare {
            column,
            op: CompareOp::Eq,
            value,
        } => scope
            .main_column(column)
            .filter(|name| table.is_indexed(name))
            .map(|name| (name, vec![value])),
        Condition::InList {
            column,
            values,
            negated: false,
        } => scope
            .main_column(column)
            .filter(|name| table.is_indexed(name))
            .map(|name| (name, values.iter().collect())),
        Condition::And(parts) => parts.iter().find_map(|part| index_probe(table, scope, part)),
        _ => None,
    }
}

// ============================================================================
// SELECT
// ============================================================================

pub struct SelectExecutor;

impl StatementExecutor for SelectExecutor {
    fn name(&self) -> &'static str {
        "SELECT"
    }

    fn can_handle(&self, stmt: &Statement) -> bool {
        matches!(stmt, Statement::Select(_))
    }

    fn execute(&self, stmt: &Statement, ctx: &ExecutionContext<'_>) -> Result<QueryResult> {
        let Statement::Select(select) = stmt else {
            unreachable!();
        };

        self.execute_select(select, ctx)
    }
}

impl SelectExecutor {
    fn execute_select(&self, select: &SelectStmt, ctx: &ExecutionContext<'_>) -> Result<QueryResult> {
        let handle = ctx.storage.get_table(&select.table_name)?;
        let table = handle.read()?;
        let main_schema = table.schema().clone();

        let (rows, joined_schema) = match &select.join {
            None => {
                let scope = RowScope::new(&main_schema);
                let mut rows = Vec::new();
                for (_, row) in candidate_rows(&table, &scope, select.selection.as_ref(), ctx.snapshot)? {
                    if scope.matches(select.selection.as_ref(), &row)? {
                        rows.push(row);
                    }
                }
                (rows, None)
            }
            Some(join) => {
                let main_rows = table.scan(ctx.snapshot);
                drop(table);
                let (rows, joined) = self.hash_join(&main_schema, main_rows, join, select, ctx)?;
                (rows, Some(joined))
            }
        };

        let scope = match &joined_schema {
            Some(joined) => RowScope::with_join(&main_schema, joined),
            None => RowScope::new(&main_schema),
        };

        if select.count_only {
            return Ok(QueryResult::new(
                vec!["count".into()],
                vec![vec![Value::Integer(rows.len() as i64)]],
            ));
        }

        let mut rows = rows;
        self.sort_rows(&mut rows, select, &scope)?;

        let offset = select.offset.unwrap_or(0);
        let limit = select.limit.unwrap_or(usize::MAX);
        let rows: Vec<Row> = rows.into_iter().skip(offset).take(limit).collect();

        self.project(rows, select, &main_schema, &scope)
    }

    /// `main JOIN joined ON joined.right = main.left`, keeping main-table
    /// order. Each output row is the main row followed by the joined row.
    fn hash_join(
        &self,
        main_schema: &TableSchema,
        main_rows: Vec<Row>,
        join: &JoinClause,
        select: &SelectStmt,
        ctx: &ExecutionContext<'_>,
    ) -> Result<(Vec<Row>, TableSchema)> {
        let handle = ctx.storage.get_table(&join.table_name)?;
        let joined = handle.read()?;
        let joined_schema = joined.schema().clone();

        let left = main_schema.column_index(&join.left_column)?;
        let right = joined_schema.column_index(&join.right_column)?;

        let mut by_key: HashMap<Value, Vec<Row>> = HashMap::new();
        for row in joined.scan(ctx.snapshot) {
            by_key.entry(row[right].clone()).or_default().push(row);
        }
        drop(joined);

        let scope = RowScope::with_join(main_schema, &joined_schema);
        let mut out = Vec::new();
        for main_row in main_rows {
            let Some(partners) = by_key.get(&main_row[left]) else {
                continue;
            };
            for partner in partners {
                let mut combined = main_row.clone();
                combined.extend(partner.iter().cloned());
                if scope.matches(select.selection.as_ref(), &combined)? {
                    out.push(combined);
                }
            }
        }

        Ok((out, joined_schema))
    }

    fn sort_rows(&self, rows: &mut [Row], select: &SelectStmt, scope: &RowScope<'_>) -> Result<()> {
        if select.order_by.is_empty() {
            return Ok(());
        }

        let keys: Vec<(usize, bool)> = select
            .order_by
            .iter()
            .map(|order| Ok((scope.resolve(&order.column)?, order.descending)))
            .collect::<Result<_>>()?;

        let mut failure = None;
        rows.sort_by(|a, b| {
            for (idx, descending) in &keys {
                match a[*idx].compare(&b[*idx]) {
                    Ok(Ordering::Equal) => continue,
                    Ok(ordering) if *descending => return ordering.reverse(),
                    Ok(ordering) => return ordering,
                    Err(err) => {
                        failure.get_or_insert(err);
                        return Ordering::Equal;
                    }
                }
            }
            Ordering::Equal
        });

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn project(
        &self,
        rows: Vec<Row>,
        select: &SelectStmt,
        main_schema: &TableSchema,
        scope: &RowScope<'_>,
    ) -> Result<QueryResult> {
        let mut columns: Vec<String> = if select.projection.is_empty() {
            main_schema.column_names()
        } else {
            select.projection.clone()
        };
        let mut indices: Vec<usize> = if select.projection.is_empty() {
            (0..main_schema.schema().column_count()).collect()
        } else {
            select
                .projection
                .iter()
                .map(|name| scope.resolve(name))
                .collect::<Result<_>>()?
        };

        if let Some(join) = &select.join {
            for carried in &join.carry {
                let qualified = format!("{}.{}", join.table_name, carried);
                indices.push(scope.resolve(&qualified)?);
                columns.push(qualified);
            }
        }

        let rows = rows
            .into_iter()
            .map(|row| indices.iter().map(|idx| row[*idx].clone()).collect())
            .collect();

        Ok(QueryResult::new(columns, rows))
    }
}
