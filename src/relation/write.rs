//! Executes a [`WritePlan`] statement by statement on one executor.

use super::plan::{LinkStep, NodeMode, WritePlan, WriteStep};
use crate::core::{DbError, Result, Value};
use crate::mapper::{Record, RowMapper, WriteMode};
use crate::query::{Condition, InsertStmt, SelectStmt, Statement, UpdateStmt, col};
use crate::result::{QueryResult, WriteResult};
use crate::schema::EntityDescriptor;
use crate::session::Executor;
use tracing::trace;

/// Runs every step of `plan`, binding foreign keys from already written
/// parents. The caller owns the surrounding transaction.
pub async fn execute_plan(executor: &dyn Executor, plan: &mut WritePlan) -> Result<WriteResult> {
    let mut written = WriteResult::default();

    for step in plan.steps.clone() {
        match step {
            WriteStep::Write(node) => {
                bind_foreign_keys(plan, node)?;
                let target = &mut plan.nodes[node];
                let descriptor = std::sync::Arc::clone(&target.descriptor);
                let affected = match target.mode {
                    NodeMode::Insert => insert_record(executor, &descriptor, &mut target.record).await?,
                    NodeMode::Upsert => upsert_record(executor, &descriptor, &mut target.record).await?,
                };
                written = written.merge(WriteResult::new(affected));
            }
            WriteStep::Bind(binding) => bind_deferred(executor, plan, binding).await?,
            WriteStep::Link(link) => {
                let affected = link_rows(executor, plan, &link).await?;
                written = written.merge(WriteResult::new(affected));
            }
        }
    }

    Ok(written)
}

fn bind_foreign_keys(plan: &mut WritePlan, node: usize) -> Result<()> {
    let bindings: Vec<_> = plan.bindings.iter().filter(|b| b.child == node).cloned().collect();

    for binding in bindings {
        if binding.deferred {
            // Written as NULL; the parent may not exist yet.
            plan.nodes[node].record.set(binding.child_field.clone(), Value::Null);
            continue;
        }
        let value = plan.nodes[binding.parent]
            .record
            .get(&binding.parent_field)
            .cloned()
            .unwrap_or(Value::Null);

        let parent = plan.nodes[binding.parent].descriptor.name().to_string();
        let child = &mut plan.nodes[node];
        if value.is_null() {
            let nullable = child
                .descriptor
                .field(&binding.child_field)
                .is_some_and(|c| c.nullable);
            if !nullable {
                return Err(DbError::ConstraintViolation(format!(
                    "{}.{} cannot be bound: referenced '{}' has no key",
                    child.descriptor.name(),
                    binding.child_field,
                    parent
                )));
            }
        }
        trace!(entity = child.descriptor.name(), field = %binding.child_field, value = %value, "foreign key bound");
        child.record.set(binding.child_field.clone(), value);
    }
    Ok(())
}

/// Points a row written with a NULL foreign key at its now written parent.
async fn bind_deferred(executor: &dyn Executor, plan: &mut WritePlan, index: usize) -> Result<()> {
    let binding = plan.bindings[index].clone();
    let value = plan.nodes[binding.parent]
        .record
        .get(&binding.parent_field)
        .cloned()
        .unwrap_or(Value::Null);

    let child = &mut plan.nodes[binding.child];
    let column = child
        .descriptor
        .field(&binding.child_field)
        .map(|c| c.column.clone())
        .ok_or_else(|| DbError::ColumnNotFound(binding.child_field.clone(), child.descriptor.table().to_string()))?;
    let stmt = Statement::Update(UpdateStmt {
        table_name: child.descriptor.table().to_string(),
        assignments: vec![(column, value.clone())],
        selection: Some(key_condition(&child.descriptor, &child.record)?),
    });
    executor.execute(&stmt).await?;

    trace!(entity = child.descriptor.name(), field = %binding.child_field, value = %value, "deferred foreign key bound");
    child.record.set(binding.child_field, value);
    Ok(())
}

/// WHERE clause selecting `record` by primary key.
pub(crate) fn key_condition(descriptor: &EntityDescriptor, record: &Record) -> Result<Condition> {
    let mut parts = Vec::new();
    for column in descriptor.primary_key() {
        let value = record.get(&column.field).cloned().unwrap_or(Value::Null);
        if value.is_null() || (column.is_auto_increment() && value.is_zero()) {
            return Err(DbError::ConstraintViolation(format!(
                "{} has no value for primary key '{}'",
                descriptor.name(),
                column.field
            )));
        }
        parts.push(col(column.column.clone()).eq(value));
    }
    Condition::all(parts).ok_or_else(|| {
        DbError::InvalidDescriptor(descriptor.name().to_string(), "no primary key column".into())
    })
}

/// Copies stored values (generated keys, stamped times) back into `record`.
pub(crate) fn absorb(descriptor: &EntityDescriptor, record: &mut Record, result: &QueryResult, row: usize) -> Result<()> {
    if let Some(stored) = result.rows.get(row) {
        let stored = RowMapper::from_row(&result.columns, stored, descriptor)?;
        for (field, value) in stored.fields() {
            record.set(field.clone(), value.clone());
        }
    }
    Ok(())
}

pub(crate) async fn insert_record(
    executor: &dyn Executor,
    descriptor: &EntityDescriptor,
    record: &mut Record,
) -> Result<u64> {
    let values = RowMapper::to_row(record, descriptor, WriteMode::Insert)?;
    let (columns, row): (Vec<String>, Vec<Value>) = values.into_iter().unzip();
    let stmt = Statement::Insert(InsertStmt {
        table_name: descriptor.table().to_string(),
        columns,
        rows: vec![row],
    });

    let result = executor.execute(&stmt).await?;
    absorb(descriptor, record, &result, 0)?;
    Ok(result.rows_affected)
}

/// UPDATE by key; 0 when no visible row has the key.
pub(crate) async fn update_record(
    executor: &dyn Executor,
    descriptor: &EntityDescriptor,
    record: &mut Record,
) -> Result<u64> {
    let selection = key_condition(descriptor, record)?;
    let values = RowMapper::to_row(record, descriptor, WriteMode::Update)?;

    if values.is_empty() {
        let stmt = Statement::Select(SelectStmt {
            selection: Some(selection),
            count_only: true,
            ..SelectStmt::from_table(descriptor.table())
        });
        return executor.execute(&stmt).await?.scalar_count();
    }

    let stmt = Statement::Update(UpdateStmt {
        table_name: descriptor.table().to_string(),
        assignments: values.clone(),
        selection: Some(selection),
    });
    let affected = executor.execute(&stmt).await?.rows_affected;

    if affected > 0 {
        for (column, value) in values {
            if let Some(column) = descriptor.column(&column) {
                record.set(column.field.clone(), value);
            }
        }
    }
    Ok(affected)
}

pub(crate) async fn upsert_record(
    executor: &dyn Executor,
    descriptor: &EntityDescriptor,
    record: &mut Record,
) -> Result<u64> {
    let has_key = crate::schema::key_of(descriptor, |field| record.get(field).cloned()).is_some();
    if has_key {
        let updated = update_record(executor, descriptor, record).await?;
        if updated > 0 {
            return Ok(updated);
        }
    }
    insert_record(executor, descriptor, record).await
}

/// Inserts the join row for `link` unless it already exists.
async fn link_rows(executor: &dyn Executor, plan: &WritePlan, link: &LinkStep) -> Result<u64> {
    let key = |node: usize, field: &str| -> Result<Value> {
        let owner = &plan.nodes[node];
        match owner.record.get(field) {
            Some(value) if !value.is_null() => Ok(value.clone()),
            _ => Err(DbError::ConstraintViolation(format!(
                "join row of '{}' needs {}.{}",
                link.relationship,
                owner.descriptor.name(),
                field
            ))),
        }
    };
    let owner_key = key(link.owner, &link.owner_field)?;
    let target_key = key(link.target, &link.target_field)?;

    let existing = executor
        .execute(&Statement::Select(SelectStmt {
            selection: Some(
                col(link.join.owner_column.clone())
                    .eq(owner_key.clone())
                    .and(col(link.join.target_column.clone()).eq(target_key.clone())),
            ),
            count_only: true,
            ..SelectStmt::from_table(link.join.table.clone())
        }))
        .await?
        .scalar_count()?;
    if existing > 0 {
        return Ok(0);
    }

    let stmt = Statement::Insert(InsertStmt {
        table_name: link.join.table.clone(),
        columns: vec![link.join.owner_column.clone(), link.join.target_column.clone()],
        rows: vec![vec![owner_key, target_key]],
    });
    Ok(executor.execute(&stmt).await?.rows_affected)
}
