//! Entity-level writes shared by `Database` and `Transaction`.

use super::Executor;
use crate::core::{Result, Value};
use crate::mapper::{Entity, Record, RowMapper, WriteMode, row_mapper::timestamp_value};
use crate::query::{Condition, DeleteStmt, InsertStmt, Statement, UpdateStmt, col};
use crate::relation::write::{absorb, key_condition};
use crate::relation::{NodeMode, Omit, execute_plan, order_for_write};
use crate::result::WriteResult;
use crate::schema::EntityDescriptor;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

/// Writes `record` and its attached relations; returns the record with
/// generated values filled in.
pub(crate) async fn write_graph(
    executor: &dyn Executor,
    descriptor: Arc<EntityDescriptor>,
    record: &Record,
    mode: NodeMode,
    omit: &Omit,
) -> Result<(WriteResult, Record)> {
    let mut plan = order_for_write(executor.registry(), descriptor, record, mode, omit)?;
    let written = execute_plan(executor, &mut plan).await?;
    debug!(
        entity = plan.root().descriptor.name(),
        rows_affected = written.rows_affected,
        steps = plan.steps.len(),
        "object graph written"
    );
    Ok((written, plan.assemble()))
}

pub(crate) async fn write_entity<T: Entity>(
    executor: &dyn Executor,
    entity: &mut T,
    mode: NodeMode,
    omit: &Omit,
) -> Result<WriteResult> {
    let descriptor = executor.registry().describe::<T>()?;
    let (written, record) = write_graph(executor, descriptor, &entity.to_record(), mode, omit).await?;
    *entity = T::from_record(record)?;
    Ok(written)
}

/// Inserts all `entities` with one statement when none of them carries a
/// relation to write; otherwise writes them one graph at a time.
pub(crate) async fn create_batch<T: Entity>(
    executor: &dyn Executor,
    entities: &mut [T],
    omit: &Omit,
) -> Result<WriteResult> {
    if entities.is_empty() {
        return Ok(WriteResult::default());
    }
    let descriptor = executor.registry().describe::<T>()?;
    let mut records: Vec<Record> = entities.iter().map(Entity::to_record).collect();

    let flat = records
        .iter()
        .all(|record| record.relations().keys().all(|name| omit.skips(name)));
    if flat {
        let mut columns: Option<Vec<String>> = None;
        let mut rows = Vec::with_capacity(records.len());
        let mut uniform = true;

        for record in &records {
            let (names, row): (Vec<String>, Vec<Value>) =
                RowMapper::to_row(record, &descriptor, WriteMode::Insert)?.into_iter().unzip();
            if let Some(existing) = &columns {
                uniform &= *existing == names;
            } else {
                columns = Some(names);
            }
            rows.push(row);
        }

        if uniform && let Some(columns) = columns {
            let stmt = Statement::Insert(InsertStmt {
                table_name: descriptor.table().to_string(),
                columns,
                rows,
            });
            let result = executor.execute(&stmt).await?;
            for (index, (entity, record)) in entities.iter_mut().zip(records.iter_mut()).enumerate() {
                absorb(&descriptor, record, &result, index)?;
                *entity = T::from_record(record.clone())?;
            }
            return Ok(WriteResult::new(result.rows_affected));
        }
    }

    let mut written = WriteResult::default();
    for entity in entities.iter_mut() {
        written = written.merge(write_entity(executor, entity, NodeMode::Insert, omit).await?);
    }
    Ok(written)
}

pub(crate) async fn delete_entity<T: Entity>(executor: &dyn Executor, entity: &T) -> Result<WriteResult> {
    let descriptor = executor.registry().describe::<T>()?;
    let selection = key_condition(&descriptor, &entity.to_record())?;
    delete_where(executor, &descriptor, Some(selection), false).await
}

/// DELETE, or a soft delete when the entity has a soft-delete column and
/// the call is scoped.
pub(crate) async fn delete_where(
    executor: &dyn Executor,
    descriptor: &EntityDescriptor,
    selection: Option<Condition>,
    unscoped: bool,
) -> Result<WriteResult> {
    let stmt = match descriptor.soft_delete_column() {
        Some(soft_delete) if !unscoped => {
            let live = col(soft_delete.column.clone()).is_null();
            Statement::Update(UpdateStmt {
                table_name: descriptor.table().to_string(),
                assignments: vec![(soft_delete.column.clone(), timestamp_value(soft_delete, Utc::now())?)],
                selection: Some(match selection {
                    Some(selection) => selection.and(live),
                    None => live,
                }),
            })
        }
        _ => Statement::Delete(DeleteStmt {
            table_name: descriptor.table().to_string(),
            selection,
        }),
    };

    let result = executor.execute(&stmt).await?;
    Ok(WriteResult::new(result.rows_affected))
}
