//! Eager loading of relationships.
//!
//! Each relationship path costs one statement regardless of how many owner
//! records were loaded: keys are gathered from the owners and fetched with a
//! single `IN` query (a single join query for many-to-many).

use crate::core::{DbError, Result, Value};
use crate::mapper::{Record, RelationValue, RowMapper};
use crate::query::{Condition, JoinClause, SelectStmt, Statement, col};
use crate::result::QueryResult;
use crate::schema::{EntityDescriptor, RelationKind, RelationshipDescriptor, key_of};
use crate::session::Executor;
use async_recursion::async_recursion;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// A relationship path to load, optionally restricted by a condition on
/// the rows at the end of the path.
#[derive(Debug, Clone)]
pub struct Preload {
    pub path: String,
    pub condition: Option<Condition>,
}

impl Preload {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            condition: None,
        }
    }

    pub fn with_condition(path: impl Into<String>, condition: Condition) -> Self {
        Self {
            path: path.into(),
            condition: Some(condition),
        }
    }
}

/// First path segment with everything requested below it.
struct PathGroup {
    relationship: String,
    condition: Option<Condition>,
    nested: Vec<Preload>,
}

fn group_paths(preloads: &[Preload]) -> Vec<PathGroup> {
    let mut groups: Vec<PathGroup> = Vec::new();

    for preload in preloads {
        let (head, rest) = match preload.path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (preload.path.as_str(), None),
        };

        let index = match groups.iter().position(|g| g.relationship == head) {
            Some(index) => index,
            None => {
                groups.push(PathGroup {
                    relationship: head.to_string(),
                    condition: None,
                    nested: Vec::new(),
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[index];

        match rest {
            Some(rest) => group.nested.push(Preload {
                path: rest.to_string(),
                condition: preload.condition.clone(),
            }),
            None => {
                if let Some(condition) = &preload.condition {
                    group.condition = Some(match group.condition.take() {
                        Some(existing) => existing.and(condition.clone()),
                        None => condition.clone(),
                    });
                }
            }
        }
    }

    groups
}

/// Loads every path in `preloads` into `owners`.
///
/// Paths sharing a prefix (`"Todos"`, `"Todos.User"`) load the prefix once.
/// Owners without related rows get an empty to-many relation; a to-one
/// relation is left unset when its row does not exist.
#[async_recursion]
pub async fn expand_for_read(
    executor: &dyn Executor,
    descriptor: &EntityDescriptor,
    owners: &mut [Record],
    preloads: &[Preload],
) -> Result<()> {
    if owners.is_empty() {
        return Ok(());
    }

    for group in group_paths(preloads) {
        let relationship = descriptor.relationship(&group.relationship).ok_or_else(|| {
            DbError::InvalidDescriptor(
                descriptor.name().to_string(),
                format!("no relationship named '{}' to preload", group.relationship),
            )
        })?;
        let target = executor.registry().describe_entity(&relationship.target)?;

        match relationship.kind {
            RelationKind::HasMany => {
                load_has_many(executor, descriptor, relationship, &target, owners, &group).await?
            }
            RelationKind::BelongsTo => {
                load_belongs_to(executor, descriptor, relationship, &target, owners, &group).await?
            }
            RelationKind::ManyToMany => {
                load_many_to_many(executor, descriptor, relationship, &target, owners, &group).await?
            }
        }
    }

    Ok(())
}

async fn load_has_many(
    executor: &dyn Executor,
    owner: &EntityDescriptor,
    relationship: &RelationshipDescriptor,
    target: &EntityDescriptor,
    owners: &mut [Record],
    group: &PathGroup,
) -> Result<()> {
    let owner_field = field_of(owner, &relationship.references)?;
    let fk_field = field_of(target, &relationship.foreign_key)?;
    let keys = distinct_values(owners, &owner_field);

    let mut children = if keys.is_empty() {
        Vec::new()
    } else {
        let selection = col(relationship.foreign_key.clone()).in_list(keys);
        let result = select_related(executor, target, selection, group.condition.as_ref(), None).await?;
        RowMapper::from_result(&result, target)?
    };
    expand_for_read(executor, target, &mut children, &group.nested).await?;

    let mut by_owner: HashMap<Value, Vec<Record>> = HashMap::new();
    for child in children {
        if let Some(key) = child.get(&fk_field).cloned() {
            by_owner.entry(key).or_default().push(child);
        }
    }

    for record in owners.iter_mut() {
        let related = record
            .get(&owner_field)
            .and_then(|key| by_owner.get(key))
            .cloned()
            .unwrap_or_default();
        record.set_relation(relationship.name.clone(), RelationValue::Many(related));
    }
    Ok(())
}

async fn load_belongs_to(
    executor: &dyn Executor,
    owner: &EntityDescriptor,
    relationship: &RelationshipDescriptor,
    target: &EntityDescriptor,
    owners: &mut [Record],
    group: &PathGroup,
) -> Result<()> {
    let fk_field = field_of(owner, &relationship.foreign_key)?;
    let key_field = field_of(target, &relationship.references)?;
    let keys = distinct_values(owners, &fk_field);
    if keys.is_empty() {
        return Ok(());
    }

    let selection = col(relationship.references.clone()).in_list(keys);
    let result = select_related(executor, target, selection, group.condition.as_ref(), None).await?;
    let mut parents = RowMapper::from_result(&result, target)?;
    expand_for_read(executor, target, &mut parents, &group.nested).await?;

    let by_key: HashMap<Value, Record> = parents
        .into_iter()
        .filter_map(|parent| parent.get(&key_field).cloned().map(|key| (key, parent)))
        .collect();

    for record in owners.iter_mut() {
        if let Some(parent) = record.get(&fk_field).and_then(|key| by_key.get(key)) {
            let parent = parent.clone();
            record.set_relation(relationship.name.clone(), RelationValue::One(Box::new(parent)));
        }
    }
    Ok(())
}

async fn load_many_to_many(
    executor: &dyn Executor,
    owner: &EntityDescriptor,
    relationship: &RelationshipDescriptor,
    target: &EntityDescriptor,
    owners: &mut [Record],
    group: &PathGroup,
) -> Result<()> {
    let join = relationship.join.as_ref().ok_or_else(|| {
        DbError::InvalidDescriptor(
            owner.name().to_string(),
            format!("relationship '{}' has no join table", relationship.name),
        )
    })?;
    let owner_field = field_of(owner, &relationship.references)?;
    let keys = distinct_values(owners, &owner_field);

    let mut linked: HashMap<Value, Vec<usize>> = HashMap::new();
    let mut targets: Vec<Record> = Vec::new();

    if !keys.is_empty() {
        let carried = format!("{}.{}", join.table, join.owner_column);
        let selection = col(carried.clone()).in_list(keys);
        let clause = JoinClause {
            table_name: join.table.clone(),
            left_column: join.target_key.clone(),
            right_column: join.target_column.clone(),
            carry: vec![join.owner_column.clone()],
        };
        let result = select_related(executor, target, selection, group.condition.as_ref(), Some(clause)).await?;

        // A target liked by several owners appears once per owner.
        let mut seen: HashMap<Vec<Value>, usize> = HashMap::new();
        for row in &result.rows {
            let record = RowMapper::from_row(&result.columns, row, target)?;
            let owner_key = result.value(row, &carried)?.clone();
            let index = match key_of(target, |field| record.get(field).cloned()) {
                Some(key) => *seen.entry(key).or_insert_with(|| {
                    targets.push(record);
                    targets.len() - 1
                }),
                None => {
                    targets.push(record);
                    targets.len() - 1
                }
            };
            linked.entry(owner_key).or_default().push(index);
        }
    }

    expand_for_read(executor, target, &mut targets, &group.nested).await?;

    for record in owners.iter_mut() {
        let related: Vec<Record> = record
            .get(&owner_field)
            .and_then(|key| linked.get(key))
            .map(|indices| indices.iter().map(|&i| targets[i].clone()).collect())
            .unwrap_or_default();
        record.set_relation(relationship.name.clone(), RelationValue::Many(related));
    }
    Ok(())
}

/// One SELECT over `target`, hiding soft-deleted rows.
async fn select_related(
    executor: &dyn Executor,
    target: &EntityDescriptor,
    selection: Condition,
    extra: Option<&Condition>,
    join: Option<JoinClause>,
) -> Result<QueryResult> {
    let mut selection = selection;
    if let Some(soft_delete) = target.soft_delete_column() {
        selection = selection.and(col(format!("{}.{}", target.table(), soft_delete.column)).is_null());
    }
    if let Some(extra) = extra {
        selection = selection.and(extra.clone());
    }

    let stmt = Statement::Select(SelectStmt {
        join,
        selection: Some(selection),
        ..SelectStmt::from_table(target.table())
    });
    let result = executor.execute(&stmt).await?;
    debug!(entity = target.name(), rows = result.row_count(), "preloaded");
    Ok(result)
}

fn field_of(descriptor: &EntityDescriptor, column: &str) -> Result<String> {
    descriptor
        .column(column)
        .map(|c| c.field.clone())
        .ok_or_else(|| DbError::ColumnNotFound(column.to_string(), descriptor.table().to_string()))
}

/// Non-null values of `field`, first occurrence order.
fn distinct_values(records: &[Record], field: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(|record| record.get(field))
        .filter(|value| !value.is_null())
        .filter(|value| seen.insert((*value).clone()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_paths_shares_prefix() {
        let groups = group_paths(&[
            Preload::new("Todos.User"),
            Preload::with_condition("Todos", col("title").like("%1%")),
            Preload::new("Wallet"),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].relationship, "Todos");
        assert!(groups[0].condition.is_some());
        assert_eq!(groups[0].nested.len(), 1);
        assert_eq!(groups[0].nested[0].path, "User");
        assert_eq!(groups[1].relationship, "Wallet");
    }

    #[test]
    fn test_distinct_values_skip_nulls() {
        let records = vec![
            Record::new().with("user_id", "1"),
            Record::new().with("user_id", Value::Null),
            Record::new().with("user_id", "1"),
            Record::new().with("user_id", "2"),
        ];
        assert_eq!(
            distinct_values(&records, "user_id"),
            vec![Value::from("1"), Value::from("2")]
        );
    }
}
