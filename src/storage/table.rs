use crate::core::{Column, DbError, Result, Row, Schema, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Visibility window of one statement.
///
/// A fresh snapshot is taken for every statement, which gives read
/// committed semantics: committed work of other transactions becomes
/// visible between statements, uncommitted work never does.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub tx_id: u64,
    pub active: Arc<HashSet<u64>>,
    pub aborted: Arc<HashSet<u64>>,
    pub max_tx_id: u64,
}

impl Snapshot {
    fn is_committed(&self, tx_id: u64) -> bool {
        tx_id < self.max_tx_id && !self.active.contains(&tx_id) && !self.aborted.contains(&tx_id)
    }

    fn is_aborted(&self, tx_id: u64) -> bool {
        self.aborted.contains(&tx_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MvccRow {
    pub row: Row,
    pub xmin: u64,
    pub xmax: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    name: String,
    schema: Schema,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            schema: Schema::new(columns),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn column_index(&self, column: &str) -> Result<usize> {
        self.schema
            .find_column_index(column)
            .ok_or_else(|| DbError::ColumnNotFound(column.to_string(), self.name.clone()))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.schema.columns().iter().map(|c| c.name.clone()).collect()
    }
}

/// Inverse of one row change, kept while a statement is being applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoOp {
    Inserted { id: usize },
    Replaced { id: usize, position: usize, previous_xmax: Option<u64> },
    Deleted { id: usize, position: usize, previous_xmax: Option<u64> },
}

#[derive(Debug, Clone)]
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<usize, Vec<MvccRow>>,
    next_row_id: usize,
    next_sequence: i64,
    indexes: HashMap<String, BTreeMap<Value, Vec<usize>>>,
}

impl Table {
    /// Creates the table and indexes its single-column keys, unique columns
    /// and foreign keys.
    pub fn new(schema: TableSchema) -> Self {
        let columns = schema.schema().columns();
        let single_pk = schema.schema().primary_key_indices().len() == 1;
        let indexes = columns
            .iter()
            .filter(|col| (col.primary_key && single_pk) || col.unique || col.references.is_some())
            .map(|col| (col.name.clone(), BTreeMap::new()))
            .collect();

        Self {
            schema,
            rows: BTreeMap::new(),
            next_row_id: 0,
            next_sequence: 1,
            indexes,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Inserts a full row, filling NULL auto-increment columns from the
    /// table sequence. Returns the stored row.
    pub fn insert(&mut self, mut row: Row, snapshot: &Snapshot) -> Result<(Row, UndoOp)> {
        self.validate_width(&row)?;

        for (idx, column) in self.schema.schema().columns().iter().enumerate() {
            if !column.auto_increment {
                continue;
            }
            match &row[idx] {
                Value::Null => {
                    row[idx] = Value::Integer(self.next_sequence);
                    self.next_sequence += 1;
                }
                Value::Integer(explicit) if *explicit >= self.next_sequence => {
                    self.next_sequence = explicit + 1;
                }
                _ => {}
            }
        }

        self.validate_values(&row)?;
        self.check_uniqueness(&row, None, snapshot)?;

        let id = self.next_row_id;
        self.next_row_id += 1;

        self.rows.insert(
            id,
            vec![MvccRow {
                row: row.clone(),
                xmin: snapshot.tx_id,
                xmax: None,
            }],
        );
        self.index_row(id, &row);

        Ok((row, UndoOp::Inserted { id }))
    }

    /// Replaces the version of row `id` visible to `snapshot`. `None` when
    /// the row is not visible.
    pub fn update(&mut self, id: usize, new_row: Row, snapshot: &Snapshot) -> Result<Option<UndoOp>> {
        self.validate_width(&new_row)?;
        self.validate_values(&new_row)?;
        self.check_uniqueness(&new_row, Some(id), snapshot)?;

        let Some(position) = self.claim_visible_version(id, snapshot)? else {
            return Ok(None);
        };

        let versions = self
            .rows
            .get_mut(&id)
            .ok_or_else(|| DbError::ExecutionError(format!("Row {} vanished during update", id)))?;
        let previous_xmax = versions[position].xmax.replace(snapshot.tx_id);
        versions.push(MvccRow {
            row: new_row.clone(),
            xmin: snapshot.tx_id,
            xmax: None,
        });

        self.index_row(id, &new_row);
        Ok(Some(UndoOp::Replaced {
            id,
            position,
            previous_xmax,
        }))
    }

    pub fn delete(&mut self, id: usize, snapshot: &Snapshot) -> Result<Option<UndoOp>> {
        let Some(position) = self.claim_visible_version(id, snapshot)? else {
            return Ok(None);
        };

        let previous_xmax = self
            .rows
            .get_mut(&id)
            .and_then(|versions| versions[position].xmax.replace(snapshot.tx_id));
        Ok(Some(UndoOp::Deleted {
            id,
            position,
            previous_xmax,
        }))
    }

    /// Reverts the effects of a partially applied statement, newest first.
    pub fn undo(&mut self, ops: Vec<UndoOp>) {
        for op in ops.into_iter().rev() {
            match op {
                UndoOp::Inserted { id } => {
                    self.rows.remove(&id);
                }
                UndoOp::Replaced {
                    id,
                    position,
                    previous_xmax,
                } => {
                    if let Some(versions) = self.rows.get_mut(&id) {
                        versions.truncate(position + 1);
                        versions[position].xmax = previous_xmax;
                    }
                }
                UndoOp::Deleted {
                    id,
                    position,
                    previous_xmax,
                } => {
                    if let Some(versions) = self.rows.get_mut(&id) {
                        versions[position].xmax = previous_xmax;
                    }
                }
            }
        }
    }

    /// Locates the version visible to `snapshot` and makes sure no other
    /// open transaction is already replacing it. Versions written by
    /// aborted transactions are discarded on the way.
    fn claim_visible_version(&mut self, id: usize, snapshot: &Snapshot) -> Result<Option<usize>> {
        let Some(versions) = self.rows.get_mut(&id) else {
            return Ok(None);
        };

        versions.retain(|version| !snapshot.is_aborted(version.xmin));

        let Some(position) = versions
            .iter()
            .rposition(|version| is_visible(version, snapshot))
        else {
            return Ok(None);
        };

        if let Some(xmax) = versions[position].xmax
            && xmax != snapshot.tx_id
            && !snapshot.is_aborted(xmax)
        {
            return Err(DbError::ExecutionError(format!(
                "concurrent update: row in '{}' is being modified by another transaction",
                self.schema.name
            )));
        }

        Ok(Some(position))
    }

    pub fn scan(&self, snapshot: &Snapshot) -> Vec<Row> {
        self.scan_with_ids(snapshot).into_iter().map(|(_, row)| row).collect()
    }

    /// Visible rows in insertion order.
    pub fn scan_with_ids(&self, snapshot: &Snapshot) -> Vec<(usize, Row)> {
        self.rows
            .iter()
            .filter_map(|(id, versions)| {
                versions
                    .iter()
                    .rev()
                    .find(|version| is_visible(version, snapshot))
                    .map(|version| (*id, version.row.clone()))
            })
            .collect()
    }

    /// Visible rows whose `column` equals `value`, through the column
    /// index when one exists. `None` when the column is not indexed.
    pub fn lookup(&self, column: &str, value: &Value, snapshot: &Snapshot) -> Result<Option<Vec<(usize, Row)>>> {
        let Some(index) = self.indexes.get(column) else {
            return Ok(None);
        };
        let col_idx = self.schema.column_index(column)?;

        let mut ids: Vec<usize> = index.get(value).cloned().unwrap_or_default();
        ids.sort_unstable();
        ids.dedup();

        let rows = ids
            .into_iter()
            .filter_map(|id| self.visible_row(id, snapshot).map(|row| (id, row)))
            .filter(|(_, row)| &row[col_idx] == value)
            .collect();
        Ok(Some(rows))
    }

    /// True when a row visible to `snapshot` holds `value` in `column` and
    /// keeps holding it whatever other open transactions decide. A key
    /// another transaction is removing cannot be referenced.
    pub fn holds_stable_key(&self, column: &str, value: &Value, snapshot: &Snapshot) -> Result<bool> {
        let col_idx = self.schema.column_index(column)?;
        let candidates: Vec<usize> = match self.indexes.get(column) {
            Some(index) => index.get(value).cloned().unwrap_or_default(),
            None => self.rows.keys().copied().collect(),
        };

        let mut found = false;
        for id in candidates {
            let Some(versions) = self.rows.get(&id) else {
                continue;
            };
            let Some(visible) = versions.iter().rev().find(|version| is_visible(version, snapshot)) else {
                continue;
            };
            if &visible.row[col_idx] != value {
                continue;
            }

            match visible.xmax {
                Some(xmax) if xmax != snapshot.tx_id && !snapshot.is_aborted(xmax) => {
                    // An in-flight rewrite that keeps the key is harmless.
                    let kept = versions
                        .iter()
                        .any(|version| version.xmin == xmax && &version.row[col_idx] == value);
                    if !kept {
                        return Err(DbError::ExecutionError(format!(
                            "concurrent update: referenced key {} in '{}' is being removed by another transaction",
                            value, self.schema.name
                        )));
                    }
                    found = true;
                }
                _ => found = true,
            }
        }
        Ok(found)
    }

    pub fn is_indexed(&self, column: &str) -> bool {
        self.indexes.contains_key(column)
    }

    pub fn visible_row(&self, id: usize, snapshot: &Snapshot) -> Option<Row> {
        self.rows.get(&id).and_then(|versions| {
            versions
                .iter()
                .rev()
                .find(|version| is_visible(version, snapshot))
                .map(|version| version.row.clone())
        })
    }

    /// True when some live version (visible or in flight) holds `value`
    /// in `column`.
    pub fn has_live_value(&self, column: &str, value: &Value, snapshot: &Snapshot) -> Result<bool> {
        let col_idx = self.schema.column_index(column)?;
        let candidates: Vec<usize> = match self.indexes.get(column) {
            Some(index) => index.get(value).cloned().unwrap_or_default(),
            None => self.rows.keys().copied().collect(),
        };

        Ok(candidates.into_iter().any(|id| {
            self.rows.get(&id).is_some_and(|versions| {
                versions
                    .iter()
                    .any(|version| &version.row[col_idx] == value && is_live(version, snapshot))
            })
        }))
    }

    pub fn row_count(&self, snapshot: &Snapshot) -> usize {
        self.rows
            .values()
            .filter(|versions| versions.iter().any(|version| is_visible(version, snapshot)))
            .count()
    }

    fn validate_width(&self, row: &Row) -> Result<()> {
        let expected = self.schema.schema().column_count();
        if row.len() != expected {
            return Err(DbError::ExecutionError(format!(
                "Expected {} columns for '{}', got {}",
                expected,
                self.schema.name,
                row.len()
            )));
        }
        Ok(())
    }

    fn validate_values(&self, row: &Row) -> Result<()> {
        for (column, value) in self.schema.schema().columns().iter().zip(row.iter()) {
            column.validate(value)?;
        }
        Ok(())
    }

    fn check_uniqueness(&self, row: &Row, ignore_id: Option<usize>, snapshot: &Snapshot) -> Result<()> {
        let columns = self.schema.schema().columns();
        let pk = self.schema.schema().primary_key_indices();

        let mut keys: Vec<Vec<usize>> = Vec::new();
        if !pk.is_empty() {
            keys.push(pk);
        }
        keys.extend(
            columns
                .iter()
                .enumerate()
                .filter(|(_, col)| col.unique && !col.primary_key)
                .map(|(idx, _)| vec![idx]),
        );

        for key in keys {
            let wanted: Vec<&Value> = key.iter().map(|idx| &row[*idx]).collect();
            if wanted.iter().any(|value| value.is_null()) {
                continue;
            }

            let candidates: Vec<usize> = match (key.len(), self.indexes.get(&columns[key[0]].name)) {
                (1, Some(index)) => index.get(wanted[0]).cloned().unwrap_or_default(),
                _ => self.rows.keys().copied().collect(),
            };

            for id in candidates {
                if Some(id) == ignore_id {
                    continue;
                }
                let Some(versions) = self.rows.get(&id) else {
                    continue;
                };
                let clash = versions.iter().any(|version| {
                    key.iter().zip(&wanted).all(|(idx, value)| &version.row[*idx] == *value)
                        && is_live(version, snapshot)
                });
                if clash {
                    let names: Vec<&str> = key.iter().map(|idx| columns[*idx].name.as_str()).collect();
                    let values: Vec<String> = wanted.iter().map(|v| v.to_string()).collect();
                    return Err(DbError::ConstraintViolation(format!(
                        "duplicate key value violates unique constraint on {}.({}): ({})",
                        self.schema.name,
                        names.join(", "),
                        values.join(", ")
                    )));
                }
            }
        }
        Ok(())
    }

    fn index_row(&mut self, id: usize, row: &Row) {
        for (column, index) in self.indexes.iter_mut() {
            if let Some(col_idx) = self.schema.schema.find_column_index(column) {
                let ids = index.entry(row[col_idx].clone()).or_default();
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
    }
}

fn is_visible(version: &MvccRow, snapshot: &Snapshot) -> bool {
    if version.xmin == snapshot.tx_id {
        return version.xmax != Some(snapshot.tx_id);
    }

    if !snapshot.is_committed(version.xmin) {
        return false;
    }

    match version.xmax {
        Some(xmax) if xmax == snapshot.tx_id => false,
        Some(xmax) => !snapshot.is_committed(xmax),
        None => true,
    }
}

/// A version still competes for its key unless its creator aborted or its
/// removal is committed (or made by the asking transaction itself).
fn is_live(version: &MvccRow, snapshot: &Snapshot) -> bool {
    if snapshot.is_aborted(version.xmin) {
        return false;
    }
    match version.xmax {
        None => true,
        Some(xmax) if xmax == snapshot.tx_id => false,
        Some(xmax) if snapshot.is_aborted(xmax) => true,
        Some(xmax) => !snapshot.is_committed(xmax),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;

    fn snapshot(tx_id: u64, active: &[u64], aborted: &[u64]) -> Snapshot {
        Snapshot {
            tx_id,
            active: Arc::new(active.iter().copied().collect()),
            aborted: Arc::new(aborted.iter().copied().collect()),
            max_tx_id: 100,
        }
    }

    fn wallets() -> Table {
        Table::new(TableSchema::new(
            "wallets",
            vec![
                Column::new("id", DataType::Text).primary_key(),
                Column::new("balance", DataType::Integer).not_null(),
            ],
        ))
    }

    #[test]
    fn test_uncommitted_rows_are_private() {
        let mut table = wallets();
        table
            .insert(vec![Value::from("w1"), Value::Integer(10)], &snapshot(5, &[5], &[]))
            .unwrap();

        assert_eq!(table.scan(&snapshot(5, &[5, 6], &[])).len(), 1);
        assert_eq!(table.scan(&snapshot(6, &[5, 6], &[])).len(), 0);
        // after commit, tx 5 leaves the active set
        assert_eq!(table.scan(&snapshot(6, &[6], &[])).len(), 1);
    }

    #[test]
    fn test_aborted_rows_disappear() {
        let mut table = wallets();
        table
            .insert(vec![Value::from("w1"), Value::Integer(10)], &snapshot(5, &[5], &[]))
            .unwrap();
        assert!(table.scan(&snapshot(7, &[7], &[5])).is_empty());

        // the key is free again once the writer aborted
        table
            .insert(vec![Value::from("w1"), Value::Integer(20)], &snapshot(7, &[7], &[5]))
            .unwrap();
    }

    #[test]
    fn test_duplicate_key_rejected_even_uncommitted() {
        let mut table = wallets();
        table
            .insert(vec![Value::from("x"), Value::Integer(1)], &snapshot(5, &[5, 6], &[]))
            .unwrap();
        let err = table
            .insert(vec![Value::from("x"), Value::Integer(2)], &snapshot(6, &[5, 6], &[]))
            .unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn test_update_creates_version_and_blocks_concurrent_writer() {
        let mut table = wallets();
        table
            .insert(vec![Value::from("w1"), Value::Integer(10)], &snapshot(1, &[], &[]))
            .unwrap();

        let writer = snapshot(5, &[5, 6], &[]);
        assert!(table
            .update(0, vec![Value::from("w1"), Value::Integer(99)], &writer)
            .unwrap()
            .is_some());
        assert_eq!(table.scan(&writer)[0][1], Value::Integer(99));

        let other = snapshot(6, &[5, 6], &[]);
        assert_eq!(table.scan(&other)[0][1], Value::Integer(10));
        assert!(table
            .update(0, vec![Value::from("w1"), Value::Integer(1)], &other)
            .is_err());
    }

    #[test]
    fn test_key_being_deleted_cannot_be_referenced() {
        let mut table = wallets();
        table
            .insert(vec![Value::from("w1"), Value::Integer(10)], &snapshot(1, &[], &[]))
            .unwrap();
        table
            .insert(vec![Value::from("w2"), Value::Integer(20)], &snapshot(1, &[], &[]))
            .unwrap();

        let deleter = snapshot(5, &[5, 6], &[]);
        table.delete(0, &deleter).unwrap();
        table
            .update(1, vec![Value::from("w2"), Value::Integer(21)], &deleter)
            .unwrap();

        let other = snapshot(6, &[5, 6], &[]);
        let err = table.holds_stable_key("id", &Value::from("w1"), &other).unwrap_err();
        assert!(err.to_string().contains("concurrent update"));
        // rewriting other columns keeps the key referenceable
        assert!(table.holds_stable_key("id", &Value::from("w2"), &other).unwrap());
        assert!(!table.holds_stable_key("id", &Value::from("w9"), &other).unwrap());

        let after_abort = snapshot(7, &[7], &[5]);
        assert!(table.holds_stable_key("id", &Value::from("w1"), &after_abort).unwrap());
        let after_commit = snapshot(7, &[7], &[]);
        assert!(!table.holds_stable_key("id", &Value::from("w1"), &after_commit).unwrap());
    }

    #[test]
    fn test_update_after_aborted_update() {
        let mut table = wallets();
        table
            .insert(vec![Value::from("w1"), Value::Integer(10)], &snapshot(1, &[], &[]))
            .unwrap();
        table
            .update(0, vec![Value::from("w1"), Value::Integer(50)], &snapshot(5, &[5], &[]))
            .unwrap();

        let after_abort = snapshot(6, &[6], &[5]);
        assert_eq!(table.scan(&after_abort)[0][1], Value::Integer(10));
        assert!(table
            .update(0, vec![Value::from("w1"), Value::Integer(11)], &after_abort)
            .unwrap()
            .is_some());
        assert_eq!(table.scan(&after_abort)[0][1], Value::Integer(11));
    }

    #[test]
    fn test_auto_increment_sequence() {
        let mut table = Table::new(TableSchema::new(
            "todos",
            vec![
                Column::new("id", DataType::Integer).primary_key().auto_increment(),
                Column::new("title", DataType::Text).not_null(),
            ],
        ));
        let tx = snapshot(1, &[1], &[]);
        let (first, _) = table.insert(vec![Value::Null, Value::from("A")], &tx).unwrap();
        let (second, _) = table.insert(vec![Value::Null, Value::from("B")], &tx).unwrap();
        assert_eq!(first[0], Value::Integer(1));
        assert_eq!(second[0], Value::Integer(2));
    }

    #[test]
    fn test_undo_restores_previous_state() {
        let mut table = wallets();
        let setup = snapshot(1, &[], &[]);
        table.insert(vec![Value::from("w1"), Value::Integer(10)], &setup).unwrap();

        let tx = snapshot(5, &[5], &[]);
        let mut ops = Vec::new();
        ops.push(table.insert(vec![Value::from("w2"), Value::Integer(1)], &tx).unwrap().1);
        ops.push(
            table
                .update(0, vec![Value::from("w1"), Value::Integer(0)], &tx)
                .unwrap()
                .unwrap(),
        );
        table.undo(ops);

        let rows = table.scan(&tx);
        assert_eq!(rows, vec![vec![Value::from("w1"), Value::Integer(10)]]);
        // the row is free for another writer again
        assert!(table
            .delete(0, &snapshot(6, &[5, 6], &[]))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_indexed_lookup() {
        let mut table = wallets();
        let tx = snapshot(1, &[1], &[]);
        table.insert(vec![Value::from("a"), Value::Integer(1)], &tx).unwrap();
        table.insert(vec![Value::from("b"), Value::Integer(2)], &tx).unwrap();

        let found = table.lookup("id", &Value::from("b"), &tx).unwrap().unwrap();
        assert_eq!(found.len(), 1);
        assert!(table.lookup("balance", &Value::Integer(1), &tx).unwrap().is_none());
    }
}
