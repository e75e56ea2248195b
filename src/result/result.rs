use crate::core::{DbError, Result, Row, Value};

/// Outcome of one statement: the rows it returned (SELECT, or the stored
/// rows of an INSERT) and the number of rows it touched.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub rows_affected: u64,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows,
            rows_affected: 0,
        }
    }

    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            ..Self::default()
        }
    }

    pub fn with_affected(mut self, rows_affected: u64) -> Self {
        self.rows_affected = rows_affected;
        self
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn value<'r>(&self, row: &'r Row, column: &str) -> Result<&'r Value> {
        let idx = self
            .column_index(column)
            .ok_or_else(|| DbError::ColumnNotFound(column.to_string(), "result set".into()))?;
        row.get(idx)
            .ok_or_else(|| DbError::ExecutionError(format!("Row is shorter than the result header at '{}'", column)))
    }

    /// Single value of a `COUNT(*)` result.
    pub fn scalar_count(&self) -> Result<u64> {
        let value = self
            .rows
            .first()
            .and_then(|row| row.first())
            .ok_or_else(|| DbError::ExecutionError("Empty COUNT result".into()))?;
        value
            .as_i64()
            .and_then(|count| u64::try_from(count).ok())
            .ok_or_else(|| DbError::TypeMismatch(format!("COUNT returned {}", value.type_name())))
    }
}

/// Outcome of a mutating call on the session API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteResult {
    pub rows_affected: u64,
}

impl WriteResult {
    pub fn new(rows_affected: u64) -> Self {
        Self { rows_affected }
    }

    pub fn merge(self, other: WriteResult) -> Self {
        Self {
            rows_affected: self.rows_affected + other.rows_affected,
        }
    }
}
