use super::record::Record;
use crate::core::{DataType, DbError, Result, Row, Value};
use crate::result::QueryResult;
use crate::schema::{AutoBehavior, ColumnDescriptor, EntityDescriptor};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Insert,
    Update,
}

/// Translates records to column/value pairs and result rows back to records.
pub struct RowMapper;

impl RowMapper {
    /// Column values for an INSERT or UPDATE of `record`.
    ///
    /// Insert leaves out an auto-increment key that is null or zero.
    /// Update leaves out primary-key and create-time columns.
    pub fn to_row(record: &Record, descriptor: &EntityDescriptor, mode: WriteMode) -> Result<Vec<(String, Value)>> {
        Self::to_row_at(record, descriptor, mode, Utc::now())
    }

    pub fn to_row_at(
        record: &Record,
        descriptor: &EntityDescriptor,
        mode: WriteMode,
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, Value)>> {
        let mut values = Vec::with_capacity(descriptor.columns().len());

        for column in descriptor.columns() {
            let current = record.get(&column.field).cloned().unwrap_or(Value::Null);

            let value = match (column.auto, mode) {
                (_, WriteMode::Update) if column.primary_key => continue,
                (Some(AutoBehavior::Increment), WriteMode::Insert) if current.is_null() || current.is_zero() => {
                    continue;
                }
                (Some(AutoBehavior::CreateTime), WriteMode::Update) => continue,
                // Auto time columns come from the clock, whatever the record holds.
                (Some(AutoBehavior::CreateTime), WriteMode::Insert) | (Some(AutoBehavior::UpdateTime), _) => {
                    timestamp_value(column, now)?
                }
                _ => current,
            };

            check_shape(descriptor, column, &value)?;
            values.push((column.column.clone(), value));
        }

        Ok(values)
    }

    /// Record of a result row. Columns the descriptor does not map (join
    /// columns carried by a preload) are ignored.
    pub fn from_row(columns: &[String], row: &Row, descriptor: &EntityDescriptor) -> Result<Record> {
        if columns.len() != row.len() {
            return Err(DbError::ExecutionError(format!(
                "Row of '{}' has {} values for {} columns",
                descriptor.table(),
                row.len(),
                columns.len()
            )));
        }

        let mut record = Record::new();
        for (name, value) in columns.iter().zip(row) {
            let bare = name
                .strip_prefix(descriptor.table())
                .and_then(|rest| rest.strip_prefix('.'))
                .unwrap_or(name.as_str());
            if let Some(column) = descriptor.column(bare) {
                check_shape(descriptor, column, value)?;
                record.set(column.field.clone(), value.clone());
            }
        }
        Ok(record)
    }

    /// Records of every row of a result, in result order.
    pub fn from_result(result: &QueryResult, descriptor: &EntityDescriptor) -> Result<Vec<Record>> {
        result
            .rows
            .iter()
            .map(|row| Self::from_row(&result.columns, row, descriptor))
            .collect()
    }
}

pub(crate) fn timestamp_value(column: &ColumnDescriptor, now: DateTime<Utc>) -> Result<Value> {
    match column.data_type {
        DataType::Timestamp => Ok(Value::Timestamp(now)),
        DataType::Integer => Ok(Value::Integer(now.timestamp_millis())),
        other => Err(DbError::TypeMismatch(format!(
            "auto time column '{}' cannot hold {}",
            column.column, other
        ))),
    }
}

fn check_shape(descriptor: &EntityDescriptor, column: &ColumnDescriptor, value: &Value) -> Result<()> {
    if column.data_type.is_compatible(value) {
        return Ok(());
    }
    Err(DbError::TypeMismatch(format!(
        "{}.{} expects {}, got {}",
        descriptor.name(),
        column.field,
        column.data_type,
        value.type_name()
    )))
}
