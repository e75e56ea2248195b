use super::{Table, TableSchema};
use crate::core::{DbError, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Table registry of the embedded engine.
///
/// Every table has its own lock; the map lock is held only to look a table
/// up or to add one. No lock here is ever held across an `.await`.
pub struct InMemoryStorage {
    tables: RwLock<HashMap<String, Arc<RwLock<Table>>>>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Returns `false` when the table already existed and `if_not_exists`
    /// allowed it.
    pub fn create_table(&self, schema: TableSchema, if_not_exists: bool) -> Result<bool> {
        let mut tables = self.tables.write()?;
        let name = schema.name().to_string();

        if tables.contains_key(&name) {
            return if if_not_exists {
                Ok(false)
            } else {
                Err(DbError::TableExists(name))
            };
        }

        tables.insert(name, Arc::new(RwLock::new(Table::new(schema))));
        Ok(true)
    }

    pub fn get_table(&self, name: &str) -> Result<Arc<RwLock<Table>>> {
        self.tables
            .read()?
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub fn get_schema(&self, name: &str) -> Result<TableSchema> {
        let handle = self.get_table(name)?;
        let table = handle.read()?;
        Ok(table.schema().clone())
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.tables
            .read()
            .map(|tables| tables.contains_key(name))
            .unwrap_or(false)
    }

    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .read()
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Tables holding a foreign key into `table`, with the referencing
    /// column and the referenced column.
    pub fn referencing_tables(&self, table: &str) -> Result<Vec<(String, String, String)>> {
        let handles: Vec<Arc<RwLock<Table>>> = self.tables.read()?.values().cloned().collect();

        let mut out = Vec::new();
        for handle in handles {
            let child = handle.read()?;
            for column in child.schema().schema().columns() {
                if let Some(fk) = &column.references
                    && fk.table == table
                {
                    out.push((
                        child.schema().name().to_string(),
                        column.name.clone(),
                        fk.column.clone(),
                    ));
                }
            }
        }
        out.sort();
        Ok(out)
    }
}
