use crate::core::{Column, DataType, ForeignKey, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Values the row mapper fills in instead of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoBehavior {
    /// Set once, when the row is inserted
    CreateTime,
    /// Set on insert and on every update, never moving backwards
    UpdateTime,
    /// Assigned by storage when the key is null or zero on insert
    Increment,
    /// Deletion marker; rows with a value here are hidden from queries
    SoftDelete,
}

/// Describes one persisted field of an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub field: String,
    pub column: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub unique: bool,
    pub primary_key: bool,
    pub auto: Option<AutoBehavior>,
    pub references: Option<ForeignKey>,
}

impl ColumnDescriptor {
    /// A NOT NULL column named like its field.
    pub fn new(field: impl Into<String>, data_type: DataType) -> Self {
        let field = field.into();
        Self {
            column: field.clone(),
            field,
            data_type,
            nullable: false,
            unique: false,
            primary_key: false,
            auto: None,
            references: None,
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto = Some(AutoBehavior::Increment);
        self
    }

    pub fn auto_create_time(mut self) -> Self {
        self.auto = Some(AutoBehavior::CreateTime);
        self
    }

    pub fn auto_update_time(mut self) -> Self {
        self.auto = Some(AutoBehavior::UpdateTime);
        self
    }

    /// Marks the soft-delete column; always nullable.
    pub fn soft_delete(mut self) -> Self {
        self.auto = Some(AutoBehavior::SoftDelete);
        self.nullable = true;
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references = Some(ForeignKey {
            table: table.into(),
            column: column.into(),
        });
        self
    }

    pub fn is_auto_increment(&self) -> bool {
        self.auto == Some(AutoBehavior::Increment)
    }

    /// Storage column for `CREATE TABLE`.
    pub fn to_column(&self) -> Column {
        let mut column = Column::new(self.column.clone(), self.data_type);
        column.nullable = self.nullable;
        column.primary_key = self.primary_key;
        column.unique = self.unique;
        column.auto_increment = self.is_auto_increment();
        column.references = self.references.clone();
        column
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKind {
    /// The target rows carry a foreign key to the owner
    HasMany,
    /// The owner row carries a foreign key to the target
    BelongsTo,
    /// Rows of a join table link owner and target keys
    ManyToMany,
}

/// Explicitly named join table of a many-to-many relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinTable {
    pub table: String,
    /// Join column holding the owner's key
    pub owner_column: String,
    /// Join column holding the target's key
    pub target_column: String,
    /// Target column referenced by `target_column`
    pub target_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipDescriptor {
    /// Name under which related records are stored on the owner
    pub name: String,
    pub kind: RelationKind,
    /// Entity name of the related type
    pub target: String,
    /// HasMany: column on the target. BelongsTo: column on the owner.
    /// ManyToMany: the join table's owner column.
    pub foreign_key: String,
    /// HasMany / ManyToMany: owner column. BelongsTo: target column.
    pub references: String,
    pub join: Option<JoinTable>,
}

impl RelationshipDescriptor {
    pub fn has_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, RelationKind::HasMany, target)
    }

    pub fn belongs_to(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, RelationKind::BelongsTo, target)
    }

    /// Many-to-many through `join_table`; the join columns must be named with
    /// [`join_columns`](Self::join_columns).
    pub fn many_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        join_table: impl Into<String>,
    ) -> Self {
        let mut relationship = Self::new(name, RelationKind::ManyToMany, target);
        relationship.join = Some(JoinTable {
            table: join_table.into(),
            owner_column: String::new(),
            target_column: String::new(),
            target_key: "id".to_string(),
        });
        relationship
    }

    fn new(name: impl Into<String>, kind: RelationKind, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            target: target.into(),
            foreign_key: String::new(),
            references: "id".to_string(),
            join: None,
        }
    }

    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = column.into();
        self
    }

    pub fn references(mut self, column: impl Into<String>) -> Self {
        self.references = column.into();
        self
    }

    pub fn join_columns(mut self, owner_column: impl Into<String>, target_column: impl Into<String>) -> Self {
        let owner_column = owner_column.into();
        self.foreign_key = owner_column.clone();
        if let Some(join) = self.join.as_mut() {
            join.owner_column = owner_column;
            join.target_column = target_column.into();
        }
        self
    }

    pub fn target_key(mut self, column: impl Into<String>) -> Self {
        if let Some(join) = self.join.as_mut() {
            join.target_key = column.into();
        }
        self
    }
}

/// Immutable metadata of one entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDescriptor {
    name: String,
    table: String,
    columns: Vec<ColumnDescriptor>,
    relationships: Vec<RelationshipDescriptor>,
}

impl EntityDescriptor {
    pub fn builder(name: impl Into<String>, table: impl Into<String>) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder {
            descriptor: EntityDescriptor {
                name: name.into(),
                table: table.into(),
                columns: Vec::new(),
                relationships: Vec::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn relationships(&self) -> &[RelationshipDescriptor] {
        &self.relationships
    }

    pub fn primary_key(&self) -> Vec<&ColumnDescriptor> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    pub fn field(&self, field: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.field == field)
    }

    pub fn column(&self, column: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.column == column)
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipDescriptor> {
        self.relationships.iter().find(|r| r.name == name)
    }

    pub fn soft_delete_column(&self) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|c| c.auto == Some(AutoBehavior::SoftDelete))
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.column.clone()).collect()
    }

    pub fn storage_columns(&self) -> Vec<Column> {
        self.columns.iter().map(ColumnDescriptor::to_column).collect()
    }

    /// Other tables this entity's rows reference through foreign keys,
    /// each once, sorted by name.
    pub fn referenced_tables(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter_map(|c| c.references.as_ref())
            .map(|fk| fk.table.as_str())
            .filter(|table| *table != self.table)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

pub struct EntityDescriptorBuilder {
    descriptor: EntityDescriptor,
}

impl EntityDescriptorBuilder {
    pub fn column(mut self, column: ColumnDescriptor) -> Self {
        self.descriptor.columns.push(column);
        self
    }

    pub fn relationship(mut self, relationship: RelationshipDescriptor) -> Self {
        self.descriptor.relationships.push(relationship);
        self
    }

    pub fn build(self) -> EntityDescriptor {
        self.descriptor
    }
}

/// Key of a record: its primary-key values in declaration order, unless
/// any is null or a zero auto-increment placeholder.
pub fn key_of(descriptor: &EntityDescriptor, lookup: impl Fn(&str) -> Option<Value>) -> Option<Vec<Value>> {
    let mut key = Vec::new();
    for column in descriptor.primary_key() {
        let value = lookup(&column.field).unwrap_or(Value::Null);
        if value.is_null() || (column.is_auto_increment() && value.is_zero()) {
            return None;
        }
        key.push(value);
    }
    if key.is_empty() { None } else { Some(key) }
}
