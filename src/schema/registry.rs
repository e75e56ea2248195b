use super::descriptor::{AutoBehavior, EntityDescriptor, RelationKind};
use crate::core::{DataType, DbError, Result};
use crate::mapper::Entity;
use crate::query::{CreateTableStmt, Statement};
use crate::session::Executor;
use std::any::{TypeId, type_name};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Entity metadata by Rust type, entity name and table.
///
/// Registration swaps in new maps (copy-on-write), so clones are cheap and
/// lookups never lock. Once handed to a `Database` the registry is only read.
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    by_type: Arc<HashMap<TypeId, Arc<EntityDescriptor>>>,
    by_name: Arc<HashMap<String, Arc<EntityDescriptor>>>,
    /// table -> entity name
    tables: Arc<HashMap<String, String>>,
    /// entity names in registration order
    order: Arc<Vec<String>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T`, validating its descriptor. Registering the same type
    /// again returns the stored descriptor.
    pub fn register<T: Entity>(&mut self) -> Result<Arc<EntityDescriptor>> {
        if let Some(existing) = self.by_type.get(&TypeId::of::<T>()) {
            return Ok(Arc::clone(existing));
        }

        let descriptor = Arc::new(T::describe());
        validate_descriptor(&descriptor)?;

        if let Some(existing) = self.tables.get(descriptor.table()) {
            return Err(DbError::DuplicateTable {
                table: descriptor.table().to_string(),
                existing: existing.clone(),
            });
        }
        if self.by_name.contains_key(descriptor.name()) {
            return Err(DbError::InvalidDescriptor(
                descriptor.name().to_string(),
                format!("entity name is already registered (type {})", type_name::<T>()),
            ));
        }

        let mut by_type = (*self.by_type).clone();
        by_type.insert(TypeId::of::<T>(), Arc::clone(&descriptor));
        let mut by_name = (*self.by_name).clone();
        by_name.insert(descriptor.name().to_string(), Arc::clone(&descriptor));
        let mut tables = (*self.tables).clone();
        tables.insert(descriptor.table().to_string(), descriptor.name().to_string());
        let mut order = (*self.order).clone();
        order.push(descriptor.name().to_string());

        self.by_type = Arc::new(by_type);
        self.by_name = Arc::new(by_name);
        self.tables = Arc::new(tables);
        self.order = Arc::new(order);

        debug!(entity = descriptor.name(), table = descriptor.table(), "entity registered");
        Ok(descriptor)
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<T: Entity>(mut self) -> Result<Self> {
        self.register::<T>()?;
        Ok(self)
    }

    pub fn describe<T: Entity>(&self) -> Result<Arc<EntityDescriptor>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or_else(|| DbError::UnregisteredType(type_name::<T>().to_string()))
    }

    pub fn describe_entity(&self, name: &str) -> Result<Arc<EntityDescriptor>> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::UnregisteredType(name.to_string()))
    }

    pub fn describe_table(&self, table: &str) -> Result<Arc<EntityDescriptor>> {
        let name = self
            .tables
            .get(table)
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))?;
        self.describe_entity(name)
    }

    pub fn is_registered<T: Entity>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Descriptors in registration order.
    pub fn entities(&self) -> Vec<Arc<EntityDescriptor>> {
        self.order
            .iter()
            .filter_map(|name| self.by_name.get(name).cloned())
            .collect()
    }

    /// Checks every relationship against the other registered entities.
    pub fn validate(&self) -> Result<()> {
        for descriptor in self.entities() {
            for relationship in descriptor.relationships() {
                let invalid = |msg: String| DbError::InvalidDescriptor(descriptor.name().to_string(), msg);
                let target = self.describe_entity(&relationship.target).map_err(|_| {
                    invalid(format!(
                        "relationship '{}' targets unregistered entity '{}'",
                        relationship.name, relationship.target
                    ))
                })?;

                match relationship.kind {
                    RelationKind::HasMany if target.column(&relationship.foreign_key).is_none() => {
                        return Err(invalid(format!(
                            "'{}' has no column '{}' for relationship '{}'",
                            target.name(),
                            relationship.foreign_key,
                            relationship.name
                        )));
                    }
                    RelationKind::BelongsTo if target.column(&relationship.references).is_none() => {
                        return Err(invalid(format!(
                            "'{}' has no column '{}' for relationship '{}'",
                            target.name(),
                            relationship.references,
                            relationship.name
                        )));
                    }
                    RelationKind::ManyToMany => {
                        let Some(join) = &relationship.join else {
                            return Err(invalid(format!("relationship '{}' has no join table", relationship.name)));
                        };
                        let join_entity = self.describe_table(&join.table).map_err(|_| {
                            invalid(format!("join table '{}' is not registered", join.table))
                        })?;
                        for column in [&join.owner_column, &join.target_column] {
                            if join_entity.column(column).is_none() {
                                return Err(invalid(format!(
                                    "join table '{}' has no column '{}'",
                                    join.table, column
                                )));
                            }
                        }
                        if target.column(&join.target_key).is_none() {
                            return Err(invalid(format!(
                                "'{}' has no column '{}'",
                                target.name(),
                                join.target_key
                            )));
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Descriptors ordered so that referenced tables come first.
    pub fn creation_order(&self) -> Result<Vec<Arc<EntityDescriptor>>> {
        let entities = self.entities();
        let index: HashMap<&str, usize> = entities
            .iter()
            .enumerate()
            .map(|(i, d)| (d.table(), i))
            .collect();

        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); entities.len()];
        let mut pending = vec![0usize; entities.len()];
        for (i, descriptor) in entities.iter().enumerate() {
            let referenced: HashSet<usize> = descriptor
                .referenced_tables()
                .into_iter()
                .filter_map(|table| index.get(table).copied())
                .collect();
            pending[i] = referenced.len();
            for parent in referenced {
                dependents[parent].push(i);
            }
        }

        let mut ready: BTreeSet<usize> = (0..entities.len()).filter(|&i| pending[i] == 0).collect();
        let mut ordered = Vec::with_capacity(entities.len());
        while let Some(next) = ready.pop_first() {
            ordered.push(Arc::clone(&entities[next]));
            for &child in &dependents[next] {
                pending[child] -= 1;
                if pending[child] == 0 {
                    ready.insert(child);
                }
            }
        }

        if ordered.len() != entities.len() {
            let stuck: Vec<&str> = (0..entities.len())
                .filter(|&i| pending[i] > 0)
                .map(|i| entities[i].table())
                .collect();
            return Err(DbError::UnsatisfiableDependency(format!(
                "foreign keys form a cycle between tables {:?}",
                stuck
            )));
        }
        Ok(ordered)
    }

    /// Issues `CREATE TABLE IF NOT EXISTS` for every entity, referenced
    /// tables first.
    pub async fn create_tables(&self, executor: &dyn Executor) -> Result<()> {
        for descriptor in self.creation_order()? {
            let stmt = Statement::CreateTable(CreateTableStmt {
                table_name: descriptor.table().to_string(),
                columns: descriptor.storage_columns(),
                if_not_exists: true,
            });
            executor.execute(&stmt).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry").field("entities", &self.order).finish()
    }
}

/// Checks a descriptor on its own, before it is stored.
pub fn validate_descriptor(descriptor: &EntityDescriptor) -> Result<()> {
    let invalid = |msg: String| Err(DbError::InvalidDescriptor(descriptor.name().to_string(), msg));

    if descriptor.name().is_empty() || descriptor.table().is_empty() {
        return invalid("entity and table names must not be empty".into());
    }
    if descriptor.primary_key().is_empty() {
        return invalid("no primary key column".into());
    }

    let mut fields = HashSet::new();
    let mut columns = HashSet::new();
    for column in descriptor.columns() {
        if !fields.insert(column.field.as_str()) {
            return invalid(format!("duplicate field '{}'", column.field));
        }
        if !columns.insert(column.column.as_str()) {
            return invalid(format!("duplicate column '{}'", column.column));
        }

        let type_ok = match column.auto {
            None => true,
            Some(AutoBehavior::Increment) => column.data_type == DataType::Integer,
            Some(AutoBehavior::CreateTime | AutoBehavior::UpdateTime | AutoBehavior::SoftDelete) => {
                matches!(column.data_type, DataType::Timestamp | DataType::Integer)
            }
        };
        if !type_ok {
            return invalid(format!(
                "column '{}' of type {} cannot carry {:?}",
                column.column, column.data_type, column.auto
            ));
        }
    }
    if descriptor.columns().iter().filter(|c| c.auto == Some(AutoBehavior::SoftDelete)).count() > 1 {
        return invalid("more than one soft-delete column".into());
    }

    let mut names = HashSet::new();
    for relationship in descriptor.relationships() {
        if !names.insert(relationship.name.as_str()) || fields.contains(relationship.name.as_str()) {
            return invalid(format!("duplicate relationship name '{}'", relationship.name));
        }
        if relationship.foreign_key.is_empty() {
            return invalid(format!("relationship '{}' has no foreign key", relationship.name));
        }

        // Key columns stored on the owner must exist here; the other side is
        // checked once every entity is registered.
        let owner_column = match relationship.kind {
            RelationKind::BelongsTo => &relationship.foreign_key,
            RelationKind::HasMany | RelationKind::ManyToMany => &relationship.references,
        };
        if descriptor.column(owner_column).is_none() {
            return invalid(format!(
                "relationship '{}' uses missing column '{}'",
                relationship.name, owner_column
            ));
        }

        if relationship.kind == RelationKind::ManyToMany {
            match &relationship.join {
                Some(join) if !join.table.is_empty() && !join.owner_column.is_empty() && !join.target_column.is_empty() => {}
                _ => {
                    return invalid(format!(
                        "relationship '{}' needs an explicit join table and join columns",
                        relationship.name
                    ));
                }
            }
        }
    }

    Ok(())
}
