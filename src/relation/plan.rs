//! Write ordering for object graphs.
//!
//! A record tree (owner plus attached relations) becomes a flat list of
//! nodes, foreign-key bindings between them and an ordered list of steps:
//! every row is written after the rows it references, and join rows after
//! both endpoints. A cycle is broken at a nullable foreign key: that row is
//! written with NULL first and bound by an UPDATE once its parent exists.

use crate::core::{DbError, Result, Value};
use crate::mapper::{Record, RelationValue};
use crate::schema::{EntityDescriptor, JoinTable, RelationKind, SchemaRegistry, key_of};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Relationships left out of a write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Omit {
    #[default]
    None,
    /// Write the root row only.
    Associations,
    /// Skip the named relationship paths (`"Todos"`, `"Todos.User"`) and
    /// everything below them.
    Only(Vec<String>),
}

impl Omit {
    pub fn only<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Omit::Only(paths.into_iter().map(Into::into).collect())
    }

    pub fn skips(&self, path: &str) -> bool {
        match self {
            Omit::None => false,
            Omit::Associations => true,
            Omit::Only(paths) => paths.iter().any(|omitted| {
                path == omitted
                    || path
                        .strip_prefix(omitted.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMode {
    /// Always INSERT; a key collision is a constraint violation.
    Insert,
    /// UPDATE by key, INSERT when nothing matched or the key is unassigned.
    Upsert,
}

#[derive(Debug, Clone)]
pub struct WriteNode {
    pub descriptor: Arc<EntityDescriptor>,
    /// Field values only; relations live in the plan's shape.
    pub record: Record,
    /// Relationship path of the first occurrence; empty for the root.
    pub path: String,
    pub mode: NodeMode,
}

/// Copies `parent.parent_field` into `child.child_field` right before the
/// child row is written, or in a [`WriteStep::Bind`] when `deferred`.
#[derive(Debug, Clone)]
pub struct FkBinding {
    pub child: usize,
    pub child_field: String,
    pub parent: usize,
    pub parent_field: String,
    pub deferred: bool,
}

#[derive(Debug, Clone)]
pub struct LinkStep {
    pub relationship: String,
    pub join: JoinTable,
    pub owner: usize,
    pub owner_field: String,
    pub target: usize,
    pub target_field: String,
}

#[derive(Debug, Clone)]
pub enum WriteStep {
    Write(usize),
    /// UPDATE of a deferred binding's child once the parent is written.
    Bind(usize),
    Link(LinkStep),
}

#[derive(Debug, Clone)]
enum ShapeRelation {
    One(Box<Shape>),
    Many(Vec<Shape>),
    /// Omitted from the write; handed back untouched.
    Kept(RelationValue),
}

/// Tree of node indices mirroring the input record.
#[derive(Debug, Clone)]
struct Shape {
    node: usize,
    relations: Vec<(String, ShapeRelation)>,
}

#[derive(Debug, Clone)]
pub struct WritePlan {
    pub nodes: Vec<WriteNode>,
    pub bindings: Vec<FkBinding>,
    pub steps: Vec<WriteStep>,
    shape: Shape,
}

impl WritePlan {
    pub fn root(&self) -> &WriteNode {
        &self.nodes[self.shape.node]
    }

    /// Tables in write order, for inspection and tests.
    pub fn write_order(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                WriteStep::Write(node) => Some(self.nodes[*node].descriptor.table()),
                WriteStep::Bind(_) | WriteStep::Link(_) => None,
            })
            .collect()
    }

    /// The input tree rebuilt from the nodes' current values, so keys and
    /// timestamps assigned during the write flow back to the caller.
    pub fn assemble(&self) -> Record {
        self.assemble_shape(&self.shape)
    }

    fn assemble_shape(&self, shape: &Shape) -> Record {
        let mut record = self.nodes[shape.node].record.clone();
        for (name, relation) in &shape.relations {
            let value = match relation {
                ShapeRelation::One(child) => RelationValue::One(Box::new(self.assemble_shape(child))),
                ShapeRelation::Many(children) => {
                    RelationValue::Many(children.iter().map(|child| self.assemble_shape(child)).collect())
                }
                ShapeRelation::Kept(value) => value.clone(),
            };
            record.set_relation(name.clone(), value);
        }
        record
    }
}

/// Orders the writes of `record` and everything attached to it.
pub fn order_for_write(
    registry: &SchemaRegistry,
    descriptor: Arc<EntityDescriptor>,
    record: &Record,
    root_mode: NodeMode,
    omit: &Omit,
) -> Result<WritePlan> {
    let mut builder = PlanBuilder {
        registry,
        omit,
        nodes: Vec::new(),
        keyed: HashMap::new(),
        bindings: Vec::new(),
        links: Vec::new(),
    };
    let shape = builder.visit(descriptor, record, String::new(), root_mode)?;
    let order = builder.sort()?;

    let mut steps: Vec<WriteStep> = order.into_iter().map(WriteStep::Write).collect();
    steps.extend(
        (0..builder.bindings.len())
            .filter(|&b| builder.bindings[b].deferred)
            .map(WriteStep::Bind),
    );
    steps.extend(builder.links.into_iter().map(WriteStep::Link));

    Ok(WritePlan {
        nodes: builder.nodes,
        bindings: builder.bindings,
        steps,
        shape,
    })
}

struct PlanBuilder<'a> {
    registry: &'a SchemaRegistry,
    omit: &'a Omit,
    nodes: Vec<WriteNode>,
    keyed: HashMap<(String, Vec<Value>), usize>,
    /// Each binding also orders its parent before its child.
    bindings: Vec<FkBinding>,
    links: Vec<LinkStep>,
}

impl PlanBuilder<'_> {
    fn visit(
        &mut self,
        descriptor: Arc<EntityDescriptor>,
        record: &Record,
        path: String,
        mode: NodeMode,
    ) -> Result<Shape> {
        let node = self.node_for(&descriptor, record, &path, mode);
        let mut relations = Vec::new();

        for (name, value) in record.relations() {
            let relationship = descriptor.relationship(name).ok_or_else(|| {
                DbError::InvalidDescriptor(
                    descriptor.name().to_string(),
                    format!("record carries unknown relationship '{}'", name),
                )
            })?;
            let child_path = if path.is_empty() {
                name.clone()
            } else {
                format!("{}.{}", path, name)
            };

            if self.omit.skips(&child_path) {
                relations.push((name.clone(), ShapeRelation::Kept(value.clone())));
                continue;
            }

            let target = self.registry.describe_entity(&relationship.target)?;
            let children: Vec<&Record> = match value {
                RelationValue::One(child) => vec![child.as_ref()],
                RelationValue::Many(children) => children.iter().collect(),
            };

            let mut shapes = Vec::with_capacity(children.len());
            for child in children {
                let child_shape = self.visit(Arc::clone(&target), child, child_path.clone(), NodeMode::Upsert)?;
                let child_node = child_shape.node;

                match relationship.kind {
                    RelationKind::HasMany => {
                        self.bindings.push(FkBinding {
                            child: child_node,
                            child_field: field_of(&target, &relationship.foreign_key)?,
                            parent: node,
                            parent_field: field_of(&descriptor, &relationship.references)?,
                            deferred: false,
                        });
                    }
                    RelationKind::BelongsTo => {
                        self.bindings.push(FkBinding {
                            child: node,
                            child_field: field_of(&descriptor, &relationship.foreign_key)?,
                            parent: child_node,
                            parent_field: field_of(&target, &relationship.references)?,
                            deferred: false,
                        });
                    }
                    RelationKind::ManyToMany => {
                        let join = relationship.join.clone().ok_or_else(|| {
                            DbError::InvalidDescriptor(
                                descriptor.name().to_string(),
                                format!("relationship '{}' has no join table", relationship.name),
                            )
                        })?;
                        self.links.push(LinkStep {
                            relationship: relationship.name.clone(),
                            owner: node,
                            owner_field: field_of(&descriptor, &relationship.references)?,
                            target: child_node,
                            target_field: field_of(&target, &join.target_key)?,
                            join,
                        });
                    }
                }
                shapes.push(child_shape);
            }

            let shape_relation = match value {
                RelationValue::One(_) => match shapes.pop() {
                    Some(shape) => ShapeRelation::One(Box::new(shape)),
                    None => ShapeRelation::Kept(value.clone()),
                },
                RelationValue::Many(_) => ShapeRelation::Many(shapes),
            };
            relations.push((name.clone(), shape_relation));
        }

        Ok(Shape { node, relations })
    }

    /// Existing node for the same table and key, or a new one.
    fn node_for(&mut self, descriptor: &Arc<EntityDescriptor>, record: &Record, path: &str, mode: NodeMode) -> usize {
        let mut fields = Record::new();
        for (field, value) in record.fields() {
            fields.set(field.clone(), value.clone());
        }

        let key = key_of(descriptor, |field| record.get(field).cloned());
        if let Some(key) = &key
            && let Some(&existing) = self.keyed.get(&(descriptor.table().to_string(), key.clone()))
        {
            let node = &mut self.nodes[existing];
            for (field, value) in fields.fields() {
                if node.record.get(field).is_none() {
                    node.record.set(field.clone(), value.clone());
                }
            }
            if mode == NodeMode::Insert {
                node.mode = NodeMode::Insert;
            }
            return existing;
        }

        let index = self.nodes.len();
        self.nodes.push(WriteNode {
            descriptor: Arc::clone(descriptor),
            record: fields,
            path: path.to_string(),
            mode,
        });
        if let Some(key) = key {
            self.keyed.insert((descriptor.table().to_string(), key), index);
        }
        index
    }

    /// Kahn's algorithm; ties resolve in discovery order. When every
    /// remaining row waits on another, the first binding into a nullable
    /// column among them is deferred; a cycle of required keys fails.
    fn sort(&mut self) -> Result<Vec<usize>> {
        let count = self.nodes.len();
        let mut pending = vec![0usize; count];
        let mut after: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (index, binding) in self.bindings.iter().enumerate() {
            pending[binding.child] += 1;
            after[binding.parent].push(index);
        }

        let mut placed = vec![false; count];
        let mut ready: BTreeSet<usize> = (0..count).filter(|&n| pending[n] == 0).collect();
        let mut order = Vec::with_capacity(count);
        loop {
            while let Some(node) = ready.pop_first() {
                placed[node] = true;
                order.push(node);
                for &index in &after[node] {
                    let binding = &self.bindings[index];
                    if binding.deferred {
                        continue;
                    }
                    pending[binding.child] -= 1;
                    if pending[binding.child] == 0 {
                        ready.insert(binding.child);
                    }
                }
            }
            if order.len() == count {
                return Ok(order);
            }

            let breakable = self.bindings.iter().position(|binding| {
                !binding.deferred
                    && !placed[binding.parent]
                    && !placed[binding.child]
                    && self.nodes[binding.child]
                        .descriptor
                        .field(&binding.child_field)
                        .is_some_and(|column| column.nullable)
            });
            let Some(index) = breakable else {
                break;
            };
            let child = self.bindings[index].child;
            self.bindings[index].deferred = true;
            pending[child] -= 1;
            if pending[child] == 0 {
                ready.insert(child);
            }
        }

        let stuck: Vec<String> = (0..count)
            .filter(|&n| !placed[n])
            .map(|n| {
                let node = &self.nodes[n];
                if node.path.is_empty() {
                    node.descriptor.name().to_string()
                } else {
                    format!("{} ({})", node.descriptor.name(), node.path)
                }
            })
            .collect();
        Err(DbError::UnsatisfiableDependency(format!(
            "rows reference each other through required keys in a cycle: {}",
            stuck.join(", ")
        )))
    }
}

fn field_of(descriptor: &EntityDescriptor, column: &str) -> Result<String> {
    descriptor
        .column(column)
        .map(|c| c.field.clone())
        .ok_or_else(|| DbError::ColumnNotFound(column.to_string(), descriptor.table().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::mapper::Entity;
    use crate::schema::{ColumnDescriptor, RelationshipDescriptor};

    macro_rules! entity {
        ($ty:ident, $descriptor:expr) => {
            struct $ty;
            impl Entity for $ty {
                fn describe() -> EntityDescriptor {
                    $descriptor
                }
                fn to_record(&self) -> Record {
                    Record::new()
                }
                fn from_record(_: Record) -> Result<Self> {
                    Ok($ty)
                }
            }
        };
    }

    entity!(
        User,
        EntityDescriptor::builder("User", "users")
            .column(ColumnDescriptor::new("id", DataType::Text).primary_key())
            .column(ColumnDescriptor::new("manager_id", DataType::Text).nullable().references("users", "id"))
            .relationship(RelationshipDescriptor::has_many("Todos", "Todo").foreign_key("user_id"))
            .relationship(RelationshipDescriptor::belongs_to("Manager", "User").foreign_key("manager_id"))
            .relationship(
                RelationshipDescriptor::many_to_many("LikeProducts", "Product", "user_like_product")
                    .join_columns("user_id", "product_id"),
            )
            .build()
    );
    entity!(
        Todo,
        EntityDescriptor::builder("Todo", "todos")
            .column(ColumnDescriptor::new("id", DataType::Integer).primary_key().auto_increment())
            .column(ColumnDescriptor::new("user_id", DataType::Text).references("users", "id"))
            .column(ColumnDescriptor::new("title", DataType::Text))
            .relationship(RelationshipDescriptor::belongs_to("User", "User").foreign_key("user_id"))
            .build()
    );
    entity!(
        Employee,
        EntityDescriptor::builder("Employee", "employees")
            .column(ColumnDescriptor::new("id", DataType::Text).primary_key())
            .column(ColumnDescriptor::new("mentor_id", DataType::Text).references("employees", "id"))
            .relationship(RelationshipDescriptor::belongs_to("Mentor", "Employee").foreign_key("mentor_id"))
            .build()
    );
    entity!(
        Product,
        EntityDescriptor::builder("Product", "products")
            .column(ColumnDescriptor::new("id", DataType::Text).primary_key())
            .build()
    );
    entity!(
        UserLikeProduct,
        EntityDescriptor::builder("UserLikeProduct", "user_like_product")
            .column(ColumnDescriptor::new("user_id", DataType::Text).primary_key().references("users", "id"))
            .column(ColumnDescriptor::new("product_id", DataType::Text).primary_key().references("products", "id"))
            .build()
    );

    fn registry() -> SchemaRegistry {
        let registry = SchemaRegistry::new()
            .with::<User>()
            .and_then(|r| r.with::<Todo>())
            .and_then(|r| r.with::<Product>())
            .and_then(|r| r.with::<UserLikeProduct>())
            .and_then(|r| r.with::<Employee>())
            .unwrap();
        registry.validate().unwrap();
        registry
    }

    fn plan(record: &Record, omit: &Omit) -> Result<WritePlan> {
        let registry = registry();
        let descriptor = registry.describe::<User>().unwrap();
        order_for_write(&registry, descriptor, record, NodeMode::Insert, omit)
    }

    #[test]
    fn test_owner_before_owned() {
        let record = Record::new().with("id", "u1").with_many(
            "Todos",
            vec![Record::new().with("title", "A"), Record::new().with("title", "B")],
        );
        let plan = plan(&record, &Omit::None).unwrap();

        assert_eq!(plan.write_order(), vec!["users", "todos", "todos"]);
        assert_eq!(plan.bindings.len(), 2);
        assert!(plan.bindings.iter().all(|b| b.parent == 0 && b.child_field == "user_id"));
    }

    #[test]
    fn test_referenced_before_referencing() {
        let record = Record::new()
            .with("id", "u2")
            .with_one("Manager", Record::new().with("id", "u1"));
        let plan = plan(&record, &Omit::None).unwrap();

        let order: Vec<&str> = plan
            .steps
            .iter()
            .filter_map(|s| match s {
                WriteStep::Write(n) => plan.nodes[*n].record.get("id").and_then(Value::as_str),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec!["u1", "u2"]);
    }

    #[test]
    fn test_join_rows_after_both_endpoints() {
        let record = Record::new().with("id", "u1").with_many(
            "LikeProducts",
            vec![Record::new().with("id", "P001"), Record::new().with("id", "P002")],
        );
        let plan = plan(&record, &Omit::None).unwrap();

        assert_eq!(plan.write_order(), vec!["users", "products", "products"]);
        assert!(matches!(plan.steps.last(), Some(WriteStep::Link(link)) if link.join.table == "user_like_product"));
        assert_eq!(plan.steps.len(), 5);
    }

    #[test]
    fn test_same_key_is_merged() {
        let record = Record::new().with("id", "u1").with_many(
            "Todos",
            vec![Record::new()
                .with("title", "A")
                .with_one("User", Record::new().with("id", "u1"))],
        );
        let plan = plan(&record, &Omit::None).unwrap();
        assert_eq!(plan.nodes.len(), 2);
        assert_eq!(plan.write_order(), vec!["users", "todos"]);
    }

    #[test]
    fn test_cycle_of_required_keys_is_unsatisfiable() {
        let registry = registry();
        let descriptor = registry.describe::<Employee>().unwrap();
        let record = Record::new()
            .with("id", "e1")
            .with_one("Mentor", Record::new().with("id", "e2").with_one("Mentor", Record::new().with("id", "e1")));

        let err = order_for_write(&registry, descriptor, &record, NodeMode::Insert, &Omit::None).unwrap_err();
        assert!(matches!(err, DbError::UnsatisfiableDependency(_)));
    }

    #[test]
    fn test_nullable_cycle_binds_after_insert() {
        let record = Record::new()
            .with("id", "u1")
            .with_one("Manager", Record::new().with("id", "u2").with_one("Manager", Record::new().with("id", "u1")));
        let plan = plan(&record, &Omit::None).unwrap();

        assert_eq!(plan.write_order(), vec!["users", "users"]);
        let deferred: Vec<&FkBinding> = plan.bindings.iter().filter(|b| b.deferred).collect();
        assert_eq!(deferred.len(), 1);

        // the deferred child is written first, its key bound at the end
        let first = match plan.steps[0] {
            WriteStep::Write(n) => n,
            _ => panic!("expected a row write first"),
        };
        assert_eq!(deferred[0].child, first);
        assert!(matches!(plan.steps[2], WriteStep::Bind(_)));
        assert_eq!(plan.steps.len(), 3);
    }

    #[test]
    fn test_omit_keeps_relations_untouched() {
        let record = Record::new()
            .with("id", "u1")
            .with_many("Todos", vec![Record::new().with("title", "A")]);

        let root_only = plan(&record, &Omit::Associations).unwrap();
        assert_eq!(root_only.write_order(), vec!["users"]);
        assert_eq!(root_only.assemble(), record);

        let without_todos = plan(&record, &Omit::only(["Todos"])).unwrap();
        assert_eq!(without_todos.write_order(), vec!["users"]);
    }

    #[test]
    fn test_omit_path_matching() {
        let omit = Omit::only(["Todos"]);
        assert!(omit.skips("Todos"));
        assert!(omit.skips("Todos.User"));
        assert!(!omit.skips("TodosArchive"));
        assert!(!Omit::None.skips("Todos"));
    }
}
