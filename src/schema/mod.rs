pub mod descriptor;
pub mod registry;

pub use descriptor::{
    AutoBehavior, ColumnDescriptor, EntityDescriptor, EntityDescriptorBuilder, JoinTable, RelationKind,
    RelationshipDescriptor, key_of,
};
pub use registry::{SchemaRegistry, validate_descriptor};
