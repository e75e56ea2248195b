//! Everything an application needs to describe entities and talk to the
//! database.
//!
//! ```ignore
//! use relmapper::prelude::*;
//! ```

pub use crate::{
    AutoBehavior, ColumnDescriptor, ConnectionConfig, DataType, Database, DbError, Entity, EntityDescriptor,
    Executor, FromValue, Omit, OrderByExpr, Record, RelationValue, RelationshipDescriptor, Result, SchemaRegistry,
    Transaction, Value, WriteResult, col, records_of,
};
