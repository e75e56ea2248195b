// ============================================================================
// relmapper
// ============================================================================
//
// Association-aware persistence core. Typed entities are described once in a
// schema registry, mapped to rows, written as whole object graphs inside
// transactions and read back with eager-loaded relationships, over an
// embedded MVCC engine reached through a connection pool.
//
// Layers, leaves first:
//   core         values, column types, errors
//   storage      versioned tables and indexes
//   transaction  MVCC transaction bookkeeping
//   executor     statement executors (DDL, DML, SELECT with joins)
//   facade       the engine tying storage, transactions and executors
//   connection   connections, pool, configuration
//   schema       entity descriptors and the registry
//   mapper       records, the Entity trait, row mapping
//   relation     write ordering and eager loading
//   query        conditions, statements, the query builder
//   session      Database and Transaction
//
// ============================================================================

pub mod connection;
pub mod core;
mod executor;
pub mod facade;
pub mod mapper;
pub mod prelude;
pub mod query;
pub mod relation;
pub mod result;
pub mod schema;
pub mod session;
pub mod storage;
pub mod transaction;

pub use connection::config::ConnectionConfig;
pub use connection::pool::{ConnectionPool, PoolGuard, PoolStats};
pub use crate::core::{DataType, DbError, FromValue, Result, Value};
pub use facade::InMemoryEngine;
pub use mapper::{Entity, Record, RelationValue, RowMapper, WriteMode, records_of};
pub use query::{Condition, OrderByExpr, Query, Statement, col};
pub use relation::{Omit, Preload};
pub use result::{QueryResult, WriteResult};
pub use schema::{
    AutoBehavior, ColumnDescriptor, EntityDescriptor, RelationKind, RelationshipDescriptor, SchemaRegistry,
};
pub use session::{Database, Executor, Transaction};
