pub mod builder;
pub mod condition;
pub mod pattern;
pub mod statement;

pub use builder::Query;
pub use condition::{ColumnRef, CompareOp, Condition, col};
pub use statement::{
    CreateTableStmt, DeleteStmt, InsertStmt, JoinClause, OrderByExpr, ParameterizedSql, SelectStmt, Statement,
    UpdateStmt,
};
