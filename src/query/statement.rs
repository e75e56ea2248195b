//! Structured statements exchanged with the storage transport.

use super::condition::Condition;
use crate::core::{Column, Row, Value};

#[derive(Debug, Clone)]
pub enum Statement {
    CreateTable(CreateTableStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
    Select(SelectStmt),
}

#[derive(Debug, Clone)]
pub struct CreateTableStmt {
    pub table_name: String,
    pub columns: Vec<Column>,
    pub if_not_exists: bool,
}

/// INSERT; the transport answers with the stored rows (all columns, in
/// schema order) so generated keys flow back to the caller.
#[derive(Debug, Clone)]
pub struct InsertStmt {
    pub table_name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone)]
pub struct UpdateStmt {
    pub table_name: String,
    pub assignments: Vec<(String, Value)>,
    pub selection: Option<Condition>,
}

#[derive(Debug, Clone)]
pub struct DeleteStmt {
    pub table_name: String,
    pub selection: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderByExpr {
    pub column: String,
    pub descending: bool,
}

impl OrderByExpr {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// Inner join used by many-to-many preloads:
/// `JOIN <table> ON <table>.<right_column> = <main>.<left_column>`.
/// The `carry` columns of the joined table are appended to every output row
/// under the qualified name `<table>.<column>`.
#[derive(Debug, Clone)]
pub struct JoinClause {
    pub table_name: String,
    pub left_column: String,
    pub right_column: String,
    pub carry: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SelectStmt {
    pub table_name: String,
    /// Empty means every column.
    pub projection: Vec<String>,
    pub join: Option<JoinClause>,
    pub selection: Option<Condition>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub count_only: bool,
}

impl SelectStmt {
    pub fn from_table(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..Default::default()
        }
    }
}

/// SQL text plus positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterizedSql {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn table_name(&self) -> &str {
        match self {
            Statement::CreateTable(stmt) => &stmt.table_name,
            Statement::Insert(stmt) => &stmt.table_name,
            Statement::Update(stmt) => &stmt.table_name,
            Statement::Delete(stmt) => &stmt.table_name,
            Statement::Select(stmt) => &stmt.table_name,
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, Statement::Select(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Statement::CreateTable(_) => "CREATE TABLE",
            Statement::Insert(_) => "INSERT",
            Statement::Update(_) => "UPDATE",
            Statement::Delete(_) => "DELETE",
            Statement::Select(_) => "SELECT",
        }
    }

    pub fn to_sql(&self) -> ParameterizedSql {
        let mut params = Vec::new();
        let sql = match self {
            Statement::CreateTable(stmt) => {
                let columns: Vec<String> = stmt.columns.iter().map(Column::to_sql).collect();
                let primary: Vec<&str> = stmt
                    .columns
                    .iter()
                    .filter(|col| col.primary_key)
                    .map(|col| col.name.as_str())
                    .collect();
                let mut body = columns.join(", ");
                if !primary.is_empty() {
                    body.push_str(&format!(", PRIMARY KEY ({})", primary.join(", ")));
                }
                format!(
                    "CREATE TABLE {}{} ({})",
                    if stmt.if_not_exists { "IF NOT EXISTS " } else { "" },
                    stmt.table_name,
                    body
                )
            }
            Statement::Insert(stmt) => {
                let tuples: Vec<String> = stmt
                    .rows
                    .iter()
                    .map(|row| {
                        let slots: Vec<String> = row
                            .iter()
                            .map(|value| {
                                params.push(value.clone());
                                format!("${}", params.len())
                            })
                            .collect();
                        format!("({})", slots.join(", "))
                    })
                    .collect();
                format!(
                    "INSERT INTO {} ({}) VALUES {} RETURNING *",
                    stmt.table_name,
                    stmt.columns.join(", "),
                    tuples.join(", ")
                )
            }
            Statement::Update(stmt) => {
                let sets: Vec<String> = stmt
                    .assignments
                    .iter()
                    .map(|(column, value)| {
                        params.push(value.clone());
                        format!("{} = ${}", column, params.len())
                    })
                    .collect();
                let mut sql = format!("UPDATE {} SET {}", stmt.table_name, sets.join(", "));
                if let Some(selection) = &stmt.selection {
                    sql.push_str(&format!(" WHERE {}", selection.to_sql(&mut params)));
                }
                sql
            }
            Statement::Delete(stmt) => {
                let mut sql = format!("DELETE FROM {}", stmt.table_name);
                if let Some(selection) = &stmt.selection {
                    sql.push_str(&format!(" WHERE {}", selection.to_sql(&mut params)));
                }
                sql
            }
            Statement::Select(stmt) => select_sql(stmt, &mut params),
        };
        ParameterizedSql { sql, params }
    }
}

fn select_sql(stmt: &SelectStmt, params: &mut Vec<Value>) -> String {
    let mut projection: Vec<String> = if stmt.projection.is_empty() {
        vec![format!("{}.*", stmt.table_name)]
    } else {
        stmt.projection
            .iter()
            .map(|column| format!("{}.{}", stmt.table_name, column))
            .collect()
    };

    if let Some(join) = &stmt.join {
        projection.extend(join.carry.iter().map(|c| format!("{}.{}", join.table_name, c)));
    }

    let projection = if stmt.count_only {
        "COUNT(*)".to_string()
    } else {
        projection.join(", ")
    };

    let mut sql = format!("SELECT {} FROM {}", projection, stmt.table_name);

    if let Some(join) = &stmt.join {
        sql.push_str(&format!(
            " JOIN {} ON {}.{} = {}.{}",
            join.table_name, join.table_name, join.right_column, stmt.table_name, join.left_column
        ));
    }
    if let Some(selection) = &stmt.selection {
        sql.push_str(&format!(" WHERE {}", selection.to_sql(params)));
    }
    if !stmt.order_by.is_empty() {
        let order: Vec<String> = stmt
            .order_by
            .iter()
            .map(|o| format!("{} {}", o.column, if o.descending { "DESC" } else { "ASC" }))
            .collect();
        sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
    }
    if let Some(limit) = stmt.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    if let Some(offset) = stmt.offset {
        sql.push_str(&format!(" OFFSET {}", offset));
    }
    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::condition::col;

    #[test]
    fn test_insert_sql() {
        let stmt = Statement::Insert(InsertStmt {
            table_name: "users".into(),
            columns: vec!["id".into(), "first_name".into()],
            rows: vec![
                vec![Value::from("2"), Value::from("User 2")],
                vec![Value::from("3"), Value::from("User 3")],
            ],
        });
        let rendered = stmt.to_sql();
        assert_eq!(
            rendered.sql,
            "INSERT INTO users (id, first_name) VALUES ($1, $2), ($3, $4) RETURNING *"
        );
        assert_eq!(rendered.params.len(), 4);
    }

    #[test]
    fn test_select_sql_first() {
        let mut select = SelectStmt::from_table("users");
        select.selection = Some(col("id").eq("user_456"));
        select.order_by = vec![OrderByExpr::asc("id")];
        select.limit = Some(1);
        let rendered = Statement::Select(select).to_sql();
        assert_eq!(
            rendered.sql,
            "SELECT users.* FROM users WHERE id = $1 ORDER BY id ASC LIMIT 1"
        );
    }

    #[test]
    fn test_select_sql_join() {
        let mut select = SelectStmt::from_table("products");
        select.join = Some(JoinClause {
            table_name: "user_like_product".into(),
            left_column: "id".into(),
            right_column: "product_id".into(),
            carry: vec!["user_id".into()],
        });
        select.selection = Some(col("user_like_product.user_id").in_list(["1"]));
        let rendered = Statement::Select(select).to_sql();
        assert_eq!(
            rendered.sql,
            "SELECT products.*, user_like_product.user_id FROM products \
             JOIN user_like_product ON user_like_product.product_id = products.id \
             WHERE user_like_product.user_id IN ($1)"
        );
    }

    #[test]
    fn test_update_sql() {
        let stmt = Statement::Update(UpdateStmt {
            table_name: "wallets".into(),
            assignments: vec![("balance".into(), Value::Integer(10))],
            selection: Some(col("id").eq("20")),
        });
        assert_eq!(
            stmt.to_sql().sql,
            "UPDATE wallets SET balance = $1 WHERE id = $2"
        );
    }
}
