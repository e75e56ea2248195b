pub mod context;
pub mod ddl;
pub mod delete;
pub mod dml;
#[allow(clippy::module_inception)]
pub mod executor;
pub mod query;
pub mod update;

pub use context::ExecutionContext;
pub use executor::{ExecutorPipeline, StatementExecutor};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType, DbError, Value};
    use crate::query::{
        CreateTableStmt, DeleteStmt, InsertStmt, JoinClause, OrderByExpr, SelectStmt, Statement, UpdateStmt, col,
    };
    use crate::storage::{InMemoryStorage, Snapshot};
    use std::sync::Arc;

    fn snapshot(tx_id: u64) -> Snapshot {
        Snapshot {
            tx_id,
            active: Arc::new([tx_id].into_iter().collect()),
            aborted: Arc::new(Default::default()),
            max_tx_id: tx_id + 1,
        }
    }

    fn run(storage: &InMemoryStorage, stmt: Statement) -> crate::core::Result<crate::result::QueryResult> {
        let snap = snapshot(1);
        let ctx = ExecutionContext::new(storage, &snap);
        ExecutorPipeline::with_default_executors().execute(&stmt, &ctx)
    }

    fn setup() -> InMemoryStorage {
        let storage = InMemoryStorage::new();
        run(
            &storage,
            Statement::CreateTable(CreateTableStmt {
                table_name: "users".into(),
                columns: vec![
                    Column::new("id", DataType::Text).primary_key(),
                    Column::new("first_name", DataType::Text).not_null(),
                ],
                if_not_exists: false,
            }),
        )
        .unwrap();
        run(
            &storage,
            Statement::CreateTable(CreateTableStmt {
                table_name: "todos".into(),
                columns: vec![
                    Column::new("id", DataType::Integer).primary_key().auto_increment(),
                    Column::new("user_id", DataType::Text).not_null().references("users", "id"),
                    Column::new("title", DataType::Text).not_null(),
                ],
                if_not_exists: false,
            }),
        )
        .unwrap();
        storage
    }

    fn insert_users(storage: &InMemoryStorage, ids: &[&str]) {
        run(
            storage,
            Statement::Insert(InsertStmt {
                table_name: "users".into(),
                columns: vec!["id".into(), "first_name".into()],
                rows: ids
                    .iter()
                    .map(|id| vec![Value::from(*id), Value::from(format!("User {}", id))])
                    .collect(),
            }),
        )
        .unwrap();
    }

    #[test]
    fn test_insert_returns_generated_keys() {
        let storage = setup();
        insert_users(&storage, &["u1"]);

        let result = run(
            &storage,
            Statement::Insert(InsertStmt {
                table_name: "todos".into(),
                columns: vec!["user_id".into(), "title".into()],
                rows: vec![
                    vec![Value::from("u1"), Value::from("A")],
                    vec![Value::from("u1"), Value::from("B")],
                ],
            }),
        )
        .unwrap();

        assert_eq!(result.rows_affected, 2);
        assert_eq!(result.columns, vec!["id", "user_id", "title"]);
        assert_eq!(result.rows[0][0], Value::Integer(1));
        assert_eq!(result.rows[1][0], Value::Integer(2));
    }

    #[test]
    fn test_failed_batch_leaves_nothing() {
        let storage = setup();
        let err = run(
            &storage,
            Statement::Insert(InsertStmt {
                table_name: "users".into(),
                columns: vec!["id".into(), "first_name".into()],
                rows: vec![
                    vec![Value::from("x"), Value::from("first")],
                    vec![Value::from("x"), Value::from("again")],
                ],
            }),
        )
        .unwrap_err();
        assert!(err.is_constraint_violation());

        let count = run(
            &storage,
            Statement::Select(SelectStmt {
                count_only: true,
                ..SelectStmt::from_table("users")
            }),
        )
        .unwrap();
        assert_eq!(count.scalar_count().unwrap(), 0);
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let storage = setup();
        let err = run(
            &storage,
            Statement::Insert(InsertStmt {
                table_name: "todos".into(),
                columns: vec!["user_id".into(), "title".into()],
                rows: vec![vec![Value::from("ghost"), Value::from("A")]],
            }),
        )
        .unwrap_err();
        match err {
            DbError::ConstraintViolation(msg) => assert!(msg.contains("non-existent key")),
            other => panic!("Expected ConstraintViolation, got {:?}", other),
        }

        insert_users(&storage, &["u1"]);
        run(
            &storage,
            Statement::Insert(InsertStmt {
                table_name: "todos".into(),
                columns: vec!["user_id".into(), "title".into()],
                rows: vec![vec![Value::from("u1"), Value::from("A")]],
            }),
        )
        .unwrap();

        let err = run(
            &storage,
            Statement::Delete(DeleteStmt {
                table_name: "users".into(),
                selection: Some(col("id").eq("u1")),
            }),
        )
        .unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn test_select_filter_order_limit() {
        let storage = setup();
        insert_users(&storage, &["3", "1", "2", "4"]);

        let mut select = SelectStmt::from_table("users");
        select.selection = Some(col("id").in_list(["1", "2", "3"]));
        select.order_by = vec![OrderByExpr::desc("id")];
        select.limit = Some(2);
        let result = run(&storage, Statement::Select(select)).unwrap();

        let ids: Vec<&Value> = result.rows.iter().map(|row| &row[0]).collect();
        assert_eq!(ids, vec![&Value::from("3"), &Value::from("2")]);

        let mut select = SelectStmt::from_table("users");
        select.projection = vec!["first_name".into()];
        select.selection = Some(col("first_name").like("%User 4%"));
        let result = run(&storage, Statement::Select(select)).unwrap();
        assert_eq!(result.columns, vec!["first_name"]);
        assert_eq!(result.rows, vec![vec![Value::from("User 4")]]);
    }

    #[test]
    fn test_update_counts_rows() {
        let storage = setup();
        insert_users(&storage, &["1", "2"]);

        let result = run(
            &storage,
            Statement::Update(UpdateStmt {
                table_name: "users".into(),
                assignments: vec![("first_name".into(), Value::from("Renamed"))],
                selection: Some(col("id").eq("2")),
            }),
        )
        .unwrap();
        assert_eq!(result.rows_affected, 1);

        let mut select = SelectStmt::from_table("users");
        select.selection = Some(col("first_name").eq("Renamed"));
        assert_eq!(run(&storage, Statement::Select(select)).unwrap().row_count(), 1);
    }

    #[test]
    fn test_join_carries_link_column() {
        let storage = setup();
        insert_users(&storage, &["u1", "u2"]);
        run(
            &storage,
            Statement::Insert(InsertStmt {
                table_name: "todos".into(),
                columns: vec!["user_id".into(), "title".into()],
                rows: vec![
                    vec![Value::from("u2"), Value::from("A")],
                    vec![Value::from("u1"), Value::from("B")],
                ],
            }),
        )
        .unwrap();

        let mut select = SelectStmt::from_table("users");
        select.join = Some(JoinClause {
            table_name: "todos".into(),
            left_column: "id".into(),
            right_column: "user_id".into(),
            carry: vec!["title".into()],
        });
        select.selection = Some(col("todos.title").eq("A"));
        let result = run(&storage, Statement::Select(select)).unwrap();

        assert_eq!(result.columns, vec!["id", "first_name", "todos.title"]);
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0][0], Value::from("u2"));
    }
}
