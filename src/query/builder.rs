use super::{Condition, OrderByExpr, SelectStmt, Statement, col};
use crate::core::{DbError, Result};
use crate::mapper::{Entity, Record, RowMapper};
use crate::relation::{Preload, expand_for_read};
use crate::result::WriteResult;
use crate::schema::EntityDescriptor;
use crate::session::Executor;
use std::marker::PhantomData;
use std::sync::Arc;

/// Composable query over one entity type.
///
/// Chained `filter` calls are conjunctive. Soft-deleted rows are hidden
/// unless `unscoped` is set. Single-result terminals (`first`, `last`,
/// `take`) fail with `NotFound` when nothing matches; `find` returns an
/// empty vector instead.
pub struct Query<'e, T: Entity> {
    executor: &'e dyn Executor,
    filters: Vec<Condition>,
    projection: Vec<String>,
    omitted: Vec<String>,
    order_by: Vec<OrderByExpr>,
    limit: Option<usize>,
    offset: Option<usize>,
    unscoped: bool,
    preloads: Vec<Preload>,
    _entity: PhantomData<fn() -> T>,
}

impl<'e, T: Entity> Query<'e, T> {
    pub fn new(executor: &'e dyn Executor) -> Self {
        Self {
            executor,
            filters: Vec::new(),
            projection: Vec::new(),
            omitted: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            unscoped: false,
            preloads: Vec::new(),
            _entity: PhantomData,
        }
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.filters.push(condition);
        self
    }

    /// Restricts the returned columns. Use with
    /// [`find_records`](Self::find_records) when the projection leaves out
    /// fields the entity requires.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Leaves the named columns out of the selected set.
    pub fn omit<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.omitted.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn order_by(mut self, order: OrderByExpr) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Includes soft-deleted rows; `delete` becomes a hard delete.
    pub fn unscoped(mut self) -> Self {
        self.unscoped = true;
        self
    }

    /// Eager-loads a relationship path such as `"Todos"` or `"Todos.User"`.
    pub fn preload(mut self, path: impl Into<String>) -> Self {
        self.preloads.push(Preload::new(path));
        self
    }

    /// Eager-loads a path, keeping only related rows matching `condition`.
    pub fn preload_with(mut self, path: impl Into<String>, condition: Condition) -> Self {
        self.preloads.push(Preload::with_condition(path, condition));
        self
    }

    pub async fn find(self) -> Result<Vec<T>> {
        self.find_records().await?.into_iter().map(T::from_record).collect()
    }

    /// Matching rows as dynamic records, with preloads applied.
    pub async fn find_records(self) -> Result<Vec<Record>> {
        let descriptor = self.descriptor()?;
        let stmt = Statement::Select(self.select_stmt(&descriptor));
        let result = self.executor.execute(&stmt).await?;

        let mut records = RowMapper::from_result(&result, &descriptor)?;
        expand_for_read(self.executor, &descriptor, &mut records, &self.preloads).await?;
        Ok(records)
    }

    /// First row by primary key.
    pub async fn first(mut self) -> Result<T> {
        let descriptor = self.descriptor()?;
        for column in descriptor.primary_key() {
            self.order_by.push(OrderByExpr::asc(column.column.clone()));
        }
        self.limit = Some(1);
        self.single(&descriptor).await
    }

    /// Last row by primary key.
    pub async fn last(mut self) -> Result<T> {
        let descriptor = self.descriptor()?;
        for column in descriptor.primary_key() {
            self.order_by.push(OrderByExpr::desc(column.column.clone()));
        }
        self.limit = Some(1);
        self.single(&descriptor).await
    }

    /// Any one matching row, without ordering.
    pub async fn take(mut self) -> Result<T> {
        let descriptor = self.descriptor()?;
        self.limit = Some(1);
        self.single(&descriptor).await
    }

    pub async fn count(self) -> Result<u64> {
        let descriptor = self.descriptor()?;
        let stmt = SelectStmt {
            count_only: true,
            limit: None,
            offset: None,
            order_by: Vec::new(),
            projection: Vec::new(),
            ..self.select_stmt(&descriptor)
        };
        self.executor.execute(&Statement::Select(stmt)).await?.scalar_count()
    }

    /// Deletes every matching row (soft delete unless unscoped).
    pub async fn delete(self) -> Result<WriteResult> {
        let descriptor = self.descriptor()?;
        let selection = Condition::all(self.filters.clone());
        crate::session::persist::delete_where(self.executor, &descriptor, selection, self.unscoped).await
    }

    async fn single(self, descriptor: &EntityDescriptor) -> Result<T> {
        let table = descriptor.table().to_string();
        let record = self
            .find_records()
            .await?
            .into_iter()
            .next()
            .ok_or(DbError::NotFound(table))?;
        T::from_record(record)
    }

    fn descriptor(&self) -> Result<Arc<EntityDescriptor>> {
        self.executor.registry().describe::<T>()
    }

    fn select_stmt(&self, descriptor: &EntityDescriptor) -> SelectStmt {
        let mut conditions = self.filters.clone();
        if !self.unscoped
            && let Some(soft_delete) = descriptor.soft_delete_column()
        {
            conditions.push(col(soft_delete.column.clone()).is_null());
        }

        let projection = if self.omitted.is_empty() {
            self.projection.clone()
        } else {
            let base = if self.projection.is_empty() {
                descriptor.column_names()
            } else {
                self.projection.clone()
            };
            base.into_iter().filter(|c| !self.omitted.contains(c)).collect()
        };

        SelectStmt {
            projection,
            selection: Condition::all(conditions),
            order_by: self.order_by.clone(),
            limit: self.limit,
            offset: self.offset,
            ..SelectStmt::from_table(descriptor.table())
        }
    }
}
