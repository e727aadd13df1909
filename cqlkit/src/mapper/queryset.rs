use std::marker::PhantomData;
use std::sync::Arc;

use crate::database::query_builder::QueryBuilder;
use crate::errors::DriverError;
use crate::session::Session;
use crate::statement::Statement;
use crate::types::{CqlValue, Row};

use super::{Model, TableSchema};

/// Immutable, lazily executed query over one model's table.
///
/// Refinements return a new query set; nothing is sent until a terminal
/// method (`count`, `all`, `first`, `get`, `fetch`) is awaited.
pub struct QuerySet<M: Model> {
    session: Session,
    schema: Arc<TableSchema>,
    filters: Vec<(String, CqlValue)>,
    limit: Option<usize>,
    allow_filtering: bool,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Clone for QuerySet<M> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            schema: self.schema.clone(),
            filters: self.filters.clone(),
            limit: self.limit,
            allow_filtering: self.allow_filtering,
            _model: PhantomData,
        }
    }
}

impl<M: Model> std::fmt::Debug for QuerySet<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySet")
            .field("table", &self.schema.table)
            .field("filters", &self.filters)
            .field("limit", &self.limit)
            .field("allow_filtering", &self.allow_filtering)
            .finish()
    }
}

impl<M: Model> QuerySet<M> {
    pub(crate) fn new(session: Session, schema: Arc<TableSchema>) -> Self {
        Self {
            session,
            schema,
            filters: Vec::new(),
            limit: None,
            allow_filtering: false,
            _model: PhantomData,
        }
    }

    /// Adds an equality restriction; unknown columns and mistyped values are rejected
    pub fn filter(&self, column: &str, value: impl Into<CqlValue>) -> Result<Self, DriverError> {
        let def = self.schema.column(column).ok_or_else(|| {
            DriverError::MappingError(format!(
                "unknown column {} for table {}",
                column, self.schema.table
            ))
        })?;
        let value = def
            .typ
            .coerce(value.into())
            .map_err(|e| DriverError::MappingError(format!("column {}: {}", column, e)))?;

        let mut next = self.clone();
        next.filters.retain(|(name, _)| name != column);
        next.filters.push((column.to_string(), value));
        Ok(next)
    }

    pub fn limit(&self, limit: usize) -> Self {
        let mut next = self.clone();
        next.limit = Some(limit);
        next
    }

    pub fn allow_filtering(&self) -> Self {
        let mut next = self.clone();
        next.allow_filtering = true;
        next
    }

    pub fn filters(&self) -> &[(String, CqlValue)] {
        &self.filters
    }

    fn filter_parts(&self) -> (Vec<&str>, Vec<CqlValue>) {
        self.filters
            .iter()
            .map(|(name, value)| (name.as_str(), value.clone()))
            .unzip()
    }

    fn select(&self, limit: Option<usize>) -> Statement {
        let (columns, values) = self.filter_parts();
        let text = QueryBuilder::build_select_query(
            self.schema.keyspace.as_deref(),
            &self.schema.table,
            &[],
            &columns,
            limit,
            self.allow_filtering,
        );
        Statement::new(text).bind(values).idempotent(true)
    }

    pub async fn count(&self) -> Result<i64, DriverError> {
        let (columns, values) = self.filter_parts();
        let text = QueryBuilder::build_count_query(
            self.schema.keyspace.as_deref(),
            &self.schema.table,
            &columns,
            self.allow_filtering,
        );
        let result = self
            .session
            .execute(Statement::new(text).bind(values).idempotent(true))
            .await?;
        match result.first() {
            Some(row) => row.get_as::<i64>("count"),
            None => Ok(0),
        }
    }

    /// Runs the query; rows are decoded as the iterator is advanced
    pub async fn fetch(&self) -> Result<ModelIter<M>, DriverError> {
        let rows = if self.limit == Some(0) {
            Vec::new()
        } else {
            self.session
                .execute(self.select(self.limit))
                .await?
                .into_rows()
        };
        Ok(ModelIter {
            rows: rows.into_iter(),
            _model: PhantomData,
        })
    }

    pub async fn all(&self) -> Result<Vec<M>, DriverError> {
        self.fetch().await?.collect()
    }

    pub async fn first(&self) -> Result<Option<M>, DriverError> {
        if self.limit == Some(0) {
            return Ok(None);
        }
        let result = self.session.execute(self.select(Some(1))).await?;
        result.first().map(M::from_row).transpose()
    }

    /// The single matching record; none or several matches is an error
    pub async fn get(&self) -> Result<M, DriverError> {
        let result = self.session.execute(self.select(Some(2))).await?;
        match result.all() {
            [row] => M::from_row(row),
            [] => Err(DriverError::MappingError(format!(
                "{} matching query does not exist",
                self.schema.table
            ))),
            _ => Err(DriverError::MappingError(format!(
                "multiple {} rows returned for get()",
                self.schema.table
            ))),
        }
    }
}

/// Iterator decoding one model per row
pub struct ModelIter<M: Model> {
    rows: std::vec::IntoIter<Row>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Iterator for ModelIter<M> {
    type Item = Result<M, DriverError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next().map(|row| M::from_row(&row))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}
