// cqlkit/src/mapper/mod.rs
//
// Object mapper - explicit Model implementations over generated CQL
//

mod queryset;
mod schema;

pub use queryset::{ModelIter, QuerySet};
pub use schema::{ColumnDef, DefaultFn, TableSchema};

use std::marker::PhantomData;
use std::sync::Arc;
use tracing::info;

use crate::database::query_builder::QueryBuilder;
use crate::errors::DriverError;
use crate::session::Session;
use crate::statement::Statement;
use crate::types::{ColumnSpec, CqlValue, Row};

/// A record type stored in one table
pub trait Model: Sized + Send + 'static {
    const TABLE: &'static str;
    const KEYSPACE: Option<&'static str> = None;

    fn columns() -> Vec<ColumnDef>;

    /// Column values of the record; unset columns are null
    fn to_values(&self) -> Vec<(String, CqlValue)>;

    fn from_row(row: &Row) -> Result<Self, DriverError>;

    fn schema() -> TableSchema {
        TableSchema::new(Self::KEYSPACE, Self::TABLE, Self::columns())
    }
}

/// Creates the model's table and its secondary indexes if missing
pub async fn sync_table<M: Model>(session: &Session) -> Result<(), DriverError> {
    Mapper::<M>::new(session).sync_table().await
}

/// Table-level operations for one model type
pub struct Mapper<M: Model> {
    session: Session,
    schema: Arc<TableSchema>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Mapper<M> {
    pub fn new(session: &Session) -> Self {
        Self {
            session: session.clone(),
            schema: Arc::new(M::schema()),
            _model: PhantomData,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub async fn sync_table(&self) -> Result<(), DriverError> {
        let schema = &self.schema;
        if schema.partition_keys().next().is_none() {
            return Err(DriverError::MappingError(format!(
                "model {} has no partition key",
                schema.table
            )));
        }

        self.session
            .execute(QueryBuilder::build_create_table(schema))
            .await?;
        for column in schema.indexed() {
            self.session
                .execute(QueryBuilder::build_create_index(
                    schema.keyspace.as_deref(),
                    &schema.table,
                    &column.name,
                ))
                .await?;
        }
        info!("Synced table {}", schema.table);
        Ok(())
    }

    /// Fills defaults, validates and inserts the record; returns it as stored
    pub async fn create(&self, model: &M) -> Result<M, DriverError> {
        let given = model.to_values();
        for (name, _) in &given {
            if self.schema.column(name).is_none() {
                return Err(DriverError::MappingError(format!(
                    "unknown column {} for table {}",
                    name, self.schema.table
                )));
            }
        }

        let mut stored = Vec::with_capacity(self.schema.columns.len());
        for column in &self.schema.columns {
            let mut value = given
                .iter()
                .find(|(name, _)| *name == column.name)
                .map(|(_, v)| v.clone())
                .unwrap_or(CqlValue::Null);
            if value.is_null() {
                if let Some(generator) = column.default {
                    value = generator();
                }
            }
            let value = column.typ.coerce(value).map_err(|e| {
                DriverError::MappingError(format!("column {}: {}", column.name, e))
            })?;
            if value.is_null() && (column.is_key() || column.required) {
                return Err(DriverError::MappingError(format!(
                    "column {} is required",
                    column.name
                )));
            }
            stored.push(value);
        }

        let (names, values): (Vec<&str>, Vec<CqlValue>) = self
            .schema
            .columns
            .iter()
            .zip(stored.iter())
            .filter(|(_, v)| !v.is_null())
            .map(|(c, v)| (c.name.as_str(), v.clone()))
            .unzip();
        let insert = QueryBuilder::build_insert_query(
            self.schema.keyspace.as_deref(),
            &self.schema.table,
            &names,
        );
        self.session
            .execute(Statement::new(insert).bind(values).idempotent(true))
            .await?;

        M::from_row(&Row::new(self.column_specs(), stored))
    }

    /// Deletes the row holding the record's primary key
    pub async fn delete(&self, model: &M) -> Result<(), DriverError> {
        let given = model.to_values();
        let mut names = Vec::new();
        let mut values = Vec::new();
        for column in self.schema.key_columns() {
            let value = given
                .iter()
                .find(|(name, _)| *name == column.name)
                .map(|(_, v)| v.clone())
                .unwrap_or(CqlValue::Null);
            if value.is_null() {
                return Err(DriverError::MappingError(format!(
                    "cannot delete without key column {}",
                    column.name
                )));
            }
            names.push(column.name.as_str());
            values.push(value);
        }

        let delete = QueryBuilder::build_delete_query(
            self.schema.keyspace.as_deref(),
            &self.schema.table,
            &names,
        );
        self.session
            .execute(Statement::new(delete).bind(values).idempotent(true))
            .await
            .map(|_| ())
    }

    /// Lazy query over every row of the table
    pub fn objects(&self) -> QuerySet<M> {
        QuerySet::new(self.session.clone(), self.schema.clone())
    }

    fn column_specs(&self) -> Arc<[ColumnSpec]> {
        let keyspace = self
            .schema
            .keyspace
            .clone()
            .or_else(|| self.session.keyspace())
            .unwrap_or_default();
        self.schema
            .columns
            .iter()
            .map(|c| ColumnSpec {
                keyspace: keyspace.clone(),
                table: self.schema.table.clone(),
                name: c.name.clone(),
                typ: c.typ,
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::database::memory::MemoryCluster;
    use crate::session::Cluster;
    use crate::types::ColumnType;
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq)]
    pub struct ExampleModel {
        pub example_id: Option<Uuid>,
        pub example_type: i32,
        pub created_at: Option<DateTime<Utc>>,
        pub description: Option<String>,
    }

    impl ExampleModel {
        pub fn new(example_type: i32, description: &str) -> Self {
            Self {
                example_id: None,
                example_type,
                created_at: Some(Utc::now()),
                description: Some(description.to_string()),
            }
        }
    }

    impl Model for ExampleModel {
        const TABLE: &'static str = "example_model";
        const KEYSPACE: Option<&'static str> = Some("elko");

        fn columns() -> Vec<ColumnDef> {
            vec![
                ColumnDef::new("example_id", ColumnType::Uuid)
                    .primary_key()
                    .default_with(|| CqlValue::Uuid(Uuid::new_v4())),
                ColumnDef::new("example_type", ColumnType::Int).index(),
                ColumnDef::new("created_at", ColumnType::Timestamp),
                ColumnDef::new("description", ColumnType::Text),
            ]
        }

        fn to_values(&self) -> Vec<(String, CqlValue)> {
            vec![
                ("example_id".to_string(), self.example_id.into()),
                ("example_type".to_string(), self.example_type.into()),
                ("created_at".to_string(), self.created_at.into()),
                ("description".to_string(), self.description.clone().into()),
            ]
        }

        fn from_row(row: &Row) -> Result<Self, DriverError> {
            Ok(Self {
                example_id: row.get_as("example_id")?,
                example_type: row.get_as("example_type")?,
                created_at: row.get_as("created_at")?,
                description: row.get_as("description")?,
            })
        }
    }

    /// Session on a one-node cluster with the `elko` keyspace and the
    /// example table synced
    pub async fn example_session() -> Session {
        let cluster = MemoryCluster::new(["10.0.0.1:9042"]);
        let session = Cluster::builder()
            .contact_point("10.0.0.1:9042")
            .transport(Arc::new(cluster))
            .build()
            .unwrap()
            .connect(None)
            .await
            .unwrap();
        session
            .execute("CREATE KEYSPACE IF NOT EXISTS elko")
            .await
            .unwrap();
        sync_table::<ExampleModel>(&session).await.unwrap();
        session
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{example_session, ExampleModel};
    use super::*;
    use crate::types::ColumnType;

    #[tokio::test]
    async fn test_sync_table_is_repeatable() {
        let session = example_session().await;
        sync_table::<ExampleModel>(&session).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_fills_default_key() {
        let session = example_session().await;
        let mapper = Mapper::<ExampleModel>::new(&session);

        let created = mapper.create(&ExampleModel::new(0, "example1")).await.unwrap();
        assert!(created.example_id.is_some());
        assert_eq!(created.description.as_deref(), Some("example1"));

        let fetched = mapper
            .objects()
            .filter("example_id", created.example_id)
            .unwrap()
            .get()
            .await
            .unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_delete_removes_row() {
        let session = example_session().await;
        let mapper = Mapper::<ExampleModel>::new(&session);

        let created = mapper.create(&ExampleModel::new(3, "gone soon")).await.unwrap();
        mapper.delete(&created).await.unwrap();
        assert_eq!(mapper.objects().count().await.unwrap(), 0);
        assert!(mapper.delete(&ExampleModel::new(3, "no key")).await.is_err());
    }

    #[tokio::test]
    async fn test_required_column_enforced() {
        struct Strict {
            name: Option<String>,
        }

        impl Model for Strict {
            const TABLE: &'static str = "strict";

            fn columns() -> Vec<ColumnDef> {
                vec![
                    ColumnDef::new("id", ColumnType::Int).primary_key(),
                    ColumnDef::new("name", ColumnType::Text).required(),
                ]
            }

            fn to_values(&self) -> Vec<(String, CqlValue)> {
                vec![
                    ("id".to_string(), CqlValue::Int(1)),
                    ("name".to_string(), self.name.clone().into()),
                ]
            }

            fn from_row(row: &Row) -> Result<Self, DriverError> {
                Ok(Self {
                    name: row.get_as("name")?,
                })
            }
        }

        let session = example_session().await;
        session.set_keyspace("elko").await.unwrap();
        sync_table::<Strict>(&session).await.unwrap();

        let mapper = Mapper::<Strict>::new(&session);
        let err = mapper.create(&Strict { name: None }).await.err().unwrap();
        assert!(matches!(err, DriverError::MappingError(_)));
        let stored = mapper
            .create(&Strict {
                name: Some("x".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(stored.name.as_deref(), Some("x"));
    }
}
