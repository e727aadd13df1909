// cqlkit/src/database/scylla.rs
//
// Transport backed by the scylla driver, for ScyllaDB and Cassandra 4.x
//

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use scylla::batch::{Batch as ScyllaBatch, BatchType as ScyllaBatchType};
use scylla::frame::response::result::{ColumnType as ScyllaType, CqlValue as ScyllaValue};
use scylla::frame::value::CqlTimestamp;
use scylla::host_filter::AllowListHostFilter;
use scylla::query::Query;
use scylla::statement::Consistency as ScyllaConsistency;
use scylla::transport::session::PoolSize;
use scylla::{QueryResult, Session, SessionBuilder};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::batch::BatchType;
use crate::config::Credentials;
use crate::errors::DriverError;
use crate::statement::Values;
use crate::types::{ColumnSpec, ColumnType, Consistency, CqlValue, ResultKind, ResultSet};

use super::connection::{NodeConnection, Request, RequestBody, Transport};
use super::query_builder::QueryBuilder;

/// Opens one scylla session per connection, pinned to its contact point
pub struct ScyllaTransport {
    name: &'static str,
}

impl ScyllaTransport {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl Transport for ScyllaTransport {
    async fn connect(
        &self,
        address: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Arc<dyn NodeConnection>, DriverError> {
        info!("Connecting to {} node: {}", self.name, address);

        let pool_size = NonZeroUsize::new(1).unwrap_or(NonZeroUsize::MIN);
        let mut session_builder = SessionBuilder::new()
            .known_node(address)
            .host_filter(node_filter(address)?)
            .pool_size(PoolSize::PerShard(pool_size));

        if let Some(credentials) = credentials {
            session_builder = session_builder.user(&credentials.username, &credentials.password);
        }

        let session = session_builder.build().await.map_err(|e| {
            let message = format!("Failed to connect to {}: {}", address, e);
            if message.to_lowercase().contains("authenticat") {
                DriverError::AuthenticationError(message)
            } else {
                DriverError::UnavailableError(message)
            }
        })?;

        Ok(Arc::new(ScyllaConnection {
            session,
            address: address.to_string(),
            keyspace: Mutex::new(None),
        }))
    }

    fn driver_name(&self) -> &str {
        self.name
    }
}

/// Keeps a scylla session on its own node: peers found through topology
/// discovery get no connections, so every request goes to `address`
fn node_filter(address: &str) -> Result<Arc<AllowListHostFilter>, DriverError> {
    AllowListHostFilter::new([address])
        .map(Arc::new)
        .map_err(|e| DriverError::ConfigError(format!("Invalid node address {}: {}", address, e)))
}

/// ScyllaDB session wrapper serving one pool slot
pub struct ScyllaConnection {
    session: Session,
    address: String,
    keyspace: Mutex<Option<String>>,
}

impl ScyllaConnection {
    async fn ensure_keyspace(&self, keyspace: Option<&str>) -> Result<(), DriverError> {
        let Some(keyspace) = keyspace else {
            return Ok(());
        };
        if self.keyspace.lock().as_deref() == Some(keyspace) {
            return Ok(());
        }
        self.session.use_keyspace(keyspace, true).await?;
        *self.keyspace.lock() = Some(keyspace.to_string());
        Ok(())
    }
}

fn to_scylla_consistency(consistency: Consistency) -> ScyllaConsistency {
    match consistency {
        Consistency::Any => ScyllaConsistency::Any,
        Consistency::One => ScyllaConsistency::One,
        Consistency::Two => ScyllaConsistency::Two,
        Consistency::Three => ScyllaConsistency::Three,
        Consistency::Quorum => ScyllaConsistency::Quorum,
        Consistency::All => ScyllaConsistency::All,
        Consistency::LocalQuorum => ScyllaConsistency::LocalQuorum,
        Consistency::EachQuorum => ScyllaConsistency::EachQuorum,
        Consistency::LocalOne => ScyllaConsistency::LocalOne,
    }
}

fn to_scylla_value(value: &CqlValue) -> Option<ScyllaValue> {
    let converted = match value {
        CqlValue::Text(s) => ScyllaValue::Text(s.clone()),
        CqlValue::Int(v) => ScyllaValue::Int(*v),
        CqlValue::BigInt(v) => ScyllaValue::BigInt(*v),
        CqlValue::Float(v) => ScyllaValue::Float(*v),
        CqlValue::Double(v) => ScyllaValue::Double(*v),
        CqlValue::Boolean(v) => ScyllaValue::Boolean(*v),
        CqlValue::Blob(v) => ScyllaValue::Blob(v.clone()),
        CqlValue::Uuid(v) => ScyllaValue::Uuid(*v),
        CqlValue::Timestamp(ts) => ScyllaValue::Timestamp(CqlTimestamp(ts.timestamp_millis())),
        CqlValue::Null => return None,
    };
    Some(converted)
}

fn positional(values: &Values) -> Result<Vec<Option<ScyllaValue>>, DriverError> {
    match values {
        Values::Empty => Ok(Vec::new()),
        Values::Positional(values) => Ok(values.iter().map(to_scylla_value).collect()),
        Values::Named(_) => Err(DriverError::InvalidRequest(
            "named values are not supported inside batches".to_string(),
        )),
    }
}

fn from_scylla_value(value: Option<ScyllaValue>) -> Result<CqlValue, DriverError> {
    let value = match value {
        None | Some(ScyllaValue::Empty) => return Ok(CqlValue::Null),
        Some(v) => v,
    };
    let converted = match value {
        ScyllaValue::Ascii(s) | ScyllaValue::Text(s) => CqlValue::Text(s),
        ScyllaValue::Int(v) => CqlValue::Int(v),
        ScyllaValue::BigInt(v) => CqlValue::BigInt(v),
        ScyllaValue::Counter(c) => CqlValue::BigInt(c.0),
        ScyllaValue::Float(v) => CqlValue::Float(v),
        ScyllaValue::Double(v) => CqlValue::Double(v),
        ScyllaValue::Boolean(v) => CqlValue::Boolean(v),
        ScyllaValue::Blob(v) => CqlValue::Blob(v),
        ScyllaValue::Uuid(v) => CqlValue::Uuid(v),
        ScyllaValue::Timeuuid(t) => CqlValue::Uuid(
            Uuid::parse_str(&t.to_string())
                .map_err(|e| DriverError::MappingError(format!("bad timeuuid: {}", e)))?,
        ),
        ScyllaValue::Timestamp(ts) => Utc
            .timestamp_millis_opt(ts.0)
            .single()
            .map(CqlValue::Timestamp)
            .ok_or_else(|| DriverError::MappingError(format!("bad timestamp {}", ts.0)))?,
        other => {
            return Err(DriverError::MappingError(format!(
                "unsupported column value {:?}",
                other
            )))
        }
    };
    Ok(converted)
}

fn from_scylla_type(typ: &ScyllaType) -> ColumnType {
    match typ {
        ScyllaType::Ascii => ColumnType::Ascii,
        ScyllaType::Int => ColumnType::Int,
        ScyllaType::BigInt => ColumnType::BigInt,
        ScyllaType::Counter => ColumnType::Counter,
        ScyllaType::Float => ColumnType::Float,
        ScyllaType::Double => ColumnType::Double,
        ScyllaType::Boolean => ColumnType::Boolean,
        ScyllaType::Blob => ColumnType::Blob,
        ScyllaType::Uuid => ColumnType::Uuid,
        ScyllaType::Timeuuid => ColumnType::TimeUuid,
        ScyllaType::Timestamp => ColumnType::Timestamp,
        _ => ColumnType::Text,
    }
}

fn to_result_set(result: QueryResult) -> Result<ResultSet, DriverError> {
    let columns = result
        .col_specs()
        .iter()
        .map(|spec| ColumnSpec {
            keyspace: spec.table_spec().ks_name().to_string(),
            table: spec.table_spec().table_name().to_string(),
            name: spec.name().to_string(),
            typ: from_scylla_type(spec.typ()),
        })
        .collect::<Vec<_>>();

    let rows = match result.rows {
        Some(rows) => rows,
        None => return Ok(ResultSet::void()),
    };
    let values = rows
        .into_iter()
        .map(|row| {
            row.columns
                .into_iter()
                .map(from_scylla_value)
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ResultSet::rows(columns, values))
}

#[async_trait]
impl NodeConnection for ScyllaConnection {
    async fn execute(&self, request: &Request) -> Result<ResultSet, DriverError> {
        self.ensure_keyspace(request.keyspace.as_deref()).await?;
        let consistency = to_scylla_consistency(request.consistency);

        match &request.body {
            RequestBody::Query(statement) => {
                let mut query = Query::new(statement.text());
                query.set_consistency(consistency);

                if let Some(keyspace) = QueryBuilder::use_target(statement.text()) {
                    self.session.use_keyspace(keyspace.as_str(), true).await?;
                    *self.keyspace.lock() = Some(keyspace.clone());
                    return Ok(ResultSet::with_kind(ResultKind::SetKeyspace(keyspace)));
                }

                let result = match statement.values() {
                    Values::Named(named) => {
                        let values: HashMap<&str, Option<ScyllaValue>> = named
                            .iter()
                            .map(|(k, v)| (k.as_str(), to_scylla_value(v)))
                            .collect();
                        self.session.query_unpaged(query, values).await?
                    }
                    other => self.session.query_unpaged(query, positional(other)?).await?,
                };
                to_result_set(result)
            }
            RequestBody::Batch(batch) => {
                let batch_type = match batch.batch_type() {
                    BatchType::Logged => ScyllaBatchType::Logged,
                    BatchType::Unlogged => ScyllaBatchType::Unlogged,
                    BatchType::Counter => ScyllaBatchType::Counter,
                };
                let mut scylla_batch = ScyllaBatch::new(batch_type);
                scylla_batch.set_consistency(consistency);
                let mut values = Vec::with_capacity(batch.len());
                for statement in batch.statements() {
                    scylla_batch.append_statement(statement.text());
                    values.push(positional(statement.values())?);
                }
                self.session.batch(&scylla_batch, values).await?;
                Ok(ResultSet::void())
            }
        }
    }

    fn address(&self) -> &str {
        &self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversion() {
        assert_eq!(to_scylla_value(&CqlValue::Null), None);
        assert_eq!(
            from_scylla_value(to_scylla_value(&CqlValue::from("Bob"))).unwrap(),
            CqlValue::from("Bob")
        );
        assert_eq!(from_scylla_value(None).unwrap(), CqlValue::Null);
    }

    #[test]
    fn test_node_filter_requires_resolvable_address() {
        assert!(node_filter("127.0.0.1:9042").is_ok());
        assert!(matches!(
            node_filter("127.0.0.1"),
            Err(DriverError::ConfigError(_))
        ));
    }

    #[tokio::test]
    #[ignore] // Requires a running ScyllaDB node on 127.0.0.1:9042
    async fn test_release_version() {
        let transport = ScyllaTransport::new("scylla");
        let conn = transport.connect("127.0.0.1:9042", None).await.unwrap();
        let request = Request {
            body: RequestBody::Query(crate::statement::Statement::new(
                "SELECT release_version FROM system.local",
            )),
            keyspace: None,
            consistency: Consistency::LocalOne,
        };
        let result = conn.execute(&request).await.unwrap();
        assert!(result.first().is_some());
    }
}
