use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::DriverError;

/// A single CQL value, as bound to a statement or read from a row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CqlValue {
    Text(String),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    Blob(Vec<u8>),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Null,
}

impl CqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CqlValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CqlValue::Text(s) => serde_json::Value::String(s.clone()),
            CqlValue::Int(v) => serde_json::json!(v),
            CqlValue::BigInt(v) => serde_json::json!(v),
            CqlValue::Float(v) => serde_json::json!(v),
            CqlValue::Double(v) => serde_json::json!(v),
            CqlValue::Boolean(v) => serde_json::json!(v),
            CqlValue::Blob(bytes) => serde_json::json!(bytes),
            CqlValue::Uuid(id) => serde_json::Value::String(id.to_string()),
            CqlValue::Timestamp(ts) => serde_json::Value::String(ts.to_rfc3339()),
            CqlValue::Null => serde_json::Value::Null,
        }
    }
}

/// Renders the value as a CQL literal
impl std::fmt::Display for CqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CqlValue::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            CqlValue::Int(v) => write!(f, "{}", v),
            CqlValue::BigInt(v) => write!(f, "{}", v),
            CqlValue::Float(v) => write!(f, "{}", v),
            CqlValue::Double(v) => write!(f, "{}", v),
            CqlValue::Boolean(v) => write!(f, "{}", v),
            CqlValue::Blob(bytes) => {
                write!(f, "0x")?;
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            CqlValue::Uuid(id) => write!(f, "{}", id),
            CqlValue::Timestamp(ts) => write!(f, "{}", ts.timestamp_millis()),
            CqlValue::Null => write!(f, "null"),
        }
    }
}

macro_rules! impl_into_cql {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for CqlValue {
                fn from(v: $ty) -> Self {
                    CqlValue::$variant(v)
                }
            }
        )*
    };
}

impl_into_cql! {
    String => Text,
    i32 => Int,
    i64 => BigInt,
    f32 => Float,
    f64 => Double,
    bool => Boolean,
    Vec<u8> => Blob,
    Uuid => Uuid,
    DateTime<Utc> => Timestamp,
}

impl From<&str> for CqlValue {
    fn from(v: &str) -> Self {
        CqlValue::Text(v.to_string())
    }
}

impl<T: Into<CqlValue>> From<Option<T>> for CqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(CqlValue::Null)
    }
}

/// Column types understood by the execution layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Ascii,
    Text,
    Int,
    BigInt,
    Counter,
    Float,
    Double,
    Boolean,
    Blob,
    Uuid,
    TimeUuid,
    Timestamp,
}

impl ColumnType {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "ascii" => Some(ColumnType::Ascii),
            "text" | "varchar" => Some(ColumnType::Text),
            "int" => Some(ColumnType::Int),
            "bigint" => Some(ColumnType::BigInt),
            "counter" => Some(ColumnType::Counter),
            "float" => Some(ColumnType::Float),
            "double" => Some(ColumnType::Double),
            "boolean" => Some(ColumnType::Boolean),
            "blob" => Some(ColumnType::Blob),
            "uuid" => Some(ColumnType::Uuid),
            "timeuuid" => Some(ColumnType::TimeUuid),
            "timestamp" => Some(ColumnType::Timestamp),
            _ => None,
        }
    }

    /// Converts a value into this column's representation, the way a
    /// coordinator validates bound values against the table schema.
    pub fn coerce(&self, value: CqlValue) -> Result<CqlValue, DriverError> {
        let mismatch = |v: &CqlValue| {
            DriverError::invalid(format!("Invalid value {} for column of type {}", v, self))
        };

        match (self, value) {
            (_, CqlValue::Null) => Ok(CqlValue::Null),
            (ColumnType::Ascii | ColumnType::Text, v @ CqlValue::Text(_)) => Ok(v),
            (ColumnType::Int, v @ CqlValue::Int(_)) => Ok(v),
            (ColumnType::Int, CqlValue::BigInt(n)) => i32::try_from(n)
                .map(CqlValue::Int)
                .map_err(|_| mismatch(&CqlValue::BigInt(n))),
            (ColumnType::BigInt | ColumnType::Counter, CqlValue::Int(n)) => {
                Ok(CqlValue::BigInt(n as i64))
            }
            (ColumnType::BigInt | ColumnType::Counter, v @ CqlValue::BigInt(_)) => Ok(v),
            (ColumnType::Float, v @ CqlValue::Float(_)) => Ok(v),
            (ColumnType::Float, CqlValue::Double(n)) => Ok(CqlValue::Float(n as f32)),
            (ColumnType::Float, CqlValue::Int(n)) => Ok(CqlValue::Float(n as f32)),
            (ColumnType::Float, CqlValue::BigInt(n)) => Ok(CqlValue::Float(n as f32)),
            (ColumnType::Double, v @ CqlValue::Double(_)) => Ok(v),
            (ColumnType::Double, CqlValue::Float(n)) => Ok(CqlValue::Double(n as f64)),
            (ColumnType::Double, CqlValue::Int(n)) => Ok(CqlValue::Double(n as f64)),
            (ColumnType::Double, CqlValue::BigInt(n)) => Ok(CqlValue::Double(n as f64)),
            (ColumnType::Boolean, v @ CqlValue::Boolean(_)) => Ok(v),
            (ColumnType::Blob, v @ CqlValue::Blob(_)) => Ok(v),
            (ColumnType::Uuid | ColumnType::TimeUuid, v @ CqlValue::Uuid(_)) => Ok(v),
            (ColumnType::Uuid | ColumnType::TimeUuid, CqlValue::Text(s)) => Uuid::parse_str(&s)
                .map(CqlValue::Uuid)
                .map_err(|_| mismatch(&CqlValue::Text(s))),
            (ColumnType::Timestamp, v @ CqlValue::Timestamp(_)) => Ok(v),
            (ColumnType::Timestamp, CqlValue::BigInt(ms)) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .map(CqlValue::Timestamp)
                .ok_or_else(|| mismatch(&CqlValue::BigInt(ms))),
            (ColumnType::Timestamp, CqlValue::Int(ms)) => Utc
                .timestamp_millis_opt(ms as i64)
                .single()
                .map(CqlValue::Timestamp)
                .ok_or_else(|| mismatch(&CqlValue::Int(ms))),
            (ColumnType::Timestamp, CqlValue::Text(s)) => DateTime::parse_from_rfc3339(&s)
                .map(|ts| CqlValue::Timestamp(ts.with_timezone(&Utc)))
                .map_err(|_| mismatch(&CqlValue::Text(s))),
            (_, other) => Err(mismatch(&other)),
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnType::Ascii => "ascii",
            ColumnType::Text => "text",
            ColumnType::Int => "int",
            ColumnType::BigInt => "bigint",
            ColumnType::Counter => "counter",
            ColumnType::Float => "float",
            ColumnType::Double => "double",
            ColumnType::Boolean => "boolean",
            ColumnType::Blob => "blob",
            ColumnType::Uuid => "uuid",
            ColumnType::TimeUuid => "timeuuid",
            ColumnType::Timestamp => "timestamp",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub keyspace: String,
    pub table: String,
    pub name: String,
    pub typ: ColumnType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consistency {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    #[default]
    LocalOne,
}

/// Conversion from a column value into a Rust type
pub trait FromCqlValue: Sized {
    fn from_cql(value: &CqlValue) -> Result<Self, DriverError>;
}

fn type_error(expected: &str, value: &CqlValue) -> DriverError {
    DriverError::MappingError(format!("expected {}, found {:?}", expected, value))
}

macro_rules! impl_from_cql {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl FromCqlValue for $ty {
                fn from_cql(value: &CqlValue) -> Result<Self, DriverError> {
                    match value {
                        CqlValue::$variant(v) => Ok(v.clone()),
                        other => Err(type_error(stringify!($ty), other)),
                    }
                }
            }
        )*
    };
}

impl_from_cql! {
    String => Text,
    i32 => Int,
    f32 => Float,
    f64 => Double,
    bool => Boolean,
    Vec<u8> => Blob,
    Uuid => Uuid,
    DateTime<Utc> => Timestamp,
}

impl FromCqlValue for i64 {
    fn from_cql(value: &CqlValue) -> Result<Self, DriverError> {
        match value {
            CqlValue::BigInt(v) => Ok(*v),
            CqlValue::Int(v) => Ok(*v as i64),
            other => Err(type_error("i64", other)),
        }
    }
}

impl<T: FromCqlValue> FromCqlValue for Option<T> {
    fn from_cql(value: &CqlValue) -> Result<Self, DriverError> {
        match value {
            CqlValue::Null => Ok(None),
            other => T::from_cql(other).map(Some),
        }
    }
}

/// A row of a result set; values are addressable by position or column name
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[ColumnSpec]>,
    values: Vec<CqlValue>,
}

impl Row {
    pub fn new(columns: Arc<[ColumnSpec]>, values: Vec<CqlValue>) -> Self {
        Self { columns, values }
    }

    pub fn values(&self) -> &[CqlValue] {
        &self.values
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get_index(&self, index: usize) -> Option<&CqlValue> {
        self.values.get(index)
    }

    pub fn get(&self, name: &str) -> Option<&CqlValue> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .and_then(|i| self.values.get(i))
    }

    /// Typed accessor; a missing column reads as null
    pub fn get_as<T: FromCqlValue>(&self, name: &str) -> Result<T, DriverError> {
        let value = self.get(name).unwrap_or(&CqlValue::Null);
        T::from_cql(value).map_err(|e| DriverError::MappingError(format!("column {}: {}", name, e)))
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .columns
            .iter()
            .zip(self.values.iter())
            .map(|(c, v)| (c.name.clone(), v.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaChange {
    Created { target: String, name: String },
    Dropped { target: String, name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultKind {
    Void,
    Rows,
    SetKeyspace(String),
    SchemaChange(SchemaChange),
}

/// Outcome of a successful statement or batch
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    kind: ResultKind,
    columns: Arc<[ColumnSpec]>,
    rows: Vec<Row>,
    warnings: Vec<String>,
}

impl ResultSet {
    pub fn void() -> Self {
        Self::with_kind(ResultKind::Void)
    }

    pub fn with_kind(kind: ResultKind) -> Self {
        Self {
            kind,
            columns: Arc::from(Vec::<ColumnSpec>::new()),
            rows: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn rows(columns: Vec<ColumnSpec>, values: Vec<Vec<CqlValue>>) -> Self {
        let columns: Arc<[ColumnSpec]> = Arc::from(columns);
        let rows = values
            .into_iter()
            .map(|v| Row::new(columns.clone(), v))
            .collect();
        Self {
            kind: ResultKind::Rows,
            columns,
            rows,
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn kind(&self) -> &ResultKind {
        &self.kind
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn all(&self) -> &[Row] {
        &self.rows
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

impl IntoIterator for ResultSet {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, typ: ColumnType) -> ColumnSpec {
        ColumnSpec {
            keyspace: "elko".to_string(),
            table: "Team_Members".to_string(),
            name: name.to_string(),
            typ,
        }
    }

    #[test]
    fn test_row_access_by_name() {
        let result = ResultSet::rows(
            vec![spec("team_name", ColumnType::Text), spec("wins", ColumnType::Int)],
            vec![vec![CqlValue::from("Bobs Team"), CqlValue::Int(3)]],
        );

        let row = result.first().unwrap();
        assert_eq!(row.get_as::<String>("team_name").unwrap(), "Bobs Team");
        assert_eq!(row.get_as::<i32>("wins").unwrap(), 3);
        assert_eq!(row.get_as::<Option<String>>("missing").unwrap(), None);
        assert!(row.get_as::<i32>("team_name").is_err());
    }

    #[test]
    fn test_coerce_to_column_type() {
        let id = Uuid::new_v4();
        assert_eq!(
            ColumnType::Uuid.coerce(CqlValue::Text(id.to_string())).unwrap(),
            CqlValue::Uuid(id)
        );
        assert_eq!(
            ColumnType::BigInt.coerce(CqlValue::Int(7)).unwrap(),
            CqlValue::BigInt(7)
        );
        assert!(matches!(
            ColumnType::Timestamp.coerce(CqlValue::BigInt(0)).unwrap(),
            CqlValue::Timestamp(_)
        ));
        assert!(ColumnType::Int.coerce(CqlValue::from("seven")).is_err());
        assert_eq!(ColumnType::Text.coerce(CqlValue::Null).unwrap(), CqlValue::Null);
    }

    #[test]
    fn test_text_literal_escaping() {
        assert_eq!(CqlValue::from("Bob's").to_string(), "'Bob''s'");
        assert_eq!(CqlValue::Blob(vec![0xca, 0xfe]).to_string(), "0xcafe");
    }
}
