// cqlkit/src/database/memory/store.rs
//
// Replicated table storage for the in-process cluster
// Rows of a table are kept ordered by their rendered primary key
//

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::errors::{DriverError, ServerErrorCode};
use crate::statement::Values;
use crate::types::{ColumnSpec, ColumnType, CqlValue, ResultKind, ResultSet, SchemaChange};

use super::cql::{Command, Relation, Selection, TableRef, Term};

const KEY_SEPARATOR: char = '\u{1f}';

#[derive(Debug, Clone)]
struct Table {
    keyspace: String,
    name: String,
    columns: Vec<(String, ColumnType)>,
    partition_keys: Vec<usize>,
    clustering_keys: Vec<usize>,
    indexed: HashSet<usize>,
    rows: BTreeMap<String, Vec<CqlValue>>,
}

impl Table {
    fn column_index(&self, name: &str) -> Result<usize, DriverError> {
        self.columns
            .iter()
            .position(|(c, _)| c == name)
            .ok_or_else(|| DriverError::invalid(format!("Undefined column name {}", name)))
    }

    fn is_key(&self, index: usize) -> bool {
        self.partition_keys.contains(&index) || self.clustering_keys.contains(&index)
    }

    fn key_columns(&self) -> impl Iterator<Item = usize> + '_ {
        self.partition_keys
            .iter()
            .chain(self.clustering_keys.iter())
            .copied()
    }

    fn spec(&self, index: usize) -> ColumnSpec {
        let (name, typ) = &self.columns[index];
        ColumnSpec {
            keyspace: self.keyspace.clone(),
            table: self.name.clone(),
            name: name.clone(),
            typ: *typ,
        }
    }

    fn row_key(&self, row: &[CqlValue]) -> String {
        let mut key = String::new();
        for (n, index) in self.key_columns().enumerate() {
            if n > 0 {
                key.push(KEY_SEPARATOR);
            }
            key.push_str(&row[index].to_string());
        }
        key
    }

    fn coerce(&self, index: usize, value: CqlValue) -> Result<CqlValue, DriverError> {
        let (name, typ) = &self.columns[index];
        typ.coerce(value).map_err(|err| match err {
            DriverError::ServerError { code, message } => {
                DriverError::server(code, format!("{} (column {})", message, name))
            }
            other => other,
        })
    }

    /// Every primary key column must be assigned a non-null value
    fn require_full_key(&self, assigned: &[(usize, CqlValue)]) -> Result<(), DriverError> {
        for index in self.key_columns() {
            match assigned.iter().find(|(i, _)| *i == index) {
                None => {
                    let part = if self.partition_keys.contains(&index) {
                        "partition key parts"
                    } else {
                        "clustering keys"
                    };
                    return Err(DriverError::invalid(format!(
                        "Some {} are missing: {}",
                        part, self.columns[index].0
                    )));
                }
                Some((_, CqlValue::Null)) => {
                    return Err(DriverError::invalid(format!(
                        "Invalid null value for primary key part {}",
                        self.columns[index].0
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn upsert(&mut self, assigned: &[(usize, CqlValue)]) {
        let mut candidate = vec![CqlValue::Null; self.columns.len()];
        for (index, value) in assigned {
            candidate[*index] = value.clone();
        }
        let key = self.row_key(&candidate);
        match self.rows.get_mut(&key) {
            Some(row) => {
                for (index, value) in assigned {
                    row[*index] = value.clone();
                }
            }
            None => {
                self.rows.insert(key, candidate);
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Keyspace {
    tables: HashMap<String, Table>,
}

/// Contents of every keyspace of the cluster
#[derive(Debug, Clone)]
pub struct Store {
    keyspaces: HashMap<String, Keyspace>,
}

fn bind(term: &Term, values: &Values) -> Result<CqlValue, DriverError> {
    match (term, values) {
        (Term::Literal(value), _) => Ok(value.clone()),
        (Term::Marker(i), Values::Positional(bound)) => bound.get(*i).cloned().ok_or_else(|| {
            DriverError::invalid(format!("No value bound for marker {}", i))
        }),
        (Term::Marker(_), Values::Named(_)) => Err(DriverError::invalid(
            "Positional markers cannot be bound by name",
        )),
        (Term::Named(name), Values::Named(bound)) => bound
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| DriverError::invalid(format!("No value bound for :{}", name))),
        (Term::Named(name), _) => Err(DriverError::invalid(format!(
            "Named marker :{} requires named values",
            name
        ))),
        (Term::Marker(i), Values::Empty) => Err(DriverError::invalid(format!(
            "No value bound for marker {}",
            i
        ))),
    }
}

/// Rejects bindings whose arity disagrees with the statement's `?` markers
pub fn check_arity(markers: usize, values: &Values) -> Result<(), DriverError> {
    let bound = match values {
        Values::Named(_) => return Ok(()),
        other => other.len(),
    };
    if bound != markers {
        return Err(DriverError::invalid(format!(
            "There were {} markers(?) in CQL but {} bound variables",
            markers, bound
        )));
    }
    Ok(())
}

fn applied(applied: bool) -> ResultSet {
    ResultSet::rows(
        vec![ColumnSpec {
            keyspace: String::new(),
            table: String::new(),
            name: "[applied]".to_string(),
            typ: ColumnType::Boolean,
        }],
        vec![vec![CqlValue::Boolean(applied)]],
    )
}

impl Store {
    /// A store holding only the `system.local` table
    pub fn new(cluster_name: &str, release_version: &str) -> Self {
        let columns = vec![
            ("key".to_string(), ColumnType::Text),
            ("cluster_name".to_string(), ColumnType::Text),
            ("cql_version".to_string(), ColumnType::Text),
            ("data_center".to_string(), ColumnType::Text),
            ("release_version".to_string(), ColumnType::Text),
        ];
        let mut local = Table {
            keyspace: "system".to_string(),
            name: "local".to_string(),
            columns,
            partition_keys: vec![0],
            clustering_keys: Vec::new(),
            indexed: HashSet::new(),
            rows: BTreeMap::new(),
        };
        local.upsert(&[
            (0, CqlValue::from("local")),
            (1, CqlValue::from(cluster_name)),
            (2, CqlValue::from("3.4.5")),
            (3, CqlValue::from("datacenter1")),
            (4, CqlValue::from(release_version)),
        ]);

        let mut system = Keyspace::default();
        system.tables.insert("local".to_string(), local);
        let mut keyspaces = HashMap::new();
        keyspaces.insert("system".to_string(), system);
        Self { keyspaces }
    }

    pub fn has_keyspace(&self, name: &str) -> bool {
        self.keyspaces.contains_key(name)
    }

    fn resolve<'a>(
        table: &'a TableRef,
        keyspace: Option<&'a str>,
    ) -> Result<(&'a str, &'a str), DriverError> {
        let ks = table.keyspace.as_deref().or(keyspace).ok_or_else(|| {
            DriverError::invalid(
                "No keyspace has been specified. USE a keyspace, or explicitly specify keyspace.tablename",
            )
        })?;
        Ok((ks, table.table.as_str()))
    }

    fn table(&self, ks: &str, name: &str) -> Result<&Table, DriverError> {
        self.keyspaces
            .get(ks)
            .ok_or_else(|| DriverError::invalid(format!("Keyspace {} does not exist", ks)))?
            .tables
            .get(name)
            .ok_or_else(|| DriverError::invalid(format!("unconfigured table {}", name)))
    }

    fn table_mut(&mut self, ks: &str, name: &str) -> Result<&mut Table, DriverError> {
        self.keyspaces
            .get_mut(ks)
            .ok_or_else(|| DriverError::invalid(format!("Keyspace {} does not exist", ks)))?
            .tables
            .get_mut(name)
            .ok_or_else(|| DriverError::invalid(format!("unconfigured table {}", name)))
    }

    /// Runs a read-only command
    pub fn query(
        &self,
        command: &Command,
        values: &Values,
        keyspace: Option<&str>,
    ) -> Result<ResultSet, DriverError> {
        match command {
            Command::Select {
                table,
                selection,
                relations,
                limit,
                allow_filtering,
            } => {
                let (ks, name) = Self::resolve(table, keyspace)?;
                let table = self.table(ks, name)?;
                select(table, selection, relations, limit.as_ref(), *allow_filtering, values)
            }
            Command::Use(name) => {
                if self.has_keyspace(name) {
                    Ok(ResultSet::with_kind(ResultKind::SetKeyspace(name.clone())))
                } else {
                    Err(DriverError::invalid(format!("Keyspace '{}' does not exist", name)))
                }
            }
            _ => Err(DriverError::invalid("statement modifies the cluster")),
        }
    }

    /// Runs any command, mutating the store as needed
    pub fn apply(
        &mut self,
        command: &Command,
        values: &Values,
        keyspace: Option<&str>,
    ) -> Result<ResultSet, DriverError> {
        match command {
            Command::Select { .. } | Command::Use(_) => self.query(command, values, keyspace),
            Command::CreateKeyspace {
                name,
                if_not_exists,
            } => {
                if self.keyspaces.contains_key(name) {
                    return if *if_not_exists {
                        Ok(ResultSet::void())
                    } else {
                        Err(DriverError::server(
                            ServerErrorCode::AlreadyExists,
                            format!("Keyspace {} already exists", name),
                        ))
                    };
                }
                self.keyspaces.insert(name.clone(), Keyspace::default());
                Ok(ResultSet::with_kind(ResultKind::SchemaChange(
                    SchemaChange::Created {
                        target: "KEYSPACE".to_string(),
                        name: name.clone(),
                    },
                )))
            }
            Command::CreateTable {
                table,
                if_not_exists,
                columns,
                partition_keys,
                clustering_keys,
            } => {
                let (ks, name) = Self::resolve(table, keyspace)?;
                self.create_table(
                    ks,
                    name,
                    *if_not_exists,
                    columns,
                    partition_keys,
                    clustering_keys,
                )
            }
            Command::CreateIndex {
                table,
                column,
                if_not_exists,
            } => {
                let (ks, name) = Self::resolve(table, keyspace)?;
                let table = self.table_mut(ks, name)?;
                let index = table.column_index(column)?;
                if !table.indexed.insert(index) {
                    return if *if_not_exists {
                        Ok(ResultSet::void())
                    } else {
                        Err(DriverError::server(
                            ServerErrorCode::AlreadyExists,
                            format!("Index on {}.{} already exists", name, column),
                        ))
                    };
                }
                Ok(ResultSet::with_kind(ResultKind::SchemaChange(
                    SchemaChange::Created {
                        target: "INDEX".to_string(),
                        name: format!("{}_{}_idx", name, column),
                    },
                )))
            }
            Command::DropTable { table, if_exists } => {
                let (ks, name) = Self::resolve(table, keyspace)?;
                let removed = self
                    .keyspaces
                    .get_mut(ks)
                    .and_then(|k| k.tables.remove(name))
                    .is_some();
                match (removed, if_exists) {
                    (true, _) => Ok(ResultSet::with_kind(ResultKind::SchemaChange(
                        SchemaChange::Dropped {
                            target: "TABLE".to_string(),
                            name: format!("{}.{}", ks, name),
                        },
                    ))),
                    (false, true) => Ok(ResultSet::void()),
                    (false, false) => {
                        Err(DriverError::invalid(format!("unconfigured table {}", name)))
                    }
                }
            }
            Command::Truncate { table } => {
                let (ks, name) = Self::resolve(table, keyspace)?;
                self.table_mut(ks, name)?.rows.clear();
                Ok(ResultSet::void())
            }
            Command::Insert {
                table,
                columns,
                values: terms,
                if_not_exists,
            } => {
                let (ks, name) = Self::resolve(table, keyspace)?;
                let table = self.table_mut(ks, name)?;
                let mut assigned = Vec::with_capacity(columns.len());
                for (column, term) in columns.iter().zip(terms.iter()) {
                    let index = table.column_index(column)?;
                    assigned.push((index, table.coerce(index, bind(term, values)?)?));
                }
                table.require_full_key(&assigned)?;

                if *if_not_exists {
                    let mut candidate = vec![CqlValue::Null; table.columns.len()];
                    for (index, value) in &assigned {
                        candidate[*index] = value.clone();
                    }
                    if table.rows.contains_key(&table.row_key(&candidate)) {
                        return Ok(applied(false));
                    }
                    table.upsert(&assigned);
                    return Ok(applied(true));
                }
                table.upsert(&assigned);
                Ok(ResultSet::void())
            }
            Command::Update {
                table,
                assignments,
                relations,
            } => {
                let (ks, name) = Self::resolve(table, keyspace)?;
                let table = self.table_mut(ks, name)?;
                let mut assigned = Vec::new();
                for relation in relations {
                    let index = table.column_index(&relation.column)?;
                    if !table.is_key(index) {
                        return Err(DriverError::invalid(format!(
                            "Non PRIMARY KEY columns found in where clause: {}",
                            relation.column
                        )));
                    }
                    assigned.push((index, table.coerce(index, bind(&relation.value, values)?)?));
                }
                table.require_full_key(&assigned)?;
                for (column, term) in assignments {
                    let index = table.column_index(column)?;
                    if table.is_key(index) {
                        return Err(DriverError::invalid(format!(
                            "PRIMARY KEY part {} found in SET part",
                            column
                        )));
                    }
                    assigned.push((index, table.coerce(index, bind(term, values)?)?));
                }
                table.upsert(&assigned);
                Ok(ResultSet::void())
            }
            Command::Delete { table, relations } => {
                let (ks, name) = Self::resolve(table, keyspace)?;
                let table = self.table_mut(ks, name)?;
                let mut filters = Vec::new();
                for relation in relations {
                    let index = table.column_index(&relation.column)?;
                    if !table.is_key(index) {
                        return Err(DriverError::invalid(format!(
                            "Non PRIMARY KEY columns found in where clause: {}",
                            relation.column
                        )));
                    }
                    filters.push((index, table.coerce(index, bind(&relation.value, values)?)?));
                }
                for index in &table.partition_keys {
                    if !filters.iter().any(|(i, _)| i == index) {
                        return Err(DriverError::invalid(format!(
                            "Some partition key parts are missing: {}",
                            table.columns[*index].0
                        )));
                    }
                }
                table
                    .rows
                    .retain(|_, row| !filters.iter().all(|(i, v)| &row[*i] == v));
                Ok(ResultSet::void())
            }
        }
    }

    /// Applies every mutation or none of them
    pub fn apply_batch(
        &mut self,
        statements: &[(Command, &Values)],
        keyspace: Option<&str>,
    ) -> Result<ResultSet, DriverError> {
        let mut staged = self.clone();
        for (command, values) in statements {
            if !command.is_mutation() {
                return Err(DriverError::invalid(
                    "Only INSERT, UPDATE and DELETE statements are allowed in a batch",
                ));
            }
            staged.apply(command, values, keyspace)?;
        }
        *self = staged;
        Ok(ResultSet::void())
    }

    fn create_table(
        &mut self,
        ks: &str,
        name: &str,
        if_not_exists: bool,
        columns: &[(String, ColumnType)],
        partition_keys: &[String],
        clustering_keys: &[String],
    ) -> Result<ResultSet, DriverError> {
        let keyspace = self
            .keyspaces
            .get_mut(ks)
            .ok_or_else(|| DriverError::invalid(format!("Keyspace {} does not exist", ks)))?;
        if keyspace.tables.contains_key(name) {
            return if if_not_exists {
                Ok(ResultSet::void())
            } else {
                Err(DriverError::server(
                    ServerErrorCode::AlreadyExists,
                    format!("Table {}.{} already exists", ks, name),
                ))
            };
        }
        if partition_keys.is_empty() {
            return Err(DriverError::invalid(format!(
                "No PRIMARY KEY specified for table {}",
                name
            )));
        }
        let mut seen = HashSet::new();
        for (column, _) in columns {
            if !seen.insert(column.as_str()) {
                return Err(DriverError::invalid(format!(
                    "Multiple definition of identifier {}",
                    column
                )));
            }
        }
        let position = |key: &String| {
            columns.iter().position(|(c, _)| c == key).ok_or_else(|| {
                DriverError::invalid(format!(
                    "Unknown definition {} referenced in PRIMARY KEY",
                    key
                ))
            })
        };

        let table = Table {
            keyspace: ks.to_string(),
            name: name.to_string(),
            columns: columns.to_vec(),
            partition_keys: partition_keys
                .iter()
                .map(position)
                .collect::<Result<_, _>>()?,
            clustering_keys: clustering_keys
                .iter()
                .map(position)
                .collect::<Result<_, _>>()?,
            indexed: HashSet::new(),
            rows: BTreeMap::new(),
        };
        keyspace.tables.insert(name.to_string(), table);

        Ok(ResultSet::with_kind(ResultKind::SchemaChange(
            SchemaChange::Created {
                target: "TABLE".to_string(),
                name: format!("{}.{}", ks, name),
            },
        )))
    }
}

/// Restrictions on columns that are neither keys nor indexed need ALLOW FILTERING
fn check_filtering(
    table: &Table,
    filters: &[(usize, CqlValue)],
    allow_filtering: bool,
) -> Result<(), DriverError> {
    if filters.is_empty() || allow_filtering {
        return Ok(());
    }
    let restricted: HashSet<usize> = filters.iter().map(|(i, _)| *i).collect();
    let uses_index = restricted.iter().any(|i| table.indexed.contains(i));
    let unindexed_regular = restricted
        .iter()
        .any(|i| !table.is_key(*i) && !table.indexed.contains(i));
    let partial_partition =
        !uses_index && table.partition_keys.iter().any(|i| !restricted.contains(i));

    if unindexed_regular || partial_partition {
        return Err(DriverError::invalid(
            "Cannot execute this query as it might involve data filtering and thus may have \
             unpredictable performance. If you want to execute this query despite the \
             performance unpredictability, use ALLOW FILTERING",
        ));
    }
    Ok(())
}

fn select(
    table: &Table,
    selection: &Selection,
    relations: &[Relation],
    limit: Option<&Term>,
    allow_filtering: bool,
    values: &Values,
) -> Result<ResultSet, DriverError> {
    let mut filters = Vec::with_capacity(relations.len());
    for relation in relations {
        let index = table.column_index(&relation.column)?;
        filters.push((index, table.coerce(index, bind(&relation.value, values)?)?));
    }
    check_filtering(table, &filters, allow_filtering)?;

    let limit = match limit {
        None => usize::MAX,
        Some(term) => match bind(term, values)? {
            CqlValue::Int(n) if n > 0 => n as usize,
            CqlValue::BigInt(n) if n > 0 => n as usize,
            other => {
                return Err(DriverError::invalid(format!(
                    "LIMIT must be strictly positive, got {}",
                    other
                )))
            }
        },
    };

    let matching = table
        .rows
        .values()
        .filter(|row| filters.iter().all(|(i, v)| &row[*i] == v));

    let projection: Vec<usize> = match selection {
        Selection::Count => {
            let count = matching.count() as i64;
            return Ok(ResultSet::rows(
                vec![ColumnSpec {
                    keyspace: table.keyspace.clone(),
                    table: table.name.clone(),
                    name: "count".to_string(),
                    typ: ColumnType::BigInt,
                }],
                vec![vec![CqlValue::BigInt(count)]],
            ));
        }
        Selection::All => (0..table.columns.len()).collect(),
        Selection::Columns(names) => names
            .iter()
            .map(|n| table.column_index(n))
            .collect::<Result<_, _>>()?,
    };

    let rows = matching
        .take(limit)
        .map(|row| projection.iter().map(|i| row[*i].clone()).collect())
        .collect();
    let columns = projection.iter().map(|i| table.spec(*i)).collect();
    Ok(ResultSet::rows(columns, rows))
}
