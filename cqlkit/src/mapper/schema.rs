use crate::types::{ColumnType, CqlValue};

/// Generator for a column value the caller left unset
pub type DefaultFn = fn() -> CqlValue;

/// One column of a mapped table
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub typ: ColumnType,
    pub partition_key: bool,
    pub clustering_key: bool,
    pub index: bool,
    pub required: bool,
    pub default: Option<DefaultFn>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, typ: ColumnType) -> Self {
        Self {
            name: name.into(),
            typ,
            partition_key: false,
            clustering_key: false,
            index: false,
            required: false,
            default: None,
        }
    }

    pub fn partition_key(mut self) -> Self {
        self.partition_key = true;
        self
    }

    /// Single-column primary key; same as `partition_key`
    pub fn primary_key(self) -> Self {
        self.partition_key()
    }

    pub fn clustering_key(mut self) -> Self {
        self.clustering_key = true;
        self
    }

    /// Adds a secondary index on the column
    pub fn index(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_with(mut self, generator: DefaultFn) -> Self {
        self.default = Some(generator);
        self
    }

    pub fn is_key(&self) -> bool {
        self.partition_key || self.clustering_key
    }
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub keyspace: Option<String>,
    pub table: String,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(keyspace: Option<&str>, table: &str, columns: Vec<ColumnDef>) -> Self {
        Self {
            keyspace: keyspace.map(str::to_string),
            table: table.to_string(),
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn partition_keys(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.partition_key)
    }

    pub fn clustering_keys(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.clustering_key)
    }

    pub fn indexed(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.index)
    }

    pub fn key_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.partition_keys().chain(self.clustering_keys())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_columns_in_declaration_order() {
        let schema = TableSchema::new(
            None,
            "scores",
            vec![
                ColumnDef::new("points", ColumnType::BigInt),
                ColumnDef::new("round", ColumnType::Int).clustering_key(),
                ColumnDef::new("player", ColumnType::Text).partition_key(),
                ColumnDef::new("team", ColumnType::Text).index(),
            ],
        );

        let keys: Vec<&str> = schema.key_columns().map(|c| c.name.as_str()).collect();
        assert_eq!(keys, vec!["player", "round"]);
        assert_eq!(schema.indexed().count(), 1);
        assert!(schema.column("nope").is_none());
    }
}
