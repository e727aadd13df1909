use crate::batch::BatchType;
use crate::mapper::TableSchema;

/// CQL text generation for the mapper and the batch renderer
pub struct QueryBuilder;

impl QueryBuilder {
    /// Quotes an identifier unless it is a plain lower-case name
    pub fn quote_identifier(name: &str) -> String {
        let plain = name
            .chars()
            .next()
            .map(|c| c.is_ascii_lowercase())
            .unwrap_or(false)
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

        if plain {
            name.to_string()
        } else {
            format!("\"{}\"", name.replace('"', "\"\""))
        }
    }

    /// Inverse of `quote_identifier`: quoted names keep their case, plain
    /// names fold to lower case
    pub fn unquote_identifier(name: &str) -> String {
        let name = name.trim();
        match name.strip_prefix('"').and_then(|n| n.strip_suffix('"')) {
            Some(inner) => inner.replace("\"\"", "\""),
            None => name.to_lowercase(),
        }
    }

    /// Keyspace named by a `USE` statement, or None for any other statement
    pub fn use_target(text: &str) -> Option<String> {
        let text = text.trim_start();
        let head = text.get(..3)?;
        let rest = &text[3..];
        if !head.eq_ignore_ascii_case("use") || !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let keyspace = rest.trim().trim_end_matches(';').trim_end();
        if keyspace.is_empty() {
            return None;
        }
        Some(Self::unquote_identifier(keyspace))
    }

    pub fn qualified_table(keyspace: Option<&str>, table: &str) -> String {
        match keyspace {
            Some(ks) => format!(
                "{}.{}",
                Self::quote_identifier(ks),
                Self::quote_identifier(table)
            ),
            None => Self::quote_identifier(table),
        }
    }

    fn column_list(columns: &[&str]) -> String {
        columns
            .iter()
            .map(|c| Self::quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn where_clause(filters: &[&str]) -> String {
        if filters.is_empty() {
            return String::new();
        }
        let predicates = filters
            .iter()
            .map(|c| format!("{} = ?", Self::quote_identifier(c)))
            .collect::<Vec<_>>()
            .join(" AND ");
        format!(" WHERE {}", predicates)
    }

    /// Build an INSERT query with one `?` marker per column
    pub fn build_insert_query(keyspace: Option<&str>, table: &str, columns: &[&str]) -> String {
        let markers = vec!["?"; columns.len()].join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            Self::qualified_table(keyspace, table),
            Self::column_list(columns),
            markers
        )
    }

    /// Build a SELECT query; no columns selects `*`
    pub fn build_select_query(
        keyspace: Option<&str>,
        table: &str,
        columns: &[&str],
        filters: &[&str],
        limit: Option<usize>,
        allow_filtering: bool,
    ) -> String {
        let projection = if columns.is_empty() {
            "*".to_string()
        } else {
            Self::column_list(columns)
        };
        let mut query = format!(
            "SELECT {} FROM {}{}",
            projection,
            Self::qualified_table(keyspace, table),
            Self::where_clause(filters)
        );
        if let Some(limit) = limit {
            query.push_str(&format!(" LIMIT {}", limit));
        }
        if allow_filtering {
            query.push_str(" ALLOW FILTERING");
        }
        query
    }

    pub fn build_count_query(
        keyspace: Option<&str>,
        table: &str,
        filters: &[&str],
        allow_filtering: bool,
    ) -> String {
        let mut query = format!(
            "SELECT COUNT(*) FROM {}{}",
            Self::qualified_table(keyspace, table),
            Self::where_clause(filters)
        );
        if allow_filtering {
            query.push_str(" ALLOW FILTERING");
        }
        query
    }

    /// Build a DELETE query keyed by the given columns
    pub fn build_delete_query(keyspace: Option<&str>, table: &str, key_columns: &[&str]) -> String {
        format!(
            "DELETE FROM {}{}",
            Self::qualified_table(keyspace, table),
            Self::where_clause(key_columns)
        )
    }

    pub fn build_create_table(schema: &TableSchema) -> String {
        let columns = schema
            .columns
            .iter()
            .map(|c| format!("{} {}", Self::quote_identifier(&c.name), c.typ))
            .collect::<Vec<_>>()
            .join(", ");

        let partition = schema
            .partition_keys()
            .map(|c| Self::quote_identifier(&c.name))
            .collect::<Vec<_>>();
        let clustering = schema
            .clustering_keys()
            .map(|c| Self::quote_identifier(&c.name))
            .collect::<Vec<_>>();

        let mut key = if partition.len() == 1 {
            partition[0].clone()
        } else {
            format!("({})", partition.join(", "))
        };
        if !clustering.is_empty() {
            key.push_str(", ");
            key.push_str(&clustering.join(", "));
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}))",
            Self::qualified_table(schema.keyspace.as_deref(), &schema.table),
            columns,
            key
        )
    }

    pub fn build_create_index(keyspace: Option<&str>, table: &str, column: &str) -> String {
        let index_name = format!("{}_{}_idx", table, column).to_lowercase();
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            Self::quote_identifier(&index_name),
            Self::qualified_table(keyspace, table),
            Self::quote_identifier(column)
        )
    }

    /// Build a batch statement
    pub fn build_batch_statements(batch_type: BatchType, queries: Vec<String>) -> String {
        let mut batch = match batch_type {
            BatchType::Logged => String::from("BEGIN BATCH\n"),
            BatchType::Unlogged => String::from("BEGIN UNLOGGED BATCH\n"),
            BatchType::Counter => String::from("BEGIN COUNTER BATCH\n"),
        };
        for query in queries {
            batch.push_str(&format!("  {};\n", query));
        }
        batch.push_str("APPLY BATCH;");
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::ColumnDef;
    use crate::types::ColumnType;

    #[test]
    fn test_use_target() {
        assert_eq!(QueryBuilder::use_target("USE elko").as_deref(), Some("elko"));
        assert_eq!(QueryBuilder::use_target("  use Elko ;").as_deref(), Some("elko"));
        assert_eq!(
            QueryBuilder::use_target("use\t\"Team \"\"A\"\"\";").as_deref(),
            Some("Team \"A\"")
        );
        assert_eq!(QueryBuilder::use_target("€€ SELECT 1"), None);
        assert_eq!(QueryBuilder::use_target("USERS"), None);
        assert_eq!(QueryBuilder::use_target("use"), None);
        assert_eq!(QueryBuilder::use_target("SELECT * FROM users"), None);
    }

    #[test]
    fn test_unquote_reverses_quote() {
        for name in ["elko", "Team_Members", "with \"quotes\""] {
            let quoted = QueryBuilder::quote_identifier(name);
            assert_eq!(QueryBuilder::unquote_identifier(&quoted), name);
        }
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(QueryBuilder::quote_identifier("team_name"), "team_name");
        assert_eq!(QueryBuilder::quote_identifier("Team_Members"), "\"Team_Members\"");
        assert_eq!(QueryBuilder::quote_identifier("1st"), "\"1st\"");
    }

    #[test]
    fn test_build_insert_query() {
        let query = QueryBuilder::build_insert_query(
            Some("elko"),
            "Team_Members",
            &["team_name", "member_name"],
        );
        assert_eq!(
            query,
            "INSERT INTO elko.\"Team_Members\" (team_name, member_name) VALUES (?, ?)"
        );
    }

    #[test]
    fn test_build_select_query() {
        let query = QueryBuilder::build_select_query(
            None,
            "example_model",
            &[],
            &["example_type"],
            Some(10),
            true,
        );
        assert_eq!(
            query,
            "SELECT * FROM example_model WHERE example_type = ? LIMIT 10 ALLOW FILTERING"
        );
    }

    #[test]
    fn test_build_create_table() {
        let schema = TableSchema::new(
            Some("elko"),
            "scores",
            vec![
                ColumnDef::new("player", ColumnType::Text).partition_key(),
                ColumnDef::new("season", ColumnType::Int).partition_key(),
                ColumnDef::new("round", ColumnType::Int).clustering_key(),
                ColumnDef::new("points", ColumnType::BigInt),
            ],
        );
        assert_eq!(
            QueryBuilder::build_create_table(&schema),
            "CREATE TABLE IF NOT EXISTS elko.scores (player text, season int, round int, \
             points bigint, PRIMARY KEY ((player, season), round))"
        );
    }

    #[test]
    fn test_build_batch_statements() {
        let queries = vec![
            "INSERT INTO ks.table1 (id, name) VALUES (1, 'test1')".to_string(),
            "INSERT INTO ks.table2 (id, value) VALUES (2, 'test2')".to_string(),
        ];

        let batch = QueryBuilder::build_batch_statements(BatchType::Logged, queries);
        assert!(batch.contains("BEGIN BATCH"));
        assert!(batch.contains("APPLY BATCH"));
    }
}
