// cqlkit/src/database/memory/cql.rs
//
// Parser for the CQL subset served by the in-process cluster
//

use uuid::Uuid;

use crate::errors::{DriverError, ServerErrorCode};
use crate::types::{ColumnType, CqlValue};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Quoted(String),
    Str(String),
    Number(String),
    Hex(Vec<u8>),
    Uuid(Uuid),
    Marker,
    Named(String),
    Symbol(char),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Literal(CqlValue),
    /// Zero-based position among the statement's `?` markers
    Marker(usize),
    Named(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub keyspace: Option<String>,
    pub table: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub column: String,
    pub value: Term,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    All,
    Columns(Vec<String>),
    Count,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Use(String),
    CreateKeyspace {
        name: String,
        if_not_exists: bool,
    },
    CreateTable {
        table: TableRef,
        if_not_exists: bool,
        columns: Vec<(String, ColumnType)>,
        partition_keys: Vec<String>,
        clustering_keys: Vec<String>,
    },
    CreateIndex {
        table: TableRef,
        column: String,
        if_not_exists: bool,
    },
    DropTable {
        table: TableRef,
        if_exists: bool,
    },
    Truncate {
        table: TableRef,
    },
    Insert {
        table: TableRef,
        columns: Vec<String>,
        values: Vec<Term>,
        if_not_exists: bool,
    },
    Update {
        table: TableRef,
        assignments: Vec<(String, Term)>,
        relations: Vec<Relation>,
    },
    Delete {
        table: TableRef,
        relations: Vec<Relation>,
    },
    Select {
        table: TableRef,
        selection: Selection,
        relations: Vec<Relation>,
        limit: Option<Term>,
        allow_filtering: bool,
    },
}

impl Command {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Command::Insert { .. } | Command::Update { .. } | Command::Delete { .. }
        )
    }
}

fn syntax_error(message: impl Into<String>) -> DriverError {
    DriverError::server(ServerErrorCode::SyntaxError, message)
}

fn tokenize(text: &str) -> Result<Vec<Token>, DriverError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '-' && chars.get(i + 1) == Some(&'-') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if c == '\'' || c == '"' {
            let quote = c;
            let mut value = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(syntax_error("unterminated quoted string")),
                    Some(&ch) if ch == quote => {
                        if chars.get(i + 1) == Some(&quote) {
                            value.push(quote);
                            i += 2;
                        } else {
                            i += 1;
                            break;
                        }
                    }
                    Some(&ch) => {
                        value.push(ch);
                        i += 1;
                    }
                }
            }
            tokens.push(if quote == '\'' {
                Token::Str(value)
            } else {
                Token::Quoted(value)
            });
        } else if c == '?' {
            tokens.push(Token::Marker);
            i += 1;
        } else if c == ':'
            && !chars
                .get(i + 1)
                .map(|n| n.is_alphanumeric() || *n == '_')
                .unwrap_or(false)
        {
            tokens.push(Token::Symbol(c));
            i += 1;
        } else if c == ':' {
            let start = i + 1;
            i = start;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Named(chars[start..i].iter().collect()));
        } else if c == '0'
            && matches!(chars.get(i + 1), Some('x') | Some('X'))
            && chars.get(i + 2).map(|c| c.is_ascii_hexdigit()).unwrap_or(false)
        {
            let start = i + 2;
            i = start;
            while i < chars.len() && chars[i].is_ascii_hexdigit() {
                i += 1;
            }
            let hex: String = chars[start..i].iter().collect();
            if hex.len() % 2 != 0 {
                return Err(syntax_error("odd number of hex digits in blob literal"));
            }
            let bytes = (0..hex.len())
                .step_by(2)
                .map(|j| u8::from_str_radix(&hex[j..j + 2], 16))
                .collect::<Result<Vec<u8>, _>>()
                .map_err(|_| syntax_error("invalid blob literal"))?;
            tokens.push(Token::Hex(bytes));
        } else if let Some((uuid, len)) = scan_uuid(&chars[i..]) {
            tokens.push(Token::Uuid(uuid));
            i += len;
        } else if c.is_ascii_digit()
            || (c == '-' && chars.get(i + 1).map(|d| d.is_ascii_digit()).unwrap_or(false))
        {
            let start = i;
            i += 1;
            while i < chars.len()
                && (chars[i].is_ascii_digit()
                    || chars[i] == '.'
                    || chars[i] == 'e'
                    || chars[i] == 'E'
                    || ((chars[i] == '-' || chars[i] == '+')
                        && matches!(chars[i - 1], 'e' | 'E')))
            {
                i += 1;
            }
            tokens.push(Token::Number(chars[start..i].iter().collect()));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            tokens.push(Token::Ident(word.to_lowercase()));
        } else if "(),;=*.<>{}[]".contains(c) {
            tokens.push(Token::Symbol(c));
            i += 1;
        } else {
            return Err(syntax_error(format!("unexpected character '{}'", c)));
        }
    }

    Ok(tokens)
}

/// Recognises an unquoted 8-4-4-4-12 uuid literal at the start of `chars`
fn scan_uuid(chars: &[char]) -> Option<(Uuid, usize)> {
    const LEN: usize = 36;
    if chars.len() < LEN {
        return None;
    }
    let candidate: String = chars[..LEN].iter().collect();
    let shape_ok = candidate.char_indices().all(|(i, c)| match i {
        8 | 13 | 18 | 23 => c == '-',
        _ => c.is_ascii_hexdigit(),
    });
    let boundary = chars
        .get(LEN)
        .map(|c| !(c.is_alphanumeric() || *c == '_'))
        .unwrap_or(true);
    if !shape_ok || !boundary {
        return None;
    }
    Uuid::parse_str(&candidate).ok().map(|u| (u, LEN))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    markers: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(word)) if word == keyword)
    }

    fn accept_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), DriverError> {
        if self.accept_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(&keyword.to_uppercase()))
        }
    }

    fn accept_symbol(&mut self, symbol: char) -> bool {
        if self.peek() == Some(&Token::Symbol(symbol)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: char) -> Result<(), DriverError> {
        if self.accept_symbol(symbol) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", symbol)))
        }
    }

    fn unexpected(&self, expected: &str) -> DriverError {
        match self.peek() {
            Some(token) => syntax_error(format!("expected {} but found {:?}", expected, token)),
            None => syntax_error(format!("expected {} but reached end of statement", expected)),
        }
    }

    fn identifier(&mut self) -> Result<String, DriverError> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) | Some(Token::Quoted(name)) => {
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    fn table_ref(&mut self) -> Result<TableRef, DriverError> {
        let first = self.identifier()?;
        if self.accept_symbol('.') {
            let table = self.identifier()?;
            Ok(TableRef {
                keyspace: Some(first),
                table,
            })
        } else {
            Ok(TableRef {
                keyspace: None,
                table: first,
            })
        }
    }

    fn if_not_exists(&mut self) -> Result<bool, DriverError> {
        if self.accept_keyword("if") {
            self.expect_keyword("not")?;
            self.expect_keyword("exists")?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn term(&mut self) -> Result<Term, DriverError> {
        let term = match self.peek().cloned() {
            Some(Token::Marker) => {
                let index = self.markers;
                self.markers += 1;
                Term::Marker(index)
            }
            Some(Token::Named(name)) => Term::Named(name),
            Some(Token::Str(s)) => Term::Literal(CqlValue::Text(s)),
            Some(Token::Hex(bytes)) => Term::Literal(CqlValue::Blob(bytes)),
            Some(Token::Uuid(id)) => Term::Literal(CqlValue::Uuid(id)),
            Some(Token::Number(n)) => Term::Literal(parse_number(&n)?),
            Some(Token::Ident(word)) if word == "true" => Term::Literal(CqlValue::Boolean(true)),
            Some(Token::Ident(word)) if word == "false" => Term::Literal(CqlValue::Boolean(false)),
            Some(Token::Ident(word)) if word == "null" => Term::Literal(CqlValue::Null),
            _ => return Err(self.unexpected("a value")),
        };
        self.pos += 1;
        Ok(term)
    }

    fn relations(&mut self) -> Result<Vec<Relation>, DriverError> {
        let mut relations = Vec::new();
        loop {
            let column = self.identifier()?;
            if !self.accept_symbol('=') {
                return Err(DriverError::invalid(format!(
                    "Only equality relations are supported (column {})",
                    column
                )));
            }
            let value = self.term()?;
            relations.push(Relation { column, value });
            if !self.accept_keyword("and") {
                break;
            }
        }
        Ok(relations)
    }

    fn finish(&mut self) -> Result<(), DriverError> {
        self.accept_symbol(';');
        if self.pos < self.tokens.len() {
            return Err(self.unexpected("end of statement"));
        }
        Ok(())
    }

    /// Consumes everything up to the end of the statement
    fn skip_rest(&mut self) {
        self.pos = self.tokens.len();
    }

    fn command(&mut self) -> Result<Command, DriverError> {
        match self.next() {
            Some(Token::Ident(word)) => match word.as_str() {
                "use" => {
                    let keyspace = self.identifier()?;
                    self.finish()?;
                    Ok(Command::Use(keyspace))
                }
                "create" => self.create(),
                "drop" => self.drop_table(),
                "truncate" => {
                    self.accept_keyword("table");
                    let table = self.table_ref()?;
                    self.finish()?;
                    Ok(Command::Truncate { table })
                }
                "insert" => self.insert(),
                "update" => self.update(),
                "delete" => self.delete(),
                "select" => self.select(),
                other => Err(syntax_error(format!("unsupported statement '{}'", other))),
            },
            _ => Err(syntax_error("expected a statement keyword")),
        }
    }

    fn create(&mut self) -> Result<Command, DriverError> {
        if self.accept_keyword("keyspace") {
            let if_not_exists = self.if_not_exists()?;
            let name = self.identifier()?;
            // Replication options are accepted and ignored
            self.skip_rest();
            return Ok(Command::CreateKeyspace {
                name,
                if_not_exists,
            });
        }
        if self.accept_keyword("index") {
            let if_not_exists = self.if_not_exists()?;
            if !self.is_keyword("on") {
                self.identifier()?;
            }
            self.expect_keyword("on")?;
            let table = self.table_ref()?;
            self.expect_symbol('(')?;
            let column = self.identifier()?;
            self.expect_symbol(')')?;
            self.finish()?;
            return Ok(Command::CreateIndex {
                table,
                column,
                if_not_exists,
            });
        }
        self.expect_keyword("table")?;
        let if_not_exists = self.if_not_exists()?;
        let table = self.table_ref()?;
        self.expect_symbol('(')?;

        let mut columns = Vec::new();
        let mut partition_keys = Vec::new();
        let mut clustering_keys = Vec::new();
        loop {
            if self.accept_keyword("primary") {
                self.expect_keyword("key")?;
                self.expect_symbol('(')?;
                if self.accept_symbol('(') {
                    loop {
                        partition_keys.push(self.identifier()?);
                        if !self.accept_symbol(',') {
                            break;
                        }
                    }
                    self.expect_symbol(')')?;
                } else {
                    partition_keys.push(self.identifier()?);
                }
                while self.accept_symbol(',') {
                    clustering_keys.push(self.identifier()?);
                }
                self.expect_symbol(')')?;
            } else {
                let name = self.identifier()?;
                let type_name = self.identifier()?;
                let typ = ColumnType::parse(&type_name).ok_or_else(|| {
                    DriverError::invalid(format!("Unsupported column type '{}'", type_name))
                })?;
                if self.accept_keyword("primary") {
                    self.expect_keyword("key")?;
                    partition_keys.push(name.clone());
                }
                columns.push((name, typ));
            }
            if !self.accept_symbol(',') {
                break;
            }
        }
        self.expect_symbol(')')?;
        if self.accept_keyword("with") {
            self.skip_rest();
        }
        self.finish()?;

        Ok(Command::CreateTable {
            table,
            if_not_exists,
            columns,
            partition_keys,
            clustering_keys,
        })
    }

    fn drop_table(&mut self) -> Result<Command, DriverError> {
        self.expect_keyword("table")?;
        let if_exists = if self.accept_keyword("if") {
            self.expect_keyword("exists")?;
            true
        } else {
            false
        };
        let table = self.table_ref()?;
        self.finish()?;
        Ok(Command::DropTable { table, if_exists })
    }

    fn insert(&mut self) -> Result<Command, DriverError> {
        self.expect_keyword("into")?;
        let table = self.table_ref()?;
        self.expect_symbol('(')?;
        let mut columns = Vec::new();
        loop {
            columns.push(self.identifier()?);
            if !self.accept_symbol(',') {
                break;
            }
        }
        self.expect_symbol(')')?;
        self.expect_keyword("values")?;
        self.expect_symbol('(')?;
        let mut values = Vec::new();
        loop {
            values.push(self.term()?);
            if !self.accept_symbol(',') {
                break;
            }
        }
        self.expect_symbol(')')?;
        if columns.len() != values.len() {
            return Err(DriverError::invalid(format!(
                "Unmatched column names/values: {} columns, {} values",
                columns.len(),
                values.len()
            )));
        }
        let if_not_exists = self.if_not_exists()?;
        if self.accept_keyword("using") {
            // TTL and write timestamps are not modelled
            self.skip_rest();
        }
        self.finish()?;
        Ok(Command::Insert {
            table,
            columns,
            values,
            if_not_exists,
        })
    }

    fn update(&mut self) -> Result<Command, DriverError> {
        let table = self.table_ref()?;
        if self.accept_keyword("using") {
            while !self.is_keyword("set") && self.peek().is_some() {
                self.pos += 1;
            }
        }
        self.expect_keyword("set")?;
        let mut assignments = Vec::new();
        loop {
            let column = self.identifier()?;
            self.expect_symbol('=')?;
            assignments.push((column, self.term()?));
            if !self.accept_symbol(',') {
                break;
            }
        }
        self.expect_keyword("where")?;
        let relations = self.relations()?;
        self.finish()?;
        Ok(Command::Update {
            table,
            assignments,
            relations,
        })
    }

    fn delete(&mut self) -> Result<Command, DriverError> {
        self.expect_keyword("from")?;
        let table = self.table_ref()?;
        self.expect_keyword("where")?;
        let relations = self.relations()?;
        self.finish()?;
        Ok(Command::Delete { table, relations })
    }

    fn select(&mut self) -> Result<Command, DriverError> {
        let selection = if self.accept_symbol('*') {
            Selection::All
        } else if self.accept_keyword("count") {
            self.expect_symbol('(')?;
            if !self.accept_symbol('*') {
                self.term()?;
            }
            self.expect_symbol(')')?;
            Selection::Count
        } else {
            let mut columns = Vec::new();
            loop {
                columns.push(self.identifier()?);
                if !self.accept_symbol(',') {
                    break;
                }
            }
            Selection::Columns(columns)
        };

        self.expect_keyword("from")?;
        let table = self.table_ref()?;
        let relations = if self.accept_keyword("where") {
            self.relations()?
        } else {
            Vec::new()
        };
        let limit = if self.accept_keyword("limit") {
            Some(self.term()?)
        } else {
            None
        };
        let allow_filtering = if self.accept_keyword("allow") {
            self.expect_keyword("filtering")?;
            true
        } else {
            false
        };
        self.finish()?;

        Ok(Command::Select {
            table,
            selection,
            relations,
            limit,
            allow_filtering,
        })
    }
}

fn parse_number(text: &str) -> Result<CqlValue, DriverError> {
    if text.contains(['.', 'e', 'E']) {
        return text
            .parse::<f64>()
            .map(CqlValue::Double)
            .map_err(|_| syntax_error(format!("invalid number '{}'", text)));
    }
    let n = text
        .parse::<i64>()
        .map_err(|_| syntax_error(format!("invalid number '{}'", text)))?;
    Ok(match i32::try_from(n) {
        Ok(small) => CqlValue::Int(small),
        Err(_) => CqlValue::BigInt(n),
    })
}

/// Parses a single CQL statement
pub fn parse(text: &str) -> Result<Command, DriverError> {
    parse_with_markers(text).map(|(command, _)| command)
}

/// Parses a statement and reports how many `?` markers it carries
pub fn parse_with_markers(text: &str) -> Result<(Command, usize), DriverError> {
    let mut parser = Parser {
        tokens: tokenize(text)?,
        pos: 0,
        markers: 0,
    };
    let command = parser.command()?;
    Ok((command, parser.markers))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quoted_insert_with_markers() {
        let command = parse(
            r#"INSERT INTO "Team_Members" (team_name, member_name) VALUES (:team_name, ?)"#,
        )
        .unwrap();

        match command {
            Command::Insert {
                table,
                columns,
                values,
                if_not_exists,
            } => {
                assert_eq!(table.table, "Team_Members");
                assert_eq!(columns, vec!["team_name", "member_name"]);
                assert_eq!(values[0], Term::Named("team_name".to_string()));
                assert_eq!(values[1], Term::Marker(0));
                assert!(!if_not_exists);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_select_with_filters() {
        let command = parse(
            "select release_version from system.local where key = 'local' LIMIT 1 ALLOW FILTERING;",
        )
        .unwrap();

        match command {
            Command::Select {
                table,
                selection,
                relations,
                limit,
                allow_filtering,
            } => {
                assert_eq!(table.keyspace.as_deref(), Some("system"));
                assert_eq!(selection, Selection::Columns(vec!["release_version".to_string()]));
                assert_eq!(relations[0].value, Term::Literal(CqlValue::from("local")));
                assert_eq!(limit, Some(Term::Literal(CqlValue::Int(1))));
                assert!(allow_filtering);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_create_table_compound_key() {
        let command = parse(
            "CREATE TABLE IF NOT EXISTS elko.scores (player text, season int, round int, \
             points bigint, PRIMARY KEY ((player, season), round)) WITH comment = 'x'",
        )
        .unwrap();

        match command {
            Command::CreateTable {
                if_not_exists,
                columns,
                partition_keys,
                clustering_keys,
                ..
            } => {
                assert!(if_not_exists);
                assert_eq!(columns.len(), 4);
                assert_eq!(partition_keys, vec!["player", "season"]);
                assert_eq!(clustering_keys, vec!["round"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_literals() {
        let id = Uuid::new_v4();
        let text = format!(
            "UPDATE t SET a = 'it''s', b = -42, c = 1.5, d = 0xcafe, e = {}, f = true WHERE k = 3000000000",
            id
        );
        match parse(&text).unwrap() {
            Command::Update {
                assignments,
                relations,
                ..
            } => {
                assert_eq!(assignments[0].1, Term::Literal(CqlValue::from("it's")));
                assert_eq!(assignments[1].1, Term::Literal(CqlValue::Int(-42)));
                assert_eq!(assignments[2].1, Term::Literal(CqlValue::Double(1.5)));
                assert_eq!(assignments[3].1, Term::Literal(CqlValue::Blob(vec![0xca, 0xfe])));
                assert_eq!(assignments[4].1, Term::Literal(CqlValue::Uuid(id)));
                assert_eq!(assignments[5].1, Term::Literal(CqlValue::Boolean(true)));
                assert_eq!(relations[0].value, Term::Literal(CqlValue::BigInt(3_000_000_000)));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_create_keyspace_ignores_replication() {
        let command = parse(
            "CREATE KEYSPACE IF NOT EXISTS elko WITH replication = \
             {'class': 'SimpleStrategy', 'replication_factor': 3}",
        )
        .unwrap();
        assert_eq!(
            command,
            Command::CreateKeyspace {
                name: "elko".to_string(),
                if_not_exists: true,
            }
        );
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(
            parse("SELEKT * FROM t"),
            Err(DriverError::ServerError {
                code: ServerErrorCode::SyntaxError,
                ..
            })
        ));
        assert!(parse("SELECT * FROM t WHERE").is_err());
        assert!(parse("INSERT INTO t (a, b) VALUES (1)").is_err());
        assert!(parse("SELECT * FROM 't").is_err());
        assert!(parse("SELECT * FROM t WHERE a > 1").is_err());
    }
}
