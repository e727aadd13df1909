use crate::database::QueryBuilder;
use crate::statement::Statement;
use crate::types::Consistency;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchType {
    #[default]
    Logged,
    Unlogged,
    Counter,
}

/// Ordered statements submitted to the cluster as one request
#[derive(Debug, Clone, Default)]
pub struct Batch {
    batch_type: BatchType,
    statements: Vec<Statement>,
    consistency: Option<Consistency>,
    profile: Option<String>,
    idempotent: Option<bool>,
}

impl Batch {
    pub fn new(batch_type: BatchType) -> Self {
        Self {
            batch_type,
            ..Default::default()
        }
    }

    pub fn add(&mut self, statement: impl Into<Statement>) -> &mut Self {
        self.statements.push(statement.into());
        self
    }

    pub fn with(mut self, statement: impl Into<Statement>) -> Self {
        self.add(statement);
        self
    }

    pub fn consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = Some(consistency);
        self
    }

    pub fn profile(mut self, name: impl Into<String>) -> Self {
        self.profile = Some(name.into());
        self
    }

    /// Overrides the idempotency derived from the statements
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = Some(idempotent);
        self
    }

    pub fn batch_type(&self) -> BatchType {
        self.batch_type
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn get_consistency(&self) -> Option<Consistency> {
        self.consistency
    }

    pub fn get_profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    /// A batch is safe to retry only if every statement in it is
    pub fn is_idempotent(&self) -> bool {
        self.idempotent
            .unwrap_or_else(|| self.statements.iter().all(Statement::is_idempotent))
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

impl std::fmt::Display for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queries = self
            .statements
            .iter()
            .map(|s| s.text().to_string())
            .collect();
        write!(f, "{}", QueryBuilder::build_batch_statements(self.batch_type, queries))
    }
}
