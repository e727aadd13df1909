use std::sync::Arc;
use std::time::Duration;

use crate::types::{Consistency, CqlValue};

/// Values bound to a statement's markers
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Values {
    #[default]
    Empty,
    /// Bound in order to `?` markers
    Positional(Vec<CqlValue>),
    /// Bound by name to `:name` markers
    Named(Vec<(String, CqlValue)>),
}

impl Values {
    pub fn named<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<CqlValue>,
    {
        Values::Named(
            values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        match self {
            Values::Empty => 0,
            Values::Positional(values) => values.len(),
            Values::Named(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<()> for Values {
    fn from(_: ()) -> Self {
        Values::Empty
    }
}

impl From<Vec<CqlValue>> for Values {
    fn from(values: Vec<CqlValue>) -> Self {
        if values.is_empty() {
            Values::Empty
        } else {
            Values::Positional(values)
        }
    }
}

/// Immutable query text plus bindings and per-statement execution options
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    text: Arc<str>,
    values: Values,
    idempotent: bool,
    consistency: Option<Consistency>,
    profile: Option<String>,
    timeout: Option<Duration>,
}

impl Statement {
    pub fn new(text: impl AsRef<str>) -> Self {
        Self {
            text: Arc::from(text.as_ref().trim()),
            values: Values::Empty,
            idempotent: false,
            consistency: None,
            profile: None,
            timeout: None,
        }
    }

    pub fn bind(mut self, values: impl Into<Values>) -> Self {
        self.values = values.into();
        self
    }

    /// Marks the statement safe to retry on another node after a timeout
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = Some(consistency);
        self
    }

    /// Runs the statement under a named execution profile
    pub fn profile(mut self, name: impl Into<String>) -> Self {
        self.profile = Some(name.into());
        self
    }

    /// Overrides the profile's request timeout for this statement only
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    pub fn is_idempotent(&self) -> bool {
        self.idempotent
    }

    pub fn get_consistency(&self) -> Option<Consistency> {
        self.consistency
    }

    pub fn get_profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl From<&str> for Statement {
    fn from(text: &str) -> Self {
        Statement::new(text)
    }
}

impl From<String> for Statement {
    fn from(text: String) -> Self {
        Statement::new(text)
    }
}

impl From<&Statement> for Statement {
    fn from(statement: &Statement) -> Self {
        statement.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_builder() {
        let stmt = Statement::new("  SELECT * FROM \"Team_Members\"  ")
            .bind(vec![CqlValue::from("Bobs Team")])
            .idempotent(true)
            .profile("analytics")
            .timeout(Duration::from_secs(1));

        assert_eq!(stmt.text(), "SELECT * FROM \"Team_Members\"");
        assert_eq!(stmt.values().len(), 1);
        assert!(stmt.is_idempotent());
        assert_eq!(stmt.get_profile(), Some("analytics"));
        assert_eq!(stmt.get_timeout(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_statements_default_to_non_idempotent() {
        let stmt: Statement = "INSERT INTO t (a) VALUES (1)".into();
        assert!(!stmt.is_idempotent());
        assert_eq!(stmt.values(), &Values::Empty);
    }

    #[test]
    fn test_named_values() {
        let values = Values::named([("team_name", "Bobs Team"), ("member_name", "Bob")]);
        match values {
            Values::Named(pairs) => {
                assert_eq!(pairs[0].0, "team_name");
                assert_eq!(pairs[1].1, CqlValue::from("Bob"));
            }
            other => panic!("unexpected values {:?}", other),
        }
    }
}
