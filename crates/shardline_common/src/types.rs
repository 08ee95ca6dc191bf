use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse statement classification used by routing, execution and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

impl StatementKind {
    pub fn is_query(self) -> bool {
        matches!(self, StatementKind::Select)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatementKind::Select => "select",
            StatementKind::Insert => "insert",
            StatementKind::Update => "update",
            StatementKind::Delete => "delete",
            StatementKind::Other => "other",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether (and how) a write call asks for generated keys.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GeneratedKeyMode {
    #[default]
    NoGeneratedKeys,
    ReturnGeneratedKeys,
    ColumnIndexes(Vec<usize>),
    ColumnNames(Vec<String>),
}

impl GeneratedKeyMode {
    pub fn requests_keys(&self) -> bool {
        !matches!(self, GeneratedKeyMode::NoGeneratedKeys)
    }
}

/// Name of a configured physical data source (e.g. `ds_0`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataSourceName(pub String);

impl DataSourceName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataSourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DataSourceName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
