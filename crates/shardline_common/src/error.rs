use thiserror::Error;

/// Convenience alias for `Result<T, ShardlineError>`.
pub type ShardlineResult<T> = Result<T, ShardlineError>;

/// Error classification for escalation decisions.
///
/// - `UserError`  : bad SQL, unroutable statement, bad configuration
/// - `Transient`  : a physical data source failed; the caller MAY retry
/// - `InternalBug`: a rewrite/parse defect or a panicked worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserError,
    Transient,
    InternalBug,
}

/// Top-level error type that all crate-specific errors convert into.
#[derive(Error, Debug)]
pub enum ShardlineError {
    #[error("SQL error: {0}")]
    Sql(#[from] SqlError),

    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("Rewrite error: {0}")]
    Rewrite(#[from] RewriteError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ShardlineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShardlineError::Sql(_) | ShardlineError::Routing(_) | ShardlineError::Config(_) => {
                ErrorKind::UserError
            }
            ShardlineError::Execution(ExecutionError::Panicked { .. }) => ErrorKind::InternalBug,
            ShardlineError::Execution(_) => ErrorKind::Transient,
            ShardlineError::Rewrite(_) | ShardlineError::Internal(_) => ErrorKind::InternalBug,
        }
    }
}

/// SQL frontend errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SqlError {
    #[error("Parse error at byte {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("Unterminated {what} starting at byte {position}")]
    Unterminated { what: &'static str, position: usize },

    #[error("Unsupported statement: {0}")]
    Unsupported(String),
}

/// Routing errors: the statement could not be resolved to physical targets.
/// Raised before any handle is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("No data source can serve statement (tables: {0:?}) and no default data source is configured")]
    NoDataSource(Vec<String>),

    #[error("Unknown data source: {0}")]
    UnknownDataSource(String),

    #[error("Tables {0:?} are sharded but not bound to each other")]
    UnboundTables(Vec<String>),

    #[error("INSERT into {table} is missing a value for sharding column {column}")]
    MissingShardingValue { table: String, column: String },

    #[error("Sharding value for {table}.{column} is not usable: {reason}")]
    InvalidShardingValue {
        table: String,
        column: String,
        reason: String,
    },

    #[error("Multi-row INSERT into {0} spans several data nodes")]
    InsertSpansNodes(String),

    #[error("Parameter ?{index} is not bound ({bound} parameters supplied)")]
    UnboundParameter { index: usize, bound: usize },
}

/// Rewrite errors indicate a generator/parser defect and are never recovered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RewriteError {
    #[error("Token offset {offset} exceeds SQL length {len}")]
    OffsetOutOfRange { offset: usize, len: usize },

    #[error("Token offset {0} does not fall on a character boundary")]
    NotCharBoundary(usize),

    #[error("Tokens overlap at byte {0}")]
    Overlapping(usize),

    #[error("Parameter ?{index} is not bound ({bound} parameters supplied)")]
    UnboundParameter { index: usize, bound: usize },

    #[error("Assisted query value for column {0} must be a literal or parameter to be encrypted")]
    UnsupportedValueExpression(String),
}

/// Execution errors raised while fanning out to physical handles.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// Raised by a physical data source, connection, statement or cursor.
    #[error("Backend error on {data_source}: {message}")]
    Backend {
        data_source: String,
        message: String,
    },

    /// One or more execution units failed. `source` is the failure of the
    /// lowest-indexed failing unit; the rest are kept in `suppressed`.
    #[error("Execution unit #{unit_index} on {data_source} failed: {source}")]
    UnitFailed {
        unit_index: usize,
        data_source: String,
        #[source]
        source: Box<ExecutionError>,
        suppressed: Vec<(usize, ExecutionError)>,
    },

    #[error("Worker for execution unit #{unit_index} panicked")]
    Panicked { unit_index: usize },

    #[error("Statement is closed")]
    Closed,
}

impl ExecutionError {
    pub fn backend(data_source: impl Into<String>, message: impl Into<String>) -> Self {
        ExecutionError::Backend {
            data_source: data_source.into(),
            message: message.into(),
        }
    }

    /// All per-unit failures, reported unit first then the suppressed ones.
    pub fn failed_units(&self) -> Vec<usize> {
        match self {
            ExecutionError::UnitFailed {
                unit_index,
                suppressed,
                ..
            } => std::iter::once(*unit_index)
                .chain(suppressed.iter().map(|(i, _)| *i))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let e: ShardlineError = RoutingError::NoDataSource(vec!["t".into()]).into();
        assert_eq!(e.kind(), ErrorKind::UserError);

        let e: ShardlineError = RewriteError::OffsetOutOfRange { offset: 9, len: 3 }.into();
        assert_eq!(e.kind(), ErrorKind::InternalBug);

        let e: ShardlineError = ExecutionError::backend("ds_0", "boom").into();
        assert_eq!(e.kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_failed_units_lists_reported_then_suppressed() {
        let e = ExecutionError::UnitFailed {
            unit_index: 1,
            data_source: "ds_1".into(),
            source: Box::new(ExecutionError::backend("ds_1", "x")),
            suppressed: vec![(3, ExecutionError::backend("ds_3", "y"))],
        };
        assert_eq!(e.failed_units(), vec![1, 3]);
        assert!(e.to_string().contains("#1 on ds_1"));
    }
}
