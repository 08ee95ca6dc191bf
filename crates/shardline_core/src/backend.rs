//! Physical driver seams: data source, connection, statement, cursor.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use shardline_common::error::ExecutionError;
use shardline_common::types::GeneratedKeyMode;
use shardline_common::value::{Row, Value};

pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    fn connect(&self) -> Result<Arc<dyn PhysicalConnection>, ExecutionError>;
}

pub trait PhysicalConnection: Send + Sync {
    fn data_source(&self) -> &str;

    fn create_statement(&self) -> Result<Box<dyn BackendStatement>, ExecutionError>;
}

/// Handle-level settings of a logical statement. Applied to every physical
/// handle each time it is claimed, so a reused handle picks up changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatementOptions {
    pub query_timeout: Option<Duration>,
    /// Upper bound on rows a query cursor returns.
    pub max_rows: Option<u64>,
    pub fetch_size: Option<u32>,
}

/// A physical per-shard statement handle. Reusable across executions.
pub trait BackendStatement: Send {
    fn apply_options(&mut self, options: &StatementOptions) -> Result<(), ExecutionError>;

    fn execute_query(
        &mut self,
        sql: &str,
        parameters: &[Value],
    ) -> Result<Box<dyn ResultCursor>, ExecutionError>;

    fn execute_update(
        &mut self,
        sql: &str,
        parameters: &[Value],
        keys: &GeneratedKeyMode,
    ) -> Result<u64, ExecutionError>;

    /// Returns `true` when the statement produced a result cursor.
    fn execute(
        &mut self,
        sql: &str,
        parameters: &[Value],
        keys: &GeneratedKeyMode,
    ) -> Result<bool, ExecutionError>;

    /// Cursor produced by the last `execute`, taken at most once.
    fn result_cursor(&mut self) -> Option<Box<dyn ResultCursor>>;

    /// Update count of the last `execute` when it produced no cursor.
    fn update_count(&self) -> Option<u64>;

    /// Keys generated by the last write, in insertion order.
    fn generated_keys(&mut self) -> Result<Vec<Value>, ExecutionError>;
}

pub trait ResultCursor: Send {
    fn column_labels(&self) -> &[String];

    fn next_row(&mut self) -> Result<Option<Row>, ExecutionError>;
}

/// Fully materialized cursor.
#[derive(Debug, Clone, Default)]
pub struct RowsCursor {
    labels: Vec<String>,
    rows: VecDeque<Row>,
}

impl RowsCursor {
    pub fn new(labels: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            labels,
            rows: rows.into(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

impl ResultCursor for RowsCursor {
    fn column_labels(&self) -> &[String] {
        &self.labels
    }

    fn next_row(&mut self) -> Result<Option<Row>, ExecutionError> {
        Ok(self.rows.pop_front())
    }
}

/// Drain a cursor into memory.
pub fn collect_rows(cursor: &mut dyn ResultCursor) -> Result<Vec<Row>, ExecutionError> {
    let mut rows = Vec::new();
    while let Some(row) = cursor.next_row()? {
        rows.push(row);
    }
    Ok(rows)
}
