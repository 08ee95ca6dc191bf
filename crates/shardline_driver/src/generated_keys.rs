use std::collections::VecDeque;

use shardline_common::error::ExecutionError;
use shardline_common::value::{Row, Value};
use shardline_core::backend::ResultCursor;

/// Single-column cursor over generated keys, in unit order.
#[derive(Debug, Clone, Default)]
pub struct GeneratedKeysCursor {
    labels: Vec<String>,
    keys: VecDeque<Value>,
}

impl GeneratedKeysCursor {
    pub fn new(column: impl Into<String>, keys: Vec<Value>) -> Self {
        Self {
            labels: vec![column.into()],
            keys: keys.into(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl ResultCursor for GeneratedKeysCursor {
    fn column_labels(&self) -> &[String] {
        &self.labels
    }

    fn next_row(&mut self) -> Result<Option<Row>, ExecutionError> {
        Ok(self.keys.pop_front().map(|key| vec![key]))
    }
}
