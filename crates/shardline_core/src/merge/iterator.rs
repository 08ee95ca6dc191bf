use std::collections::VecDeque;

use shardline_common::error::ExecutionError;
use shardline_common::value::Row;

use crate::backend::ResultCursor;

/// Drains cursors one after another in unit order.
pub struct IteratorMergedCursor {
    labels: Vec<String>,
    cursors: VecDeque<Box<dyn ResultCursor>>,
}

impl IteratorMergedCursor {
    pub fn new(cursors: Vec<Box<dyn ResultCursor>>) -> Self {
        let labels = cursors
            .first()
            .map(|c| c.column_labels().to_vec())
            .unwrap_or_default();
        Self {
            labels,
            cursors: cursors.into(),
        }
    }
}

impl ResultCursor for IteratorMergedCursor {
    fn column_labels(&self) -> &[String] {
        &self.labels
    }

    fn next_row(&mut self) -> Result<Option<Row>, ExecutionError> {
        while let Some(current) = self.cursors.front_mut() {
            if let Some(row) = current.next_row()? {
                return Ok(Some(row));
            }
            self.cursors.pop_front();
        }
        Ok(None)
    }
}
