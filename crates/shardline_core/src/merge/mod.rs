//! Result merging: turns per-unit cursors into one logical cursor.
//!
//! - zero cursors → empty cursor
//! - one cursor → passed through untouched
//! - several → the first applicable [`MergeStrategy`], else concatenation

pub mod iterator;
pub mod order_by;

use shardline_common::error::ExecutionError;
use shardline_parser::SqlStatement;

pub use iterator::IteratorMergedCursor;
pub use order_by::{OrderByMergeStrategy, OrderByStreamMergedCursor};

use crate::backend::{ResultCursor, RowsCursor};

pub trait MergeStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn applies(&self, statement: &SqlStatement, cursors: &[Box<dyn ResultCursor>]) -> bool;

    fn merge(
        &self,
        statement: &SqlStatement,
        cursors: Vec<Box<dyn ResultCursor>>,
    ) -> Result<Box<dyn ResultCursor>, ExecutionError>;
}

pub struct ResultMerger {
    strategies: Vec<Box<dyn MergeStrategy>>,
}

impl Default for ResultMerger {
    fn default() -> Self {
        Self {
            strategies: vec![Box::new(OrderByMergeStrategy)],
        }
    }
}

impl ResultMerger {
    pub fn with_strategies(strategies: Vec<Box<dyn MergeStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn merge(
        &self,
        statement: &SqlStatement,
        mut cursors: Vec<Box<dyn ResultCursor>>,
    ) -> Result<Box<dyn ResultCursor>, ExecutionError> {
        match cursors.len() {
            0 => return Ok(Box::new(RowsCursor::empty())),
            1 => {
                if let Some(only) = cursors.pop() {
                    return Ok(only);
                }
            }
            _ => {}
        }
        for strategy in &self.strategies {
            if strategy.applies(statement, &cursors) {
                tracing::debug!(strategy = strategy.name(), cursors = cursors.len(), "merging results");
                return strategy.merge(statement, cursors);
            }
        }
        Ok(Box::new(IteratorMergedCursor::new(cursors)))
    }
}
