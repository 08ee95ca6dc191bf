//! Streaming k-way merge for `ORDER BY` queries.
//!
//! Every unit ran the same ordered query, so each cursor is already sorted;
//! a min-heap over the cursor heads yields the global order while holding at
//! most one row per cursor.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

use shardline_common::error::ExecutionError;
use shardline_common::value::Row;
use shardline_parser::{OrderByItem, SqlStatement};

use super::MergeStrategy;
use crate::backend::ResultCursor;

/// (column index, ascending)
type SortKeys = Arc<Vec<(usize, bool)>>;

fn resolve_sort_keys(order_by: &[OrderByItem], labels: &[String]) -> Option<Vec<(usize, bool)>> {
    if order_by.is_empty() {
        return None;
    }
    order_by
        .iter()
        .map(|item| {
            labels
                .iter()
                .position(|l| l.eq_ignore_ascii_case(&item.column))
                .map(|idx| (idx, item.ascending))
        })
        .collect()
}

fn compare_rows(a: &Row, b: &Row, keys: &[(usize, bool)]) -> Ordering {
    for &(idx, ascending) in keys {
        let ord = match (a.get(idx), b.get(idx)) {
            (Some(x), Some(y)) => x.total_cmp(y),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        let ord = if ascending { ord } else { ord.reverse() };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

struct MergeEntry {
    row: Row,
    cursor_idx: usize,
    keys: SortKeys,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Ties resolve in unit order.
        compare_rows(&self.row, &other.row, &self.keys)
            .then_with(|| self.cursor_idx.cmp(&other.cursor_idx))
    }
}

pub struct OrderByStreamMergedCursor {
    labels: Vec<String>,
    cursors: Vec<Box<dyn ResultCursor>>,
    heap: BinaryHeap<Reverse<MergeEntry>>,
    keys: SortKeys,
}

impl OrderByStreamMergedCursor {
    pub fn new(
        mut cursors: Vec<Box<dyn ResultCursor>>,
        keys: Vec<(usize, bool)>,
    ) -> Result<Self, ExecutionError> {
        let labels = cursors
            .first()
            .map(|c| c.column_labels().to_vec())
            .unwrap_or_default();
        let keys = Arc::new(keys);
        let mut heap = BinaryHeap::with_capacity(cursors.len());
        for (cursor_idx, cursor) in cursors.iter_mut().enumerate() {
            if let Some(row) = cursor.next_row()? {
                heap.push(Reverse(MergeEntry {
                    row,
                    cursor_idx,
                    keys: Arc::clone(&keys),
                }));
            }
        }
        Ok(Self {
            labels,
            cursors,
            heap,
            keys,
        })
    }
}

impl ResultCursor for OrderByStreamMergedCursor {
    fn column_labels(&self) -> &[String] {
        &self.labels
    }

    fn next_row(&mut self) -> Result<Option<Row>, ExecutionError> {
        let Some(Reverse(entry)) = self.heap.pop() else {
            return Ok(None);
        };
        if let Some(row) = self.cursors[entry.cursor_idx].next_row()? {
            self.heap.push(Reverse(MergeEntry {
                row,
                cursor_idx: entry.cursor_idx,
                keys: Arc::clone(&self.keys),
            }));
        }
        Ok(Some(entry.row))
    }
}

/// Applies when the statement orders by plain columns that all appear in
/// the cursors' labels.
#[derive(Debug, Default)]
pub struct OrderByMergeStrategy;

impl MergeStrategy for OrderByMergeStrategy {
    fn name(&self) -> &'static str {
        "order_by_stream"
    }

    fn applies(&self, statement: &SqlStatement, cursors: &[Box<dyn ResultCursor>]) -> bool {
        cursors
            .first()
            .and_then(|c| resolve_sort_keys(&statement.order_by, c.column_labels()))
            .is_some()
    }

    fn merge(
        &self,
        statement: &SqlStatement,
        cursors: Vec<Box<dyn ResultCursor>>,
    ) -> Result<Box<dyn ResultCursor>, ExecutionError> {
        let keys = cursors
            .first()
            .and_then(|c| resolve_sort_keys(&statement.order_by, c.column_labels()))
            .unwrap_or_default();
        Ok(Box::new(OrderByStreamMergedCursor::new(cursors, keys)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{collect_rows, RowsCursor};
    use shardline_common::value::Value;

    fn cursor(rows: Vec<(i64, &str)>) -> Box<dyn ResultCursor> {
        Box::new(RowsCursor::new(
            vec!["score".into(), "name".into()],
            rows.into_iter()
                .map(|(s, n)| vec![Value::Int64(s), Value::Text(n.into())])
                .collect(),
        ))
    }

    #[test]
    fn test_descending_with_secondary_key() {
        let cursors = vec![
            cursor(vec![(9, "b"), (5, "a")]),
            cursor(vec![(9, "a"), (7, "z"), (1, "q")]),
        ];
        let mut merged =
            OrderByStreamMergedCursor::new(cursors, vec![(0, false), (1, true)]).unwrap();
        let names: Vec<String> = collect_rows(&mut merged)
            .unwrap()
            .into_iter()
            .filter_map(|r| r[1].as_str().map(String::from))
            .collect();
        assert_eq!(names, vec!["a", "b", "z", "a", "q"]);
    }

    #[test]
    fn test_ties_keep_unit_order() {
        let cursors = vec![cursor(vec![(1, "first")]), cursor(vec![(1, "second")])];
        let mut merged = OrderByStreamMergedCursor::new(cursors, vec![(0, true)]).unwrap();
        let first = merged.next_row().unwrap().unwrap();
        assert_eq!(first[1], Value::Text("first".into()));
    }

    #[test]
    fn test_sort_keys_resolve_case_insensitively() {
        let labels = vec!["ID".to_string(), "Name".to_string()];
        let items = vec![OrderByItem {
            column: "name".into(),
            ascending: false,
        }];
        assert_eq!(resolve_sort_keys(&items, &labels), Some(vec![(1, false)]));
        assert_eq!(resolve_sort_keys(&[], &labels), None);
    }
}
