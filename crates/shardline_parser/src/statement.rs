//! Parsed statement model: positional segments over the original SQL text.
//!
//! All `start`/`stop` indices are inclusive byte offsets into the SQL the
//! statement was parsed from.

use shardline_common::types::StatementKind;
use shardline_common::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    /// Text the segments index into.
    pub sql: String,
    pub kind: StatementKind,
    pub tables: Vec<TableSegment>,
    /// Table-name qualifiers of column references (`t_user.phone`).
    /// Alias qualifiers are not included.
    pub column_owners: Vec<TableSegment>,
    pub conditions: Conditions,
    pub insert: Option<InsertClause>,
    pub order_by: Vec<OrderByItem>,
    /// Byte offset of every `?`, in ordinal order.
    pub placeholders: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSegment {
    pub name: String,
    pub alias: Option<String>,
    pub start: usize,
    pub stop: usize,
}

/// WHERE-clause predicates usable for shard pruning.
#[derive(Debug, Clone, PartialEq)]
pub enum Conditions {
    /// AND-chain of equality / IN predicates (possibly empty).
    Usable(Vec<Condition>),
    /// A top-level OR makes the predicates unusable for pruning.
    Unusable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Table the column belongs to, with aliases already resolved.
    pub table: Option<String>,
    pub column: String,
    /// One value for `=`, several for `IN (...)`.
    pub values: Vec<ExprSegment>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Value),
    Placeholder(usize),
    /// Anything else (function call, arithmetic, sub-select).
    Complex,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExprSegment {
    pub kind: ExprKind,
    pub start: usize,
    pub stop: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSegment {
    pub name: String,
    pub start: usize,
    pub stop: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentSegment {
    pub column: ColumnSegment,
    pub value: ExprSegment,
    pub start: usize,
    pub stop: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetAssignmentsSegment {
    pub assignments: Vec<AssignmentSegment>,
    pub start: usize,
    pub stop: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertValues {
    /// `VALUES (...), (...)`; columns come from the explicit column list.
    Values(Vec<Vec<ExprSegment>>),
    /// MySQL `SET a = ?, b = ?`.
    Set(SetAssignmentsSegment),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertClause {
    pub columns: Vec<ColumnSegment>,
    pub values: InsertValues,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub column: String,
    pub ascending: bool,
}

impl SqlStatement {
    pub fn parameter_count(&self) -> usize {
        self.placeholders.len()
    }

    /// Number of placeholders that appear before byte `offset`.
    pub fn placeholders_before(&self, offset: usize) -> usize {
        self.placeholders.partition_point(|&p| p < offset)
    }

    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for t in &self.tables {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&t.name)) {
                names.push(&t.name);
            }
        }
        names
    }

    /// Source text of an inclusive `[start, stop]` segment.
    pub fn segment_text(&self, start: usize, stop: usize) -> &str {
        self.sql.get(start..=stop).unwrap_or_default()
    }

    /// The table of a single-table statement (INSERT/UPDATE/DELETE target).
    pub fn single_table(&self) -> Option<&TableSegment> {
        self.tables.first()
    }

    pub fn set_assignments(&self) -> Option<&SetAssignmentsSegment> {
        match &self.insert {
            Some(InsertClause {
                values: InsertValues::Set(set),
                ..
            }) => Some(set),
            _ => None,
        }
    }

    /// Inserted column names in declaration order.
    pub fn insert_column_names(&self) -> Vec<&str> {
        match &self.insert {
            Some(InsertClause {
                values: InsertValues::Set(set),
                ..
            }) => set.assignments.iter().map(|a| a.column.name.as_str()).collect(),
            Some(InsertClause { columns, .. }) => columns.iter().map(|c| c.name.as_str()).collect(),
            None => Vec::new(),
        }
    }

    /// Per-row value expressions for an INSERT, aligned with `insert_column_names`.
    pub fn insert_rows(&self) -> Vec<Vec<&ExprSegment>> {
        match &self.insert {
            Some(InsertClause {
                values: InsertValues::Set(set),
                ..
            }) => vec![set.assignments.iter().map(|a| &a.value).collect()],
            Some(InsertClause {
                values: InsertValues::Values(rows),
                ..
            }) => rows.iter().map(|r| r.iter().collect()).collect(),
            None => Vec::new(),
        }
    }
}

impl ExprSegment {
    /// Resolve to a concrete value: literals as-is, placeholders from `parameters`.
    /// `Ok(None)` for complex expressions; `Err(index)` for an unbound placeholder.
    pub fn resolve(&self, parameters: &[Value]) -> Result<Option<Value>, usize> {
        match &self.kind {
            ExprKind::Literal(v) => Ok(Some(v.clone())),
            ExprKind::Placeholder(i) => parameters.get(*i).cloned().map(Some).ok_or(*i),
            ExprKind::Complex => Ok(None),
        }
    }
}
