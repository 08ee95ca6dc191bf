use std::fmt::Write;

use shardline_common::value::Value;

use crate::route::RouteUnit;

/// Value carried by an injected assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
    /// Rendered inline as a SQL literal.
    Literal(Value),
    /// Rendered as `?`; the value is bound into the unit's parameters.
    Parameter(Value),
    /// Source text of the assigned expression, copied verbatim.
    Expression(String),
}

/// Replace a logic table identifier with the unit's actual table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableToken {
    pub start: usize,
    pub stop: usize,
    pub logic_table: String,
}

/// Append `, assisted_col = value` pairs after the last SET assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertSetAssistedColumnsToken {
    pub offset: usize,
    pub columns: Vec<String>,
    pub values: Vec<TokenValue>,
}

/// A positional edit spliced into the original SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlToken {
    Table(TableToken),
    InsertSetAssistedColumns(InsertSetAssistedColumnsToken),
}

impl SqlToken {
    /// Replaced byte range `[start, end)`. Insertions are empty ranges.
    pub fn span(&self) -> (usize, usize) {
        match self {
            SqlToken::Table(t) => (t.start, t.stop + 1),
            SqlToken::InsertSetAssistedColumns(t) => (t.offset, t.offset),
        }
    }

    /// Text for this token on one route unit. `original` is the replaced slice.
    pub fn render(&self, unit: &RouteUnit, original: &str) -> String {
        match self {
            SqlToken::Table(t) => unit
                .actual_table(&t.logic_table)
                .unwrap_or(original)
                .to_string(),
            SqlToken::InsertSetAssistedColumns(t) => {
                let mut out = String::new();
                for (column, value) in t.columns.iter().zip(&t.values) {
                    match value {
                        TokenValue::Literal(v) => {
                            let _ = write!(out, ", {} = {}", column, v);
                        }
                        TokenValue::Parameter(_) => {
                            let _ = write!(out, ", {} = ?", column);
                        }
                        TokenValue::Expression(text) => {
                            let _ = write!(out, ", {} = {}", column, text);
                        }
                    }
                }
                out
            }
        }
    }

    /// Values to bind at this token's position, in render order.
    pub fn parameters(&self) -> Vec<Value> {
        match self {
            SqlToken::Table(_) => Vec::new(),
            SqlToken::InsertSetAssistedColumns(t) => t
                .values
                .iter()
                .filter_map(|v| match v {
                    TokenValue::Parameter(p) => Some(p.clone()),
                    TokenValue::Literal(_) | TokenValue::Expression(_) => None,
                })
                .collect(),
        }
    }
}
