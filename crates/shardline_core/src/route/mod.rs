//! Route data model: what a logical statement resolved to.

pub mod engine;

use std::sync::Arc;

use shardline_common::value::Value;
use shardline_parser::SqlStatement;

pub use engine::RoutingEngine;

/// Logic table → actual table for one route unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMapping {
    pub logic_table: String,
    pub actual_table: String,
}

/// A physical target before rewriting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteUnit {
    pub data_source: String,
    pub table_mappings: Vec<TableMapping>,
}

impl RouteUnit {
    pub fn new(data_source: impl Into<String>) -> Self {
        Self {
            data_source: data_source.into(),
            table_mappings: Vec::new(),
        }
    }

    pub fn actual_table(&self, logic_table: &str) -> Option<&str> {
        self.table_mappings
            .iter()
            .find(|m| m.logic_table.eq_ignore_ascii_case(logic_table))
            .map(|m| m.actual_table.as_str())
    }
}

/// One physical-target instance of a logical statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionUnit {
    pub data_source: String,
    pub sql: String,
    pub parameters: Vec<Value>,
}

/// Column whose database-generated values an INSERT returns as keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedKeyDescriptor {
    pub column: String,
}

/// Ordered execution units plus metadata for one logical call.
#[derive(Debug, Clone)]
pub struct RouteResult {
    pub statement: Arc<SqlStatement>,
    pub units: Vec<ExecutionUnit>,
    pub generated_key: Option<GeneratedKeyDescriptor>,
}

impl RouteResult {
    pub fn is_single_unit(&self) -> bool {
        self.units.len() == 1
    }

    /// Distinct data sources in unit order.
    pub fn data_sources(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for unit in &self.units {
            if !out.contains(&unit.data_source.as_str()) {
                out.push(&unit.data_source);
            }
        }
        out
    }
}
