//! SQL frontend: lexer and parser producing the positional segment model
//! consumed by routing and rewriting.

pub mod lexer;
pub mod parser;
pub mod statement;


pub use parser::parse;
pub use statement::{
    AssignmentSegment, ColumnSegment, Condition, Conditions, ExprKind, ExprSegment, InsertClause,
    InsertValues, OrderByItem, SetAssignmentsSegment, SqlStatement, TableSegment,
};
