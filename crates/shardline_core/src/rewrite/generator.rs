//! Token generators.
//!
//! Optional generators each try one rewrite and may decline; collection
//! generators emit every token of their kind. All are pure functions of the
//! statement, the bound parameters and a rule view.

use shardline_common::error::RewriteError;
use shardline_common::value::Value;
use shardline_parser::{ExprKind, SqlStatement};

use super::token::{InsertSetAssistedColumnsToken, SqlToken, TableToken, TokenValue};
use crate::rule::{EncryptRule, ShardingRule};

pub trait OptionalTokenGenerator<R: ?Sized>: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` when the generator does not apply.
    fn generate(
        &self,
        statement: &SqlStatement,
        parameters: &[Value],
        rule: &R,
    ) -> Result<Option<SqlToken>, RewriteError>;
}

pub trait CollectionTokenGenerator<R: ?Sized>: Send + Sync {
    fn generate(&self, statement: &SqlStatement, rule: &R) -> Vec<SqlToken>;
}

/// One `Table` token per sharded table reference, including table names
/// used to qualify columns.
#[derive(Debug, Default)]
pub struct TableTokenGenerator;

impl CollectionTokenGenerator<ShardingRule> for TableTokenGenerator {
    fn generate(&self, statement: &SqlStatement, rule: &ShardingRule) -> Vec<SqlToken> {
        statement
            .tables
            .iter()
            .chain(&statement.column_owners)
            .filter(|t| rule.is_sharded(&t.name))
            .map(|t| {
                SqlToken::Table(TableToken {
                    start: t.start,
                    stop: t.stop,
                    logic_table: t.name.clone(),
                })
            })
            .collect()
    }
}

/// Adds assisted query columns to `INSERT ... SET` for every assigned
/// column the encrypt rule maps to one.
#[derive(Debug, Default)]
pub struct InsertSetAddAssistedColumnsTokenGenerator;

impl OptionalTokenGenerator<EncryptRule> for InsertSetAddAssistedColumnsTokenGenerator {
    fn name(&self) -> &'static str {
        "insert_set_assisted_columns"
    }

    fn generate(
        &self,
        statement: &SqlStatement,
        parameters: &[Value],
        rule: &EncryptRule,
    ) -> Result<Option<SqlToken>, RewriteError> {
        let (Some(set), Some(table)) = (statement.set_assignments(), statement.single_table())
        else {
            return Ok(None);
        };
        let Some(last) = set.assignments.last() else {
            return Ok(None);
        };

        let mut columns = Vec::new();
        let mut values = Vec::new();
        for assignment in &set.assignments {
            let plain_column = &assignment.column.name;
            let Some(assisted) = rule.assisted_query_column(&table.name, plain_column) else {
                continue;
            };
            let value = match &assignment.value.kind {
                ExprKind::Literal(v) => {
                    TokenValue::Literal(rule.assisted_query_value(&table.name, plain_column, v))
                }
                ExprKind::Placeholder(index) => {
                    let plain = parameters.get(*index).ok_or(RewriteError::UnboundParameter {
                        index: *index,
                        bound: parameters.len(),
                    })?;
                    TokenValue::Parameter(rule.assisted_query_value(&table.name, plain_column, plain))
                }
                ExprKind::Complex if rule.has_assisted_query_encryptor(&table.name, plain_column) => {
                    return Err(RewriteError::UnsupportedValueExpression(plain_column.clone()));
                }
                ExprKind::Complex => TokenValue::Expression(
                    statement
                        .segment_text(assignment.value.start, assignment.value.stop)
                        .to_string(),
                ),
            };
            columns.push(assisted.to_string());
            values.push(value);
        }

        if columns.is_empty() {
            return Ok(None);
        }
        Ok(Some(SqlToken::InsertSetAssistedColumns(InsertSetAssistedColumnsToken {
            offset: last.stop + 1,
            columns,
            values,
        })))
    }
}
