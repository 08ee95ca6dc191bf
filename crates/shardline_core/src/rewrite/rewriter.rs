//! Applies tokens to the original SQL for one route unit.
//!
//! Tokens are applied rightmost-first so every offset still refers to the
//! pristine text. Parameters contributed by a token are inserted at the
//! index equal to the number of placeholders before its offset.

use shardline_common::error::RewriteError;
use shardline_common::value::Value;
use shardline_parser::SqlStatement;

use super::token::SqlToken;
use crate::route::{ExecutionUnit, RouteUnit};

pub fn rewrite(
    sql: &str,
    statement: &SqlStatement,
    tokens: &[SqlToken],
    unit: &RouteUnit,
    parameters: &[Value],
) -> Result<ExecutionUnit, RewriteError> {
    if tokens.is_empty() {
        return Ok(ExecutionUnit {
            data_source: unit.data_source.clone(),
            sql: sql.to_string(),
            parameters: parameters.to_vec(),
        });
    }

    let mut ordered: Vec<&SqlToken> = tokens.iter().collect();
    for token in &ordered {
        let (start, end) = token.span();
        if end > sql.len() {
            return Err(RewriteError::OffsetOutOfRange {
                offset: end,
                len: sql.len(),
            });
        }
        for pos in [start, end] {
            if !sql.is_char_boundary(pos) {
                return Err(RewriteError::NotCharBoundary(pos));
            }
        }
    }
    // Stable sort keeps same-offset insertions in generator order.
    ordered.sort_by_key(|t| t.span());
    for pair in ordered.windows(2) {
        let (_, prev_end) = pair[0].span();
        let (next_start, _) = pair[1].span();
        if next_start < prev_end {
            return Err(RewriteError::Overlapping(next_start));
        }
    }

    let mut text = sql.to_string();
    let mut params = parameters.to_vec();
    for token in ordered.iter().rev() {
        let (start, end) = token.span();
        let rendered = token.render(unit, &sql[start..end]);
        text.replace_range(start..end, &rendered);

        let extra = token.parameters();
        if !extra.is_empty() {
            let at = statement.placeholders_before(start).min(params.len());
            params.splice(at..at, extra);
        }
    }

    Ok(ExecutionUnit {
        data_source: unit.data_source.clone(),
        sql: text,
        parameters: params,
    })
}
