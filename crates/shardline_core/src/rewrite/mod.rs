//! SQL rewriting: token generation and per-unit application.

pub mod generator;
pub mod rewriter;
pub mod token;

use shardline_common::error::RewriteError;
use shardline_common::value::Value;
use shardline_parser::SqlStatement;

pub use generator::{
    CollectionTokenGenerator, InsertSetAddAssistedColumnsTokenGenerator, OptionalTokenGenerator,
    TableTokenGenerator,
};
pub use token::{SqlToken, TokenValue};

use crate::route::{ExecutionUnit, RouteUnit};
use crate::rule::{EncryptRule, ShardingRule};

/// Runs the fixed generator list and rewrites each route unit.
pub struct RewriteEngine<'a> {
    sharding: &'a ShardingRule,
    encrypt: &'a EncryptRule,
    optional: Vec<Box<dyn OptionalTokenGenerator<EncryptRule>>>,
}

impl<'a> RewriteEngine<'a> {
    pub fn new(sharding: &'a ShardingRule, encrypt: &'a EncryptRule) -> Self {
        Self {
            sharding,
            encrypt,
            optional: vec![Box::new(InsertSetAddAssistedColumnsTokenGenerator)],
        }
    }

    pub fn generate_tokens(
        &self,
        statement: &SqlStatement,
        parameters: &[Value],
    ) -> Result<Vec<SqlToken>, RewriteError> {
        let mut tokens = TableTokenGenerator.generate(statement, self.sharding);
        for generator in &self.optional {
            if let Some(token) = generator.generate(statement, parameters, self.encrypt)? {
                tracing::debug!(generator = generator.name(), "optional token generated");
                tokens.push(token);
            }
        }
        Ok(tokens)
    }

    pub fn rewrite_units(
        &self,
        sql: &str,
        statement: &SqlStatement,
        parameters: &[Value],
        units: &[RouteUnit],
    ) -> Result<Vec<ExecutionUnit>, RewriteError> {
        let tokens = self.generate_tokens(statement, parameters)?;
        units
            .iter()
            .map(|unit| rewriter::rewrite(sql, statement, &tokens, unit, parameters))
            .collect()
    }
}
