//! Runtime context shared by every statement of a logical connection:
//! compiled rules, executor and merger.

use std::sync::Arc;

use shardline_common::config::{PoolConfig, ShardlineConfig};
use shardline_common::error::{ConfigError, ShardlineResult};
use shardline_common::types::StatementKind;
use shardline_common::value::Value;
use shardline_observability::record_route_metrics;
use shardline_parser::parse;

use crate::executor::fanout::FanoutExecutor;
use crate::merge::ResultMerger;
use crate::rewrite::RewriteEngine;
use crate::route::{GeneratedKeyDescriptor, RouteResult, RoutingEngine};
use crate::rule::{EncryptRule, ShardingRule};

pub struct ShardingContext {
    sharding_rule: ShardingRule,
    encrypt_rule: EncryptRule,
    executor: FanoutExecutor,
    merger: ResultMerger,
    pool: PoolConfig,
}

impl ShardingContext {
    pub fn from_config(config: &ShardlineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            sharding_rule: ShardingRule::from_config(&config.sharding)?,
            encrypt_rule: EncryptRule::from_config(&config.encrypt),
            executor: FanoutExecutor::new(config.executor.max_workers),
            merger: ResultMerger::default(),
            pool: config.pool.clone(),
        })
    }

    pub fn new(sharding_rule: ShardingRule, encrypt_rule: EncryptRule) -> Self {
        Self {
            sharding_rule,
            encrypt_rule,
            executor: FanoutExecutor::default(),
            merger: ResultMerger::default(),
            pool: PoolConfig::default(),
        }
    }

    pub fn with_executor(mut self, executor: FanoutExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_merger(mut self, merger: ResultMerger) -> Self {
        self.merger = merger;
        self
    }

    /// Parse, route and rewrite one logical statement.
    pub fn route(&self, sql: &str, parameters: &[Value]) -> ShardlineResult<RouteResult> {
        let statement = parse(sql)?;
        let route_units = RoutingEngine::new(&self.sharding_rule).route(&statement, parameters)?;
        let units = RewriteEngine::new(&self.sharding_rule, &self.encrypt_rule).rewrite_units(
            sql,
            &statement,
            parameters,
            &route_units,
        )?;

        let generated_key = if statement.kind == StatementKind::Insert {
            statement
                .single_table()
                .and_then(|t| self.sharding_rule.table_rule(&t.name))
                .and_then(|rule| rule.generated_key_column.clone())
                .map(|column| GeneratedKeyDescriptor { column })
        } else {
            None
        };

        record_route_metrics(statement.kind.as_str(), units.len());
        tracing::debug!(logic_sql = sql, units = units.len(), "logic SQL");
        for unit in &units {
            tracing::debug!(data_source = %unit.data_source, actual_sql = %unit.sql, "actual SQL");
        }

        Ok(RouteResult {
            statement: Arc::new(statement),
            units,
            generated_key,
        })
    }

    pub fn sharding_rule(&self) -> &ShardingRule {
        &self.sharding_rule
    }

    pub fn encrypt_rule(&self) -> &EncryptRule {
        &self.encrypt_rule
    }

    pub fn executor(&self) -> &FanoutExecutor {
        &self.executor
    }

    pub fn merger(&self) -> &ResultMerger {
        &self.merger
    }

    pub fn pool_config(&self) -> &PoolConfig {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardline_common::error::{RoutingError, ShardlineError};

    const CONFIG: &str = r#"
[sharding]
data_sources = ["ds_0", "ds_1"]
default_data_source = "ds_0"

[[sharding.tables]]
logic_table = "t_user"
actual_data_nodes = "ds_${0..1}.t_user_${0..1}"
sharding_column = "user_id"
generated_key_column = "id"

[[encrypt.tables]]
table = "t_user"

[[encrypt.tables.columns]]
logic_column = "phone"
assisted_query_column = "phone_assisted"
assisted_query_algorithm = "sha256"

[[encrypt.tables.columns]]
logic_column = "email"
assisted_query_column = "email_assisted"
"#;

    fn context() -> ShardingContext {
        ShardingContext::from_config(&ShardlineConfig::from_toml_str(CONFIG).unwrap()).unwrap()
    }

    #[test]
    fn test_insert_set_routes_and_injects_assisted_column() {
        let sql = "INSERT INTO t_user SET user_id = ?, phone = ?";
        let route = context()
            .route(sql, &[Value::Int64(3), Value::Text("abc".into())])
            .unwrap();
        assert_eq!(route.units.len(), 1);
        let unit = &route.units[0];
        assert_eq!(unit.data_source, "ds_1");
        assert_eq!(
            unit.sql,
            "INSERT INTO t_user_1 SET user_id = ?, phone = ?, phone_assisted = ?"
        );
        assert_eq!(
            unit.parameters,
            vec![
                Value::Int64(3),
                Value::Text("abc".into()),
                Value::Text("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad".into()),
            ]
        );
        assert_eq!(
            route.generated_key,
            Some(GeneratedKeyDescriptor { column: "id".into() })
        );
    }

    #[test]
    fn test_select_full_route_rewrites_every_unit() {
        let route = context().route("SELECT * FROM t_user", &[]).unwrap();
        let sqls: Vec<&str> = route.units.iter().map(|u| u.sql.as_str()).collect();
        assert_eq!(
            sqls,
            vec![
                "SELECT * FROM t_user_0",
                "SELECT * FROM t_user_1",
                "SELECT * FROM t_user_0",
                "SELECT * FROM t_user_1"
            ]
        );
        assert_eq!(route.data_sources(), vec!["ds_0", "ds_1"]);
        assert!(route.generated_key.is_none());
    }

    #[test]
    fn test_unsharded_statement_is_untouched() {
        let route = context().route("SELECT * FROM t_config WHERE k = ?", &[Value::Int64(1)]).unwrap();
        assert!(route.is_single_unit());
        assert_eq!(route.units[0].sql, "SELECT * FROM t_config WHERE k = ?");
        assert_eq!(route.units[0].parameters, vec![Value::Int64(1)]);
    }

    #[test]
    fn test_qualified_columns_use_actual_table() {
        let route = context()
            .route("SELECT t_user.phone FROM t_user WHERE t_user.user_id = 1", &[])
            .unwrap();
        assert!(route.is_single_unit());
        assert_eq!(
            route.units[0].sql,
            "SELECT t_user_1.phone FROM t_user_1 WHERE t_user_1.user_id = 1"
        );

        let route = context()
            .route("SELECT u.phone FROM t_user u WHERE u.user_id = 2", &[])
            .unwrap();
        assert_eq!(
            route.units[0].sql,
            "SELECT u.phone FROM t_user_0 u WHERE u.user_id = 2"
        );
    }

    #[test]
    fn test_insert_set_expression_copied_to_plain_assisted_column() {
        let route = context()
            .route("INSERT INTO t_user SET user_id = 1, email = CONCAT('a', '@b')", &[])
            .unwrap();
        assert_eq!(
            route.units[0].sql,
            "INSERT INTO t_user_1 SET user_id = 1, email = CONCAT('a', '@b'), \
             email_assisted = CONCAT('a', '@b')"
        );
        assert!(route.units[0].parameters.is_empty());
    }

    #[test]
    fn test_routing_error_propagates() {
        let err = context().route("INSERT INTO t_user SET phone = 'x'", &[]).unwrap_err();
        assert!(matches!(
            err,
            ShardlineError::Routing(RoutingError::MissingShardingValue { .. })
        ));
    }
}
