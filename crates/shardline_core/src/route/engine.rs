//! Routing engine: resolves a parsed statement to ordered route units.
//!
//! - No sharded table → the default data source, single unit.
//! - Sharded tables must all be bound to the first one; they route together
//!   and share node indexes.
//! - SELECT/UPDATE/DELETE prune by `=` / `IN` conditions on the sharding
//!   column and fall back to every node. INSERT needs a sharding value in
//!   every row and all rows must land on the same node.
//! - Units are ordered by ascending data-node index.

use std::collections::BTreeSet;

use shardline_common::error::RoutingError;
use shardline_common::types::StatementKind;
use shardline_common::value::Value;
use shardline_parser::{Conditions, ExprSegment, SqlStatement};

use super::{RouteUnit, TableMapping};
use crate::rule::{ShardingRule, TableRule};

pub struct RoutingEngine<'a> {
    rule: &'a ShardingRule,
}

impl<'a> RoutingEngine<'a> {
    pub fn new(rule: &'a ShardingRule) -> Self {
        Self { rule }
    }

    pub fn route(
        &self,
        statement: &SqlStatement,
        parameters: &[Value],
    ) -> Result<Vec<RouteUnit>, RoutingError> {
        let sharded: Vec<&TableRule> = statement
            .table_names()
            .into_iter()
            .filter_map(|t| self.rule.table_rule(t))
            .collect();

        let Some(primary) = sharded.first().copied() else {
            return self.route_default(statement);
        };

        let unbound: Vec<String> = sharded
            .iter()
            .filter(|t| !self.rule.is_bound(&primary.logic_table, &t.logic_table))
            .map(|t| t.logic_table.clone())
            .collect();
        if !unbound.is_empty() {
            let mut tables = vec![primary.logic_table.clone()];
            tables.extend(unbound);
            return Err(RoutingError::UnboundTables(tables));
        }

        let node_indexes: BTreeSet<usize> = if statement.kind == StatementKind::Insert {
            BTreeSet::from([self.insert_node(primary, statement, parameters)?])
        } else {
            self.condition_nodes(&sharded, statement, parameters)?
        };

        let units: Vec<RouteUnit> = node_indexes
            .into_iter()
            .filter_map(|idx| {
                let node = primary.nodes.get(idx)?;
                let table_mappings = sharded
                    .iter()
                    .filter_map(|t| {
                        t.nodes.get(idx).map(|n| TableMapping {
                            logic_table: t.logic_table.clone(),
                            actual_table: n.table.clone(),
                        })
                    })
                    .collect();
                Some(RouteUnit {
                    data_source: node.data_source.clone(),
                    table_mappings,
                })
            })
            .collect();

        tracing::debug!(
            table = %primary.logic_table,
            kind = %statement.kind,
            units = units.len(),
            "routed sharded statement"
        );
        Ok(units)
    }

    fn route_default(&self, statement: &SqlStatement) -> Result<Vec<RouteUnit>, RoutingError> {
        match self.rule.default_data_source() {
            Some(ds) => {
                tracing::debug!(data_source = ds, "routed to default data source");
                Ok(vec![RouteUnit::new(ds)])
            }
            None => Err(RoutingError::NoDataSource(
                statement.table_names().into_iter().map(String::from).collect(),
            )),
        }
    }

    fn insert_node(
        &self,
        table: &TableRule,
        statement: &SqlStatement,
        parameters: &[Value],
    ) -> Result<usize, RoutingError> {
        let missing = || RoutingError::MissingShardingValue {
            table: table.logic_table.clone(),
            column: table.sharding_column.clone(),
        };
        let position = statement
            .insert_column_names()
            .iter()
            .position(|c| table.is_sharding_column(c))
            .ok_or_else(missing)?;

        let mut nodes = BTreeSet::new();
        for row in statement.insert_rows() {
            let expr = row.get(position).ok_or_else(missing)?;
            nodes.insert(self.node_for(table, expr, parameters)?);
        }
        let mut iter = nodes.into_iter();
        match (iter.next(), iter.next()) {
            (Some(idx), None) => Ok(idx),
            (None, _) => Err(missing()),
            (Some(_), Some(_)) => Err(RoutingError::InsertSpansNodes(table.logic_table.clone())),
        }
    }

    /// Node set from sharding-column conditions. Several conditions on the
    /// sharding column intersect; a contradiction keeps the first
    /// condition's nodes (the statement matches no rows either way).
    fn condition_nodes(
        &self,
        sharded: &[&TableRule],
        statement: &SqlStatement,
        parameters: &[Value],
    ) -> Result<BTreeSet<usize>, RoutingError> {
        let all = || (0..sharded[0].nodes.len()).collect::<BTreeSet<usize>>();

        let Conditions::Usable(conditions) = &statement.conditions else {
            return Ok(all());
        };

        let mut first: Option<BTreeSet<usize>> = None;
        let mut acc: Option<BTreeSet<usize>> = None;
        for condition in conditions {
            let table = sharded.iter().copied().find(|t| {
                t.is_sharding_column(&condition.column)
                    && condition
                        .table
                        .as_deref()
                        .map_or(true, |name| t.logic_table.eq_ignore_ascii_case(name))
            });
            let Some(table) = table else {
                continue;
            };

            let mut nodes = BTreeSet::new();
            for expr in &condition.values {
                nodes.insert(self.node_for(table, expr, parameters)?);
            }
            if first.is_none() {
                first = Some(nodes.clone());
            }
            acc = Some(match acc {
                Some(prev) => prev.intersection(&nodes).copied().collect(),
                None => nodes,
            });
        }

        Ok(match (acc, first) {
            (Some(nodes), _) if !nodes.is_empty() => nodes,
            (Some(_), Some(first)) => first,
            _ => all(),
        })
    }

    fn node_for(
        &self,
        table: &TableRule,
        expr: &ExprSegment,
        parameters: &[Value],
    ) -> Result<usize, RoutingError> {
        let invalid = |reason: String| RoutingError::InvalidShardingValue {
            table: table.logic_table.clone(),
            column: table.sharding_column.clone(),
            reason,
        };
        let value = expr
            .resolve(parameters)
            .map_err(|index| RoutingError::UnboundParameter {
                index,
                bound: parameters.len(),
            })?
            .ok_or_else(|| invalid("value is not a literal or parameter".into()))?;
        table.node_index(&value).map_err(invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardline_common::config::{ShardingAlgorithmKind, ShardingRuleConfig, TableRuleConfig};
    use shardline_parser::parse;

    fn rule(default_ds: Option<&str>) -> ShardingRule {
        let table = |name: &str| TableRuleConfig {
            logic_table: name.into(),
            actual_data_nodes: format!("ds_${{0..1}}.{}_${{0..1}}", name),
            sharding_column: "user_id".into(),
            algorithm: ShardingAlgorithmKind::Mod,
            generated_key_column: None,
        };
        ShardingRule::from_config(&ShardingRuleConfig {
            data_sources: vec!["ds_0".into(), "ds_1".into()],
            default_data_source: default_ds.map(String::from),
            tables: vec![table("t_order"), table("t_order_item"), table("t_user")],
            binding_tables: vec![vec!["t_order".into(), "t_order_item".into()]],
        })
        .unwrap()
    }

    fn route(rule: &ShardingRule, sql: &str, params: &[Value]) -> Result<Vec<RouteUnit>, RoutingError> {
        RoutingEngine::new(rule).route(&parse(sql).unwrap(), params)
    }

    fn targets(units: &[RouteUnit], logic: &str) -> Vec<String> {
        units
            .iter()
            .map(|u| format!("{}.{}", u.data_source, u.actual_table(logic).unwrap_or("-")))
            .collect()
    }

    #[test]
    fn test_equality_routes_to_single_node() {
        let rule = rule(None);
        let units = route(&rule, "SELECT * FROM t_order WHERE user_id = ?", &[Value::Int64(3)]).unwrap();
        assert_eq!(targets(&units, "t_order"), vec!["ds_1.t_order_1"]);
    }

    #[test]
    fn test_in_routes_to_nodes_in_order() {
        let rule = rule(None);
        let units = route(&rule, "SELECT * FROM t_order WHERE user_id IN (6, 1, 2)", &[]).unwrap();
        assert_eq!(
            targets(&units, "t_order"),
            vec!["ds_0.t_order_1", "ds_1.t_order_0"]
        );
    }

    #[test]
    fn test_no_condition_is_full_route() {
        let rule = rule(None);
        let units = route(&rule, "DELETE FROM t_order WHERE status = 'x'", &[]).unwrap();
        assert_eq!(units.len(), 4);
        assert_eq!(units[0].data_source, "ds_0");
        assert_eq!(units[3].actual_table("t_order"), Some("t_order_1"));
    }

    #[test]
    fn test_or_is_full_route() {
        let rule = rule(None);
        let units = route(&rule, "SELECT * FROM t_order WHERE user_id = 1 OR user_id = 2", &[]).unwrap();
        assert_eq!(units.len(), 4);
    }

    #[test]
    fn test_contradiction_keeps_first_condition_nodes() {
        let rule = rule(None);
        let units =
            route(&rule, "SELECT * FROM t_order WHERE user_id = 1 AND user_id = 2", &[]).unwrap();
        assert_eq!(targets(&units, "t_order"), vec!["ds_0.t_order_1"]);
    }

    #[test]
    fn test_binding_tables_route_together() {
        let rule = rule(None);
        let units = route(
            &rule,
            "SELECT * FROM t_order o JOIN t_order_item i ON o.order_id = i.order_id WHERE o.user_id = 2",
            &[],
        )
        .unwrap();
        assert_eq!(targets(&units, "t_order"), vec!["ds_1.t_order_0"]);
        assert_eq!(units[0].actual_table("t_order_item"), Some("t_order_item_0"));
    }

    #[test]
    fn test_unbound_tables_rejected() {
        let rule = rule(None);
        let err = route(&rule, "SELECT * FROM t_order, t_user WHERE t_order.user_id = 1", &[]).unwrap_err();
        assert_eq!(
            err,
            RoutingError::UnboundTables(vec!["t_order".into(), "t_user".into()])
        );
    }

    #[test]
    fn test_unsharded_table_uses_default_data_source() {
        let units = route(&rule(Some("ds_0")), "SELECT * FROM t_config", &[]).unwrap();
        assert_eq!(units, vec![RouteUnit::new("ds_0")]);

        let err = route(&rule(None), "SELECT * FROM t_config", &[]).unwrap_err();
        assert_eq!(err, RoutingError::NoDataSource(vec!["t_config".into()]));
    }

    #[test]
    fn test_insert_routes_by_sharding_value() {
        let rule = rule(None);
        let units = route(
            &rule,
            "INSERT INTO t_order (user_id, status) VALUES (?, 'new')",
            &[Value::Int64(5)],
        )
        .unwrap();
        assert_eq!(targets(&units, "t_order"), vec!["ds_0.t_order_1"]);

        let units = route(&rule, "INSERT INTO t_order SET status = 'a', user_id = 2", &[]).unwrap();
        assert_eq!(targets(&units, "t_order"), vec!["ds_1.t_order_0"]);
    }

    #[test]
    fn test_insert_errors() {
        let rule = rule(None);
        assert!(matches!(
            route(&rule, "INSERT INTO t_order (status) VALUES ('x')", &[]),
            Err(RoutingError::MissingShardingValue { .. })
        ));
        assert!(matches!(
            route(&rule, "INSERT INTO t_order (user_id) VALUES (1), (2)", &[]),
            Err(RoutingError::InsertSpansNodes(_))
        ));
        assert!(matches!(
            route(&rule, "INSERT INTO t_order (user_id) VALUES (?)", &[]),
            Err(RoutingError::UnboundParameter { index: 0, bound: 0 })
        ));
        assert!(matches!(
            route(&rule, "INSERT INTO t_order (user_id) VALUES ('abc')", &[]),
            Err(RoutingError::InvalidShardingValue { .. })
        ));
    }

    #[test]
    fn test_multi_row_insert_on_one_node() {
        let rule = rule(None);
        let units = route(&rule, "INSERT INTO t_order (user_id) VALUES (1), (5)", &[]).unwrap();
        assert_eq!(units.len(), 1);
    }
}
