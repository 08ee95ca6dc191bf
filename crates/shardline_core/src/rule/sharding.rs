//! Sharding rule view: table rules, their ordered data nodes, binding groups
//! and the default data source.
//!
//! # Node selection
//!
//! - **mod**: an integer sharding value picks node `value mod node_count`
//!   (Euclidean remainder, so negative keys still land on a valid node).
//! - **hash**: the value's type-tagged byte encoding is hashed with xxHash3-64
//!   and the node is `hash % node_count`.
//!
//! Node order is the configured data-node order, so the same value always
//! routes to the same node across processes.

use shardline_common::config::{expand_inline, split_data_node, ShardingAlgorithmKind, ShardingRuleConfig};
use shardline_common::error::ConfigError;
use shardline_common::value::Value;
use xxhash_rust::xxh3::xxh3_64;

/// One physical location of a logic table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataNode {
    pub data_source: String,
    pub table: String,
}

#[derive(Debug, Clone)]
pub struct TableRule {
    pub logic_table: String,
    pub nodes: Vec<DataNode>,
    pub sharding_column: String,
    pub algorithm: ShardingAlgorithmKind,
    pub generated_key_column: Option<String>,
}

impl TableRule {
    /// Index into `nodes` for one sharding value. `Err` carries the reason
    /// the value cannot be sharded.
    pub fn node_index(&self, value: &Value) -> Result<usize, String> {
        let count = self.nodes.len() as u64;
        if count == 0 {
            return Err("table has no data nodes".into());
        }
        if value.is_null() {
            return Err("NULL cannot be sharded".into());
        }
        match self.algorithm {
            ShardingAlgorithmKind::Mod => {
                let v = value
                    .as_i64()
                    .ok_or_else(|| format!("mod sharding needs an integer, got {}", value))?;
                Ok(v.rem_euclid(count as i64) as usize)
            }
            ShardingAlgorithmKind::Hash => {
                let mut buf = Vec::with_capacity(16);
                value.encode_for_hash(&mut buf);
                Ok((xxh3_64(&buf) % count) as usize)
            }
        }
    }

    pub fn is_sharding_column(&self, column: &str) -> bool {
        self.sharding_column.eq_ignore_ascii_case(column)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShardingRule {
    data_sources: Vec<String>,
    default_data_source: Option<String>,
    tables: Vec<TableRule>,
    /// Lower-cased logic table names per binding group.
    binding_groups: Vec<Vec<String>>,
}

impl ShardingRule {
    pub fn from_config(config: &ShardingRuleConfig) -> Result<Self, ConfigError> {
        let mut tables = Vec::with_capacity(config.tables.len());
        for table in &config.tables {
            let mut nodes = Vec::new();
            for node in expand_inline(&table.actual_data_nodes)? {
                let (data_source, actual) = split_data_node(&node)?;
                if !config.data_sources.iter().any(|ds| ds == data_source) {
                    return Err(ConfigError::Invalid(format!(
                        "table '{}' references unknown data source '{}'",
                        table.logic_table, data_source
                    )));
                }
                nodes.push(DataNode {
                    data_source: data_source.to_string(),
                    table: actual.to_string(),
                });
            }
            if nodes.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "table '{}' has no actual data nodes",
                    table.logic_table
                )));
            }
            tables.push(TableRule {
                logic_table: table.logic_table.clone(),
                nodes,
                sharding_column: table.sharding_column.clone(),
                algorithm: table.algorithm,
                generated_key_column: table.generated_key_column.clone(),
            });
        }

        let mut binding_groups = Vec::with_capacity(config.binding_tables.len());
        for group in &config.binding_tables {
            let mut node_count = None;
            for name in group {
                let count = tables
                    .iter()
                    .find(|t| t.logic_table.eq_ignore_ascii_case(name))
                    .map(|t| t.nodes.len())
                    .ok_or_else(|| {
                        ConfigError::Invalid(format!("binding table '{}' has no table rule", name))
                    })?;
                if *node_count.get_or_insert(count) != count {
                    return Err(ConfigError::Invalid(format!(
                        "binding group {:?} mixes node counts",
                        group
                    )));
                }
            }
            binding_groups.push(group.iter().map(|t| t.to_lowercase()).collect());
        }

        Ok(Self {
            data_sources: config.data_sources.clone(),
            default_data_source: config.default_data_source.clone(),
            tables,
            binding_groups,
        })
    }

    pub fn table_rule(&self, logic_table: &str) -> Option<&TableRule> {
        self.tables
            .iter()
            .find(|t| t.logic_table.eq_ignore_ascii_case(logic_table))
    }

    pub fn is_sharded(&self, logic_table: &str) -> bool {
        self.table_rule(logic_table).is_some()
    }

    /// Whether `a` and `b` share a binding group (a table is bound to itself).
    pub fn is_bound(&self, a: &str, b: &str) -> bool {
        if a.eq_ignore_ascii_case(b) {
            return true;
        }
        let (a, b) = (a.to_lowercase(), b.to_lowercase());
        self.binding_groups
            .iter()
            .any(|group| group.contains(&a) && group.contains(&b))
    }

    pub fn default_data_source(&self) -> Option<&str> {
        self.default_data_source.as_deref()
    }

    pub fn data_sources(&self) -> &[String] {
        &self.data_sources
    }

    pub fn tables(&self) -> &[TableRule] {
        &self.tables
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardline_common::config::TableRuleConfig;

    fn config(algorithm: ShardingAlgorithmKind) -> ShardingRuleConfig {
        ShardingRuleConfig {
            data_sources: vec!["ds_0".into(), "ds_1".into()],
            default_data_source: Some("ds_0".into()),
            tables: vec![
                TableRuleConfig {
                    logic_table: "t_order".into(),
                    actual_data_nodes: "ds_${0..1}.t_order_${0..1}".into(),
                    sharding_column: "user_id".into(),
                    algorithm,
                    generated_key_column: Some("order_id".into()),
                },
                TableRuleConfig {
                    logic_table: "t_order_item".into(),
                    actual_data_nodes: "ds_${0..1}.t_order_item_${0..1}".into(),
                    sharding_column: "user_id".into(),
                    algorithm,
                    generated_key_column: None,
                },
            ],
            binding_tables: vec![vec!["t_order".into(), "T_ORDER_ITEM".into()]],
        }
    }

    #[test]
    fn test_nodes_follow_inline_expansion_order() {
        let rule = ShardingRule::from_config(&config(ShardingAlgorithmKind::Mod)).unwrap();
        let t = rule.table_rule("T_ORDER").unwrap();
        let nodes: Vec<String> = t
            .nodes
            .iter()
            .map(|n| format!("{}.{}", n.data_source, n.table))
            .collect();
        assert_eq!(
            nodes,
            vec!["ds_0.t_order_0", "ds_0.t_order_1", "ds_1.t_order_0", "ds_1.t_order_1"]
        );
    }

    #[test]
    fn test_mod_node_index() {
        let rule = ShardingRule::from_config(&config(ShardingAlgorithmKind::Mod)).unwrap();
        let t = rule.table_rule("t_order").unwrap();
        assert_eq!(t.node_index(&Value::Int64(6)), Ok(2));
        assert_eq!(t.node_index(&Value::Int64(-1)), Ok(3));
        assert!(t.node_index(&Value::Text("6".into())).is_err());
        assert!(t.node_index(&Value::Null).is_err());
    }

    #[test]
    fn test_hash_node_index_is_stable() {
        let rule = ShardingRule::from_config(&config(ShardingAlgorithmKind::Hash)).unwrap();
        let t = rule.table_rule("t_order").unwrap();
        let a = t.node_index(&Value::Text("alice".into())).unwrap();
        let b = t.node_index(&Value::Text("alice".into())).unwrap();
        assert_eq!(a, b);
        assert!(a < 4);
    }

    #[test]
    fn test_binding_groups() {
        let rule = ShardingRule::from_config(&config(ShardingAlgorithmKind::Mod)).unwrap();
        assert!(rule.is_bound("t_order", "t_order_item"));
        assert!(rule.is_bound("t_user", "T_USER"));
        assert!(!rule.is_bound("t_order", "t_user"));
    }

    #[test]
    fn test_unknown_data_source_rejected() {
        let mut cfg = config(ShardingAlgorithmKind::Mod);
        cfg.tables[0].actual_data_nodes = "ds_9.t_order_0".into();
        assert!(ShardingRule::from_config(&cfg).is_err());
    }
}
