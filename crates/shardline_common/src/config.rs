use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level middleware configuration (shardline.toml).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardlineConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub sharding: ShardingRuleConfig,
    #[serde(default)]
    pub encrypt: EncryptRuleConfig,
}

/// Fan-out executor section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Upper bound on worker threads per logical call (0 = one per execution unit).
    #[serde(default)]
    pub max_workers: usize,
}

/// Backend handle pool section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum handles carried into the next generation (0 = unbounded).
    /// When exceeded, the oldest unmatched handles are dropped at rotation.
    #[serde(default)]
    pub max_retained_handles: usize,
}

/// Sharding rule section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardingRuleConfig {
    /// Physical data source names, in declaration order.
    #[serde(default)]
    pub data_sources: Vec<String>,
    /// Data source for statements that touch no sharded table.
    #[serde(default)]
    pub default_data_source: Option<String>,
    #[serde(default)]
    pub tables: Vec<TableRuleConfig>,
    /// Groups of logic tables that share a node layout and route together.
    #[serde(default)]
    pub binding_tables: Vec<Vec<String>>,
}

/// Sharding algorithm applied to the sharding column value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardingAlgorithmKind {
    /// Integer value modulo the node count.
    #[default]
    Mod,
    /// xxHash3 of the encoded value modulo the node count.
    Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRuleConfig {
    pub logic_table: String,
    /// Inline expression, e.g. `ds_${0..1}.t_order_${0..1}`, or a
    /// comma-separated list of `data_source.table` nodes.
    pub actual_data_nodes: String,
    pub sharding_column: String,
    #[serde(default)]
    pub algorithm: ShardingAlgorithmKind,
    /// Column whose database-generated values are returned as generated keys.
    #[serde(default)]
    pub generated_key_column: Option<String>,
}

/// Encrypt rule section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncryptRuleConfig {
    #[serde(default)]
    pub tables: Vec<EncryptTableConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptTableConfig {
    pub table: String,
    #[serde(default)]
    pub columns: Vec<EncryptColumnConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptColumnConfig {
    pub logic_column: String,
    #[serde(default)]
    pub assisted_query_column: Option<String>,
    /// Digest applied to plain values before they land in the assisted column.
    /// Absent = the plain value is stored as-is.
    #[serde(default)]
    pub assisted_query_algorithm: Option<AssistedQueryAlgorithm>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssistedQueryAlgorithm {
    Sha256,
}

impl ShardlineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ShardlineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let config = Self::from_toml_str(&content)?;
                tracing::info!("Loaded config from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("Config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sharding = &self.sharding;
        let known: HashSet<&str> = sharding.data_sources.iter().map(String::as_str).collect();

        if let Some(ds) = &sharding.default_data_source {
            if !known.contains(ds.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "default_data_source '{}' is not a configured data source",
                    ds
                )));
            }
        }

        let mut node_counts = std::collections::HashMap::new();
        for table in &sharding.tables {
            let nodes = expand_inline(&table.actual_data_nodes)?;
            if nodes.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "table '{}' has no actual data nodes",
                    table.logic_table
                )));
            }
            for node in &nodes {
                let (ds, _) = split_data_node(node)?;
                if !known.contains(ds) {
                    return Err(ConfigError::Invalid(format!(
                        "table '{}' references unknown data source '{}'",
                        table.logic_table, ds
                    )));
                }
            }
            node_counts.insert(table.logic_table.to_lowercase(), nodes.len());
        }

        for group in &sharding.binding_tables {
            let mut expected = None;
            for name in group {
                let count = node_counts.get(&name.to_lowercase()).ok_or_else(|| {
                    ConfigError::Invalid(format!("binding table '{}' has no table rule", name))
                })?;
                match expected {
                    None => expected = Some(*count),
                    Some(n) if n != *count => {
                        return Err(ConfigError::Invalid(format!(
                            "binding group {:?} mixes node counts {} and {}",
                            group, n, count
                        )));
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(())
    }
}

/// Split `data_source.table` into its two halves.
pub fn split_data_node(node: &str) -> Result<(&str, &str), ConfigError> {
    match node.split_once('.') {
        Some((ds, table)) if !ds.is_empty() && !table.is_empty() => Ok((ds, table)),
        _ => Err(ConfigError::Invalid(format!(
            "data node '{}' must look like data_source.table",
            node
        ))),
    }
}

/// Expand an inline node expression.
///
/// Comma-separated segments are expanded independently; inside a segment
/// every `${a..b}` range multiplies out left to right, so
/// `ds_${0..1}.t_${0..1}` yields `ds_0.t_0, ds_0.t_1, ds_1.t_0, ds_1.t_1`.
pub fn expand_inline(expr: &str) -> Result<Vec<String>, ConfigError> {
    let mut out = Vec::new();
    for segment in expr.split(',') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        out.extend(expand_segment(segment)?);
    }
    Ok(out)
}

fn expand_segment(segment: &str) -> Result<Vec<String>, ConfigError> {
    let Some(open) = segment.find("${") else {
        return Ok(vec![segment.to_string()]);
    };
    let close = segment[open..]
        .find('}')
        .map(|i| open + i)
        .ok_or_else(|| ConfigError::Invalid(format!("unclosed '${{' in '{}'", segment)))?;
    let prefix = &segment[..open];
    let range = &segment[open + 2..close];
    let rest = expand_segment(&segment[close + 1..])?;

    let (lo, hi) = range
        .split_once("..")
        .and_then(|(a, b)| Some((a.trim().parse::<u64>().ok()?, b.trim().parse::<u64>().ok()?)))
        .ok_or_else(|| ConfigError::Invalid(format!("bad range '{}' in '{}'", range, segment)))?;
    if lo > hi {
        return Err(ConfigError::Invalid(format!(
            "empty range '{}' in '{}'",
            range, segment
        )));
    }

    let mut out = Vec::with_capacity(((hi - lo + 1) as usize) * rest.len());
    for i in lo..=hi {
        for suffix in &rest {
            out.push(format!("{}{}{}", prefix, i, suffix));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[executor]
max_workers = 4

[sharding]
data_sources = ["ds_0", "ds_1"]
default_data_source = "ds_0"
binding_tables = [["t_order", "t_order_item"]]

[[sharding.tables]]
logic_table = "t_order"
actual_data_nodes = "ds_${0..1}.t_order_${0..1}"
sharding_column = "user_id"
generated_key_column = "order_id"

[[sharding.tables]]
logic_table = "t_order_item"
actual_data_nodes = "ds_${0..1}.t_order_item_${0..1}"
sharding_column = "user_id"
algorithm = "hash"

[[encrypt.tables]]
table = "t_user"

[[encrypt.tables.columns]]
logic_column = "phone"
assisted_query_column = "phone_assisted"
assisted_query_algorithm = "sha256"
"#;

    #[test]
    fn test_parse_sample() {
        let config = ShardlineConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.executor.max_workers, 4);
        assert_eq!(config.pool.max_retained_handles, 0);
        assert_eq!(config.sharding.tables.len(), 2);
        assert_eq!(config.sharding.tables[1].algorithm, ShardingAlgorithmKind::Hash);
        assert_eq!(
            config.encrypt.tables[0].columns[0].assisted_query_algorithm,
            Some(AssistedQueryAlgorithm::Sha256)
        );
    }

    #[test]
    fn test_expand_inline_order() {
        let nodes = expand_inline("ds_${0..1}.t_${0..1}").unwrap();
        assert_eq!(nodes, vec!["ds_0.t_0", "ds_0.t_1", "ds_1.t_0", "ds_1.t_1"]);
    }

    #[test]
    fn test_expand_inline_list() {
        let nodes = expand_inline("ds_0.t_a, ds_1.t_b").unwrap();
        assert_eq!(nodes, vec!["ds_0.t_a", "ds_1.t_b"]);
    }

    #[test]
    fn test_expand_inline_rejects_bad_range() {
        assert!(expand_inline("ds_${1..x}.t").is_err());
        assert!(expand_inline("ds_${3..1}.t").is_err());
        assert!(expand_inline("ds_${0..1.t").is_err());
    }

    #[test]
    fn test_unknown_data_source_rejected() {
        let text = r#"
[sharding]
data_sources = ["ds_0"]

[[sharding.tables]]
logic_table = "t"
actual_data_nodes = "ds_9.t_0"
sharding_column = "id"
"#;
        let err = ShardlineConfig::from_toml_str(text).unwrap_err();
        assert!(err.to_string().contains("ds_9"));
    }

    #[test]
    fn test_binding_group_node_count_mismatch() {
        let text = r#"
[sharding]
data_sources = ["ds_0"]
binding_tables = [["a", "b"]]

[[sharding.tables]]
logic_table = "a"
actual_data_nodes = "ds_0.a_${0..1}"
sharding_column = "id"

[[sharding.tables]]
logic_table = "b"
actual_data_nodes = "ds_0.b_0"
sharding_column = "id"
"#;
        assert!(ShardlineConfig::from_toml_str(text).is_err());
    }

    #[test]
    fn test_load_from_file_and_missing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = ShardlineConfig::load(file.path()).unwrap();
        assert_eq!(config.sharding.data_sources, vec!["ds_0", "ds_1"]);

        let dir = tempfile::tempdir().unwrap();
        let config = ShardlineConfig::load(dir.path().join("absent.toml")).unwrap();
        assert!(config.sharding.tables.is_empty());
    }
}
