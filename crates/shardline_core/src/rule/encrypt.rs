//! Encrypt rule view: which plain columns carry an assisted query column and
//! how plain values are turned into assisted query values.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use shardline_common::config::{AssistedQueryAlgorithm, EncryptRuleConfig};
use shardline_common::value::Value;

/// Produces the deterministic, searchable form of a plain value.
pub trait AssistedQueryEncryptor: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn query_assisted_encrypt(&self, plain: &Value) -> Value;
}

/// Lower-case hex SHA-256 of the value's plain text. NULL stays NULL.
#[derive(Debug, Default)]
pub struct Sha256AssistedEncryptor;

impl AssistedQueryEncryptor for Sha256AssistedEncryptor {
    fn name(&self) -> &'static str {
        "sha256"
    }

    fn query_assisted_encrypt(&self, plain: &Value) -> Value {
        match plain.to_plain_text() {
            Some(text) => Value::Text(format!("{:x}", Sha256::digest(text.as_bytes()))),
            None => Value::Null,
        }
    }
}

#[derive(Debug, Clone)]
struct EncryptColumn {
    logic_column: String,
    assisted_query_column: Option<String>,
    encryptor: Option<Arc<dyn AssistedQueryEncryptor>>,
}

#[derive(Debug, Clone, Default)]
pub struct EncryptRule {
    /// Keyed by lower-cased logic table name.
    tables: HashMap<String, Vec<EncryptColumn>>,
}

impl EncryptRule {
    pub fn from_config(config: &EncryptRuleConfig) -> Self {
        let mut tables = HashMap::new();
        for table in &config.tables {
            let columns = table
                .columns
                .iter()
                .map(|c| EncryptColumn {
                    logic_column: c.logic_column.clone(),
                    assisted_query_column: c.assisted_query_column.clone(),
                    encryptor: c.assisted_query_algorithm.map(encryptor_for),
                })
                .collect();
            tables.insert(table.table.to_lowercase(), columns);
        }
        Self { tables }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    fn column(&self, table: &str, column: &str) -> Option<&EncryptColumn> {
        self.tables
            .get(&table.to_lowercase())?
            .iter()
            .find(|c| c.logic_column.eq_ignore_ascii_case(column))
    }

    /// Assisted query column mapped to `table.column`, if any.
    pub fn assisted_query_column(&self, table: &str, column: &str) -> Option<&str> {
        self.column(table, column)?.assisted_query_column.as_deref()
    }

    pub fn has_assisted_query_encryptor(&self, table: &str, column: &str) -> bool {
        self.column(table, column)
            .is_some_and(|c| c.encryptor.is_some())
    }

    /// Value stored in the assisted query column for a plain value.
    /// Without a configured algorithm the plain value is stored as-is.
    pub fn assisted_query_value(&self, table: &str, column: &str, plain: &Value) -> Value {
        match self.column(table, column).and_then(|c| c.encryptor.as_ref()) {
            Some(encryptor) => encryptor.query_assisted_encrypt(plain),
            None => plain.clone(),
        }
    }
}

fn encryptor_for(algorithm: AssistedQueryAlgorithm) -> Arc<dyn AssistedQueryEncryptor> {
    match algorithm {
        AssistedQueryAlgorithm::Sha256 => Arc::new(Sha256AssistedEncryptor),
    }
}
