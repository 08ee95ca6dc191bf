use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A single scalar value bound to a parameter or carried in a result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Int64(i64),
    Float64(f64),
    Text(String),
}

/// A result row, positionally aligned with its cursor's column labels.
pub type Row = Vec<Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Text form used when a value feeds a digest (assisted query columns).
    pub fn to_plain_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Boolean(b) => Some(b.to_string()),
            Value::Int64(v) => Some(v.to_string()),
            Value::Float64(v) => Some(v.to_string()),
            Value::Text(s) => Some(s.clone()),
        }
    }

    /// Encode into a byte buffer for hash sharding.
    /// Type tag + value keeps `1` and `'1'` apart.
    pub fn encode_for_hash(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Null => buf.push(0x00),
            Value::Boolean(b) => {
                buf.push(0x01);
                buf.push(u8::from(*b));
            }
            Value::Int64(v) => {
                buf.push(0x03);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::Float64(v) => {
                buf.push(0x04);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Value::Text(s) => {
                buf.push(0x05);
                buf.extend_from_slice(s.as_bytes());
                buf.push(0x00);
            }
        }
    }

    /// Total order used by merges. NULL sorts first; integers and floats compare numerically.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Float64(a), Value::Float64(b)) => a.total_cmp(b),
            (Value::Int64(a), Value::Float64(b)) => (*a as f64).total_cmp(b),
            (Value::Float64(a), Value::Int64(b)) => a.total_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (a, b) => a.type_rank().cmp(&b.type_rank()),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Int64(_) | Value::Float64(_) => 2,
            Value::Text(_) => 3,
        }
    }
}

impl fmt::Display for Value {
    /// Renders as a SQL literal (for logs and diagnostics only).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int64(i64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sorts_first() {
        assert_eq!(Value::Null.total_cmp(&Value::Int64(-5)), Ordering::Less);
        assert_eq!(Value::Text("a".into()).total_cmp(&Value::Null), Ordering::Greater);
    }

    #[test]
    fn test_numeric_cross_compare() {
        assert_eq!(Value::Int64(2).total_cmp(&Value::Float64(1.5)), Ordering::Greater);
        assert_eq!(Value::Float64(2.0).total_cmp(&Value::Int64(2)), Ordering::Equal);
    }

    #[test]
    fn test_hash_encoding_distinguishes_types() {
        let mut a = Vec::new();
        let mut b = Vec::new();
        Value::Int64(1).encode_for_hash(&mut a);
        Value::Text("1".into()).encode_for_hash(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_display_escapes_quotes() {
        assert_eq!(Value::Text("o'neil".into()).to_string(), "'o''neil'");
    }
}
