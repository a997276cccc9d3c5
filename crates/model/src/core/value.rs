use bigdecimal::{BigDecimal, FromPrimitive, ToPrimitive};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt, str::FromStr};
use uuid::Uuid;

/// Dynamically typed cell value as read from a source row or produced by a
/// transformation. `Null` is distinct from empty text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Decimal(BigDecimal),
    Bool(bool),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Uuid(Uuid),
    Bytes(Vec<u8>),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Text rendering used by concat/split/lookup and key-map keys.
    /// Null yields `None`; callers decide what an absent value means.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Int(v) => Some(v.to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::Decimal(v) => Some(v.to_string()),
            Value::Bool(v) => Some(v.to_string()),
            Value::Text(v) => Some(v.clone()),
            Value::Date(v) => Some(v.to_string()),
            Value::DateTime(v) => Some(v.format("%Y-%m-%dT%H:%M:%S").to_string()),
            Value::Uuid(v) => Some(v.to_string()),
            Value::Bytes(_) => None,
            Value::Null => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) => Some(*v as i64),
            Value::Decimal(v) => v.to_i64(),
            Value::Bool(v) => Some(i64::from(*v)),
            Value::Text(v) => v.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Decimal(v) => v.to_f64(),
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Text(v) => v.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Int(v) => Some(*v != 0),
            Value::Float(v) => Some(*v != 0.0),
            Value::Bool(v) => Some(*v),
            Value::Text(v) => match v.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_big_decimal(&self) -> Option<BigDecimal> {
        match self {
            Value::Int(v) => Some(BigDecimal::from(*v)),
            Value::Float(v) => BigDecimal::from_f64(*v),
            Value::Decimal(v) => Some(v.clone()),
            Value::Text(v) => BigDecimal::from_str(v.trim()).ok(),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_) | Value::Decimal(_))
    }

    /// Comparison used by conditional predicates and the batch cursor:
    /// numeric when both sides coerce to numbers, otherwise lexicographic
    /// over the text renderings.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        if let (Some(a), Some(b)) = (self.as_big_decimal(), other.as_big_decimal()) {
            return Some(a.cmp(&b));
        }
        match (self, other) {
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            _ => match (self.as_text(), other.as_text()) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => None,
            },
        }
    }

    /// Renders the value as a T-SQL literal. Text is quote-escaped since
    /// cell contents are user data.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Decimal(v) => v.to_string(),
            Value::Bool(v) => if *v { "1" } else { "0" }.to_string(),
            Value::Text(v) => format!("N'{}'", v.replace('\'', "''")),
            Value::Date(v) => format!("'{v}'"),
            Value::DateTime(v) => format!("'{}'", v.format("%Y-%m-%dT%H:%M:%S%.3f")),
            Value::Uuid(v) => format!("'{v}'"),
            Value::Bytes(v) => {
                let hex = v
                    .iter()
                    .fold(String::new(), |acc, byte| acc + &format!("{byte:02x}"));
                format!("0x{hex}")
            }
            Value::Null => "NULL".to_string(),
        }
    }

    /// JSON rendering used for row-error source snapshots.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Int(v) => serde_json::json!(v),
            Value::Float(v) => serde_json::json!(v),
            Value::Decimal(v) => serde_json::Value::String(v.to_string()),
            Value::Bool(v) => serde_json::json!(v),
            Value::Text(v) => serde_json::Value::String(v.clone()),
            Value::Date(v) => serde_json::Value::String(v.to_string()),
            Value::DateTime(v) => {
                serde_json::Value::String(v.format("%Y-%m-%dT%H:%M:%S").to_string())
            }
            Value::Uuid(v) => serde_json::Value::String(v.to_string()),
            Value::Bytes(v) => {
                let hex = v
                    .iter()
                    .fold(String::new(), |acc, byte| acc + &format!("{byte:02x}"));
                serde_json::Value::String(format!("0x{hex}"))
            }
            Value::Null => serde_json::Value::Null,
        }
    }

    pub fn utc_datetime(ts: DateTime<Utc>) -> Value {
        Value::DateTime(ts.naive_utc())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str("NULL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_coercions() {
        assert_eq!(Value::Int(42).as_text().as_deref(), Some("42"));
        assert_eq!(Value::Null.as_text(), None);
        assert_eq!(Value::Text(String::new()).as_text().as_deref(), Some(""));
        assert_eq!(Value::Bool(true).as_text().as_deref(), Some("true"));
    }

    #[test]
    fn numeric_comparison_wins_over_lexicographic() {
        let a = Value::Text("9".into());
        let b = Value::Int(10);
        assert_eq!(a.compare(&b), Some(Ordering::Less));
    }

    #[test]
    fn lexicographic_fallback() {
        let a = Value::Text("apple".into());
        let b = Value::Text("banana".into());
        assert_eq!(a.compare(&b), Some(Ordering::Less));
    }

    #[test]
    fn sql_literal_escapes_quotes() {
        let v = Value::Text("O'Brien".into());
        assert_eq!(v.to_sql_literal(), "N'O''Brien'");
    }

    #[test]
    fn sql_literal_renders_bytes_as_hex() {
        let v = Value::Bytes(vec![0xde, 0xad]);
        assert_eq!(v.to_sql_literal(), "0xdead");
    }
}
