use base64::{engine::general_purpose, Engine as _};
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqliteValue, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

/// Key used to tag base64-encoded blobs on the wire
pub const BLOB_KEY: &str = "$blob";

/// A single SQLite cell value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "JsonValue", into = "JsonValue")]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<SqliteValue> for Value {
    fn from(v: SqliteValue) -> Self {
        match v {
            SqliteValue::Null => Value::Null,
            SqliteValue::Integer(i) => Value::Integer(i),
            SqliteValue::Real(r) => Value::Real(r),
            SqliteValue::Text(t) => Value::Text(t),
            SqliteValue::Blob(b) => Value::Blob(b),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self {
            Value::Null => ValueRef::Null,
            Value::Integer(i) => ValueRef::Integer(*i),
            Value::Real(r) => ValueRef::Real(*r),
            Value::Text(t) => ValueRef::Text(t.as_bytes()),
            Value::Blob(b) => ValueRef::Blob(b),
        };
        Ok(ToSqlOutput::Borrowed(value))
    }
}

impl From<Value> for JsonValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => JsonValue::Null,
            Value::Integer(i) => json!(i),
            Value::Real(r) => json!(r),
            Value::Text(t) => json!(t),
            Value::Blob(b) => json!({ BLOB_KEY: general_purpose::STANDARD.encode(&b) }),
        }
    }
}

impl TryFrom<JsonValue> for Value {
    type Error = String;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        match value {
            JsonValue::Null => Ok(Value::Null),
            JsonValue::Bool(b) => Ok(Value::Integer(b as i64)),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Real(f))
                } else {
                    Err(format!("number out of range: {}", n))
                }
            }
            JsonValue::String(s) => Ok(Value::Text(s)),
            JsonValue::Object(map) => match map.get(BLOB_KEY) {
                Some(JsonValue::String(encoded)) if map.len() == 1 => general_purpose::STANDARD
                    .decode(encoded)
                    .map(Value::Blob)
                    .map_err(|e| format!("invalid base64 blob: {}", e)),
                _ => Err(format!("expected {{\"{}\": <base64>}} for blob values", BLOB_KEY)),
            },
            JsonValue::Array(_) => Err("arrays are not valid cell values".to_string()),
        }
    }
}

impl Value {
    /// Format value for display, truncating long text/blob
    pub fn display(&self, max_len: usize) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Real(r) => {
                if r.fract() == 0.0 {
                    format!("{:.0}", r)
                } else {
                    format!("{:.6}", r)
                }
            }
            Value::Text(t) => {
                if t.chars().count() > max_len {
                    let cut: String = t.chars().take(max_len.saturating_sub(3)).collect();
                    format!("{}...", cut)
                } else {
                    t.clone()
                }
            }
            Value::Blob(b) => format!("<BLOB {} bytes>", b.len()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Result of a row-returning statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub truncated: bool,
    pub exec_ms: u64,
}

/// Outcome of running raw SQL: either rows or a change count
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SqlOutcome {
    Rows(QueryResult),
    Changes {
        changes: usize,
        last_insert_rowid: i64,
        exec_ms: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_scalars_map_to_sqlite_values() {
        let parsed: Vec<Value> =
            serde_json::from_str(r#"[null, 3, 2.5, "abc", true]"#).unwrap();
        assert_eq!(
            parsed,
            vec![
                Value::Null,
                Value::Integer(3),
                Value::Real(2.5),
                Value::Text("abc".into()),
                Value::Integer(1),
            ]
        );
    }

    #[test]
    fn blobs_travel_as_tagged_base64() {
        let blob = Value::Blob(vec![0, 159, 146, 150]);
        let encoded = serde_json::to_value(&blob).unwrap();
        assert_eq!(encoded, json!({ "$blob": "AJ+Slg==" }));
        let decoded: Value = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, blob);
    }

    #[test]
    fn arrays_and_untagged_objects_are_rejected() {
        assert!(serde_json::from_str::<Value>("[1, 2]").is_err());
        assert!(serde_json::from_str::<Value>(r#"{"x": 1}"#).is_err());
        assert!(serde_json::from_str::<Value>(r#"{"$blob": "not base64!"}"#).is_err());
    }

    #[test]
    fn display_truncates_on_char_boundaries() {
        let v = Value::Text("héllo wörld".into());
        assert_eq!(v.display(8), "héllo...");
        assert_eq!(Value::Real(3.0).display(10), "3");
        assert_eq!(Value::Null.display(10), "NULL");
    }
}
