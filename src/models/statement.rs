//! Statement and parameter types.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Default number of rows buffered per batch when streaming results.
pub const DEFAULT_STREAM_BATCH_SIZE: usize = 100;

/// A value bound to a statement placeholder.
///
/// Parameters are always bound, never interpolated into the SQL text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Raw bytes, serialized as base64.
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    Json(JsonValue),
}

impl QueryParam {
    pub fn is_null(&self) -> bool {
        matches!(self, QueryParam::Null)
    }

    /// Human-readable type name, used in logs and error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            QueryParam::Null => "null",
            QueryParam::Bool(_) => "bool",
            QueryParam::Int(_) => "int",
            QueryParam::Float(_) => "float",
            QueryParam::String(_) => "string",
            QueryParam::Bytes(_) => "bytes",
            QueryParam::Json(_) => "json",
        }
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        QueryParam::Bool(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        QueryParam::Int(v as i64)
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        QueryParam::Int(v)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        QueryParam::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        QueryParam::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        QueryParam::String(v)
    }
}

impl From<Vec<u8>> for QueryParam {
    fn from(v: Vec<u8>) -> Self {
        QueryParam::Bytes(v)
    }
}

impl From<&[u8]> for QueryParam {
    fn from(v: &[u8]) -> Self {
        QueryParam::Bytes(v.to_vec())
    }
}

impl From<JsonValue> for QueryParam {
    fn from(v: JsonValue) -> Self {
        QueryParam::Json(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(QueryParam::Null)
    }
}

/// Serde helper for base64-encoded byte parameters.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// A SQL statement with its bound parameters.
///
/// Placeholders use the backend's positional syntax (`?`). The optional
/// timeout bounds the whole operation, retries and backoff waits included;
/// when unset the configured default applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<QueryParam>,
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            timeout: None,
        }
    }

    /// Append one bound parameter (builder style).
    pub fn bind(mut self, param: impl Into<QueryParam>) -> Self {
        self.params.push(param.into());
        self
    }

    /// Replace the parameter list wholesale.
    pub fn with_params(mut self, params: Vec<QueryParam>) -> Self {
        self.params = params;
        self
    }

    /// Bound the whole operation, including retries, to `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Statement::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Statement::new(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_accumulates_params() {
        let statement = Statement::new("INSERT INTO t VALUES (?, ?, ?)")
            .bind(1i64)
            .bind("two")
            .bind(3.0);
        assert_eq!(statement.params.len(), 3);
        assert_eq!(statement.params[0], QueryParam::Int(1));
        assert_eq!(statement.params[1], QueryParam::String("two".to_string()));
        assert_eq!(statement.params[2], QueryParam::Float(3.0));
    }

    #[test]
    fn test_from_conversions() {
        assert_eq!(QueryParam::from(true), QueryParam::Bool(true));
        assert_eq!(QueryParam::from(7i32), QueryParam::Int(7));
        assert_eq!(QueryParam::from(vec![1u8, 2]), QueryParam::Bytes(vec![1, 2]));
        assert_eq!(QueryParam::from(None::<i64>), QueryParam::Null);
        assert_eq!(QueryParam::from(Some(5i64)), QueryParam::Int(5));
    }

    #[test]
    fn test_param_type_names() {
        assert_eq!(QueryParam::Null.type_name(), "null");
        assert_eq!(QueryParam::Int(1).type_name(), "int");
        assert_eq!(QueryParam::Bytes(vec![]).type_name(), "bytes");
        assert_eq!(QueryParam::Json(serde_json::json!({})).type_name(), "json");
    }

    #[test]
    fn test_param_deserialization_untagged() {
        let param: QueryParam = serde_json::from_str("42").unwrap();
        assert_eq!(param, QueryParam::Int(42));
        let param: QueryParam = serde_json::from_str("1.5").unwrap();
        assert_eq!(param, QueryParam::Float(1.5));
        let param: QueryParam = serde_json::from_str("null").unwrap();
        assert!(param.is_null());
        let param: QueryParam = serde_json::from_str(r#"{"a": 1}"#).unwrap();
        assert!(matches!(param, QueryParam::Json(_)));
    }

    #[test]
    fn test_bytes_serialize_as_base64() {
        let json = serde_json::to_string(&QueryParam::Bytes(vec![0xDE, 0xAD])).unwrap();
        assert_eq!(json, "\"3q0=\"");
    }

    #[test]
    fn test_statement_from_str() {
        let statement: Statement = "SELECT 1".into();
        assert_eq!(statement.sql, "SELECT 1");
        assert!(statement.params.is_empty());
        assert!(statement.timeout.is_none());
    }

    #[test]
    fn test_statement_timeout() {
        let statement = Statement::new("SELECT 1").with_timeout(Duration::from_millis(250));
        assert_eq!(statement.timeout, Some(Duration::from_millis(250)));
    }
}
