//! Decoded result rows.

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// One decoded row: column names plus values in result order.
///
/// The column header is shared across every row of a result set. Duplicate
/// column names are allowed; name lookups return the first match, positional
/// access reaches the rest.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<JsonValue>,
}

impl Row {
    pub(crate) fn new(columns: Arc<[String]>, values: Vec<JsonValue>) -> Self {
        Self { columns, values }
    }

    /// Column names in result order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of the first column with this name.
    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.values.get(index)
    }

    /// Value at a column position.
    pub fn get_index(&self, index: usize) -> Option<&JsonValue> {
        self.values.get(index)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column)?.as_i64()
    }

    pub fn get_f64(&self, column: &str) -> Option<f64> {
        self.get(column)?.as_f64()
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column)?.as_str()
    }

    pub fn get_bool(&self, column: &str) -> Option<bool> {
        self.get(column)?.as_bool()
    }

    /// True when the column exists and holds SQL NULL.
    pub fn is_null(&self, column: &str) -> bool {
        matches!(self.get(column), Some(JsonValue::Null))
    }

    pub fn into_values(self) -> Vec<JsonValue> {
        self.values
    }

    /// Copy into a JSON object. Later duplicate columns win, matching the
    /// usual driver behavior for dict-shaped rows.
    pub fn to_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

impl Serialize for Row {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in self.columns.iter().zip(&self.values) {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Row {
        Row::new(
            Arc::from(vec!["id".to_string(), "name".to_string(), "score".to_string()]),
            vec![json!(7), json!("ada"), json!(0.5)],
        )
    }

    #[test]
    fn test_typed_getters() {
        let row = sample();
        assert_eq!(row.get_i64("id"), Some(7));
        assert_eq!(row.get_str("name"), Some("ada"));
        assert_eq!(row.get_f64("score"), Some(0.5));
        assert_eq!(row.get_i64("missing"), None);
    }

    #[test]
    fn test_null_detection() {
        let row = Row::new(
            Arc::from(vec!["a".to_string()]),
            vec![JsonValue::Null],
        );
        assert!(row.is_null("a"));
        assert!(!row.is_null("b"));
        assert_eq!(row.get("a"), Some(&JsonValue::Null));
    }

    #[test]
    fn test_duplicate_columns_first_match_by_name() {
        let row = Row::new(
            Arc::from(vec!["n".to_string(), "n".to_string()]),
            vec![json!(1), json!(2)],
        );
        assert_eq!(row.get_i64("n"), Some(1));
        assert_eq!(row.get_index(1), Some(&json!(2)));
    }

    #[test]
    fn test_serializes_as_object_in_column_order() {
        let text = serde_json::to_string(&sample()).unwrap();
        assert_eq!(text, r#"{"id":7,"name":"ada","score":0.5}"#);
    }

    #[test]
    fn test_to_map() {
        let map = sample().to_map();
        assert_eq!(map.len(), 3);
        assert_eq!(map["name"], json!("ada"));
    }
}
