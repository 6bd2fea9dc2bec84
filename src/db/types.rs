//! Column decoding: database cells to JSON values.
//!
//! Decoding uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction
//!
//! Every decoder degrades gracefully: when the preferred Rust type does not
//! fit, the cell falls back to its text form, and finally to NULL.

use crate::models::Row;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::Value as JsonValue;
use std::sync::Arc;

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Datetime,
    Date,
    Time,
    Unknown,
}

/// Classify a database type name into a logical category.
pub(crate) fn categorize_type(type_name: &str, is_sqlite: bool) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric first as "numeric" overlaps with other checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC affinity hands back floats
        if is_sqlite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    // Boolean before integer: sqlx reports TINYINT(1) as BOOLEAN
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    // Datetime before date ("datetime" contains "date")
    if lower.contains("datetime") || lower.contains("timestamp") {
        return TypeCategory::Datetime;
    }
    if lower == "date" {
        return TypeCategory::Date;
    }
    if lower == "time" {
        return TypeCategory::Time;
    }

    if lower.contains("int") {
        return TypeCategory::Integer;
    }

    if lower.contains("float") || lower.contains("double") || lower.contains("real") {
        return TypeCategory::Float;
    }

    if lower.contains("json") {
        return TypeCategory::Json;
    }

    if lower.contains("blob") || lower.contains("binary") {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower.contains("enum") {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Render a float as a JSON number, or as text when JSON cannot hold it
/// (NaN, infinities).
pub(crate) fn float_to_json(value: f64) -> JsonValue {
    serde_json::Number::from_f64(value)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(value.to_string()))
}

/// Binary cells are rendered as base64 so every row stays valid JSON.
pub(crate) fn encode_binary_value(bytes: &[u8]) -> JsonValue {
    JsonValue::String(STANDARD.encode(bytes))
}

/// Decimal wrapper that decodes the wire text untouched, preserving precision
/// that a float round-trip would lose.
pub(crate) struct RawDecimal(pub String);

impl sqlx::Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> sqlx::mysql::MySqlTypeInfo {
        <str as sqlx::Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &sqlx::mysql::MySqlTypeInfo) -> bool {
        use sqlx::TypeInfo;
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: sqlx::mysql::MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let text = <&str as sqlx::Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(text.to_string()))
    }
}

// =============================================================================
// Row decoding
// =============================================================================

/// Decode a backend row into column names and JSON cell values.
pub(crate) trait DecodeRow {
    /// Column names in result order.
    fn column_names(&self) -> Vec<String>;
    /// Decode every cell to a JSON value, in column order.
    fn decode_values(&self) -> Vec<JsonValue>;
}

/// Decode a full result set, sharing one column header across all rows.
pub(crate) fn rows_from<R: DecodeRow>(rows: &[R]) -> Vec<Row> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    let columns: Arc<[String]> = Arc::from(first.column_names());
    rows.iter()
        .map(|row| Row::new(Arc::clone(&columns), row.decode_values()))
        .collect()
}

/// Decode a single row against an already-built column header (streaming path).
pub(crate) fn row_from<R: DecodeRow>(row: &R, columns: &Arc<[String]>) -> Row {
    Row::new(Arc::clone(columns), row.decode_values())
}

impl DecodeRow for sqlx::mysql::MySqlRow {
    fn column_names(&self) -> Vec<String> {
        use sqlx::{Column, Row as _};
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }

    fn decode_values(&self) -> Vec<JsonValue> {
        use sqlx::{Column, Row as _, TypeInfo};
        self.columns()
            .iter()
            .enumerate()
            .map(|(index, column)| {
                let category = categorize_type(column.type_info().name(), false);
                mysql_decode::decode_column(self, index, category)
            })
            .collect()
    }
}

impl DecodeRow for sqlx::sqlite::SqliteRow {
    fn column_names(&self) -> Vec<String> {
        use sqlx::{Column, Row as _};
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }

    fn decode_values(&self) -> Vec<JsonValue> {
        use sqlx::{Column, Row as _, TypeInfo};
        self.columns()
            .iter()
            .enumerate()
            .map(|(index, column)| {
                let category = categorize_type(column.type_info().name(), true);
                sqlite_decode::decode_column(self, index, category)
            })
            .collect()
    }
}

mod mysql_decode {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
    use sqlx::Row as _;
    use sqlx::mysql::MySqlRow;

    pub(super) fn decode_column(row: &MySqlRow, index: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Integer => decode_integer(row, index),
            TypeCategory::Float => decode_float(row, index),
            TypeCategory::Decimal => decode_decimal(row, index),
            TypeCategory::Boolean => decode_boolean(row, index),
            TypeCategory::Binary => decode_binary(row, index),
            TypeCategory::Json => decode_json(row, index),
            TypeCategory::Datetime => decode_datetime(row, index),
            TypeCategory::Date => decode_date(row, index),
            TypeCategory::Time => decode_time(row, index),
            TypeCategory::Text | TypeCategory::Unknown => decode_text(row, index),
        }
    }

    fn decode_integer(row: &MySqlRow, index: usize) -> JsonValue {
        if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
            return value.map(JsonValue::from).unwrap_or(JsonValue::Null);
        }
        // Unsigned BIGINT does not fit in i64
        if let Ok(value) = row.try_get::<Option<u64>, _>(index) {
            return value.map(JsonValue::from).unwrap_or(JsonValue::Null);
        }
        decode_text(row, index)
    }

    fn decode_float(row: &MySqlRow, index: usize) -> JsonValue {
        if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
            return value.map(float_to_json).unwrap_or(JsonValue::Null);
        }
        if let Ok(value) = row.try_get::<Option<f32>, _>(index) {
            return value
                .map(|v| float_to_json(v as f64))
                .unwrap_or(JsonValue::Null);
        }
        decode_text(row, index)
    }

    fn decode_decimal(row: &MySqlRow, index: usize) -> JsonValue {
        match row.try_get::<Option<RawDecimal>, _>(index) {
            Ok(Some(value)) => JsonValue::String(value.0),
            Ok(None) => JsonValue::Null,
            Err(_) => decode_text(row, index),
        }
    }

    fn decode_boolean(row: &MySqlRow, index: usize) -> JsonValue {
        if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
            return value.map(JsonValue::Bool).unwrap_or(JsonValue::Null);
        }
        if let Ok(value) = row.try_get::<Option<i8>, _>(index) {
            return value.map(|v| JsonValue::Bool(v != 0)).unwrap_or(JsonValue::Null);
        }
        decode_text(row, index)
    }

    fn decode_binary(row: &MySqlRow, index: usize) -> JsonValue {
        match row.try_get::<Option<Vec<u8>>, _>(index) {
            Ok(Some(bytes)) => encode_binary_value(&bytes),
            Ok(None) => JsonValue::Null,
            Err(_) => decode_text(row, index),
        }
    }

    fn decode_json(row: &MySqlRow, index: usize) -> JsonValue {
        match row.try_get::<Option<JsonValue>, _>(index) {
            Ok(Some(value)) => value,
            Ok(None) => JsonValue::Null,
            Err(_) => decode_text(row, index),
        }
    }

    fn decode_datetime(row: &MySqlRow, index: usize) -> JsonValue {
        // TIMESTAMP carries a zone, DATETIME does not
        if let Ok(value) = row.try_get::<Option<DateTime<Utc>>, _>(index) {
            return value
                .map(|v| JsonValue::String(v.to_rfc3339()))
                .unwrap_or(JsonValue::Null);
        }
        if let Ok(value) = row.try_get::<Option<NaiveDateTime>, _>(index) {
            return value
                .map(|v| JsonValue::String(v.to_string()))
                .unwrap_or(JsonValue::Null);
        }
        decode_text(row, index)
    }

    fn decode_date(row: &MySqlRow, index: usize) -> JsonValue {
        if let Ok(value) = row.try_get::<Option<NaiveDate>, _>(index) {
            return value
                .map(|v| JsonValue::String(v.to_string()))
                .unwrap_or(JsonValue::Null);
        }
        decode_text(row, index)
    }

    fn decode_time(row: &MySqlRow, index: usize) -> JsonValue {
        if let Ok(value) = row.try_get::<Option<NaiveTime>, _>(index) {
            return value
                .map(|v| JsonValue::String(v.to_string()))
                .unwrap_or(JsonValue::Null);
        }
        decode_text(row, index)
    }

    fn decode_text(row: &MySqlRow, index: usize) -> JsonValue {
        match row.try_get::<Option<String>, _>(index) {
            Ok(Some(value)) => JsonValue::String(value),
            _ => JsonValue::Null,
        }
    }
}

mod sqlite_decode {
    use super::*;
    use chrono::NaiveDateTime;
    use sqlx::Row as _;
    use sqlx::sqlite::SqliteRow;

    pub(super) fn decode_column(row: &SqliteRow, index: usize, category: TypeCategory) -> JsonValue {
        match category {
            TypeCategory::Integer => decode_integer(row, index),
            // SQLite stores declared DECIMAL columns with REAL affinity
            TypeCategory::Float | TypeCategory::Decimal => decode_float(row, index),
            TypeCategory::Boolean => decode_boolean(row, index),
            TypeCategory::Binary => decode_binary(row, index),
            TypeCategory::Json => decode_json(row, index),
            TypeCategory::Datetime => decode_datetime(row, index),
            TypeCategory::Date | TypeCategory::Time => decode_text(row, index),
            TypeCategory::Text | TypeCategory::Unknown => decode_text(row, index),
        }
    }

    fn decode_integer(row: &SqliteRow, index: usize) -> JsonValue {
        if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
            return value.map(JsonValue::from).unwrap_or(JsonValue::Null);
        }
        decode_text(row, index)
    }

    fn decode_float(row: &SqliteRow, index: usize) -> JsonValue {
        if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
            return value.map(float_to_json).unwrap_or(JsonValue::Null);
        }
        decode_text(row, index)
    }

    fn decode_boolean(row: &SqliteRow, index: usize) -> JsonValue {
        if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
            return value.map(JsonValue::Bool).unwrap_or(JsonValue::Null);
        }
        if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
            return value.map(|v| JsonValue::Bool(v != 0)).unwrap_or(JsonValue::Null);
        }
        decode_text(row, index)
    }

    fn decode_binary(row: &SqliteRow, index: usize) -> JsonValue {
        match row.try_get::<Option<Vec<u8>>, _>(index) {
            Ok(Some(bytes)) => encode_binary_value(&bytes),
            Ok(None) => JsonValue::Null,
            Err(_) => decode_text(row, index),
        }
    }

    fn decode_json(row: &SqliteRow, index: usize) -> JsonValue {
        match row.try_get::<Option<JsonValue>, _>(index) {
            Ok(Some(value)) => value,
            Ok(None) => JsonValue::Null,
            Err(_) => decode_text(row, index),
        }
    }

    fn decode_datetime(row: &SqliteRow, index: usize) -> JsonValue {
        if let Ok(value) = row.try_get::<Option<NaiveDateTime>, _>(index) {
            return value
                .map(|v| JsonValue::String(v.to_string()))
                .unwrap_or(JsonValue::Null);
        }
        decode_text(row, index)
    }

    fn decode_text(row: &SqliteRow, index: usize) -> JsonValue {
        match row.try_get::<Option<String>, _>(index) {
            Ok(Some(value)) => JsonValue::String(value),
            _ => JsonValue::Null,
        }
    }
}
