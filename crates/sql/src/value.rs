use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use jans_orm_core::time::{self, SQL_TIME_FORMAT};
use jans_orm_core::{AttributeValue, PersistenceError};
use rusqlite::types::Value;

use crate::schema::ColumnInfo;

pub fn to_sql_value(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::Text(s) => Value::Text(s.clone()),
        AttributeValue::Boolean(b) => Value::Integer(i64::from(*b)),
        AttributeValue::Integer(n) => Value::Integer(i64::from(*n)),
        AttributeValue::Long(n) => Value::Integer(*n),
        AttributeValue::Timestamp(t) => Value::Text(time::format_time(t, SQL_TIME_FORMAT)),
    }
}

/// Base64 text on the attribute side, raw bytes in the column.
pub fn to_binary_value(attribute: &str, value: &AttributeValue) -> Result<Value, PersistenceError> {
    match value {
        AttributeValue::Text(encoded) => STANDARD
            .decode(encoded)
            .map(Value::Blob)
            .map_err(|e| PersistenceError::EntryConversion(format!("attribute '{attribute}' is not valid base64: {e}"))),
        other => Err(PersistenceError::EntryConversion(format!(
            "binary attribute '{attribute}' must be base64 text, got {other:?}"
        ))),
    }
}

/// Infers a typed value from a scalar column.
pub fn decode_scalar(column: &ColumnInfo, value: Value) -> Option<AttributeValue> {
    match value {
        Value::Null => None,
        Value::Integer(n) => Some(if column.is_boolean_carrier() && (n == 0 || n == 1) {
            AttributeValue::Boolean(n == 1)
        } else if column.is_big_integer() {
            AttributeValue::Long(n)
        } else {
            match i32::try_from(n) {
                Ok(small) => AttributeValue::Integer(small),
                Err(_) => AttributeValue::Long(n),
            }
        }),
        Value::Real(f) => Some(AttributeValue::Text(f.to_string())),
        Value::Text(s) => Some(decode_time_silent(&s).map(AttributeValue::Timestamp).unwrap_or(AttributeValue::Text(s))),
        Value::Blob(bytes) => Some(AttributeValue::Text(STANDARD.encode(bytes))),
    }
}

/// ISO first, then the legacy column format; `None` for anything else.
pub fn decode_time_silent(value: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    if !looks_like_timestamp(value) {
        return None;
    }
    time::parse_iso(value).or_else(|| time::parse_legacy_sql(value))
}

fn looks_like_timestamp(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() >= 19
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && (bytes[10] == b'T' || bytes[10] == b' ')
}
