use jans_orm_core::time::{self, JSON_TIME_FORMAT};
use jans_orm_core::{AttributeValue, PersistenceError};
use serde_json::{Map, Value, json};

use crate::config::EngineFamily;

const VALUES_KEY: &str = "values";

/// Serialises multivalued attributes into a JSON column and back.
pub trait JsonCodec: Send + Sync {
    fn encode(&self, values: &[AttributeValue]) -> String;

    fn decode(&self, stored: &str) -> Result<Vec<AttributeValue>, PersistenceError>;

    /// JSON path of the value array inside a stored document.
    fn array_path(&self) -> &'static str;

    /// Values of a multivalued attribute that was written into a plain text
    /// column; `None` when `stored` is not in this codec's document shape.
    fn decode_embedded(&self, stored: &str) -> Option<Vec<AttributeValue>>;
}

pub fn codec_for(family: EngineFamily) -> Box<dyn JsonCodec> {
    match family {
        EngineFamily::PostgreSql => Box::new(JsonArrayCodec),
        EngineFamily::Sqlite | EngineFamily::MySql | EngineFamily::MariaDb => Box::new(WrappedValuesCodec),
    }
}

/// `{"values": [...]}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WrappedValuesCodec;

/// A bare JSON array.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonArrayCodec;

impl JsonCodec for WrappedValuesCodec {
    fn encode(&self, values: &[AttributeValue]) -> String {
        let mut document = Map::new();
        document.insert(VALUES_KEY.to_string(), to_json_array(values));
        Value::Object(document).to_string()
    }

    fn decode(&self, stored: &str) -> Result<Vec<AttributeValue>, PersistenceError> {
        match parse(stored)? {
            Value::Object(mut document) => match document.remove(VALUES_KEY) {
                Some(Value::Array(items)) => Ok(from_json_array(items)),
                Some(Value::Null) | None => Ok(Vec::new()),
                Some(other) => Ok(from_json_array(vec![other])),
            },
            // Rows written before the wrapper was introduced.
            Value::Array(items) => Ok(from_json_array(items)),
            other => Ok(from_json_array(vec![other])),
        }
    }

    fn array_path(&self) -> &'static str {
        "$.values"
    }

    fn decode_embedded(&self, stored: &str) -> Option<Vec<AttributeValue>> {
        if !stored.starts_with('{') {
            return None;
        }
        match serde_json::from_str::<Value>(stored).ok()? {
            Value::Object(mut document) if document.len() == 1 => match document.remove(VALUES_KEY)? {
                Value::Array(items) if items.iter().all(is_scalar) => Some(from_json_array(items)),
                _ => None,
            },
            _ => None,
        }
    }
}

impl JsonCodec for JsonArrayCodec {
    fn encode(&self, values: &[AttributeValue]) -> String {
        to_json_array(values).to_string()
    }

    fn decode(&self, stored: &str) -> Result<Vec<AttributeValue>, PersistenceError> {
        match parse(stored)? {
            Value::Array(items) => Ok(from_json_array(items)),
            Value::Object(mut document) => match document.remove(VALUES_KEY) {
                Some(Value::Array(items)) => Ok(from_json_array(items)),
                _ => Err(PersistenceError::EntryConversion(format!("expected JSON array, got '{stored}'"))),
            },
            Value::Null => Ok(Vec::new()),
            other => Ok(from_json_array(vec![other])),
        }
    }

    fn array_path(&self) -> &'static str {
        "$"
    }

    fn decode_embedded(&self, stored: &str) -> Option<Vec<AttributeValue>> {
        if !stored.starts_with('[') {
            return None;
        }
        match serde_json::from_str::<Value>(stored).ok()? {
            Value::Array(items) if items.iter().all(is_scalar) => Some(from_json_array(items)),
            _ => None,
        }
    }
}

fn is_scalar(item: &Value) -> bool {
    !matches!(item, Value::Array(_) | Value::Object(_))
}

fn parse(stored: &str) -> Result<Value, PersistenceError> {
    serde_json::from_str(stored)
        .map_err(|e| PersistenceError::EntryConversion(format!("invalid JSON column value '{stored}': {e}")))
}

fn to_json_array(values: &[AttributeValue]) -> Value {
    Value::Array(values.iter().map(to_json).collect())
}

pub(crate) fn to_json(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::Text(s) => json!(s),
        AttributeValue::Boolean(b) => json!(b),
        AttributeValue::Integer(n) => json!(n),
        AttributeValue::Long(n) => json!(n),
        AttributeValue::Timestamp(t) => json!(time::format_time(t, JSON_TIME_FORMAT)),
    }
}

fn from_json_array(items: Vec<Value>) -> Vec<AttributeValue> {
    items.into_iter().filter_map(from_json).collect()
}

fn from_json(item: Value) -> Option<AttributeValue> {
    match item {
        Value::Null => None,
        Value::String(s) => Some(AttributeValue::Text(s)),
        Value::Bool(b) => Some(AttributeValue::Boolean(b)),
        Value::Number(n) => match n.as_i64() {
            Some(n) => Some(match i32::try_from(n) {
                Ok(small) => AttributeValue::Integer(small),
                Err(_) => AttributeValue::Long(n),
            }),
            None => Some(AttributeValue::Text(n.to_string())),
        },
        nested @ (Value::Array(_) | Value::Object(_)) => Some(AttributeValue::Text(nested.to_string())),
    }
}
