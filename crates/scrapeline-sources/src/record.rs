//! JSON object -> [`RawEntity`] conversion shared by all sources

use scrapeline_core::{AttrValue, Attributes, ExtractionError, RawEntity};
use serde_json::Value;

pub const DEFAULT_IDENTITY_FIELD: &str = "url";

fn attr_value(value: Value) -> AttrValue {
    match value {
        Value::Null => AttrValue::Null,
        Value::Bool(b) => AttrValue::Bool(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => AttrValue::Integer(i),
            None => AttrValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => AttrValue::Text(s),
        // nested structures are kept verbatim as JSON text
        nested @ (Value::Array(_) | Value::Object(_)) => AttrValue::Text(nested.to_string()),
    }
}

/// Convert one extracted JSON object, taking its identity from
/// `identity_field`. The identity field is not repeated in the attributes.
///
/// A missing or null identity yields `identity: None`; the accumulator
/// rejects such records.
pub fn raw_entity_from_json(value: Value, identity_field: &str) -> Result<RawEntity, ExtractionError> {
    let Value::Object(mut fields) = value else {
        return Err(ExtractionError::Parse(format!(
            "expected a JSON object per record, got {}",
            type_name(&value)
        )));
    };
    let identity = match fields.remove(identity_field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    };
    let attributes: Attributes = fields
        .into_iter()
        .map(|(name, v)| (name, attr_value(v)))
        .collect();
    Ok(RawEntity {
        identity,
        attributes,
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
