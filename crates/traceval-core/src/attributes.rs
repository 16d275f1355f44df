//! OTLP attribute lists → plain key/value maps.
//!
//! OTLP/JSON encodes attributes as `[{"key": "k", "value": {"stringValue": "v"}}]`.
//! Decoding is a best-effort projection: entries that don't fit are dropped, never
//! reported.

use serde_json::Value;
use traceval_types::{MetaValue, Metadata};

/// Decode an attribute list. Anything that is not a list decodes to an empty map.
pub fn decode_attributes(attributes: &Value) -> Metadata {
    let mut out = Metadata::new();
    let Some(entries) = attributes.as_array() else {
        return out;
    };

    for entry in entries {
        let Some(obj) = entry.as_object() else {
            continue;
        };
        let key = match obj.get("key").and_then(Value::as_str) {
            Some(k) if !k.is_empty() => k,
            _ => continue,
        };
        if let Some(value) = obj.get("value").and_then(decode_any_value) {
            out.insert(key.to_string(), value);
        }
    }
    out
}

/// Decode one OTLP `AnyValue`. Scalar probes run first, in a fixed order; the first
/// one that decodes wins.
pub fn decode_any_value(value: &Value) -> Option<MetaValue> {
    let obj = value.as_object()?;

    if let Some(s) = obj.get("stringValue").and_then(Value::as_str) {
        return Some(MetaValue::String(s.to_string()));
    }
    if let Some(i) = obj.get("intValue").and_then(decode_int) {
        return Some(MetaValue::Int(i));
    }
    if let Some(b) = obj.get("boolValue").and_then(Value::as_bool) {
        return Some(MetaValue::Bool(b));
    }
    if let Some(d) = obj.get("doubleValue").and_then(Value::as_f64) {
        return Some(MetaValue::Double(d));
    }
    if let Some(values) = obj
        .get("arrayValue")
        .and_then(|a| a.get("values"))
        .and_then(Value::as_array)
    {
        return Some(MetaValue::List(
            values.iter().filter_map(decode_any_value).collect(),
        ));
    }
    if let Some(values) = obj.get("kvlistValue").and_then(|kv| kv.get("values")) {
        return Some(MetaValue::Map(decode_attributes(values)));
    }
    None
}

// int64 travels as a decimal string in OTLP/JSON.
fn decode_int(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
