//! Flattening OTLP/JSON traces into spans and resource metadata.
//!
//! Traces come from many exporters and are frequently partial. Every level of the
//! `resourceSpans → scopeSpans → spans` nesting is optional here: a missing or
//! malformed level contributes nothing instead of failing the whole trace.

use serde_json::Value;
use traceval_types::{MetaValue, Metadata};

use crate::attributes::decode_attributes;

/// Resource attributes under this namespace are structured evaluation metadata.
pub const METADATA_PREFIX: &str = "metadata.";

/// One span, with its attributes decoded and the raw object kept for path lookups.
#[derive(Debug, Clone)]
pub struct Span {
    pub name: Option<String>,
    pub span_id: Option<String>,
    pub trace_id: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub attributes: Metadata,
    raw: Value,
}

impl Span {
    pub fn from_value(raw: Value) -> Self {
        Self {
            name: text_field(&raw, "name"),
            span_id: text_field(&raw, "spanId"),
            trace_id: text_field(&raw, "traceId"),
            start_time: text_field(&raw, "startTimeUnixNano"),
            end_time: text_field(&raw, "endTimeUnixNano"),
            attributes: decode_attributes(raw.get("attributes").unwrap_or(&Value::Null)),
            raw,
        }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// String attribute by key.
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(MetaValue::as_str)
    }

    /// Resolve a dot-notation path against the span.
    ///
    /// Plain segments walk nested objects. An `attributes` segment switches to the
    /// attribute list: the remainder of the path, joined back with `.`, is matched
    /// against attribute keys (so `attributes.gen_ai.prompt` finds the key
    /// `gen_ai.prompt`). Only string values resolve.
    pub fn field(&self, path: &str) -> Option<String> {
        let parts: Vec<&str> = path.split('.').collect();
        let mut current = &self.raw;

        for (i, part) in parts.iter().enumerate() {
            if *part == "attributes" {
                let key = parts[i + 1..].join(".");
                let attrs = decode_attributes(current.get("attributes")?);
                return attrs.get(&key).and_then(MetaValue::as_str).map(str::to_string);
            }
            current = current.as_object()?.get(*part)?;
        }

        current.as_str().map(str::to_string)
    }
}

// Timestamps arrive as strings or numbers depending on the exporter.
fn text_field(obj: &Value, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn resource_spans(trace: &Value) -> impl Iterator<Item = &serde_json::Map<String, Value>> {
    trace
        .get("resourceSpans")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

/// All spans of the trace, depth-first in document order.
pub fn extract_all_spans(trace: &Value) -> Vec<Span> {
    let mut spans = Vec::new();

    for resource_span in resource_spans(trace) {
        let Some(scope_spans) = resource_span.get("scopeSpans").and_then(Value::as_array) else {
            continue;
        };
        for scope_span in scope_spans {
            let Some(span_list) = scope_span.get("spans").and_then(Value::as_array) else {
                continue;
            };
            spans.extend(
                span_list
                    .iter()
                    .filter(|s| s.is_object())
                    .cloned()
                    .map(Span::from_value),
            );
        }
    }

    spans
}

/// `metadata.*` resource attributes with the prefix stripped. When several resources
/// carry the same field, the last one wins.
pub fn extract_resource_metadata(trace: &Value) -> Metadata {
    let mut metadata = Metadata::new();

    for resource_span in resource_spans(trace) {
        let Some(attrs) = resource_span.get("resource").and_then(|r| r.get("attributes")) else {
            continue;
        };
        for (key, value) in decode_attributes(attrs) {
            if let Some(field) = key.strip_prefix(METADATA_PREFIX) {
                if !field.is_empty() {
                    metadata.insert(field.to_string(), value);
                }
            }
        }
    }

    metadata
}
