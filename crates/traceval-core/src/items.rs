//! Turning a normalized trace into evaluation items.
//!
//! Trace-level fields (`breaker_review`, `change_log`, ...) come from structured resource
//! metadata when the exporter attached it, otherwise from the heuristics run over the
//! redacted span contents, otherwise an empty default. Where each value came from is
//! recorded under `metadata_sources`, and a heuristic finding that lost to a resource
//! value is kept under `heuristic_findings`.

use serde_json::{json, Value};
use traceval_types::{EvaluationItem, ItemError, MetaValue, Metadata};

use crate::config::{EvaluationMode, IngestionOptions};
use crate::heuristics::{extract_breaker_review, extract_change_log};
use crate::sanitize::{redact, redact_attributes, truncate};
use crate::trace::Span;

/// Id of the single item produced in whole-trace mode.
pub const TRACE_ITEM_ID: &str = "trace_evaluation";

/// Per-span content cap inside the whole-trace summary.
pub const TRACE_CONTENT_LIMIT: usize = 500;
/// Input cap for span-mode items.
pub const SPAN_INPUT_LIMIT: usize = 2000;

/// Span attribute holding the span's text in whole-trace mode.
pub const CONTENT_ATTRIBUTE: &str = "content";
pub const AGENT_ATTRIBUTE: &str = "agent";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provenance {
    Resource,
    Heuristic,
    Default,
}

impl Provenance {
    fn as_str(&self) -> &'static str {
        match self {
            Provenance::Resource => "resource",
            Provenance::Heuristic => "heuristic",
            Provenance::Default => "default",
        }
    }
}

/// Build items for one trace according to the ingestion mode.
pub fn build_items(
    spans: &[Span],
    resource: &Metadata,
    options: &IngestionOptions,
) -> Result<Vec<EvaluationItem>, ItemError> {
    match options.evaluation_mode {
        EvaluationMode::Trace => Ok(vec![build_trace_item(spans, resource, options)?]),
        EvaluationMode::Span => build_span_items(spans, resource, options),
    }
}

/// One item for the whole trace. Produced even when there are no spans.
pub fn build_trace_item(
    spans: &[Span],
    resource: &Metadata,
    options: &IngestionOptions,
) -> Result<EvaluationItem, ItemError> {
    let mut contents = Vec::with_capacity(spans.len());
    let summary: Vec<Value> = spans
        .iter()
        .map(|span| {
            let content = span.attr_str(CONTENT_ATTRIBUTE).unwrap_or_default();
            contents.push(content.to_string());
            json!({
                "name": span.name,
                "spanId": span.span_id,
                "startTime": span.start_time,
                "endTime": span.end_time,
                "agent": span.attributes.get(AGENT_ATTRIBUTE).map(MetaValue::to_json),
                "content": truncate(&redact(content), TRACE_CONTENT_LIMIT),
            })
        })
        .collect();

    let input = redact(&serde_json::to_string_pretty(&summary).unwrap_or_else(|_| "[]".into()));

    let mut metadata = Metadata::new();
    metadata.insert("otel_trace".into(), MetaValue::from(Value::Array(summary)));
    metadata.insert("span_count".into(), MetaValue::Int(spans.len() as i64));
    if let Some(trace_id) = spans.first().and_then(|s| s.trace_id.clone()) {
        metadata.insert("trace_id".into(), MetaValue::String(trace_id));
    }
    metadata.extend(trace_fields(
        &contents.join("\n"),
        resource,
        &["breaker_review", "change_log", "reviewer_suggestions", "user_prompt"],
    ));
    metadata.insert("approvals".into(), parse_approvals(resource.get("approvals")));
    metadata.insert(
        "all_approved".into(),
        MetaValue::Bool(parse_flag(resource.get("all_approved"))),
    );
    metadata.insert(
        "data_quality".into(),
        resource
            .get("data_quality")
            .cloned()
            .unwrap_or_else(|| MetaValue::Map(Metadata::new())),
    );

    let mut item = EvaluationItem::new(TRACE_ITEM_ID, input)?;
    if let Some(output) = find_in_trace(spans, options.output_field.as_deref()) {
        item = item.with_output(output);
    }
    if let Some(expected) = find_in_trace(spans, options.expected_output_field.as_deref()) {
        item = item.with_expected_output(expected)?;
    }
    Ok(item.with_metadata(metadata))
}

/// One item per span whose `input_field` resolves to non-blank text.
pub fn build_span_items(
    spans: &[Span],
    resource: &Metadata,
    options: &IngestionOptions,
) -> Result<Vec<EvaluationItem>, ItemError> {
    let with_content: Vec<(usize, &Span, String)> = spans
        .iter()
        .enumerate()
        .filter_map(|(index, span)| {
            let content = span.field(&options.input_field)?;
            (!content.trim().is_empty()).then_some((index, span, content))
        })
        .collect();

    let joined = with_content
        .iter()
        .map(|(_, _, content)| content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let shared = trace_fields(
        &joined,
        resource,
        &["breaker_review", "change_log", "reviewer_suggestions"],
    );

    let mut items = Vec::with_capacity(with_content.len());
    for (index, span, content) in with_content {
        let mut metadata = Metadata::new();
        if let Some(name) = &span.name {
            metadata.insert("span_name".into(), MetaValue::String(name.clone()));
        }
        if let Some(span_id) = &span.span_id {
            metadata.insert("span_id".into(), MetaValue::String(span_id.clone()));
        }
        if let Some(trace_id) = &span.trace_id {
            metadata.insert("trace_id".into(), MetaValue::String(trace_id.clone()));
        }
        metadata.insert(
            "attributes".into(),
            MetaValue::Map(redact_attributes(&span.attributes)),
        );
        metadata.extend(shared.clone());

        let mut item = EvaluationItem::new(
            format!("span_{index}"),
            truncate(&redact(&content), SPAN_INPUT_LIMIT),
        )?;
        if let Some(output) = resolve_optional(span, options.output_field.as_deref()) {
            item = item.with_output(output);
        }
        if let Some(expected) = resolve_optional(span, options.expected_output_field.as_deref()) {
            item = item.with_expected_output(expected)?;
        }
        items.push(item.with_metadata(metadata));
    }

    Ok(items)
}

/// Resolved values are redacted before they reach an item.
fn resolve_optional(span: &Span, path: Option<&str>) -> Option<String> {
    span.field(path?)
        .filter(|v| !v.trim().is_empty())
        .map(|v| redact(&v))
}

fn find_in_trace(spans: &[Span], path: Option<&str>) -> Option<String> {
    spans.iter().find_map(|span| resolve_optional(span, path))
}

/// Merge resource values and heuristic findings for the given trace-level fields.
fn trace_fields(content: &str, resource: &Metadata, fields: &[&str]) -> Metadata {
    let redacted = redact(content);
    let mut sources = Metadata::new();
    let mut overridden = Metadata::new();
    let mut out = Metadata::new();

    for &field in fields {
        let finding = match field {
            "breaker_review" => extract_breaker_review(&redacted),
            "change_log" => extract_change_log(&redacted),
            _ => None,
        };

        let (value, provenance) = match (resource.get(field).filter(|v| !v.is_blank()), finding) {
            (Some(value), finding) => {
                if let Some(finding) = finding {
                    overridden.insert(field.to_string(), MetaValue::String(finding));
                }
                (value.clone(), Provenance::Resource)
            }
            (None, Some(finding)) => (MetaValue::String(finding), Provenance::Heuristic),
            (None, None) => (MetaValue::String(String::new()), Provenance::Default),
        };

        sources.insert(field.to_string(), MetaValue::from(provenance.as_str()));
        out.insert(field.to_string(), value);
    }

    out.insert("metadata_sources".into(), MetaValue::Map(sources));
    if !overridden.is_empty() {
        out.insert("heuristic_findings".into(), MetaValue::Map(overridden));
    }
    out
}

/// Approvals arrive as a list or as a JSON-encoded string of one.
fn parse_approvals(value: Option<&MetaValue>) -> MetaValue {
    match value {
        Some(v @ (MetaValue::List(_) | MetaValue::Map(_))) => v.clone(),
        Some(MetaValue::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(parsed @ (Value::Array(_) | Value::Object(_))) => MetaValue::from(parsed),
            _ => MetaValue::List(Vec::new()),
        },
        _ => MetaValue::List(Vec::new()),
    }
}

fn parse_flag(value: Option<&MetaValue>) -> bool {
    match value {
        Some(MetaValue::Bool(b)) => *b,
        Some(MetaValue::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        Some(MetaValue::Int(i)) => *i != 0,
        _ => false,
    }
}
