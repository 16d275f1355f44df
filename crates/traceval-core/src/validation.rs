//! Required-metadata gate run before any scorer.
//!
//! Some eval packs are meaningless without specific trace-level fields. If any item lacks
//! one, the batch is marked invalid instead of spending judge calls on incomplete data.

use serde_json::{json, Map, Value};
use traceval_types::{EvaluationItem, MetaValue, ScorerResult};
use tracing::warn;

/// Upstream marker for data that could not be produced.
pub const INVALID_DATA_SENTINEL: &str = "INVALID_DATA";

/// Scorer name of the synthetic result attached to the offending item.
pub const VALIDATION_SCORER: &str = "metadata_validation";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldState<'a> {
    Missing,
    Invalid,
    Present(&'a MetaValue),
}

impl<'a> FieldState<'a> {
    pub fn classify(value: Option<&'a MetaValue>) -> Self {
        match value {
            None => FieldState::Missing,
            Some(v) if v.is_blank() => FieldState::Missing,
            Some(MetaValue::String(s)) if s.trim_start().starts_with(INVALID_DATA_SENTINEL) => {
                FieldState::Invalid
            }
            Some(v) => FieldState::Present(v),
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, FieldState::Present(_))
    }
}

/// Normalize a pack path or name into the key used for required-field lookup.
pub fn pack_key(identity: &str) -> String {
    let normalized = identity.to_lowercase().replace(' ', "_");
    let last = normalized.rsplit('/').next().unwrap_or_default();
    last.strip_suffix(".yaml")
        .or_else(|| last.strip_suffix(".yml"))
        .unwrap_or(last)
        .to_string()
}

/// Fields a pack needs on every item. Unknown packs need nothing.
pub fn required_fields(pack_key: &str) -> &'static [&'static str] {
    match pack_key {
        "revision_addressed" => &["breaker_review", "change_log"],
        "reviewer_minimum" | "approval_chain" => &[],
        _ => &[],
    }
}

/// Required fields of `item` that are missing or carry invalid data, in declaration order.
pub fn missing_fields(item: &EvaluationItem, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|field| !FieldState::classify(item.meta(field)).is_present())
        .map(|field| field.to_string())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub item_index: usize,
    pub missing: Vec<String>,
}

/// Check items in order and stop at the first one with incomplete data.
pub fn validate_items(items: &[EvaluationItem], pack_identity: &str) -> Result<(), ValidationFailure> {
    let key = pack_key(pack_identity);
    let required = required_fields(&key);
    if required.is_empty() {
        return Ok(());
    }

    for (item_index, item) in items.iter().enumerate() {
        let missing = missing_fields(item, required);
        if !missing.is_empty() {
            warn!(pack = %key, item = item.id(), ?missing, "required metadata missing");
            return Err(ValidationFailure { item_index, missing });
        }
    }
    Ok(())
}

/// The synthetic result recorded on the item that failed validation.
pub fn invalid_result(missing: &[String]) -> ScorerResult {
    let mut raw = Map::new();
    raw.insert("status".into(), Value::String("INVALID".into()));
    raw.insert("missing_fields".into(), json!(missing));

    ScorerResult::scored(VALIDATION_SCORER, 0.0, false)
        .with_reasoning(format!(
            "INVALID (Incomplete Data): Missing required fields: [{}]",
            missing.join(", ")
        ))
        .with_raw_response(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use traceval_types::Metadata;

    fn item_with(fields: &[(&str, MetaValue)]) -> EvaluationItem {
        let metadata: Metadata = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        EvaluationItem::new("span_0", "content").unwrap().with_metadata(metadata)
    }

    #[test]
    fn test_pack_key() {
        assert_eq!(pack_key("packs/Revision Addressed.yaml"), "revision_addressed");
        assert_eq!(pack_key("/abs/path/revision_addressed.yml"), "revision_addressed");
        assert_eq!(pack_key("Reviewer Minimum"), "reviewer_minimum");
        assert_eq!(pack_key("plain"), "plain");
    }

    #[test]
    fn test_required_fields() {
        assert_eq!(required_fields("revision_addressed"), ["breaker_review", "change_log"]);
        assert!(required_fields("approval_chain").is_empty());
        assert!(required_fields("something_else").is_empty());
    }

    #[test]
    fn test_field_states() {
        assert_eq!(FieldState::classify(None), FieldState::Missing);
        assert_eq!(FieldState::classify(Some(&MetaValue::Null)), FieldState::Missing);
        assert_eq!(FieldState::classify(Some(&MetaValue::from("  "))), FieldState::Missing);
        assert_eq!(
            FieldState::classify(Some(&MetaValue::from("INVALID_DATA: upstream timeout"))),
            FieldState::Invalid
        );
        let present = MetaValue::from("looks fine");
        assert_eq!(FieldState::classify(Some(&present)), FieldState::Present(&present));
        assert!(FieldState::classify(Some(&MetaValue::Bool(false))).is_present());
    }

    #[test]
    fn test_validate_reports_first_offending_item() {
        let good = item_with(&[
            ("breaker_review", MetaValue::from("R")),
            ("change_log", MetaValue::from("C")),
        ]);
        let bad = item_with(&[
            ("breaker_review", MetaValue::from("INVALID_DATA")),
            ("change_log", MetaValue::from("")),
        ]);
        let failure = validate_items(&[good.clone(), bad.clone(), bad], "revision_addressed.yaml")
            .unwrap_err();
        assert_eq!(failure.item_index, 1);
        assert_eq!(failure.missing, ["breaker_review", "change_log"]);

        assert!(validate_items(&[good], "revision_addressed").is_ok());
    }

    #[test]
    fn test_unknown_pack_never_fails() {
        let empty = item_with(&[]);
        assert!(validate_items(&[empty], "my_custom_pack").is_ok());
    }

    #[test]
    fn test_invalid_result_shape() {
        let result = invalid_result(&["change_log".to_string()]);
        assert_eq!(result.scorer_name, VALIDATION_SCORER);
        assert_eq!(result.numeric_score, Some(0.0));
        assert!(!result.passed);
        assert_eq!(
            result.reasoning.as_deref(),
            Some("INVALID (Incomplete Data): Missing required fields: [change_log]")
        );
        assert_eq!(result.raw_response["status"], "INVALID");
        assert_eq!(result.raw_response["missing_fields"], json!(["change_log"]));
    }
}
