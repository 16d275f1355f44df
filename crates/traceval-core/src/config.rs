use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// An eval pack: what to ingest and which scoring stages to run, in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalPack {
    #[serde(default = "default_pack_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version", deserialize_with = "string_or_number")]
    pub version: String,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub pipeline: Vec<PipelineStage>,
    #[serde(default)]
    pub reporting: Map<String, Value>,
    /// File the pack was loaded from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

fn default_pack_name() -> String {
    "unnamed".to_string()
}

fn default_version() -> String {
    "1.0".to_string()
}

// `version: 1.0` in YAML is a float; keep whatever was written as text.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Version {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Version::deserialize(deserializer)? {
        Version::Text(s) => s,
        Version::Int(i) => i.to_string(),
        Version::Float(f) => format!("{f:?}"),
    })
}

impl EvalPack {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|source| ConfigError::Parse {
            origin: "<inline>".to_string(),
            source,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut pack: EvalPack =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                origin: path.display().to_string(),
                source,
            })?;
        pack.source = Some(path.to_path_buf());
        Ok(pack)
    }

    /// The string the pack is identified by for required-metadata lookup: the file it
    /// came from, or its name when built in memory.
    pub fn identity(&self) -> String {
        match &self.source {
            Some(path) => path.to_string_lossy().into_owned(),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    #[serde(rename = "type", default = "default_ingestion_type")]
    pub kind: String,
    #[serde(default)]
    pub config: IngestionOptions,
}

fn default_ingestion_type() -> String {
    "generic_otel".to_string()
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            kind: default_ingestion_type(),
            config: IngestionOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    /// One item per span with content.
    #[default]
    Span,
    /// One item for the whole trace.
    Trace,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionOptions {
    #[serde(default)]
    pub evaluation_mode: EvaluationMode,
    /// Span-mode content path, dot notation.
    #[serde(default = "default_input_field")]
    pub input_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output_field: Option<String>,
    /// Options for other consumers of the pack; carried, not interpreted.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub const DEFAULT_INPUT_FIELD: &str = "attributes.content";

fn default_input_field() -> String {
    DEFAULT_INPUT_FIELD.to_string()
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            evaluation_mode: EvaluationMode::default(),
            input_field: default_input_field(),
            output_field: None,
            expected_output_field: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFail {
    #[default]
    Continue,
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStage {
    pub name: String,
    pub scorer: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub on_fail: OnFail,
}

impl PipelineStage {
    pub fn new(name: impl Into<String>, scorer: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scorer: scorer.into(),
            config: Map::new(),
            on_fail: OnFail::Continue,
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        if let Value::Object(map) = config {
            self.config = map;
        }
        self
    }

    pub fn stop_on_fail(mut self) -> Self {
        self.on_fail = OnFail::Stop;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PACK: &str = r#"
name: Revision Addressed
description: Did the builder address the breaker's review?
version: 2.1
ingestion:
  type: generic_otel
  config:
    evaluation_mode: trace
    include_trace_context: true
pipeline:
  - name: judge
    scorer: llm_judge
    config:
      threshold: 0.8
      user_prompt_template: "{{ breaker_review }}"
    on_fail: stop
  - name: fuzzy
    scorer: fuzzy_match
reporting:
  format: markdown
"#;

    #[test]
    fn test_parses_full_pack() {
        let pack = EvalPack::from_yaml_str(PACK).unwrap();
        assert_eq!(pack.name, "Revision Addressed");
        assert_eq!(pack.version, "2.1");
        assert_eq!(pack.ingestion.kind, "generic_otel");
        assert_eq!(pack.ingestion.config.evaluation_mode, EvaluationMode::Trace);
        assert_eq!(pack.ingestion.config.input_field, DEFAULT_INPUT_FIELD);
        assert_eq!(pack.ingestion.config.extra["include_trace_context"], Value::Bool(true));
        assert_eq!(pack.pipeline.len(), 2);
        assert_eq!(pack.pipeline[0].on_fail, OnFail::Stop);
        assert_eq!(pack.pipeline[0].config["threshold"], serde_json::json!(0.8));
        assert_eq!(pack.pipeline[1].on_fail, OnFail::Continue);
        assert_eq!(pack.reporting["format"], Value::String("markdown".into()));
        assert!(pack.source.is_none());
        assert_eq!(pack.identity(), "Revision Addressed");
    }

    #[test]
    fn test_defaults() {
        let pack = EvalPack::from_yaml_str("{}").unwrap();
        assert_eq!(pack.name, "unnamed");
        assert_eq!(pack.version, "1.0");
        assert_eq!(pack.ingestion.kind, "generic_otel");
        assert_eq!(pack.ingestion.config.evaluation_mode, EvaluationMode::Span);
        assert!(pack.pipeline.is_empty());
    }

    #[test]
    fn test_rejects_unknown_policy_and_mode() {
        let bad_policy = "pipeline:\n  - name: a\n    scorer: llm_judge\n    on_fail: explode\n";
        assert!(matches!(
            EvalPack::from_yaml_str(bad_policy),
            Err(ConfigError::Parse { .. })
        ));
        let bad_mode = "ingestion:\n  config:\n    evaluation_mode: session\n";
        assert!(EvalPack::from_yaml_str(bad_mode).is_err());
    }

    #[test]
    fn test_from_path_records_source() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(PACK.as_bytes()).unwrap();
        let pack = EvalPack::from_path(file.path()).unwrap();
        assert_eq!(pack.source.as_deref(), Some(file.path()));
        assert_eq!(pack.identity(), file.path().to_string_lossy());
    }

    #[test]
    fn test_from_path_missing_file() {
        let err = EvalPack::from_path("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
