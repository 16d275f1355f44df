use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use traceval_types::{EvaluationItem, ScorerResult};

use crate::config::PipelineStage;
use crate::error::ConfigError;
use crate::scorer::Scorer;

/// Which text of the item the pattern runs against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextField {
	#[default]
	Input,
	Output,
}

#[derive(Deserialize)]
struct RegexConfig {
	pattern: String,
	#[serde(default)]
	field: TextField,
}

/// Checks if an item's text matches a regex pattern.
pub struct RegexScorer {
	pattern: Regex,
	field: TextField,
}

impl RegexScorer {
	/// Creates a regex scorer with the given pattern.
	pub fn new(pattern: &str, field: TextField) -> Result<Self, regex::Error> {
		Ok(Self {
			pattern: Regex::new(pattern)?,
			field,
		})
	}

	pub fn from_stage(stage: &PipelineStage) -> Result<Self, ConfigError> {
		let config: RegexConfig = serde_json::from_value(Value::Object(stage.config.clone()))
			.map_err(|e| ConfigError::invalid_stage(&stage.name, e))?;
		Self::new(&config.pattern, config.field).map_err(|e| ConfigError::invalid_stage(&stage.name, e))
	}
}

#[async_trait]
impl Scorer for RegexScorer {
	fn name(&self) -> &'static str {
		"regex"
	}

	async fn score(&self, item: &EvaluationItem) -> Result<ScorerResult> {
		let text = match self.field {
			TextField::Input => item.input(),
			TextField::Output => match item.output() {
				Some(output) => output,
				None => return Ok(ScorerResult::failure(self.name(), "item has no output")),
			},
		};

		let matches = self.pattern.is_match(text);
		let mut details = Map::new();
		details.insert("pattern".into(), Value::String(self.pattern.as_str().to_string()));
		details.insert("matches".into(), Value::Bool(matches));
		if let Some(caps) = self.pattern.captures(text) {
			let captures: Vec<Value> = caps
				.iter()
				.map(|m| m.map_or(Value::Null, |m| Value::String(m.as_str().to_string())))
				.collect();
			details.insert("captures".into(), Value::Array(captures));
		}

		Ok(ScorerResult::scored(self.name(), if matches { 1.0 } else { 0.0 }, matches)
			.with_details(details))
	}
}
