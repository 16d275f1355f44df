use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use strsim::levenshtein;
use traceval_types::{EvaluationItem, ScorerResult};

use crate::config::PipelineStage;
use crate::error::ConfigError;
use crate::scorer::Scorer;

pub const DEFAULT_THRESHOLD: f64 = 0.8;

/// Normalized edit-distance similarity between output and expected output.
pub struct FuzzyMatchScorer {
    pub threshold: f64,
}

#[derive(Deserialize)]
struct FuzzyConfig {
    #[serde(default = "default_threshold")]
    threshold: f64,
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

impl FuzzyMatchScorer {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn from_stage(stage: &PipelineStage) -> Result<Self, ConfigError> {
        let config: FuzzyConfig = serde_json::from_value(Value::Object(stage.config.clone()))
            .map_err(|e| ConfigError::invalid_stage(&stage.name, e))?;
        Ok(Self::new(config.threshold))
    }
}

/// 1.0 for identical strings, 0.0 for nothing in common. Counts characters, not bytes.
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(a, b) as f64 / max_len as f64)
}

#[async_trait]
impl Scorer for FuzzyMatchScorer {
    fn name(&self) -> &'static str {
        "fuzzy_match"
    }

    async fn score(&self, item: &EvaluationItem) -> Result<ScorerResult> {
        let (Some(output), Some(expected)) = (item.output(), item.expected_output()) else {
            return Ok(ScorerResult::failure(
                self.name(),
                "item has no output or no expected output",
            ));
        };

        let value = similarity(output, expected);
        let passed = value >= self.threshold;
        let mut details = Map::new();
        details.insert("threshold".into(), json!(self.threshold));

        Ok(ScorerResult::scored(self.name(), value, passed)
            .with_reasoning(format!("similarity {value:.3} (threshold {})", self.threshold))
            .with_details(details))
    }
}
