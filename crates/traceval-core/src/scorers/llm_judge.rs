//! Model-graded scoring.
//!
//! The prompt is rendered from the stage's template, sent to the judge through the retry
//! policy, and the judge's JSON answer is turned into a result. Every failure along the
//! way becomes a failed result on the item; nothing here aborts the batch.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use traceval_types::{EvaluationItem, MetaValue, Metadata, ScorerResult};

use crate::config::PipelineStage;
use crate::error::{ConfigError, JudgeError};
use crate::heuristics::{CHANGE_LOG_NOT_FOUND, REVIEW_NOT_FOUND};
use crate::judge::{JudgeClient, JudgeRequest};
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper};
use crate::scorer::Scorer;
use crate::template;

/// Combined system + user prompt ceiling, in characters.
pub const MAX_PROMPT_CHARS: usize = 100_000;

/// Score used when the judge's answer carries no usable number.
pub const FALLBACK_SCORE: f64 = 0.5;

const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert evaluator. Compare the provided input against the evaluation criteria. \
Respond with a JSON object containing a \"score\" between 0.0 and 1.0 and a \"reasoning\" string explaining the score.";

#[derive(Debug, Clone, Deserialize)]
pub struct JudgeConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_user_prompt_template")]
    pub user_prompt_template: String,
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_threshold() -> f64 {
    0.7
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_user_prompt_template() -> String {
    "{{ input }}".to_string()
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: 0.0,
            threshold: default_threshold(),
            system_prompt: default_system_prompt(),
            user_prompt_template: default_user_prompt_template(),
        }
    }
}

pub struct LlmJudgeScorer {
    config: JudgeConfig,
    client: Arc<dyn JudgeClient>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl LlmJudgeScorer {
    pub fn new(config: JudgeConfig, client: Arc<dyn JudgeClient>) -> Self {
        Self {
            config,
            client,
            retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn from_stage(stage: &PipelineStage, client: Arc<dyn JudgeClient>) -> Result<Self, ConfigError> {
        let config: JudgeConfig = serde_json::from_value(Value::Object(stage.config.clone()))
            .map_err(|e| ConfigError::invalid_stage(&stage.name, e))?;
        Ok(Self::new(config, client))
    }

    pub fn with_retry(mut self, retry: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        self.retry = retry;
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &JudgeConfig {
        &self.config
    }

    async fn call_judge(&self, request: &JudgeRequest) -> Result<Map<String, Value>, JudgeError> {
        let client = &self.client;
        self.retry
            .run(self.sleeper.as_ref(), JudgeError::is_retryable, move |attempt| {
                debug!(attempt, model = %request.model, "calling judge");
                client.judge(request)
            })
            .await
    }
}

/// Template context: the item itself plus shortcuts to common metadata fields.
pub fn prompt_context(item: &EvaluationItem) -> Value {
    let meta = item.metadata();
    let text_or = |key: &str, fallback: &str| -> Value {
        match meta.get(key) {
            Some(v) if !v.is_blank() => v.to_json(),
            _ => Value::String(fallback.to_string()),
        }
    };
    let value_or = |key: &str, fallback: Value| -> Value {
        meta.get(key).map(MetaValue::to_json).unwrap_or(fallback)
    };

    json!({
        "input": item.input(),
        "output": item.output().unwrap_or_default(),
        "expected_output": item.expected_output().unwrap_or_default(),
        "id": item.id(),
        "metadata": MetaValue::Map(meta.clone()).to_json(),
        "breaker_review": text_or("breaker_review", REVIEW_NOT_FOUND),
        "change_log": text_or("change_log", CHANGE_LOG_NOT_FOUND),
        "reviewer_suggestions": text_or("reviewer_suggestions", "No reviewer suggestions found"),
        "user_prompt": text_or("user_prompt", "No user prompt found"),
        "otel_trace": value_or("otel_trace", json!([])),
        "attributes": value_or("attributes", json!({})),
        "approvals": value_or("approvals", json!([])),
        "all_approved": value_or("all_approved", json!(false)),
        "data_quality": value_or("data_quality", MetaValue::Map(Metadata::new()).to_json()),
    })
}

/// `score`, else `overall_score`; anything that is not a finite number becomes the fallback.
fn extract_score(response: &Map<String, Value>) -> f64 {
    let raw = response.get("score").or_else(|| response.get("overall_score"));
    let score = match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    score.filter(|s| s.is_finite()).unwrap_or(FALLBACK_SCORE)
}

fn extract_reasoning(response: &Map<String, Value>) -> String {
    match response.get("reasoning") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => Value::Object(response.clone()).to_string(),
    }
}

#[async_trait]
impl Scorer for LlmJudgeScorer {
    fn name(&self) -> &'static str {
        "llm_judge"
    }

    async fn score(&self, item: &EvaluationItem) -> Result<ScorerResult> {
        let context = prompt_context(item);
        let user_prompt = match template::render(&self.config.user_prompt_template, &context) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(item = item.id(), error = %err, "judge prompt template failed to render");
                return Ok(ScorerResult::failure(self.name(), err.to_string())
                    .with_reasoning(format!("Template rendering failed: {err}")));
            }
        };

        let size = self.config.system_prompt.chars().count() + user_prompt.chars().count();
        if size > MAX_PROMPT_CHARS {
            warn!(item = item.id(), size, limit = MAX_PROMPT_CHARS, "judge prompt too large");
            let mut raw = Map::new();
            raw.insert("error".into(), json!("prompt_too_large"));
            raw.insert("size".into(), json!(size));
            return Ok(ScorerResult::failure(self.name(), "prompt_too_large")
                .with_reasoning(format!(
                    "Prompt of {size} characters exceeds the {MAX_PROMPT_CHARS} character limit"
                ))
                .with_raw_response(raw));
        }

        let request = JudgeRequest {
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            system_prompt: self.config.system_prompt.clone(),
            user_prompt,
        };

        match self.call_judge(&request).await {
            Ok(response) => {
                let score = extract_score(&response);
                let passed = score >= self.config.threshold;
                debug!(item = item.id(), score, passed, "judge verdict");

                let mut details = Map::new();
                details.insert("model".into(), json!(self.config.model));
                details.insert("threshold".into(), json!(self.config.threshold));

                Ok(ScorerResult::scored(self.name(), score, passed)
                    .with_reasoning(extract_reasoning(&response))
                    .with_details(details)
                    .with_raw_response(response))
            }
            Err(err) => {
                warn!(item = item.id(), code = err.code(), error = %err, "judge call failed");
                let mut raw = Map::new();
                raw.insert("error".into(), json!(err.code()));
                Ok(ScorerResult::failure(self.name(), err.to_string())
                    .with_reasoning(format!("LLM call failed after retries: {err}"))
                    .with_raw_response(raw))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSleeper, ScriptedJudgeClient};
    use std::time::Duration;

    fn item() -> EvaluationItem {
        let metadata: Metadata = [
            ("breaker_review".to_string(), MetaValue::from("R1")),
            ("change_log".to_string(), MetaValue::from("")),
        ]
        .into_iter()
        .collect();
        EvaluationItem::new("span_0", "the builder's output")
            .unwrap()
            .with_metadata(metadata)
    }

    fn scorer(client: Arc<ScriptedJudgeClient>, config: JudgeConfig) -> (LlmJudgeScorer, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::default());
        let scorer = LlmJudgeScorer::new(config, client).with_retry(RetryPolicy::default(), sleeper.clone());
        (scorer, sleeper)
    }

    fn answer(value: Value) -> Result<Map<String, Value>, JudgeError> {
        match value {
            Value::Object(map) => Ok(map),
            _ => unreachable!("test answers are objects"),
        }
    }

    #[test]
    fn test_prompt_context_shortcuts() {
        let ctx = prompt_context(&item());
        assert_eq!(ctx["breaker_review"], "R1");
        assert_eq!(ctx["change_log"], CHANGE_LOG_NOT_FOUND);
        assert_eq!(ctx["metadata"]["breaker_review"], "R1");
        assert_eq!(ctx["approvals"], json!([]));
        assert_eq!(ctx["expected_output"], "");
        assert_eq!(ctx["id"], "span_0");
    }

    #[test]
    fn test_extract_score() {
        let obj = |v: Value| v.as_object().cloned().unwrap();
        assert_eq!(extract_score(&obj(json!({"score": 0.9}))), 0.9);
        assert_eq!(extract_score(&obj(json!({"overall_score": "0.25"}))), 0.25);
        assert_eq!(extract_score(&obj(json!({"score": "excellent"}))), FALLBACK_SCORE);
        assert_eq!(extract_score(&obj(json!({"score": null, "overall_score": 1}))), FALLBACK_SCORE);
        assert_eq!(extract_score(&obj(json!({}))), FALLBACK_SCORE);
    }

    #[test]
    fn test_extract_reasoning() {
        let obj = |v: Value| v.as_object().cloned().unwrap();
        assert_eq!(extract_reasoning(&obj(json!({"reasoning": "fine"}))), "fine");
        assert_eq!(extract_reasoning(&obj(json!({"reasoning": ["a"]}))), r#"["a"]"#);
        assert_eq!(extract_reasoning(&obj(json!({"score": 1}))), r#"{"score":1}"#);
    }

    #[tokio::test]
    async fn test_rate_limits_then_success() {
        let client = Arc::new(ScriptedJudgeClient::new(vec![
            Err(JudgeError::RateLimited { message: "slow".into() }),
            Err(JudgeError::RateLimited { message: "slow".into() }),
            answer(json!({"score": 0.9, "reasoning": "addressed"})),
        ]));
        let (scorer, sleeper) = scorer(client.clone(), JudgeConfig::default());

        let result = scorer.score(&item()).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.numeric_score, Some(0.9));
        assert_eq!(result.reasoning.as_deref(), Some("addressed"));
        assert_eq!(result.raw_response["score"], 0.9);
        assert_eq!(client.calls(), 3);
        assert_eq!(sleeper.delays(), [Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn test_below_threshold_fails() {
        let client = Arc::new(ScriptedJudgeClient::new(vec![answer(json!({"score": 0.6}))]));
        let (scorer, _) = scorer(client, JudgeConfig::default());
        let result = scorer.score(&item()).await.unwrap();
        assert!(!result.passed);
        assert!(!result.is_error());
        assert_eq!(result.reasoning.as_deref(), Some(r#"{"score":0.6}"#));
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_one_call() {
        let client = Arc::new(ScriptedJudgeClient::new(vec![Err(JudgeError::Authentication {
            status: 401,
            message: "bad key".into(),
        })]));
        let (scorer, sleeper) = scorer(client.clone(), JudgeConfig::default());
        let result = scorer.score(&item()).await.unwrap();
        assert!(result.is_error());
        assert!(!result.passed);
        assert_eq!(result.numeric_score, Some(0.0));
        assert!(result.reasoning.unwrap().starts_with("LLM call failed after retries: "));
        assert_eq!(client.calls(), 1);
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let client = Arc::new(ScriptedJudgeClient::new(vec![
            Err(JudgeError::Server { status: 503, message: String::new() }),
            Err(JudgeError::Server { status: 503, message: String::new() }),
            Err(JudgeError::Server { status: 503, message: String::new() }),
            answer(json!({"score": 1.0})),
        ]));
        let (scorer, _) = scorer(client.clone(), JudgeConfig::default());
        let result = scorer.score(&item()).await.unwrap();
        assert!(result.is_error());
        assert_eq!(result.raw_response["error"], "server_error");
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn test_template_failure() {
        let client = Arc::new(ScriptedJudgeClient::new(vec![]));
        let config = JudgeConfig {
            user_prompt_template: "{{ input | shout }}".into(),
            ..JudgeConfig::default()
        };
        let (scorer, _) = scorer(client.clone(), config);
        let result = scorer.score(&item()).await.unwrap();
        assert!(result.is_error());
        assert!(result.reasoning.unwrap().starts_with("Template rendering failed: "));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_prompt_too_large() {
        let client = Arc::new(ScriptedJudgeClient::new(vec![]));
        let config = JudgeConfig {
            user_prompt_template: format!("{}{{{{ input }}}}", "x".repeat(MAX_PROMPT_CHARS)),
            ..JudgeConfig::default()
        };
        let (scorer, _) = scorer(client.clone(), config);
        let result = scorer.score(&item()).await.unwrap();
        assert_eq!(result.error.as_deref(), Some("prompt_too_large"));
        assert_eq!(result.raw_response["error"], "prompt_too_large");
        assert!(result.raw_response["size"].as_u64().unwrap() > MAX_PROMPT_CHARS as u64);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_renders_metadata_into_prompt() {
        let client = Arc::new(ScriptedJudgeClient::new(vec![answer(json!({"score": 1}))]));
        let config = JudgeConfig {
            user_prompt_template: "Review: {{ breaker_review }}\nLog: {{ change_log }}".into(),
            ..JudgeConfig::default()
        };
        let (scorer, _) = scorer(client.clone(), config);
        scorer.score(&item()).await.unwrap();
        let requests = client.requests();
        assert_eq!(requests[0].user_prompt, format!("Review: R1\nLog: {CHANGE_LOG_NOT_FOUND}"));
        assert_eq!(requests[0].model, "gpt-4o");
    }

    #[tokio::test]
    async fn test_block_templates_over_approvals() {
        let client = Arc::new(ScriptedJudgeClient::new(vec![answer(json!({"score": 1}))]));
        let config = JudgeConfig {
            user_prompt_template:
                "{% if all_approved %}approved{% else %}pending{% endif %}:{% for a in approvals %} {{ a }}{% endfor %}"
                    .into(),
            ..JudgeConfig::default()
        };
        let (scorer, _) = scorer(client.clone(), config);
        let item = item().with_metadata(
            [("approvals".to_string(), MetaValue::from(json!(["alice", "bob"])))]
                .into_iter()
                .collect(),
        );
        let result = scorer.score(&item).await.unwrap();
        assert!(!result.is_error());
        assert_eq!(client.requests()[0].user_prompt, "pending: alice bob");
    }

    #[test]
    fn test_from_stage_config() {
        let stage = PipelineStage::new("judge", "llm_judge")
            .with_config(json!({"model": "gpt-4o-mini", "threshold": 0.9}));
        let client = Arc::new(ScriptedJudgeClient::new(vec![]));
        let scorer = LlmJudgeScorer::from_stage(&stage, client.clone()).unwrap();
        assert_eq!(scorer.config().model, "gpt-4o-mini");
        assert_eq!(scorer.config().threshold, 0.9);
        assert_eq!(scorer.config().user_prompt_template, "{{ input }}");

        let bad = PipelineStage::new("judge", "llm_judge").with_config(json!({"threshold": "high"}));
        assert!(LlmJudgeScorer::from_stage(&bad, client).is_err());
    }
}
