use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use traceval_types::{EvaluationItem, ScorerResult};

use crate::config::PipelineStage;
use crate::error::ConfigError;
use crate::judge::JudgeClient;
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper};
use crate::scorers::{
    exact::ExactMatchScorer, levenshtein::FuzzyMatchScorer, llm_judge::LlmJudgeScorer,
    regex::RegexScorer,
};

#[async_trait]
pub trait Scorer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Score one item. An `Err` is recorded by the pipeline as a failed result.
    async fn score(&self, item: &EvaluationItem) -> Result<ScorerResult>;
}

/// Builds a scorer from its stage definition.
pub type ScorerFactory =
    Arc<dyn Fn(&PipelineStage) -> Result<Arc<dyn Scorer>, ConfigError> + Send + Sync>;

/// Maps stage scorer ids to scorer instances.
///
/// Built-in ids: `llm_judge`, `exact_match`, `fuzzy_match`, `regex`. Extra ids can be
/// registered; they shadow built-ins of the same name.
#[derive(Clone)]
pub struct ScorerRegistry {
    judge_client: Option<Arc<dyn JudgeClient>>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    custom: HashMap<String, ScorerFactory>,
}

impl Default for ScorerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ScorerRegistry {
    pub fn new() -> Self {
        Self {
            judge_client: None,
            retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            custom: HashMap::new(),
        }
    }

    pub fn with_judge_client(mut self, client: Arc<dyn JudgeClient>) -> Self {
        self.judge_client = Some(client);
        self
    }

    /// Retry policy and backoff sleeper handed to judge scorers.
    pub fn with_retry(mut self, policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        self.retry = policy;
        self.sleeper = sleeper;
        self
    }

    pub fn register<F>(mut self, scorer_id: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&PipelineStage) -> Result<Arc<dyn Scorer>, ConfigError> + Send + Sync + 'static,
    {
        self.custom.insert(scorer_id.into(), Arc::new(factory));
        self
    }

    pub fn build(&self, stage: &PipelineStage) -> Result<Arc<dyn Scorer>, ConfigError> {
        if let Some(factory) = self.custom.get(&stage.scorer) {
            return factory(stage);
        }

        match stage.scorer.as_str() {
            "llm_judge" => {
                let client = self
                    .judge_client
                    .clone()
                    .ok_or_else(|| ConfigError::MissingJudgeClient {
                        stage: stage.name.clone(),
                    })?;
                let scorer = LlmJudgeScorer::from_stage(stage, client)?
                    .with_retry(self.retry.clone(), self.sleeper.clone());
                Ok(Arc::new(scorer))
            }
            "exact_match" => Ok(Arc::new(ExactMatchScorer)),
            "fuzzy_match" => Ok(Arc::new(FuzzyMatchScorer::from_stage(stage)?)),
            "regex" => Ok(Arc::new(RegexScorer::from_stage(stage)?)),
            other => Err(ConfigError::UnknownScorer {
                stage: stage.name.clone(),
                scorer: other.to_string(),
            }),
        }
    }
}
