//! Stage-by-stage execution over a batch of items.

use std::sync::Arc;

use traceval_types::{EvaluationItem, PipelineState, ScorerResult};
use tracing::{debug, info, warn};

use crate::config::{OnFail, PipelineStage};
use crate::error::ConfigError;
use crate::scorer::{Scorer, ScorerRegistry};

#[derive(Clone)]
pub struct PipelineStep {
    pub stage: PipelineStage,
    pub scorer: Arc<dyn Scorer>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub state: PipelineState,
    /// Name of the stage that halted the run.
    pub stopped_at: Option<String>,
}

pub struct Pipeline {
    steps: Vec<PipelineStep>,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(steps: Vec<PipelineStep>) -> Self {
        Self {
            steps,
            state: PipelineState::Pending,
        }
    }

    /// Build every stage's scorer up front so a bad stage fails before any item is scored.
    pub fn from_stages(stages: &[PipelineStage], registry: &ScorerRegistry) -> Result<Self, ConfigError> {
        let steps = stages
            .iter()
            .map(|stage| {
                Ok(PipelineStep {
                    stage: stage.clone(),
                    scorer: registry.build(stage)?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self::new(steps))
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    /// Run each stage over every item in order, appending one result per (stage, item).
    /// A non-passing result under an `on_fail: stop` stage halts the whole run.
    pub async fn execute(&mut self, items: &mut [EvaluationItem]) -> PipelineOutcome {
        self.state = PipelineState::Running;
        info!(stages = self.steps.len(), items = items.len(), "pipeline started");

        for step in &self.steps {
            info!(stage = %step.stage.name, scorer = step.scorer.name(), "running stage");

            for item in items.iter_mut() {
                let result = match step.scorer.score(item).await {
                    Ok(result) => result,
                    Err(err) => {
                        warn!(stage = %step.stage.name, item = item.id(), error = %err, "scorer failed");
                        ScorerResult::failure(step.scorer.name(), err.to_string())
                            .with_reasoning(format!("Scorer error: {err}"))
                    }
                };
                let passed = result.counts_as_pass();
                debug!(
                    stage = %step.stage.name,
                    item = item.id(),
                    score = ?result.numeric_score,
                    passed,
                    "item scored"
                );
                item.push_score(result);

                if !passed && step.stage.on_fail == OnFail::Stop {
                    warn!(stage = %step.stage.name, item = item.id(), "stage failed with on_fail=stop, halting pipeline");
                    self.state = PipelineState::Stopped;
                    return PipelineOutcome {
                        state: PipelineState::Stopped,
                        stopped_at: Some(step.stage.name.clone()),
                    };
                }
            }
        }

        self.state = PipelineState::Completed;
        info!("pipeline completed");
        PipelineOutcome {
            state: PipelineState::Completed,
            stopped_at: None,
        }
    }
}
