//! Helpers for asserting on evaluation batches in `#[tokio::test]` functions, plus
//! in-memory stand-ins for the judge and the backoff clock.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use traceval_types::{BatchStatus, EvaluationBatch};

use crate::error::JudgeError;
use crate::judge::{JudgeClient, JudgeRequest};
use crate::retry::Sleeper;

/// Assert the batch ended with the given status.
///
/// # Example
/// ```ignore
/// #[tokio::test]
/// async fn test_revision_pack() -> anyhow::Result<()> {
///     let batch = evaluator.run(&trace).await?;
///     assert_batch_status(&batch, BatchStatus::Pass)?;
///     Ok(())
/// }
/// ```
pub fn assert_batch_status(batch: &EvaluationBatch, expected: BatchStatus) -> Result<()> {
    if batch.status() != expected {
        anyhow::bail!(
            "Evaluation status is {}, expected {}\n{}",
            batch.status(),
            expected,
            batch.summary_table()
        );
    }
    Ok(())
}

/// Assert a scorer's accuracy meets a threshold.
pub fn assert_scorer_accuracy(batch: &EvaluationBatch, scorer: &str, min_accuracy: f64) -> Result<()> {
    let Some(stats) = batch.summary().scorers.get(scorer) else {
        anyhow::bail!("Scorer '{}' produced no results\n{}", scorer, batch.summary_table());
    };
    if stats.accuracy < min_accuracy {
        anyhow::bail!(
            "Scorer '{}' accuracy {:.1}% is below threshold {:.1}%\n{}",
            scorer,
            stats.accuracy * 100.0,
            min_accuracy * 100.0,
            batch.summary_table()
        );
    }
    Ok(())
}

/// Assert the batch average score meets a threshold.
pub fn assert_batch_avg_score(batch: &EvaluationBatch, min_avg_score: f64) -> Result<()> {
    if batch.summary().average_score < min_avg_score {
        anyhow::bail!(
            "Evaluation failed: avg score {:.3} is below threshold {:.3}\n{}",
            batch.summary().average_score,
            min_avg_score,
            batch.summary_table()
        );
    }
    Ok(())
}

/// A judge that replays scripted answers in order and records every request.
/// Once the script runs out, further calls fail with a non-retryable error.
#[derive(Default)]
pub struct ScriptedJudgeClient {
    script: Mutex<VecDeque<Result<Map<String, Value>, JudgeError>>>,
    requests: Mutex<Vec<JudgeRequest>>,
}

impl ScriptedJudgeClient {
    pub fn new(script: Vec<Result<Map<String, Value>, JudgeError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<JudgeRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl JudgeClient for ScriptedJudgeClient {
    async fn judge(&self, request: &JudgeRequest) -> Result<Map<String, Value>, JudgeError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        self.script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or_else(|| Err(JudgeError::Config("scripted judge has no answers left".into())))
    }
}

/// Records requested backoff waits instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
    }
}
