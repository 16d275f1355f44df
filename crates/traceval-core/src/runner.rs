use std::sync::Arc;

use serde_json::Value;
use traceval_types::{BatchStatus, BatchSummary, EvaluationBatch, PipelineState};
use tracing::{info, warn};

use crate::aggregate;
use crate::config::EvalPack;
use crate::error::{ConfigError, EvalError};
use crate::items::build_items;
use crate::judge::JudgeClient;
use crate::pipeline::{Pipeline, PipelineStep};
use crate::scorer::ScorerRegistry;
use crate::trace::{extract_all_spans, extract_resource_metadata};
use crate::validation::{invalid_result, validate_items};

pub struct EvaluatorBuilder {
	pack: Option<EvalPack>,
	registry: ScorerRegistry,
}

impl Default for EvaluatorBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl EvaluatorBuilder {
	pub fn new() -> Self {
		Self {
			pack: None,
			registry: ScorerRegistry::new(),
		}
	}

	pub fn pack(mut self, pack: EvalPack) -> Self {
		self.pack = Some(pack);
		self
	}

	pub fn registry(mut self, registry: ScorerRegistry) -> Self {
		self.registry = registry;
		self
	}

	pub fn judge_client(mut self, client: Arc<dyn JudgeClient>) -> Self {
		self.registry = self.registry.with_judge_client(client);
		self
	}

	/// Fails on a missing pack or on any stage that cannot be built.
	pub fn build(self) -> Result<Evaluator, ConfigError> {
		let pack = self.pack.ok_or_else(|| ConfigError::InvalidStage {
			stage: "<pack>".to_string(),
			message: "eval pack must be set".to_string(),
		})?;
		let steps = Pipeline::from_stages(&pack.pipeline, &self.registry)?
			.steps()
			.to_vec();
		Ok(Evaluator { pack, steps })
	}
}

/// A pack with its scorers already built, ready to run over any number of traces.
pub struct Evaluator {
	pack: EvalPack,
	steps: Vec<PipelineStep>,
}

impl Evaluator {
	pub fn builder() -> EvaluatorBuilder {
		EvaluatorBuilder::new()
	}

	pub fn pack(&self) -> &EvalPack {
		&self.pack
	}

	pub async fn run(&self, trace: &Value) -> Result<EvaluationBatch, EvalError> {
		evaluate(trace, &self.pack, Pipeline::new(self.steps.clone())).await
	}
}

/// Evaluate one trace with a pack, building the pack's scorers from `registry`.
pub async fn run_evaluation_batch(
	trace: &Value,
	pack: &EvalPack,
	registry: &ScorerRegistry,
) -> Result<EvaluationBatch, EvalError> {
	let pipeline = Pipeline::from_stages(&pack.pipeline, registry)?;
	evaluate(trace, pack, pipeline).await
}

async fn evaluate(trace: &Value, pack: &EvalPack, mut pipeline: Pipeline) -> Result<EvaluationBatch, EvalError> {
	let resource = extract_resource_metadata(trace);
	let spans = extract_all_spans(trace);
	let mut items = build_items(&spans, &resource, &pack.ingestion.config)?;
	info!(
		pack = %pack.name,
		mode = ?pack.ingestion.config.evaluation_mode,
		spans = spans.len(),
		items = items.len(),
		resource_fields = resource.len(),
		"built evaluation items"
	);

	if items.is_empty() {
		warn!(pack = %pack.name, "trace produced no evaluation items");
		return Ok(EvaluationBatch::new(&pack.name, items, BatchSummary::no_items()));
	}

	if let Err(failure) = validate_items(&items, &pack.identity()) {
		items[failure.item_index].push_score(invalid_result(&failure.missing));
		let total = items.len();
		let summary = BatchSummary {
			total_items: total,
			passed: 0,
			failed: total,
			average_score: 0.0,
			status: BatchStatus::Invalid,
			pipeline_state: PipelineState::Pending,
			stopped_at: None,
			scorers: aggregate::scorer_stats(&items),
		};
		return Ok(EvaluationBatch::new(&pack.name, items, summary));
	}

	let outcome = pipeline.execute(&mut items).await;
	let summary = aggregate::summarize(&items, outcome.state, outcome.stopped_at);
	info!(
		pack = %pack.name,
		status = %summary.status,
		passed = summary.passed,
		total = summary.total_items,
		average_score = summary.average_score,
		"evaluation finished"
	);
	Ok(EvaluationBatch::new(&pack.name, items, summary))
}
