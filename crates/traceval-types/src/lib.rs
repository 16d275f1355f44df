use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tabled::{Table, Tabled};

/// Decoded metadata / attribute value.
///
/// Closed union: everything read out of a trace lands in one of these shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
	Null,
	Bool(bool),
	Int(i64),
	Double(f64),
	String(String),
	List(Vec<MetaValue>),
	Map(BTreeMap<String, MetaValue>),
}

pub type Metadata = BTreeMap<String, MetaValue>;

impl MetaValue {
	pub fn as_str(&self) -> Option<&str> {
		match self {
			MetaValue::String(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			MetaValue::Bool(b) => Some(*b),
			_ => None,
		}
	}

	pub fn as_f64(&self) -> Option<f64> {
		match self {
			MetaValue::Int(i) => Some(*i as f64),
			MetaValue::Double(d) => Some(*d),
			_ => None,
		}
	}

	/// Null and blank strings carry no information.
	pub fn is_blank(&self) -> bool {
		match self {
			MetaValue::Null => true,
			MetaValue::String(s) => s.trim().is_empty(),
			_ => false,
		}
	}

	pub fn to_json(&self) -> Value {
		match self {
			MetaValue::Null => Value::Null,
			MetaValue::Bool(b) => Value::Bool(*b),
			MetaValue::Int(i) => Value::from(*i),
			MetaValue::Double(d) => serde_json::Number::from_f64(*d)
				.map(Value::Number)
				.unwrap_or(Value::Null),
			MetaValue::String(s) => Value::String(s.clone()),
			MetaValue::List(items) => Value::Array(items.iter().map(MetaValue::to_json).collect()),
			MetaValue::Map(map) => Value::Object(
				map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
			),
		}
	}
}

impl From<Value> for MetaValue {
	fn from(v: Value) -> Self {
		match v {
			Value::Null => MetaValue::Null,
			Value::Bool(b) => MetaValue::Bool(b),
			Value::Number(n) => match n.as_i64() {
				Some(i) => MetaValue::Int(i),
				None => MetaValue::Double(n.as_f64().unwrap_or_default()),
			},
			Value::String(s) => MetaValue::String(s),
			Value::Array(items) => MetaValue::List(items.into_iter().map(MetaValue::from).collect()),
			Value::Object(map) => MetaValue::Map(
				map.into_iter().map(|(k, v)| (k, MetaValue::from(v))).collect(),
			),
		}
	}
}

impl From<&str> for MetaValue {
	fn from(s: &str) -> Self {
		MetaValue::String(s.to_string())
	}
}

impl From<String> for MetaValue {
	fn from(s: String) -> Self {
		MetaValue::String(s)
	}
}

impl From<bool> for MetaValue {
	fn from(b: bool) -> Self {
		MetaValue::Bool(b)
	}
}

impl From<i64> for MetaValue {
	fn from(i: i64) -> Self {
		MetaValue::Int(i)
	}
}

impl From<f64> for MetaValue {
	fn from(d: f64) -> Self {
		MetaValue::Double(d)
	}
}

impl From<Metadata> for MetaValue {
	fn from(map: Metadata) -> Self {
		MetaValue::Map(map)
	}
}

impl From<Vec<MetaValue>> for MetaValue {
	fn from(items: Vec<MetaValue>) -> Self {
		MetaValue::List(items)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ItemError {
	#[error("item '{id}': input must not be empty")]
	EmptyInput { id: String },
	#[error("item '{id}': expected output, when present, must not be empty")]
	EmptyExpectedOutput { id: String },
}

/// One unit handed to the scorers.
///
/// Identity and content are fixed at construction; the only mutation afterwards is
/// appending scorer results.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationItem {
	id: String,
	input: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	output: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	expected_output: Option<String>,
	metadata: Metadata,
	scores: Vec<ScorerResult>,
}

impl EvaluationItem {
	pub fn new(id: impl Into<String>, input: impl Into<String>) -> Result<Self, ItemError> {
		let id = id.into();
		let input = input.into();
		if input.trim().is_empty() {
			return Err(ItemError::EmptyInput { id });
		}
		Ok(Self {
			id,
			input,
			output: None,
			expected_output: None,
			metadata: Metadata::new(),
			scores: Vec::new(),
		})
	}

	pub fn with_output(mut self, output: impl Into<String>) -> Self {
		self.output = Some(output.into());
		self
	}

	pub fn with_expected_output(mut self, expected: impl Into<String>) -> Result<Self, ItemError> {
		let expected = expected.into();
		if expected.trim().is_empty() {
			return Err(ItemError::EmptyExpectedOutput { id: self.id });
		}
		self.expected_output = Some(expected);
		Ok(self)
	}

	pub fn with_metadata(mut self, metadata: Metadata) -> Self {
		self.metadata = metadata;
		self
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn input(&self) -> &str {
		&self.input
	}

	pub fn output(&self) -> Option<&str> {
		self.output.as_deref()
	}

	pub fn expected_output(&self) -> Option<&str> {
		self.expected_output.as_deref()
	}

	pub fn metadata(&self) -> &Metadata {
		&self.metadata
	}

	pub fn meta(&self, key: &str) -> Option<&MetaValue> {
		self.metadata.get(key)
	}

	pub fn scores(&self) -> &[ScorerResult] {
		&self.scores
	}

	pub fn push_score(&mut self, result: ScorerResult) {
		self.scores.push(result);
	}

	/// True when the item was scored at least once and every result counts as a pass.
	pub fn all_passed(&self) -> bool {
		!self.scores.is_empty() && self.scores.iter().all(ScorerResult::counts_as_pass)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerResult {
	pub scorer_name: String,
	pub numeric_score: Option<f64>,
	pub passed: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reasoning: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	#[serde(default, skip_serializing_if = "Map::is_empty")]
	pub details: Map<String, Value>,
	#[serde(default)]
	pub raw_response: Map<String, Value>,
}

impl ScorerResult {
	pub fn scored(scorer_name: impl Into<String>, score: f64, passed: bool) -> Self {
		Self {
			scorer_name: scorer_name.into(),
			numeric_score: Some(score),
			passed,
			reasoning: None,
			error: None,
			details: Map::new(),
			raw_response: Map::new(),
		}
	}

	/// A result for a scorer that could not produce a verdict. Score 0, never a pass.
	pub fn failure(scorer_name: impl Into<String>, error: impl Into<String>) -> Self {
		Self {
			error: Some(error.into()),
			..Self::scored(scorer_name, 0.0, false)
		}
	}

	pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
		self.reasoning = Some(reasoning.into());
		self
	}

	pub fn with_details(mut self, details: Map<String, Value>) -> Self {
		self.details = details;
		self
	}

	pub fn with_raw_response(mut self, raw: Map<String, Value>) -> Self {
		self.raw_response = raw;
		self
	}

	pub fn is_error(&self) -> bool {
		self.error.is_some()
	}

	pub fn counts_as_pass(&self) -> bool {
		self.passed && self.error.is_none()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
	#[serde(rename = "PASS")]
	Pass,
	#[serde(rename = "FAIL")]
	Fail,
	#[serde(rename = "PARTIAL")]
	Partial,
	#[serde(rename = "NO_ITEMS")]
	NoItems,
	#[serde(rename = "INVALID (Incomplete Data)")]
	Invalid,
}

impl BatchStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			BatchStatus::Pass => "PASS",
			BatchStatus::Fail => "FAIL",
			BatchStatus::Partial => "PARTIAL",
			BatchStatus::NoItems => "NO_ITEMS",
			BatchStatus::Invalid => "INVALID (Incomplete Data)",
		}
	}
}

impl fmt::Display for BatchStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Lifecycle of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
	Pending,
	Running,
	Completed,
	Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScorerStats {
	pub total: usize,
	pub passed: usize,
	pub failed: usize,
	pub errors: usize,
	pub accuracy: f64,
	pub average_score: f64,
	pub min_score: f64,
	pub max_score: f64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub score_distribution: Option<BTreeMap<String, usize>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
	pub total_items: usize,
	pub passed: usize,
	pub failed: usize,
	pub average_score: f64,
	pub status: BatchStatus,
	pub pipeline_state: PipelineState,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stopped_at: Option<String>,
	#[serde(default)]
	pub scorers: BTreeMap<String, ScorerStats>,
}

impl BatchSummary {
	pub fn no_items() -> Self {
		Self {
			total_items: 0,
			passed: 0,
			failed: 0,
			average_score: 0.0,
			status: BatchStatus::NoItems,
			pipeline_state: PipelineState::Pending,
			stopped_at: None,
			scorers: BTreeMap::new(),
		}
	}
}

/// Output of one pipeline run. Built once, read-only afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationBatch {
	eval_pack: String,
	generated_at: DateTime<Utc>,
	items: Vec<EvaluationItem>,
	summary: BatchSummary,
}

#[derive(Debug, Clone, Tabled)]
struct SummaryRow {
	id: String,
	passed: String,
	scores: String,
	input: String,
}

impl EvaluationBatch {
	pub fn new(eval_pack: impl Into<String>, items: Vec<EvaluationItem>, summary: BatchSummary) -> Self {
		Self {
			eval_pack: eval_pack.into(),
			generated_at: Utc::now(),
			items,
			summary,
		}
	}

	pub fn eval_pack(&self) -> &str {
		&self.eval_pack
	}

	pub fn generated_at(&self) -> DateTime<Utc> {
		self.generated_at
	}

	pub fn items(&self) -> &[EvaluationItem] {
		&self.items
	}

	pub fn summary(&self) -> &BatchSummary {
		&self.summary
	}

	pub fn status(&self) -> BatchStatus {
		self.summary.status
	}

	pub fn into_items(self) -> Vec<EvaluationItem> {
		self.items
	}

	pub fn summary_table(&self) -> String {
		let rows: Vec<SummaryRow> = self.items.iter().map(|item| {
			let scores = item
				.scores()
				.iter()
				.map(|s| match (s.numeric_score, &s.error) {
					(_, Some(_)) => format!("{}: error", s.scorer_name),
					(Some(v), None) => format!("{}: {:.3}", s.scorer_name, v),
					(None, None) => format!("{}: -", s.scorer_name),
				})
				.collect::<Vec<_>>()
				.join(", ");

			SummaryRow {
				id: item.id().to_string(),
				passed: if item.all_passed() { "✓" } else { " " }.to_string(),
				scores,
				input: truncate(item.input().replace('\n', " "), 64),
			}
		}).collect();

		let table_str = Table::new(rows).to_string();

		let mut summary_text = format!(
			"Pack: {}  Total: {}  Passed: {}  Failed: {}  Avg score: {:.3}  Status: {}",
			self.eval_pack,
			self.summary.total_items,
			self.summary.passed,
			self.summary.failed,
			self.summary.average_score,
			self.summary.status,
		);
		if let Some(stage) = &self.summary.stopped_at {
			summary_text.push_str(&format!("  (stopped at stage '{stage}')"));
		}
		for (name, stats) in &self.summary.scorers {
			summary_text.push_str(&format!(
				"\n  {}: {}/{} passed, {} errors, accuracy {:.1}%",
				name,
				stats.passed,
				stats.total,
				stats.errors,
				stats.accuracy * 100.0
			));
		}

		format!("{}\n\n{}\n", table_str, summary_text)
	}
}

fn truncate(s: String, max_len: usize) -> String {
	if s.chars().count() <= max_len {
		return s;
	}
	let mut truncated = s.chars().take(max_len.saturating_sub(1)).collect::<String>();
	truncated.push('…');
	truncated
}
