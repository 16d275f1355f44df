//! traceval-core: evaluate agent traces against eval packs.
//! Normalize an OTLP/JSON trace, build items, gate on required metadata, run the pack's
//! scoring stages and summarize the batch.

pub mod aggregate;
pub mod attributes;
pub mod config;
pub mod datasource;
pub mod error;
pub mod heuristics;
pub mod items;
pub mod judge;
pub mod pipeline;
pub mod retry;
pub mod runner;
pub mod sanitize;
pub mod scorer;
pub mod template;
pub mod testing;
pub mod trace;
pub mod validation;

pub mod scorers {
    pub mod exact;
    pub mod levenshtein;
    pub mod llm_judge;
    pub mod regex;
}

pub use config::{EvalPack, EvaluationMode, IngestionConfig, IngestionOptions, OnFail, PipelineStage};
pub use datasource::{parse_trace_documents, FileTraceSource, TraceSource, VecTraceSource};
pub use error::{ConfigError, EvalError, JudgeError, TemplateError, TraceSourceError};
pub use judge::{JudgeClient, JudgeRequest, OpenAiJudgeClient};
pub use pipeline::{Pipeline, PipelineOutcome, PipelineStep};
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};
pub use runner::{run_evaluation_batch, Evaluator, EvaluatorBuilder};
pub use scorer::{Scorer, ScorerRegistry};
pub use scorers::{
    exact::ExactMatchScorer,
    levenshtein::FuzzyMatchScorer,
    llm_judge::{JudgeConfig, LlmJudgeScorer},
    regex::{RegexScorer, TextField},
};
pub use trace::{extract_all_spans, extract_resource_metadata, Span};
pub use traceval_types::{
    BatchStatus, BatchSummary, EvaluationBatch, EvaluationItem, ItemError, MetaValue, Metadata,
    PipelineState, ScorerResult, ScorerStats,
};
