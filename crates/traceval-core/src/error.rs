//! Error types for the evaluation pipeline.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use traceval_types::ItemError;

/// Problems with the eval pack or its stages. Always raised before any item is scored.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read eval pack {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid eval pack {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("unknown scorer '{scorer}' in stage '{stage}'")]
    UnknownScorer { stage: String, scorer: String },

    #[error("invalid config for stage '{stage}': {message}")]
    InvalidStage { stage: String, message: String },

    #[error("stage '{stage}' needs a judge client but none is configured")]
    MissingJudgeClient { stage: String },
}

impl ConfigError {
    pub fn invalid_stage(stage: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidStage {
            stage: stage.into(),
            message: message.to_string(),
        }
    }
}

/// Fatal errors of a batch run. Per-item scoring failures never surface here.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Item(#[from] ItemError),
}

/// Failures talking to the judgment API.
#[derive(Debug, Error)]
pub enum JudgeError {
    /// HTTP 429.
    #[error("rate limited: {message}")]
    RateLimited { message: String },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP 5xx.
    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// Any other API-level failure without a more specific class.
    #[error("API error: {0}")]
    Api(String),

    /// HTTP 401 / 403.
    #[error("authentication failed (HTTP {status}): {message}")]
    Authentication { status: u16, message: String },

    /// Other HTTP 4xx.
    #[error("invalid request (HTTP {status}): {message}")]
    InvalidRequest { status: u16, message: String },

    /// The judge answered, but not with a JSON object.
    #[error("malformed judge response: {0}")]
    MalformedResponse(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl JudgeError {
    /// Transient classes worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. }
            | Self::Connection(_)
            | Self::Timeout(_)
            | Self::Server { .. }
            | Self::Api(_) => true,
            Self::Authentication { .. }
            | Self::InvalidRequest { .. }
            | Self::MalformedResponse(_)
            | Self::Config(_) => false,
        }
    }

    /// Short code for logs and raw responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Connection(_) => "connection_error",
            Self::Timeout(_) => "timeout",
            Self::Server { .. } => "server_error",
            Self::Api(_) => "api_error",
            Self::Authentication { .. } => "authentication_error",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Config(_) => "config_error",
        }
    }
}

#[derive(Debug, Error)]
pub enum TemplateError {
    /// Malformed template, or a filter, test or function that does not exist.
    #[error("invalid template: {0}")]
    Syntax(#[source] minijinja::Error),

    #[error("template rendering failed: {0}")]
    Render(#[source] minijinja::Error),
}

impl From<minijinja::Error> for TemplateError {
    fn from(err: minijinja::Error) -> Self {
        match err.kind() {
            minijinja::ErrorKind::SyntaxError
            | minijinja::ErrorKind::UnknownFilter
            | minijinja::ErrorKind::UnknownTest
            | minijinja::ErrorKind::UnknownFunction => Self::Syntax(err),
            _ => Self::Render(err),
        }
    }
}

#[derive(Debug, Error)]
pub enum TraceSourceError {
    #[error("failed to read trace file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no JSON trace document could be parsed: {0}")]
    Parse(#[from] serde_json::Error),
}
