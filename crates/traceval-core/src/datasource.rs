use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::TraceSourceError;

/// Somewhere OTLP/JSON trace documents come from.
#[async_trait]
pub trait TraceSource: Send + Sync {
    async fn load(&self) -> Result<Vec<Value>, TraceSourceError>;
}

pub struct VecTraceSource {
    traces: Vec<Value>,
}

impl VecTraceSource {
    pub fn new(traces: Vec<Value>) -> Self {
        Self { traces }
    }
}

#[async_trait]
impl TraceSource for VecTraceSource {
    async fn load(&self) -> Result<Vec<Value>, TraceSourceError> {
        Ok(self.traces.clone())
    }
}

/// Read a file holding one of:
/// - a single trace object
/// - a JSON array of trace objects
/// - newline-delimited trace objects
pub struct FileTraceSource {
    path: PathBuf,
}

impl FileTraceSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TraceSource for FileTraceSource {
    async fn load(&self) -> Result<Vec<Value>, TraceSourceError> {
        let content = read_to_string(&self.path).await?;
        let traces = parse_trace_documents(&content)?;
        debug!(path = %self.path.display(), traces = traces.len(), "loaded trace documents");
        Ok(traces)
    }
}

/// Parse trace documents from text. Empty text is zero traces. Anything after the last
/// parseable object is ignored, but at least one object must parse.
pub fn parse_trace_documents(content: &str) -> Result<Vec<Value>, TraceSourceError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
            return Ok(items.into_iter().filter(Value::is_object).collect());
        }
    }

    let mut traces = Vec::new();
    for next in serde_json::Deserializer::from_str(trimmed).into_iter::<Value>() {
        match next {
            Ok(value @ Value::Object(_)) => traces.push(value),
            Ok(_) => continue,
            Err(err) if traces.is_empty() => return Err(err.into()),
            Err(err) => {
                debug!(error = %err, parsed = traces.len(), "ignoring trailing unparseable content");
                break;
            }
        }
    }
    Ok(traces)
}

#[cfg(not(feature = "sync-fs"))]
async fn read_to_string(path: &Path) -> Result<String, TraceSourceError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| TraceSourceError::Read {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(feature = "sync-fs")]
async fn read_to_string(path: &Path) -> Result<String, TraceSourceError> {
    std::fs::read_to_string(path).map_err(|source| TraceSourceError::Read {
        path: path.to_path_buf(),
        source,
    })
}
