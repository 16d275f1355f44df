//! Judgment API client.
//!
//! The judge scorer talks to a [`JudgeClient`]; [`OpenAiJudgeClient`] speaks the OpenAI
//! chat-completions protocol with a JSON-object response format.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::JudgeError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// One judgment call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JudgeRequest {
    pub model: String,
    pub temperature: f64,
    pub system_prompt: String,
    pub user_prompt: String,
}

#[async_trait]
pub trait JudgeClient: Send + Sync {
    /// Send one request and return the judge's JSON object.
    async fn judge(&self, request: &JudgeRequest) -> Result<Map<String, Value>, JudgeError>;
}

pub struct OpenAiJudgeClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl OpenAiJudgeClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, JudgeError> {
        Self::with_config(api_key, DEFAULT_BASE_URL, REQUEST_TIMEOUT)
    }

    /// `OPENAI_API_KEY`, and `OPENAI_BASE_URL` when set.
    pub fn from_env() -> Result<Self, JudgeError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| JudgeError::Config("OPENAI_API_KEY not set".into()))?;
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::with_config(api_key, base_url, REQUEST_TIMEOUT)
    }

    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, JudgeError> {
        let api_key = api_key.into();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| JudgeError::Config("invalid API key format".into()))?;
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| JudgeError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn transport_error(&self, err: reqwest::Error) -> JudgeError {
        if err.is_timeout() {
            JudgeError::Timeout(self.timeout)
        } else if err.is_connect() {
            JudgeError::Connection(err.to_string())
        } else {
            JudgeError::Api(err.to_string())
        }
    }
}

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    temperature: f64,
    messages: [ChatMessage<'a>; 2],
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

fn error_message(body: &str, status: u16) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error.message)
        .unwrap_or_else(|| format!("HTTP {status}"))
}

/// `timeout` is the client's configured request timeout, reported for HTTP 408.
fn status_error(status: u16, message: String, timeout: Duration) -> JudgeError {
    match status {
        429 => JudgeError::RateLimited { message },
        408 => JudgeError::Timeout(timeout),
        401 | 403 => JudgeError::Authentication { status, message },
        s if s >= 500 => JudgeError::Server { status, message },
        s if s >= 400 => JudgeError::InvalidRequest { status, message },
        _ => JudgeError::Api(message),
    }
}

/// The completion's message content, parsed as a JSON object.
fn parse_completion(body: &str) -> Result<Map<String, Value>, JudgeError> {
    let parsed: ChatApiResponse = serde_json::from_str(body)
        .map_err(|e| JudgeError::Api(format!("invalid completion body: {e}")))?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| JudgeError::MalformedResponse("completion has no content".into()))?;

    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(JudgeError::MalformedResponse(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(e) => Err(JudgeError::MalformedResponse(format!("content is not JSON: {e}"))),
    }
}

#[async_trait]
impl JudgeClient for OpenAiJudgeClient {
    async fn judge(&self, request: &JudgeRequest) -> Result<Map<String, Value>, JudgeError> {
        let body = ChatApiRequest {
            model: &request.model,
            temperature: request.temperature,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let response = self
            .client
            .post(self.chat_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        debug!(status = status.as_u16(), bytes = text.len(), model = %request.model, "judge response");

        if !status.is_success() {
            let message = error_message(&text, status.as_u16());
            return Err(status_error(status.as_u16(), message, self.timeout));
        }
        parse_completion(&text)
    }
}
