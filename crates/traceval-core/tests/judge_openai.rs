use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use traceval_core::testing::RecordingSleeper;
use traceval_core::{
    EvaluationItem, JudgeClient, JudgeConfig, JudgeError, JudgeRequest, LlmJudgeScorer,
    OpenAiJudgeClient, RetryPolicy, Scorer,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn completion(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{"message": {"role": "assistant", "content": content}}]
    }))
}

fn request() -> JudgeRequest {
    JudgeRequest {
        model: "gpt-4o".into(),
        temperature: 0.0,
        system_prompt: "judge".into(),
        user_prompt: "did it work?".into(),
    }
}

fn client(server: &MockServer) -> OpenAiJudgeClient {
    OpenAiJudgeClient::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn openai_client_sends_json_mode_request_and_parses_object() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o",
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": "judge"},
                {"role": "user", "content": "did it work?"}
            ]
        })))
        .respond_with(completion(r#"{"score": 0.85, "reasoning": "mostly"}"#))
        .expect(1)
        .mount(&server)
        .await;

    let answer = client(&server).judge(&request()).await.unwrap();
    assert_eq!(answer["score"], 0.85);
    assert_eq!(answer["reasoning"], "mostly");
}

#[tokio::test]
async fn openai_client_maps_http_errors() {
    let cases = [
        (429, "rate_limited"),
        (408, "timeout"),
        (500, "server_error"),
        (401, "authentication_error"),
        (403, "authentication_error"),
        (400, "invalid_request"),
    ];
    for (status, code) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "error": {"message": "nope"}
            })))
            .mount(&server)
            .await;

        let err = client(&server).judge(&request()).await.unwrap_err();
        assert_eq!(err.code(), code, "status {status}");
    }
}

#[tokio::test]
async fn openai_client_reports_its_own_timeout_on_408() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(408))
        .mount(&server)
        .await;

    let err = client(&server).judge(&request()).await.unwrap_err();
    assert!(matches!(err, JudgeError::Timeout(d) if d == Duration::from_secs(5)), "{err:?}");
}

#[tokio::test]
async fn openai_client_rejects_non_object_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion("[0.9]"))
        .mount(&server)
        .await;

    let err = client(&server).judge(&request()).await.unwrap_err();
    assert!(matches!(err, JudgeError::MalformedResponse(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn openai_client_connection_refused_is_retryable() {
    // Bind then release a port so nothing is listening on it.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let uri = format!("http://127.0.0.1:{port}");
    let client = OpenAiJudgeClient::with_config("sk-test", uri, Duration::from_secs(2)).unwrap();
    let err = client.judge(&request()).await.unwrap_err();
    assert!(err.is_retryable(), "{err:?}");
}

/// Answers with the scripted templates in order, repeating the last one.
struct Sequence {
    responses: Vec<ResponseTemplate>,
    calls: Arc<AtomicUsize>,
}

impl Respond for Sequence {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses[n.min(self.responses.len() - 1)].clone()
    }
}

fn judge_scorer(server: &MockServer) -> (LlmJudgeScorer, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::default());
    let scorer = LlmJudgeScorer::new(JudgeConfig::default(), Arc::new(client(server)))
        .with_retry(RetryPolicy::default(), sleeper.clone());
    (scorer, sleeper)
}

#[tokio::test]
async fn judge_scorer_retries_rate_limits_then_passes() {
    let server = MockServer::start().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let rate_limited = ResponseTemplate::new(429).set_body_json(json!({
        "error": {"message": "Rate limit reached"}
    }));

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(Sequence {
            responses: vec![
                rate_limited.clone(),
                rate_limited,
                completion(r#"{"score": 0.9, "reasoning": "addressed every point"}"#),
            ],
            calls: calls.clone(),
        })
        .mount(&server)
        .await;

    let (scorer, sleeper) = judge_scorer(&server);
    let item = EvaluationItem::new("trace_evaluation", "[]").unwrap();
    let result = scorer.score(&item).await.unwrap();

    assert!(result.passed);
    assert_eq!(result.numeric_score, Some(0.9));
    assert_eq!(result.reasoning.as_deref(), Some("addressed every point"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(sleeper.delays(), [Duration::from_secs(1), Duration::from_secs(2)]);
}

#[tokio::test]
async fn judge_scorer_does_not_retry_authentication_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (scorer, sleeper) = judge_scorer(&server);
    let item = EvaluationItem::new("span_0", "content").unwrap();
    let result = scorer.score(&item).await.unwrap();

    assert!(!result.passed);
    assert!(result.is_error());
    assert!(result
        .reasoning
        .as_deref()
        .unwrap()
        .contains("Incorrect API key provided"));
    assert!(sleeper.delays().is_empty());
}
