//! HTTP client behavior against a mock provider.
//!
//! Exercises retry, fail-fast, breaker, and structured parsing paths the
//! way a flaky provider would trigger them.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use weaver_core::{LlmClient, LlmError, LlmOptions, LlmOutput, ResponseFormat};
use weaver_llm::{BreakerState, HttpLlmClient, LlmClientConfig};

fn client_for(server: &MockServer, max_retries: u32, breaker_threshold: u32) -> HttpLlmClient {
    HttpLlmClient::new(LlmClientConfig {
        provider: "openai".into(),
        api_url: Some(server.uri()),
        api_key: Some("test-key".into()),
        default_model: "test-model".into(),
        rate_limit_per_minute: 600,
        max_retries,
        breaker_threshold,
        breaker_cooldown: Duration::from_secs(30),
    })
}

fn completion_body(content: &str) -> serde_json::Value {
    json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
}

#[tokio::test]
async fn happy_path_returns_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("hello")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 0, 5);
    let out = client.complete("hi", LlmOptions::default()).await.unwrap();
    assert_eq!(out, LlmOutput::Text("hello".into()));
}

#[tokio::test]
async fn transient_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("recovered")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 2, 5);
    let out = client.complete("hi", LlmOptions::default()).await.unwrap();
    assert_eq!(out, LlmOutput::Text("recovered".into()));
}

#[tokio::test]
async fn rate_limit_responses_retry_like_transients() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("after 429")))
        .mount(&server)
        .await;

    let client = client_for(&server, 2, 5);
    let out = client.complete("hi", LlmOptions::default()).await.unwrap();
    assert_eq!(out, LlmOutput::Text("after 429".into()));
}

#[tokio::test]
async fn client_errors_fail_fast() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 3, 5);
    let err = client.complete("hi", LlmOptions::default()).await.unwrap_err();
    assert!(matches!(err, LlmError::Permanent(_)));
}

#[tokio::test]
async fn breaker_opens_and_short_circuits() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server, 0, 2);
    for _ in 0..2 {
        let _ = client.complete("hi", LlmOptions::default()).await;
    }
    assert_eq!(client.breaker_state(), BreakerState::Open);

    // Third call must not reach the provider; the mock's expect(2) verifies
    // on drop that only two requests arrived.
    let err = client.complete("hi", LlmOptions::default()).await.unwrap_err();
    assert!(matches!(err, LlmError::CircuitOpen));
}

#[tokio::test]
async fn breaker_probe_closes_after_cooldown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("probe ok")))
        .mount(&server)
        .await;

    let client = HttpLlmClient::new(LlmClientConfig {
        provider: "openai".into(),
        api_url: Some(server.uri()),
        api_key: None,
        default_model: "test-model".into(),
        rate_limit_per_minute: 600,
        max_retries: 0,
        breaker_threshold: 1,
        breaker_cooldown: Duration::from_millis(50),
    });

    let _ = client.complete("hi", LlmOptions::default()).await;
    assert_eq!(client.breaker_state(), BreakerState::Open);

    tokio::time::sleep(Duration::from_millis(80)).await;
    let out = client.complete("hi", LlmOptions::default()).await.unwrap();
    assert_eq!(out, LlmOutput::Text("probe ok".into()));
    assert_eq!(client.breaker_state(), BreakerState::Closed);
}

#[tokio::test]
async fn structured_parse_failure_carries_raw_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion_body("this is not json")),
        )
        .mount(&server)
        .await;

    let client = client_for(&server, 0, 5);
    let options = LlmOptions {
        response_format: ResponseFormat::Json,
        ..Default::default()
    };
    let err = client.complete("hi", options).await.unwrap_err();
    match err {
        LlmError::Parse { raw, .. } => assert_eq!(raw, "this is not json"),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[tokio::test]
async fn list_format_round_trips() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_body(r#"["alpha", "beta"]"#)),
        )
        .mount(&server)
        .await;

    let client = client_for(&server, 0, 5);
    let options = LlmOptions {
        response_format: ResponseFormat::List,
        ..Default::default()
    };
    let out = client.complete("hi", options).await.unwrap();
    assert_eq!(out, LlmOutput::List(vec!["alpha".into(), "beta".into()]));
}
