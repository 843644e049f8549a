use drillroom_provider::{
    LlmProvider, LlmRequest, OpenAiProvider, OpenAiResponsesProvider,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn mock_error(status: u16, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(serde_json::json!({
        "error": { "type": "api_error", "message": message }
    }))
}

#[tokio::test]
async fn chat_completions_round_trip() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(serde_json::json!({ "temperature": 0.3 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{ "message": { "content": "{\"messages\":[\"Hold the retry path.\"]}" }, "finish_reason": "stop" }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("test-key", server.uri());
    let resp = provider
        .chat(
            LlmRequest::simple("gpt-4o-mini".into(), Some("persona".into()), "turn".into())
                .with_temperature(0.3)
                .with_max_tokens(180),
        )
        .await
        .unwrap();

    assert!(resp.text.contains("Hold the retry path."));
    assert_eq!(resp.input_tokens, Some(10));
    assert_eq!(resp.stop_reason.as_deref(), Some("end_turn"));
}

#[tokio::test]
async fn chat_completions_server_error_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(mock_error(503, "overloaded"))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("test-key", server.uri());
    let err = provider
        .chat(LlmRequest::simple("gpt-4o-mini".into(), None, "x".into()))
        .await
        .unwrap_err()
        .to_string();
    assert!(err.contains("[retryable]"), "{err}");
    assert!(err.contains("overloaded"), "{err}");
}

#[tokio::test]
async fn responses_api_round_trip() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/responses"))
        .and(header("authorization", "Bearer resp-key"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-4o-mini",
            "max_output_tokens": 120
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "completed",
            "output": [{ "type": "message", "content": [{ "type": "output_text", "text": "on_task" }] }],
            "usage": { "input_tokens": 40, "output_tokens": 2 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiResponsesProvider::new("resp-key", format!("{}/", server.uri()));
    let resp = provider
        .chat(
            LlmRequest::simple("openai/gpt-4o-mini".into(), Some("classify".into()), "hi".into())
                .with_temperature(0.1)
                .with_max_tokens(120),
        )
        .await
        .unwrap();

    assert_eq!(resp.text, "on_task");
    assert_eq!(resp.output_tokens, Some(2));
    assert_eq!(resp.stop_reason.as_deref(), Some("completed"));
}

#[tokio::test]
async fn responses_api_auth_error_is_not_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(mock_error(401, "bad key"))
        .mount(&server)
        .await;

    let provider = OpenAiResponsesProvider::new("nope", server.uri());
    let err = provider
        .chat(LlmRequest::simple("gpt-5-mini".into(), None, "x".into()))
        .await
        .unwrap_err()
        .to_string();
    assert!(err.contains("401"), "{err}");
    assert!(!err.contains("[retryable]"), "{err}");
}
