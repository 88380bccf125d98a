//! Real HTTP round-trips against a local mock server: the reqwest transport
//! (status mapping, SSE framing) and the webhook outputs (retry behavior).
//!
//! Run: cargo test --test http_test

use mockito::Matcher;
use serde_json::json;
use snapsolve_lib::ai::transport::{HttpTransport, ReqwestTransport};
use snapsolve_lib::ai::{AiError, AnalysisResult, FragmentKind, FragmentSink, StreamFragment};
use snapsolve_lib::output::{OutputError, ResultSink, StreamingWebhookOutput, WebhookOutput};
use snapsolve_lib::retry::RetryPolicy;
use std::time::Duration;

fn transport() -> ReqwestTransport {
    ReqwestTransport::new(Duration::from_secs(5)).expect("client builds")
}

fn auth() -> Vec<(String, String)> {
    vec![("Authorization".to_string(), "Bearer sk-test".to_string())]
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1))
}

#[tokio::test]
async fn post_json_returns_parsed_body() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .match_body(Matcher::PartialJson(json!({ "model": "gpt-4o" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices":[{"message":{"content":"ok"}}]}"#)
        .create_async()
        .await;

    let url = format!("{}/v1/chat/completions", server.url());
    let value = transport()
        .post_json(&url, &auth(), &json!({ "model": "gpt-4o" }))
        .await
        .unwrap();

    assert_eq!(value["choices"][0]["message"]["content"], "ok");
    mock.assert_async().await;
}

#[tokio::test]
async fn http_status_maps_to_error_kind() {
    let mut server = mockito::Server::new_async().await;
    let cases = [
        ("/auth", 401, "auth"),
        ("/limit", 429, "limit"),
        ("/down", 503, "down"),
        ("/bad", 400, "bad"),
    ];
    // Mocks are removed from the server when dropped.
    let mut mocks = Vec::new();
    for (path, status, body) in cases {
        mocks.push(
            server
                .mock("POST", path)
                .with_status(status)
                .with_body(body)
                .create_async()
                .await,
        );
    }

    let t = transport();
    let call = |path: &str| format!("{}{}", server.url(), path);

    let err = t.post_json(&call("/auth"), &auth(), &json!({})).await.unwrap_err();
    assert!(matches!(err, AiError::AuthError(ref b) if b == "auth"));

    let err = t.post_json(&call("/limit"), &auth(), &json!({})).await.unwrap_err();
    assert!(matches!(err, AiError::RateLimited(_)));

    let err = t.post_json(&call("/down"), &auth(), &json!({})).await.unwrap_err();
    assert!(matches!(err, AiError::ServerError { status: 503, .. }));

    let err = t.post_json(&call("/bad"), &auth(), &json!({})).await.unwrap_err();
    assert!(matches!(err, AiError::RequestRejected { status: 400, .. }));
}

#[tokio::test]
async fn non_json_body_is_invalid_response() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/html")
        .with_status(200)
        .with_body("<html>gateway</html>")
        .create_async()
        .await;

    let err = transport()
        .post_json(&format!("{}/html", server.url()), &auth(), &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, AiError::InvalidResponse(_)));
}

#[tokio::test]
async fn event_stream_yields_data_payloads_in_order() {
    let body = concat!(
        ": keep-alive\n",
        "event: response.output_text.delta\n",
        "data: {\"type\":\"response.output_text.delta\",\"delta\":\"Hé\"}\n",
        "\n",
        "event: response.output_text.delta\r\n",
        "data:{\"type\":\"response.output_text.delta\",\"delta\":\"llo\"}\r\n",
        "\r\n",
        "data: [DONE]\n",
        "\n",
        "data: {\"type\":\"after-done\"}\n",
    );
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/responses")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await;

    let mut stream = transport()
        .post_event_stream(&format!("{}/v1/responses", server.url()), &auth(), &json!({}))
        .await
        .unwrap();

    let first = stream.next_event().await.unwrap().unwrap();
    assert_eq!(first["delta"], "Hé");
    let second = stream.next_event().await.unwrap().unwrap();
    assert_eq!(second["delta"], "llo");
    assert!(stream.next_event().await.is_none());
    assert!(stream.next_event().await.is_none());
}

#[tokio::test]
async fn event_stream_handles_unterminated_last_line() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/stream")
        .with_status(200)
        .with_body("data: {\"n\":1}\n\ndata: {\"n\":2}")
        .create_async()
        .await;

    let mut stream = transport()
        .post_event_stream(&format!("{}/stream", server.url()), &auth(), &json!({}))
        .await
        .unwrap();

    assert_eq!(stream.next_event().await.unwrap().unwrap()["n"], 1);
    assert_eq!(stream.next_event().await.unwrap().unwrap()["n"], 2);
    assert!(stream.next_event().await.is_none());
}

#[tokio::test]
async fn event_stream_reports_status_before_streaming() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/stream")
        .with_status(401)
        .with_body("invalid api key")
        .create_async()
        .await;

    let result = transport()
        .post_event_stream(&format!("{}/stream", server.url()), &auth(), &json!({}))
        .await;
    assert!(matches!(result, Err(AiError::AuthError(_))));
}

#[tokio::test]
async fn webhook_posts_answer_payload() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/answer")
        .match_body(Matcher::PartialJson(json!({
            "type": "answer",
            "answer": "{\"answer\":\"D\"}",
            "model": "gpt-4o",
            "tokens_used": 42
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let output = WebhookOutput::new(&format!("{}/api/answer", server.url())).unwrap();
    let result = AnalysisResult::success("gpt-4o", "{\"answer\":\"D\"}", 1.2, Some(42));
    output.send(&result, None).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn webhook_retries_then_gives_up() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/answer")
        .with_status(500)
        .with_body("boom")
        .expect(3)
        .create_async()
        .await;

    let output = WebhookOutput::new(&format!("{}/api/answer", server.url()))
        .unwrap()
        .with_retry_policy(fast_retry());
    let err = output.send_processing().await.unwrap_err();

    assert!(matches!(err, OutputError::Status { status: 500, .. }));
    mock.assert_async().await;
}

#[tokio::test]
async fn streaming_webhook_sends_lifecycle_and_skips_chunk_retry() {
    let mut server = mockito::Server::new_async().await;
    let processing = server
        .mock("POST", "/hook")
        .match_body(Matcher::PartialJson(json!({ "type": "processing", "streaming": true })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let chunk = server
        .mock("POST", "/hook")
        .match_body(Matcher::PartialJson(json!({
            "type": "streaming_chunk",
            "content": "{\"ans",
            "content_type": "answer"
        })))
        .with_status(503)
        .expect(1)
        .create_async()
        .await;
    let complete = server
        .mock("POST", "/hook")
        .match_body(Matcher::PartialJson(json!({
            "type": "streaming_complete",
            "success": true
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let output = StreamingWebhookOutput::new(&format!("{}/hook", server.url()))
        .unwrap()
        .with_retry_policy(fast_retry());

    output.send_processing().await.unwrap();
    output
        .fragment_sink()
        .expect("streaming webhook listens for fragments")
        .send_streaming_chunk(&StreamFragment::new(FragmentKind::Answer, "{\"ans"))
        .await;
    let result = AnalysisResult::success("gpt-5.2", "{\"answer\":\"A\"}", 3.0, None);
    output.send(&result, None).await.unwrap();

    processing.assert_async().await;
    chunk.assert_async().await;
    complete.assert_async().await;
}
