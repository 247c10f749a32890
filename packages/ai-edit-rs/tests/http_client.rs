use std::sync::Arc;
use std::time::Duration;

use ai_edit_rs::{
    EditSession, EditorConfig, EditorOptions, ErrorKind, GenerationClient, GenerationRequest,
    HttpGenerationClient, MemoryDocumentStore, SessionRunner, SubmitOutcome, TransportError,
    collect_stream,
};
use httpmock::prelude::*;
use serde_json::json;

const SSE_BODY: &str = concat!(
    "data: {\"content\":\"Hello\"}\n\n",
    ": keep-alive\n",
    "data: {\"content\":\", world\"}\n\n",
    "data: [DONE]\n\n",
    "data: {\"content\":\"ignored\"}\n\n",
);

fn request() -> GenerationRequest {
    GenerationRequest {
        request_id: "req-http".to_string(),
        prompt: "greet".to_string(),
        markdown: "# Doc\n\nhi".to_string(),
        selected_text: "hi".to_string(),
    }
}

#[tokio::test]
async fn posts_wire_body_and_assembles_event_stream() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat")
                .header("accept", "text/event-stream")
                .json_body(json!({
                    "prompt": "greet",
                    "markdown": "# Doc\n\nhi",
                    "selectedText": "hi"
                }));
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(SSE_BODY);
        })
        .await;

    let client = HttpGenerationClient::new(server.url("/chat"), Duration::from_secs(5)).unwrap();
    let chunks = client.open_stream(&request()).await.unwrap();
    let text = collect_stream(chunks, |_| {}).await.unwrap();

    mock.assert_async().await;
    assert_eq!(text, "Hello, world");
}

#[tokio::test]
async fn error_status_is_a_transport_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat");
            then.status(500).body("upstream exploded");
        })
        .await;

    let client = HttpGenerationClient::new(server.url("/chat"), Duration::from_secs(5)).unwrap();
    let error = client.open_stream(&request()).await.err().unwrap();
    match error {
        TransportError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "upstream exploded");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn runner_over_http_reaches_proposal_and_failure_states() {
    let server = MockServer::start_async().await;
    let mut ok = server
        .mock_async(|when, then| {
            when.method(POST).path("/chat");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(SSE_BODY);
        })
        .await;

    let config = EditorConfig::from_options(Some(EditorOptions {
        endpoint: Some(server.url("/chat")),
        timeout_ms: Some(5_000),
        ..EditorOptions::default()
    }))
    .unwrap();
    let session = EditSession::new(
        "hi there",
        Box::new(Arc::new(MemoryDocumentStore::new())),
        &config,
    );
    let runner = SessionRunner::new(session, HttpGenerationClient::from_config(&config).unwrap());

    runner.select("hi").unwrap();
    let outcome = runner.submit("greet").await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Proposal { .. }));
    assert!(runner.accept().unwrap());
    assert_eq!(runner.view().unwrap().markdown, "Hello, world there");

    ok.delete_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat");
            then.status(502);
        })
        .await;

    let outcome = runner.submit("again").await.unwrap();
    let SubmitOutcome::Failed { error } = outcome else {
        panic!("expected failure");
    };
    assert_eq!(error.kind, ErrorKind::TransportError);
    assert_eq!(runner.view().unwrap().markdown, "Hello, world there");
}
