//! Integration coverage for LlmStream's SSE parsing against a real local HTTP server,
//! standing in for an OpenAI-compatible chat completions endpoint. The module's own unit
//! tests only cover `ToolCallAssembler` in isolation; this exercises `run_stream`'s chunk
//! framing and `handle_chunk`'s content/tool-call extraction end to end over a socket.

use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use voice_stream_core::config::LlmConfig;
use voice_stream_core::llm_stream::{LlmStream, LlmStreamEvent, ToolCallAssembler};
use voice_stream_core::model::Message;

async fn spawn_sse_server(body: &'static str) -> String {
    let app = Router::new().route(
        "/chat/completions",
        post(move || async move {
            (
                [(axum::http::header::CONTENT_TYPE, "text/event-stream")],
                body,
            )
                .into_response()
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn test_llm_config(base_url: String) -> LlmConfig {
    LlmConfig {
        api_key: None,
        base_url,
        model: "gpt-4o".to_string(),
        max_output_tokens: 250,
    }
}

#[tokio::test]
async fn content_tokens_stream_in_order_then_done() {
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\", world\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    let base_url = spawn_sse_server(body).await;
    let llm = LlmStream::new(test_llm_config(base_url));
    let mut rx = llm.stream(&[Message::user("hi")]);

    let mut tokens = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            LlmStreamEvent::ContentToken(t) => tokens.push(t),
            LlmStreamEvent::Done => break,
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(tokens, vec!["Hello".to_string(), ", world".to_string()]);
}

#[tokio::test]
async fn tool_call_fragments_reassemble_into_one_request() {
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"check_calendar_availability\",\"arguments\":\"{\\\"date\\\":\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"2025-01-14\\\",\\\"time\\\":\\\"11:00\\\"}\"}}]}}]}\n\n",
        "data: [DONE]\n\n",
    );
    let base_url = spawn_sse_server(body).await;
    let llm = LlmStream::new(test_llm_config(base_url));
    let mut rx = llm.stream_with_tools(&[Message::user("book 11am")], vec![]);

    let mut assembler = ToolCallAssembler::new();
    while let Some(event) = rx.recv().await {
        match event {
            LlmStreamEvent::ToolCallFragment {
                index,
                id,
                name,
                arguments_fragment,
            } => assembler.push_fragment(index, id, name, &arguments_fragment),
            LlmStreamEvent::Done => break,
            _ => {}
        }
    }

    let requests = assembler.flush();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].id, "call_1");
    assert_eq!(requests[0].name, "check_calendar_availability");
    assert_eq!(
        requests[0].arguments,
        "{\"date\":\"2025-01-14\",\"time\":\"11:00\"}"
    );
}

#[tokio::test]
async fn usage_event_carries_token_counts() {
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{}}],\"usage\":{\"prompt_tokens\":12,\"completion_tokens\":3}}\n\n",
        "data: [DONE]\n\n",
    );
    let base_url = spawn_sse_server(body).await;
    let llm = LlmStream::new(test_llm_config(base_url));
    let mut rx = llm.stream(&[Message::user("hi")]);

    let mut saw_usage = false;
    while let Some(event) = rx.recv().await {
        if let LlmStreamEvent::Usage {
            input_tokens,
            output_tokens,
        } = event
        {
            assert_eq!(input_tokens, 12);
            assert_eq!(output_tokens, 3);
            saw_usage = true;
        }
        if matches!(event, LlmStreamEvent::Done) {
            break;
        }
    }
    assert!(saw_usage);
}
