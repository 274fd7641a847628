//! Streaming chat-completion client with tool-calling support.
//!
//! Two entry points mirror the donor's `LlmClient` request/fallback style (env-driven
//! config, bearer auth, JSON bodies built with `serde_json::json!`) but switch from a
//! single buffered `generate()` call to token-at-a-time SSE streaming, since voice latency
//! depends on forwarding content as it arrives rather than waiting for a full response.

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::model::{Message, ToolCallRequest};
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One event off the stream. Consumers match exhaustively instead of sniffing a mixed
/// text/dict shape.
#[derive(Debug, Clone)]
pub enum LlmStreamEvent {
    ContentToken(String),
    ToolCallFragment {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments_fragment: String,
    },
    Usage {
        input_tokens: u64,
        output_tokens: u64,
    },
    Done,
}

pub struct LlmStream {
    http: reqwest::Client,
    config: LlmConfig,
}

impl LlmStream {
    pub fn new(config: LlmConfig) -> Self {
        let http = reqwest::Client::builder()
            .build()
            .expect("reqwest client construction must not fail");
        Self { http, config }
    }

    /// Plain streaming, no tool schemas offered to the model.
    pub fn stream(&self, messages: &[Message]) -> mpsc::Receiver<LlmStreamEvent> {
        self.start_stream(messages, None)
    }

    /// Tool-enabled streaming: `tool_schemas` are offered via the OpenAI-compatible
    /// `tools` request field.
    pub fn stream_with_tools(
        &self,
        messages: &[Message],
        tool_schemas: Vec<Value>,
    ) -> mpsc::Receiver<LlmStreamEvent> {
        self.start_stream(messages, Some(tool_schemas))
    }

    fn start_stream(
        &self,
        messages: &[Message],
        tool_schemas: Option<Vec<Value>>,
    ) -> mpsc::Receiver<LlmStreamEvent> {
        let (tx, rx) = mpsc::channel(64);
        let http = self.http.clone();
        let config = self.config.clone();
        let mut body = json!({
            "model": config.model,
            "messages": messages,
            "max_tokens": config.max_output_tokens,
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        if let Some(tools) = tool_schemas.filter(|t| !t.is_empty()) {
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }

        tokio::spawn(async move {
            if let Err(err) = run_stream(&http, &config, body, &tx).await {
                warn!(target: "llm_stream", %err, "llm stream terminated with error");
            }
            let _ = tx.send(LlmStreamEvent::Done).await;
        });

        rx
    }
}

async fn run_stream(
    http: &reqwest::Client,
    config: &LlmConfig,
    body: Value,
    tx: &mpsc::Sender<LlmStreamEvent>,
) -> Result<(), LlmError> {
    let url = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
    let mut request = http.post(&url).json(&body);
    if let Some(api_key) = &config.api_key {
        request = request.bearer_auth(api_key);
    }

    let response = request.send().await?;
    let response = response.error_for_status().map_err(LlmError::RequestFailed)?;

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(LlmError::RequestFailed)?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(idx) = buffer.find("\n\n") {
            let event = buffer[..idx].to_string();
            buffer.drain(..idx + 2);
            for line in event.lines() {
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    return Ok(());
                }
                handle_chunk(data, tx).await?;
            }
        }
    }
    Ok(())
}

async fn handle_chunk(data: &str, tx: &mpsc::Sender<LlmStreamEvent>) -> Result<(), LlmError> {
    let parsed: Value = serde_json::from_str(data)
        .map_err(|e| LlmError::UnparseableResponse(e.to_string()))?;

    if let Some(usage) = parsed.get("usage").filter(|u| !u.is_null()) {
        let input_tokens = usage.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
        let output_tokens = usage
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let _ = tx
            .send(LlmStreamEvent::Usage {
                input_tokens,
                output_tokens,
            })
            .await;
    }

    let Some(choice) = parsed.get("choices").and_then(|c| c.get(0)) else {
        return Ok(());
    };
    let Some(delta) = choice.get("delta") else {
        return Ok(());
    };

    if let Some(content) = delta.get("content").and_then(|c| c.as_str()) {
        if !content.is_empty() {
            let _ = tx.send(LlmStreamEvent::ContentToken(content.to_string())).await;
        }
    }

    if let Some(tool_calls) = delta.get("tool_calls").and_then(|t| t.as_array()) {
        for tc in tool_calls {
            let index = tc.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;
            let id = tc.get("id").and_then(|v| v.as_str()).map(|s| s.to_string());
            let function = tc.get("function");
            let name = function
                .and_then(|f| f.get("name"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            let arguments_fragment = function
                .and_then(|f| f.get("arguments"))
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let _ = tx
                .send(LlmStreamEvent::ToolCallFragment {
                    index,
                    id,
                    name,
                    arguments_fragment,
                })
                .await;
        }
    }

    Ok(())
}

/// Reassembles interleaved, indexed tool-call fragments into complete requests.
///
/// Fragments arrive keyed by `index`; the first-seen `id`/`name` per index is bound, and
/// `arguments_fragment` strings are concatenated in arrival order. The buffer is flushed
/// into a batch only at stream end.
#[derive(Default)]
pub struct ToolCallAssembler {
    entries: BTreeMap<usize, PartialToolCall>,
}

#[derive(Default, Clone)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_fragment(
        &mut self,
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments_fragment: &str,
    ) {
        let entry = self.entries.entry(index).or_default();
        if entry.id.is_none() {
            entry.id = id;
        }
        if entry.name.is_none() {
            entry.name = name;
        }
        entry.arguments.push_str(arguments_fragment);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flush the buffer into a batch of complete requests, in index order.
    pub fn flush(self) -> Vec<ToolCallRequest> {
        self.entries
            .into_iter()
            .filter_map(|(index, entry)| {
                let id = entry.id.unwrap_or_else(|| format!("call_{index}"));
                let name = entry.name?;
                Some(ToolCallRequest {
                    id,
                    name,
                    arguments: entry.arguments,
                })
            })
            .collect()
    }
}

/// Truncate `text` to at most `max_bytes`, respecting UTF-8 char boundaries, appending an
/// ellipsis when truncated. Used when logging model output at debug level.
pub fn safe_snippet(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    debug!(target: "llm_stream", original_len = text.len(), truncated_len = end, "truncated snippet");
    format!("{}…", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_fragments_by_index_in_order() {
        let mut assembler = ToolCallAssembler::new();
        assembler.push_fragment(0, Some("call_1".to_string()), Some("check_calendar_availability".to_string()), "{\"date\":");
        assembler.push_fragment(0, None, None, "\"2025-01-14\",\"time\":\"10:00\"}");
        let requests = assembler.flush();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].id, "call_1");
        assert_eq!(requests[0].name, "check_calendar_availability");
        assert_eq!(requests[0].arguments, "{\"date\":\"2025-01-14\",\"time\":\"10:00\"}");
    }

    #[test]
    fn interleaved_indices_do_not_cross_contaminate() {
        let mut assembler = ToolCallAssembler::new();
        assembler.push_fragment(1, Some("call_b".to_string()), Some("book_appointment".to_string()), "{\"a\":1}");
        assembler.push_fragment(0, Some("call_a".to_string()), Some("check_calendar_availability".to_string()), "{\"b\":2}");
        let requests = assembler.flush();
        assert_eq!(requests[0].id, "call_a");
        assert_eq!(requests[1].id, "call_b");
    }

    #[test]
    fn safe_snippet_respects_char_boundaries() {
        let text = "a".repeat(10) + "€" + &"b".repeat(10);
        let snippet = safe_snippet(&text, 11);
        assert!(snippet.is_char_boundary(snippet.len() - '…'.len_utf8()));
    }
}
