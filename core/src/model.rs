//! Data model for a single call: configuration, conversation history, tool-call
//! reassembly, and the metrics accumulator emitted once at teardown.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Call direction as supplied by the telephony webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Who (or what) answered an outbound call, per the telephony provider's AMD result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnsweredBy {
    Human,
    Machine,
    Unknown,
}

impl AnsweredBy {
    /// Parse the provider's free-form AMD string (`human`, `machine_start`, `machine_end_beep`, ...).
    pub fn from_provider_str(raw: &str) -> Self {
        let raw = raw.to_ascii_lowercase();
        if raw.starts_with("machine") {
            AnsweredBy::Machine
        } else if raw.starts_with("human") {
            AnsweredBy::Human
        } else {
            AnsweredBy::Unknown
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallContext {
    pub direction: CallDirection,
    pub answered_by: AnsweredBy,
    pub customer_name: Option<String>,
}

/// Resolved once per call at setup and immutable for the call's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: String,
    pub tenant_id: String,
    pub system_prompt: String,
    pub voice_id: String,
    pub phone_number: Option<String>,
    pub call_context: CallContext,
}

/// One message in the running conversation. `tool_calls` is only set on assistant
/// messages that requested tool invocations; `tool_call_id` only on `tool` responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    pub fn tool_response(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Ordered, append-only conversation. The first entry is always the system prompt.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Build the per-turn message list: system prompt, an optional RAG overlay, then the
    /// remaining history. RAG context is never written back into `self`.
    pub fn turn_messages(&self, rag_context: Option<&str>) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        let mut iter = self.messages.iter();
        if let Some(system) = iter.next() {
            out.push(system.clone());
        }
        if let Some(context) = rag_context.filter(|c| !c.is_empty()) {
            out.push(Message::system(format!(
                "Use the following context to answer if relevant:\n{context}"
            )));
        }
        out.extend(iter.cloned());
        out
    }
}

/// A tool call requested by the model during an LLM step, reassembled from streamed
/// fragments by `index` before being surfaced as a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Per-call usage and outcome accumulator, emitted exactly once at teardown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallMetrics {
    pub call_id: String,
    pub tenant_id: String,
    pub agent_id: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    pub duration_seconds: Option<f64>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub tts_characters: u64,
    pub status: CallStatus,
    pub end_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Completed,
    Failed,
}

impl CallMetrics {
    pub fn new(call_id: String, tenant_id: String, agent_id: String) -> Self {
        Self {
            call_id,
            tenant_id,
            agent_id,
            start_time: chrono::Utc::now(),
            end_time: None,
            duration_seconds: None,
            input_tokens: 0,
            output_tokens: 0,
            tts_characters: 0,
            status: CallStatus::Completed,
            end_reason: None,
        }
    }

    pub fn record_usage(&mut self, input_tokens: u64, output_tokens: u64) {
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
    }

    pub fn finish(&mut self, status: CallStatus, end_reason: Option<String>) {
        let end_time = chrono::Utc::now();
        self.duration_seconds = Some((end_time - self.start_time).num_milliseconds() as f64 / 1000.0);
        self.end_time = Some(end_time);
        self.status = status;
        self.end_reason = end_reason;
    }
}

/// A single-shot barge-in signal. Raised by STT voice-activity-start, observed by the
/// in-flight speak pipeline, and reset at the start of every new turn.
#[derive(Debug, Clone, Default)]
pub struct InterruptToken {
    flag: Arc<AtomicBool>,
}

impl InterruptToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn raise(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Reset at the start of every new turn.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rag_overlay_never_enters_persisted_history() {
        let mut history = ConversationHistory::new("You are Ada.");
        history.push(Message::user("What are your hours?"));

        let turn = history.turn_messages(Some("store hours: 9-5"));
        assert_eq!(turn.len(), 3);
        assert!(turn[1].content.as_deref().unwrap().contains("store hours"));

        // The overlay must not have been written back into history.
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn interrupt_token_resets() {
        let token = InterruptToken::new();
        assert!(!token.is_raised());
        token.raise();
        assert!(token.is_raised());
        token.reset();
        assert!(!token.is_raised());
    }

    #[test]
    fn answered_by_parses_machine_variants() {
        assert_eq!(AnsweredBy::from_provider_str("machine_start"), AnsweredBy::Machine);
        assert_eq!(AnsweredBy::from_provider_str("human"), AnsweredBy::Human);
        assert_eq!(AnsweredBy::from_provider_str("fax"), AnsweredBy::Unknown);
    }
}
