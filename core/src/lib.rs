// Voice Stream Orchestrator - core runtime
// Per-call state machine mediating telephony, STT, LLM, TTS, tools, and RAG.

pub mod audio_codec;
pub mod cache;
pub mod config;
pub mod config_resolver;
pub mod error;
pub mod llm_stream;
pub mod model;
pub mod orchestrator;
pub mod rag;
pub mod redact;
pub mod routes;
pub mod stt;
pub mod telemetry_emitter;
pub mod telephony;
pub mod tools;
pub mod tts;

pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, Result};
pub use model::{AgentConfig, CallMetrics, ConversationHistory, InterruptToken, ToolCallRequest};
pub use orchestrator::{CallDependencies, Orchestrator};
pub use routes::AppState;
pub use tools::ToolRegistry;
