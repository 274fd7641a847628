//! Crate-wide error type. Sub-errors are composed in via `#[from]`, matching the donor's
//! one-enum-per-crate-boundary style; the orchestrator's top level always unwraps to this.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("malformed frame: {0}")]
    Protocol(String),
    #[error("stream not yet started; outbound audio dropped")]
    NotStarted,
}

#[derive(Error, Debug)]
pub enum SttError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("fatal stream error: {0}")]
    Fatal(String),
}

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("stream error: {0}")]
    StreamError(String),
    #[error("unparseable response: {0}")]
    UnparseableResponse(String),
}

#[derive(Error, Debug)]
pub enum TtsError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("audio frame read timed out")]
    ReadTimeout,
    #[error("stream error: {0}")]
    StreamError(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no agent configured for this phone number")]
    Missing,
    #[error("config fetch failed: {0}")]
    FetchFailed(String),
}

#[derive(Error, Debug)]
pub enum RagError {
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),
    #[error("search timed out")]
    SearchTimeout,
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("transport closed")]
    TransportClosed,
    #[error("malformed frame: {0}")]
    TransportProtocol(String),
    #[error("STT fatal error: {0}")]
    SttFatal(String),
    #[error("LLM step failed: {0}")]
    LlmStepFailed(String),
    #[error("TTS failed: {0}")]
    TtsFailed(String),
    #[error("tool failed: {0}")]
    ToolFailed(String),
    #[error("agent not configured")]
    ConfigMissing,
    #[error("config fetch failed: {0}")]
    ConfigFetchFailed(String),
    #[error("RAG failed: {0}")]
    RagFailed(String),
    #[error("telemetry failed: {0}")]
    TelemetryFailed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<TransportError> for OrchestratorError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => OrchestratorError::TransportClosed,
            TransportError::Protocol(msg) => OrchestratorError::TransportProtocol(msg),
            TransportError::NotStarted => {
                OrchestratorError::TransportProtocol("stream not started".to_string())
            }
        }
    }
}

impl From<SttError> for OrchestratorError {
    fn from(err: SttError) -> Self {
        match err {
            SttError::ConnectFailed(msg) | SttError::Fatal(msg) => {
                OrchestratorError::SttFatal(msg)
            }
        }
    }
}

impl From<LlmError> for OrchestratorError {
    fn from(err: LlmError) -> Self {
        OrchestratorError::LlmStepFailed(err.to_string())
    }
}

impl From<TtsError> for OrchestratorError {
    fn from(err: TtsError) -> Self {
        OrchestratorError::TtsFailed(err.to_string())
    }
}

impl From<ConfigError> for OrchestratorError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Missing => OrchestratorError::ConfigMissing,
            ConfigError::FetchFailed(msg) => OrchestratorError::ConfigFetchFailed(msg),
        }
    }
}

impl From<RagError> for OrchestratorError {
    fn from(err: RagError) -> Self {
        OrchestratorError::RagFailed(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
