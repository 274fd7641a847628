//! Process configuration: per-subsystem structs with env-var-driven defaults, optionally
//! overlaid by a TOML file. Mirrors the donor's `VoiceAgentConfig` / `*Toml` overlay idiom.

use serde::Deserialize;
use std::path::Path;

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_opt_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct SttConfig {
    pub api_key: Option<String>,
    pub ws_url: String,
    pub model: String,
    pub language: String,
    pub sample_rate: u32,
    pub endpointing_ms: u32,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            api_key: env_opt_string("DEEPGRAM_API_KEY"),
            ws_url: env_string(
                "STT_WS_URL",
                "wss://api.deepgram.com/v1/listen",
            ),
            model: env_string("STT_MODEL", "nova-2"),
            language: env_string("STT_LANGUAGE", "en-US"),
            sample_rate: env_parsed("STT_SAMPLE_RATE", 8000),
            endpointing_ms: env_parsed("STT_ENDPOINTING_MS", 300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_output_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: env_opt_string("OPENAI_API_KEY"),
            base_url: env_string("LLM_BASE_URL", "https://api.openai.com/v1"),
            model: env_string("LLM_MODEL", "gpt-4o"),
            max_output_tokens: env_parsed("LLM_MAX_OUTPUT_TOKENS", 250),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub api_key: Option<String>,
    pub ws_url_template: String,
    pub model_id: String,
    pub output_format: String,
    pub read_timeout_ms: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: env_opt_string("ELEVENLABS_API_KEY"),
            ws_url_template: env_string(
                "TTS_WS_URL_TEMPLATE",
                "wss://api.elevenlabs.io/v1/text-to-speech/{voice_id}/stream-input",
            ),
            model_id: env_string("TTS_MODEL_ID", "eleven_turbo_v2_5"),
            output_format: env_string("TTS_OUTPUT_FORMAT", "pcm_8000"),
            read_timeout_ms: env_parsed("TTS_READ_TIMEOUT_MS", 10_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub config_ttl_seconds: u64,
    pub rag_embedding_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: env_string("REDIS_URL", "redis://127.0.0.1:6379"),
            config_ttl_seconds: env_parsed("CONFIG_CACHE_TTL_SECONDS", 300),
            rag_embedding_ttl_seconds: env_parsed("RAG_EMBEDDING_TTL_SECONDS", 86_400),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RagConfig {
    pub vector_store_url: String,
    pub collection_name: String,
    pub embedding_api_key: Option<String>,
    pub similarity_threshold: f32,
    pub top_k: usize,
    pub search_timeout_ms: u64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            vector_store_url: env_string("QDRANT_URL", "http://127.0.0.1:6333"),
            collection_name: env_string("QDRANT_COLLECTION_NAME", "agent_knowledge"),
            embedding_api_key: env_opt_string("OPENAI_API_KEY"),
            similarity_threshold: env_parsed("RAG_SIMILARITY_THRESHOLD", 0.45),
            top_k: env_parsed("RAG_TOP_K", 3),
            search_timeout_ms: env_parsed("RAG_SEARCH_TIMEOUT_MS", 1_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManagementApiConfig {
    pub base_url: String,
    pub shared_secret: String,
    pub timeout_ms: u64,
}

impl Default for ManagementApiConfig {
    fn default() -> Self {
        Self {
            base_url: env_string("MANAGEMENT_API_BASE_URL", "http://127.0.0.1:8000"),
            shared_secret: env_string("MANAGEMENT_API_SHARED_SECRET", ""),
            timeout_ms: env_parsed("MANAGEMENT_API_TIMEOUT_MS", 2_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub redis_url: String,
    pub stream_key: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            redis_url: env_string("TELEMETRY_REDIS_URL", "redis://127.0.0.1:6379"),
            stream_key: env_string("TELEMETRY_STREAM_KEY", "call_events"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelephonyConfig {
    pub listen_port: u16,
    pub public_host: String,
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            listen_port: env_parsed("PORT", 8080),
            public_host: env_string("PUBLIC_HOST", "localhost:8080"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub stt: SttConfig,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    pub cache: CacheConfig,
    pub rag: RagConfig,
    pub management_api: ManagementApiConfig,
    pub telemetry: TelemetryConfig,
    pub telephony: TelephonyConfig,
}

impl OrchestratorConfig {
    /// Build the env-default configuration, then overlay an optional TOML file whose path
    /// is given by `VOICE_ORCHESTRATOR_CONFIG` (default `voice_orchestrator.toml`).
    pub fn load() -> Self {
        let mut config = Self::default();
        let path = env_string("VOICE_ORCHESTRATOR_CONFIG", "voice_orchestrator.toml");
        if Path::new(&path).exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<OrchestratorConfigToml>(&contents) {
                    Ok(overlay) => overlay.apply(&mut config),
                    Err(err) => {
                        tracing::warn!(target: "config", %path, %err, "failed to parse config overlay, using env defaults");
                    }
                },
                Err(err) => {
                    tracing::warn!(target: "config", %path, %err, "failed to read config overlay, using env defaults");
                }
            }
        }
        config
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct OrchestratorConfigToml {
    pub llm_model: Option<String>,
    pub llm_max_output_tokens: Option<u32>,
    pub stt_model: Option<String>,
    pub tts_model_id: Option<String>,
    pub rag_similarity_threshold: Option<f32>,
    pub rag_top_k: Option<usize>,
    pub listen_port: Option<u16>,
}

impl OrchestratorConfigToml {
    fn apply(&self, config: &mut OrchestratorConfig) {
        if let Some(v) = &self.llm_model {
            config.llm.model = v.clone();
        }
        if let Some(v) = self.llm_max_output_tokens {
            config.llm.max_output_tokens = v;
        }
        if let Some(v) = &self.stt_model {
            config.stt.model = v.clone();
        }
        if let Some(v) = &self.tts_model_id {
            config.tts.model_id = v.clone();
        }
        if let Some(v) = self.rag_similarity_threshold {
            config.rag.similarity_threshold = v;
        }
        if let Some(v) = self.rag_top_k {
            config.rag.top_k = v;
        }
        if let Some(v) = self.listen_port {
            config.telephony.listen_port = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_source_constants() {
        let llm = LlmConfig::default();
        assert_eq!(llm.max_output_tokens, 250);

        let stt = SttConfig::default();
        assert_eq!(stt.model, "nova-2");
        assert_eq!(stt.endpointing_ms, 300);

        let tts = TtsConfig::default();
        assert_eq!(tts.model_id, "eleven_turbo_v2_5");
        assert_eq!(tts.read_timeout_ms, 10_000);

        let cache = CacheConfig::default();
        assert_eq!(cache.config_ttl_seconds, 300);
        assert_eq!(cache.rag_embedding_ttl_seconds, 86_400);

        let rag = RagConfig::default();
        assert!((rag.similarity_threshold - 0.45).abs() < f32::EPSILON);
        assert_eq!(rag.top_k, 3);
    }
}
