use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use voice_stream_core::cache::Cache;
use voice_stream_core::config_resolver::ConfigResolver;
use voice_stream_core::llm_stream::LlmStream;
use voice_stream_core::rag::RagRetriever;
use voice_stream_core::routes::{self, AppState};
use voice_stream_core::telemetry_emitter::TelemetryEmitter;
use voice_stream_core::tools::{book_appointment_tool, check_calendar_availability_tool, ToolRegistry};
use voice_stream_core::OrchestratorConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,voice_stream_core=info,voice_orchestrator=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(target: "voice_orchestrator", "starting voice stream orchestrator");

    let config = Arc::new(OrchestratorConfig::load());

    let config_cache = Cache::connect(&config.cache.redis_url).await.map_err(|err| {
        error!(target: "voice_orchestrator", %err, "failed to connect to cache, refusing to start");
        err
    })?;
    let rag_cache = Cache::connect(&config.cache.redis_url).await?;
    let telemetry = Arc::new(
        TelemetryEmitter::connect(&config.telemetry)
            .await
            .map_err(|err| {
                error!(target: "voice_orchestrator", %err, "failed to connect telemetry stream, refusing to start");
                err
            })?,
    );

    let config_resolver = Arc::new(ConfigResolver::new(
        config_cache,
        config.management_api.clone(),
        &config.cache,
    ));
    let llm = Arc::new(LlmStream::new(config.llm.clone()));
    let rag = if config.rag.embedding_api_key.is_some() {
        Some(Arc::new(RagRetriever::new(rag_cache, config.rag.clone())))
    } else {
        warn!(target: "voice_orchestrator", "no embedding API key configured, RAG retrieval disabled");
        None
    };

    let tool_registry = Arc::new(ToolRegistry::new());
    tool_registry.register(check_calendar_availability_tool());
    tool_registry.register(book_appointment_tool());

    let state = AppState {
        config: config.clone(),
        llm,
        tool_registry,
        rag,
        config_resolver,
        telemetry,
    };

    let app = routes::router(state);
    let addr = format!("0.0.0.0:{}", config.telephony.listen_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(target: "voice_orchestrator", %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(target: "voice_orchestrator", "shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    info!(target: "voice_orchestrator", "received shutdown signal, draining in-flight calls");
}
