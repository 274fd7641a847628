//! HTTP + WebSocket front door: the telephony webhook, the media-stream socket, and the
//! health check. Kept separate from `bin/voice_orchestrator.rs` so the router itself can be
//! exercised without a running process.

use crate::config::OrchestratorConfig;
use crate::config_resolver::ConfigResolver;
use crate::error::OrchestratorError;
use crate::llm_stream::LlmStream;
use crate::model::CallDirection;
use crate::orchestrator::{CallDependencies, Orchestrator};
use crate::rag::RagRetriever;
use crate::telemetry_emitter::TelemetryEmitter;
use crate::telephony::{parse_inbound, InboundFrame, TelephonyTransport};
use crate::tools::ToolRegistry;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Form, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<OrchestratorConfig>,
    pub llm: Arc<LlmStream>,
    pub tool_registry: Arc<ToolRegistry>,
    pub rag: Option<Arc<RagRetriever>>,
    pub config_resolver: Arc<ConfigResolver>,
    pub telemetry: Arc<TelemetryEmitter>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook/voice", post(voice_webhook))
        .route("/api/v1/voice/stream", get(voice_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, axum::Json(json!({"status": "ok"})))
}

#[derive(Debug, Deserialize)]
struct WebhookQuery {
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    customer_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookForm {
    #[serde(rename = "AnsweredBy", default)]
    answered_by: Option<String>,
    #[serde(rename = "To", default)]
    to: Option<String>,
    #[serde(rename = "From", default)]
    from: Option<String>,
}

/// `POST /webhook/voice` — telephony call-initiation webhook. Responds with a
/// `<Connect><Stream .../></Connect>` document pointing the media stream back at
/// `/api/v1/voice/stream`, carrying direction/answered_by/customer_name/phone_number as
/// query parameters the way the media-stream socket expects them.
async fn voice_webhook(
    State(_state): State<AppState>,
    headers: axum::http::HeaderMap,
    Query(query): Query<WebhookQuery>,
    Form(form): Form<WebhookForm>,
) -> impl IntoResponse {
    let direction = query.direction.unwrap_or_else(|| "inbound".to_string());
    // The agent's own DID identifies which AgentConfig applies: for an inbound call that's
    // the number the caller dialed (`To`); for an outbound call it's the number we dialed
    // from (`From`), since `To` is the customer's number in that direction.
    let phone_number = if direction == "outbound" {
        form.from.unwrap_or_default()
    } else {
        form.to.unwrap_or_default()
    };
    let answered_by = form.answered_by.unwrap_or_default();
    let customer_name = query.customer_name.unwrap_or_default();

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");

    let mut stream_url = url::Url::parse(&format!("wss://{host}/api/v1/voice/stream"))
        .expect("static scheme/host always parses");
    {
        let mut qp = stream_url.query_pairs_mut();
        qp.append_pair("direction", &direction);
        qp.append_pair("answered_by", &answered_by);
        qp.append_pair("customer_name", &customer_name);
        qp.append_pair("phone_number", &phone_number);
    }

    let twiml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response><Connect><Stream url=\"{stream_url}\"/></Connect></Response>"
    );

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xml")],
        twiml,
    )
}

#[derive(Debug, Deserialize)]
struct StreamParams {
    #[serde(default = "default_direction")]
    direction: CallDirection,
    #[serde(default)]
    answered_by: String,
    #[serde(default)]
    customer_name: Option<String>,
    #[serde(default)]
    phone_number: String,
}

fn default_direction() -> CallDirection {
    CallDirection::Inbound
}

async fn voice_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream(socket, state, params))
}

async fn handle_stream(socket: WebSocket, state: AppState, params: StreamParams) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (outbound_tx, outbound_rx) = mpsc::channel::<String>(64);
    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundFrame>(256);
    let reader = tokio::spawn(async move {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => match parse_inbound(&text) {
                    Ok(frame) => {
                        if inbound_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(target: "routes", %err, "dropping malformed telephony frame");
                    }
                },
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    let transport = Arc::new(TelephonyTransport::new(outbound_tx));
    let deps = CallDependencies {
        transport,
        llm: state.llm.clone(),
        tool_registry: state.tool_registry.clone(),
        rag: state.rag.clone(),
        config_resolver: state.config_resolver.clone(),
        telemetry: state.telemetry.clone(),
    };

    match Orchestrator::setup(
        state.config.clone(),
        deps,
        &params.phone_number,
        params.direction,
        &params.answered_by,
        params.customer_name,
    )
    .await
    {
        Ok(orchestrator) => {
            let writer = tokio::spawn(async move {
                let mut outbound_rx = outbound_rx;
                while let Some(text) = outbound_rx.recv().await {
                    if ws_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            let call_id = orchestrator.call_id().to_string();
            info!(target: "routes", %call_id, "call setup complete, entering turn loop");
            if let Err(err) = orchestrator.run(inbound_rx).await {
                warn!(target: "routes", %call_id, %err, "call ended with error");
            }
            writer.abort();
        }
        Err(err) => {
            let reason = match &err {
                OrchestratorError::ConfigMissing => "Agent not configured",
                _ => "call setup failed",
            };
            warn!(target: "routes", %err, "call setup failed, closing socket");
            let _ = ws_tx
                .send(Message::Close(Some(CloseFrame {
                    // 1011: server terminating the connection due to an unexpected condition.
                    code: 1011,
                    reason: reason.into(),
                })))
                .await;
        }
    }

    reader.abort();
}
