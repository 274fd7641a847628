//! Appends call telemetry to a shared ordered stream. Emission is best-effort: a failure
//! is logged and never propagated to the orchestrator.

use crate::config::TelemetryConfig;
use crate::model::CallMetrics;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::json;
use tracing::warn;

pub struct TelemetryEmitter {
    conn: ConnectionManager,
    stream_key: String,
}

impl TelemetryEmitter {
    pub async fn connect(config: &TelemetryConfig) -> redis::RedisResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            stream_key: config.stream_key.clone(),
        })
    }

    pub async fn emit_call_ended(&self, metrics: &CallMetrics) {
        let mut payload = match serde_json::to_value(metrics) {
            Ok(v) => v,
            Err(err) => {
                warn!(target: "telemetry", %err, "failed to serialize call metrics");
                return;
            }
        };
        payload["event"] = json!("call_ended");
        payload["timestamp"] = json!(chrono::Utc::now().to_rfc3339());
        self.append(&payload).await;
    }

    pub async fn emit_transcript(&self, call_id: &str, role: &str, content: &str) {
        let payload = json!({
            "event": "transcript",
            "call_id": call_id,
            "role": role,
            "content": content,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.append(&payload).await;
    }

    async fn append(&self, payload: &serde_json::Value) {
        let Some(fields) = payload.as_object() else {
            return;
        };
        let kv: Vec<(String, String)> = fields
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect();

        let result: redis::RedisResult<String> = self
            .conn
            .clone()
            .xadd(&self.stream_key, "*", &kv)
            .await;
        if let Err(err) = result {
            warn!(target: "telemetry", %err, "telemetry emission failed");
        }
    }
}
