//! Bidirectional streaming text-to-speech client: one socket per invocation, one
//! invocation per turn. Text chunks are forwarded to the provider as they arrive from the
//! LLM — never batched to a sentence boundary, since latency dominates voice quality here.
//!
//! The socket is split into sink/stream halves at connect time, the same shape used by the
//! STT client: text keeps flowing out while audio keeps flowing in, so the first frame can
//! reach the transport long before the last chunk of text has been sent.

use crate::config::TtsConfig;
use crate::error::TtsError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsRead = SplitStream<WsStream>;

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: 0.5,
            similarity_boost: 0.7,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IncomingFrame {
    audio: Option<String>,
    #[serde(rename = "isFinal")]
    is_final: Option<bool>,
}

/// A single TTS invocation's socket, consumed by exactly one turn.
pub struct TtsStream {
    sink: WsSink,
    stream: WsRead,
    read_timeout: Duration,
}

impl TtsStream {
    pub async fn connect(config: &TtsConfig, voice_id: &str) -> Result<Self, TtsError> {
        let url = config
            .ws_url_template
            .replace("{voice_id}", voice_id)
            + &format!(
                "?model_id={}&output_format={}",
                config.model_id, config.output_format
            );

        let (socket, _response) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| TtsError::ConnectFailed(e.to_string()))?;
        let (mut sink, stream) = socket.split();

        let init = json!({
            "text": " ",
            "voice_settings": VoiceSettings::default(),
            "xi_api_key": config.api_key,
        });
        sink.send(WsMessage::Text(init.to_string()))
            .await
            .map_err(|e| TtsError::ConnectFailed(e.to_string()))?;

        Ok(Self {
            sink,
            stream,
            read_timeout: Duration::from_millis(config.read_timeout_ms),
        })
    }

    /// Forward one text chunk, with the trailing space the provider's protocol requires
    /// between chunks to preserve word boundaries across the stream.
    pub async fn send_text_chunk(&mut self, chunk: &str) -> Result<(), TtsError> {
        send_chunk(&mut self.sink, chunk).await
    }

    /// Signal end of input text; the provider flushes remaining audio and closes.
    pub async fn finish_input(&mut self) -> Result<(), TtsError> {
        send_eos(&mut self.sink).await
    }

    /// Receive the next decoded PCM16 audio frame, or `None` at end of stream. A read that
    /// exceeds the configured timeout aborts the stream.
    pub async fn recv_audio_frame(&mut self) -> Result<Option<Vec<i16>>, TtsError> {
        recv_frame(&mut self.stream, self.read_timeout).await
    }

    /// Pump text chunks from `text_rx` out over the sink while concurrently draining
    /// decoded audio frames off the stream and forwarding them to `audio_tx`. The two
    /// halves run side by side rather than one after the other, so audio produced from the
    /// first text chunk can reach `audio_tx` while later chunks are still arriving from the
    /// LLM.
    pub async fn run(
        self,
        mut text_rx: mpsc::Receiver<String>,
        audio_tx: mpsc::Sender<Vec<i16>>,
    ) -> Result<(), TtsError> {
        let TtsStream {
            mut sink,
            mut stream,
            read_timeout,
        } = self;

        let send_side = async move {
            while let Some(chunk) = text_rx.recv().await {
                send_chunk(&mut sink, &chunk).await?;
            }
            send_eos(&mut sink).await
        };

        let recv_side = async move {
            while let Some(frame) = recv_frame(&mut stream, read_timeout).await? {
                if audio_tx.send(frame).await.is_err() {
                    warn!(target: "tts", "audio consumer dropped before stream ended");
                    break;
                }
            }
            Ok(())
        };

        let (send_result, recv_result): (Result<(), TtsError>, Result<(), TtsError>) =
            tokio::join!(send_side, recv_side);
        send_result?;
        recv_result
    }
}

async fn send_chunk(sink: &mut WsSink, chunk: &str) -> Result<(), TtsError> {
    let body = json!({"text": format!("{chunk} ")});
    sink.send(WsMessage::Text(body.to_string()))
        .await
        .map_err(|e| TtsError::StreamError(e.to_string()))
}

async fn send_eos(sink: &mut WsSink) -> Result<(), TtsError> {
    let eos = json!({"text": ""});
    sink.send(WsMessage::Text(eos.to_string()))
        .await
        .map_err(|e| TtsError::StreamError(e.to_string()))
}

async fn recv_frame(stream: &mut WsRead, read_timeout: Duration) -> Result<Option<Vec<i16>>, TtsError> {
    loop {
        let next = timeout(read_timeout, stream.next())
            .await
            .map_err(|_| TtsError::ReadTimeout)?;
        let Some(msg) = next else { return Ok(None) };
        let msg = msg.map_err(|e| TtsError::StreamError(e.to_string()))?;

        let WsMessage::Text(text) = msg else { continue };
        let frame: IncomingFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(_) => continue,
        };

        if let Some(audio_b64) = frame.audio.filter(|a| !a.is_empty()) {
            let bytes = STANDARD
                .decode(audio_b64)
                .map_err(|e| TtsError::StreamError(e.to_string()))?;
            let pcm16: Vec<i16> = bytes
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect();
            return Ok(Some(pcm16));
        }

        if frame.is_final.unwrap_or(false) {
            debug!(target: "tts", "tts stream reported final frame");
            return Ok(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_voice_settings_match_source() {
        let settings = VoiceSettings::default();
        assert!((settings.stability - 0.5).abs() < f32::EPSILON);
        assert!((settings.similarity_boost - 0.7).abs() < f32::EPSILON);
    }
}
