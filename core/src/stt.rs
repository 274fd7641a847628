//! Streaming speech-to-text client: one connection per call, linear PCM16 8kHz upstream,
//! partial/final transcripts and voice-activity-start events downstream.
//!
//! Connection and message-parsing shape follow a Deepgram-style streaming protocol:
//! query-string options select the model and enable interim results and VAD events;
//! server messages are a tagged JSON variant parsed off a spawned receive loop and
//! forwarded to the orchestrator over a bounded channel, matching the split-sink /
//! spawned-receive-loop client shape used throughout this codebase's streaming clients.

use crate::config::SttConfig;
use crate::error::SttError;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, Message>;

/// Event surfaced to the orchestrator. Transcript suppression of empty text and the
/// once-per-utterance gating on speech-start both happen before this type is constructed.
#[derive(Debug, Clone)]
pub enum SttEvent {
    Transcript { text: String, is_final: bool },
    SpeechStart,
    Closed,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ServerEvent {
    Results {
        channel: ResultsChannel,
        is_final: bool,
    },
    #[serde(rename = "SpeechStarted")]
    SpeechStarted,
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ResultsChannel {
    alternatives: Vec<ResultsAlternative>,
}

#[derive(Debug, Deserialize)]
struct ResultsAlternative {
    transcript: String,
}

pub struct SttStream {
    sink: Arc<Mutex<WsSink>>,
    speaking: Arc<AtomicBool>,
}

impl SttStream {
    pub async fn connect(
        config: &SttConfig,
        events: mpsc::Sender<SttEvent>,
    ) -> Result<Self, SttError> {
        let mut url = url::Url::parse(&config.ws_url)
            .map_err(|e| SttError::ConnectFailed(e.to_string()))?;
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("model", &config.model);
            qp.append_pair("language", &config.language);
            qp.append_pair("smart_format", "true");
            qp.append_pair("encoding", "linear16");
            qp.append_pair("channels", "1");
            qp.append_pair("sample_rate", &config.sample_rate.to_string());
            qp.append_pair("interim_results", "true");
            qp.append_pair("vad_events", "true");
            qp.append_pair("endpointing", &config.endpointing_ms.to_string());
        }

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| SttError::ConnectFailed(e.to_string()))?;
        if let Some(api_key) = &config.api_key {
            let value = HeaderValue::from_str(&format!("Token {api_key}"))
                .map_err(|e| SttError::ConnectFailed(e.to_string()))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (ws, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| SttError::ConnectFailed(e.to_string()))?;
        let (sink, stream) = ws.split();
        let sink = Arc::new(Mutex::new(sink));
        let speaking = Arc::new(AtomicBool::new(false));

        tokio::spawn(receive_loop(stream, events, speaking.clone()));

        Ok(Self { sink, speaking })
    }

    /// Forward one PCM16 frame upstream as a binary message.
    pub async fn send_audio(&self, pcm16: &[i16]) -> Result<(), SttError> {
        let mut bytes = Vec::with_capacity(pcm16.len() * 2);
        for sample in pcm16 {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        self.sink
            .lock()
            .await
            .send(Message::Binary(bytes))
            .await
            .map_err(|e| SttError::Fatal(e.to_string()))
    }

    /// Flush and close the connection.
    pub async fn finish(&self) -> Result<(), SttError> {
        self.sink
            .lock()
            .await
            .send(Message::Text(r#"{"type":"CloseStream"}"#.to_string()))
            .await
            .map_err(|e| SttError::Fatal(e.to_string()))
    }
}

async fn receive_loop(
    mut stream: futures_util::stream::SplitStream<WsStream>,
    events: mpsc::Sender<SttEvent>,
    speaking: Arc<AtomicBool>,
) {
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(err) => {
                warn!(target: "stt", %err, "stt socket error");
                break;
            }
        };
        let Message::Text(text) = msg else { continue };
        let parsed: ServerEvent = match serde_json::from_str(&text) {
            Ok(p) => p,
            Err(_) => continue,
        };

        match parsed {
            ServerEvent::Results { channel, is_final } => {
                let Some(alt) = channel.alternatives.into_iter().next() else {
                    continue;
                };
                if alt.transcript.is_empty() {
                    continue;
                }
                if is_final {
                    // A new utterance boundary; the next speech-start may be reported again.
                    speaking.store(false, Ordering::SeqCst);
                }
                debug!(target: "stt", is_final, "transcript received");
                let _ = events
                    .send(SttEvent::Transcript {
                        text: alt.transcript,
                        is_final,
                    })
                    .await;
            }
            ServerEvent::SpeechStarted => {
                // Only the first detection within an utterance is surfaced.
                if !speaking.swap(true, Ordering::SeqCst) {
                    let _ = events.send(SttEvent::SpeechStart).await;
                }
            }
            ServerEvent::Other => {}
        }
    }
    let _ = events.send(SttEvent::Closed).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_transcript_alternative_has_no_alternatives_edge_case() {
        // ResultsChannel with an empty alternatives vec must not panic the receive loop;
        // covered structurally since `.next()` on an empty vec yields None and is skipped.
        let channel = ResultsChannel {
            alternatives: vec![],
        };
        assert!(channel.alternatives.into_iter().next().is_none());
    }
}
