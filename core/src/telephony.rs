//! Telephony media-stream protocol: inbound frame parsing, outbound frame construction.
//!
//! The transport itself (the actual WebSocket split sink) is owned by the process's HTTP
//! layer; this module only knows the wire shapes and serializes onto a single outbound
//! channel, so all emit operations are strictly ordered regardless of caller.

use crate::audio_codec;
use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

/// Raw wire shape of an inbound media-stream event.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum WireInbound {
    Connected,
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
    Media {
        media: WireMedia,
    },
    Mark {
        mark: WireMark,
    },
    Stop,
}

#[derive(Debug, Deserialize)]
struct WireMedia {
    payload: String,
}

#[derive(Debug, Deserialize)]
struct WireMark {
    name: String,
}

/// Parsed inbound telephony frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Connected,
    Started { stream_id: String },
    Media { pcm16: Vec<i16> },
    Mark { name: String },
    Stopped,
    Unknown,
}

/// Parse one inbound text frame. Malformed JSON or an unrecognized shape becomes
/// `Unknown`/a protocol error, never call-fatal — the caller drops the frame and continues.
pub fn parse_inbound(raw: &str) -> Result<InboundFrame, TransportError> {
    let wire: WireInbound = match serde_json::from_str(raw) {
        Ok(w) => w,
        Err(_) => return Ok(InboundFrame::Unknown),
    };

    Ok(match wire {
        WireInbound::Connected => InboundFrame::Connected,
        WireInbound::Start { stream_sid } => InboundFrame::Started {
            stream_id: stream_sid,
        },
        WireInbound::Media { media } => match audio_codec::decode(&media.payload) {
            Ok(pcm16) => InboundFrame::Media { pcm16 },
            Err(err) => return Err(TransportError::Protocol(err.to_string())),
        },
        WireInbound::Mark { mark } => InboundFrame::Mark { name: mark.name },
        WireInbound::Stop => InboundFrame::Stopped,
    })
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum WireOutbound<'a> {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        media: WireMediaOut,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        mark: WireMark,
    },
}

#[derive(Debug, Serialize)]
struct WireMediaOut {
    payload: String,
}

/// Per-call handle to the telephony media-stream socket. Outbound frames are serialized
/// onto a single channel consumed by the socket's writer task, so ordering is guaranteed
/// regardless of which task (orchestrator or speak pipeline) calls these methods.
pub struct TelephonyTransport {
    stream_id: RwLock<Option<String>>,
    outbound: mpsc::Sender<String>,
}

impl TelephonyTransport {
    pub fn new(outbound: mpsc::Sender<String>) -> Self {
        Self {
            stream_id: RwLock::new(None),
            outbound,
        }
    }

    pub async fn set_stream_id(&self, stream_id: String) {
        *self.stream_id.write().await = Some(stream_id);
    }

    pub async fn stream_id(&self) -> Option<String> {
        self.stream_id.read().await.clone()
    }

    /// Encode and emit one outbound audio frame. Dropped with a warning if `Started` has
    /// not yet been observed.
    pub async fn send_audio(&self, pcm16: &[i16]) -> Result<(), TransportError> {
        let Some(stream_id) = self.stream_id().await else {
            warn!(target: "telephony", "dropping outbound audio: stream not started");
            return Err(TransportError::NotStarted);
        };
        let payload = audio_codec::encode(pcm16);
        let frame = WireOutbound::Media {
            stream_sid: &stream_id,
            media: WireMediaOut { payload },
        };
        self.emit(&frame).await
    }

    /// Emit the barge-in clear-playback directive.
    pub async fn send_clear(&self) -> Result<(), TransportError> {
        let Some(stream_id) = self.stream_id().await else {
            return Err(TransportError::NotStarted);
        };
        let frame = WireOutbound::Clear {
            stream_sid: &stream_id,
        };
        self.emit(&frame).await
    }

    pub async fn send_mark(&self, name: impl Into<String>) -> Result<(), TransportError> {
        let Some(stream_id) = self.stream_id().await else {
            return Err(TransportError::NotStarted);
        };
        let frame = WireOutbound::Mark {
            stream_sid: &stream_id,
            mark: WireMark { name: name.into() },
        };
        self.emit(&frame).await
    }

    async fn emit(&self, frame: &WireOutbound<'_>) -> Result<(), TransportError> {
        let text = serde_json::to_string(frame)
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.outbound
            .send(text)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_event() {
        let raw = r#"{"event":"start","streamSid":"S1"}"#;
        assert_eq!(
            parse_inbound(raw).unwrap(),
            InboundFrame::Started {
                stream_id: "S1".to_string()
            }
        );
    }

    #[test]
    fn parses_media_event() {
        let payload = audio_codec::encode(&[0, 100, -100]);
        let raw = format!(r#"{{"event":"media","media":{{"payload":"{payload}"}}}}"#);
        match parse_inbound(&raw).unwrap() {
            InboundFrame::Media { pcm16 } => assert_eq!(pcm16.len(), 3),
            other => panic!("expected Media, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_json_is_unknown_not_error() {
        let raw = r#"{"event":"something_else"}"#;
        assert_eq!(parse_inbound(raw).unwrap(), InboundFrame::Unknown);
    }

    #[tokio::test]
    async fn audio_dropped_before_started() {
        let (tx, _rx) = mpsc::channel(4);
        let transport = TelephonyTransport::new(tx);
        let result = transport.send_audio(&[0, 1, 2]).await;
        assert!(matches!(result, Err(TransportError::NotStarted)));
    }

    #[tokio::test]
    async fn clear_emits_after_started() {
        let (tx, mut rx) = mpsc::channel(4);
        let transport = TelephonyTransport::new(tx);
        transport.set_stream_id("S1".to_string()).await;
        transport.send_clear().await.unwrap();
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("\"event\":\"clear\""));
        assert!(frame.contains("S1"));
    }
}
