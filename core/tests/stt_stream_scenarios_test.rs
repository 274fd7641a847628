//! Integration coverage for SttStream against a real (local) WebSocket server, standing in
//! for a Deepgram-style endpoint. Exercises the wire parsing and the once-per-utterance
//! speech-start gating end to end, rather than against hand-built `ServerEvent` values.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use voice_stream_core::config::SttConfig;
use voice_stream_core::stt::{SttEvent, SttStream};

async fn fake_stt_server(listener: TcpListener, script: Vec<&'static str>) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
    for message in script {
        ws.send(Message::Text(message.to_string())).await.unwrap();
    }
    // Drain whatever the client sends (binary audio frames, CloseStream) until it hangs up.
    while ws.next().await.is_some() {}
}

fn test_config(port: u16) -> SttConfig {
    SttConfig {
        api_key: None,
        ws_url: format!("ws://127.0.0.1:{port}"),
        model: "nova-2".to_string(),
        language: "en-US".to_string(),
        sample_rate: 8000,
        endpointing_ms: 300,
    }
}

#[tokio::test]
async fn speech_start_then_final_transcript_arrive_in_order() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let script = vec![
        r#"{"type":"SpeechStarted"}"#,
        // A duplicate SpeechStarted within the same utterance must be suppressed.
        r#"{"type":"SpeechStarted"}"#,
        r#"{"type":"Results","is_final":true,"channel":{"alternatives":[{"transcript":"book an appointment"}]}}"#,
    ];
    tokio::spawn(fake_stt_server(listener, script));

    let (tx, mut rx) = mpsc::channel(16);
    let stt = SttStream::connect(&test_config(port), tx).await.unwrap();

    let first = rx.recv().await.unwrap();
    assert!(matches!(first, SttEvent::SpeechStart));

    let second = rx.recv().await.unwrap();
    match second {
        SttEvent::Transcript { text, is_final } => {
            assert_eq!(text, "book an appointment");
            assert!(is_final);
        }
        other => panic!("expected final transcript, got {other:?}"),
    }

    // The server closes after its script; the stream must surface that as Closed.
    let third = rx.recv().await.unwrap();
    assert!(matches!(third, SttEvent::Closed));

    stt.finish().await.ok();
}

#[tokio::test]
async fn interim_transcripts_are_forwarded_but_not_gated() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let script = vec![
        r#"{"type":"Results","is_final":false,"channel":{"alternatives":[{"transcript":"book an"}]}}"#,
        r#"{"type":"Results","is_final":false,"channel":{"alternatives":[{"transcript":"book an appoint"}]}}"#,
    ];
    tokio::spawn(fake_stt_server(listener, script));

    let (tx, mut rx) = mpsc::channel(16);
    let _stt = SttStream::connect(&test_config(port), tx).await.unwrap();

    for expected in ["book an", "book an appoint"] {
        match rx.recv().await.unwrap() {
            SttEvent::Transcript { text, is_final } => {
                assert_eq!(text, expected);
                assert!(!is_final);
            }
            other => panic!("expected interim transcript, got {other:?}"),
        }
    }
}
