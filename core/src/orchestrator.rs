//! The per-call state machine: Setup -> Idle -> Speaking (barge-in capable) -> ToolLoop ->
//! Idle -> ... -> Teardown. Wires every other module together; owns ConversationHistory,
//! CallMetrics, and the InterruptToken for the call's lifetime.

use crate::config::OrchestratorConfig;
use crate::config_resolver::ConfigResolver;
use crate::error::{OrchestratorError, Result};
use crate::llm_stream::{LlmStream, LlmStreamEvent, ToolCallAssembler};
use crate::model::{
    AgentConfig, AnsweredBy, CallContext, CallDirection, CallMetrics, CallStatus,
    ConversationHistory, InterruptToken, Message,
};
use crate::rag::RagRetriever;
use crate::redact;
use crate::stt::{SttEvent, SttStream};
use crate::telemetry_emitter::TelemetryEmitter;
use crate::telephony::{InboundFrame, TelephonyTransport};
use crate::tools::ToolRegistry;
use crate::tts::TtsStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Tool-loop depth bound: after this many LLM steps in one turn, the orchestrator stops
/// even if the model would call another tool.
const MAX_LLM_STEPS_PER_TURN: u32 = 3;

pub struct CallDependencies {
    pub transport: Arc<TelephonyTransport>,
    pub llm: Arc<LlmStream>,
    pub tool_registry: Arc<ToolRegistry>,
    pub rag: Option<Arc<RagRetriever>>,
    pub config_resolver: Arc<ConfigResolver>,
    pub telemetry: Arc<TelemetryEmitter>,
}

pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    deps: CallDependencies,
    agent_config: AgentConfig,
    call_id: String,
    history: ConversationHistory,
    metrics: CallMetrics,
    interrupt: InterruptToken,
    stt: SttStream,
    stt_events: mpsc::Receiver<SttEvent>,
    is_ai_speaking: bool,
    call_stopped: bool,
}

impl Orchestrator {
    /// Setup: resolve AgentConfig, open STT, generate `call_id`. On any failure here the
    /// call never reaches the turn loop and no telemetry is emitted.
    pub async fn setup(
        config: Arc<OrchestratorConfig>,
        deps: CallDependencies,
        phone_number: &str,
        direction: CallDirection,
        answered_by_raw: &str,
        customer_name: Option<String>,
    ) -> Result<Self> {
        let agent_config = deps
            .config_resolver
            .resolve(phone_number)
            .await
            .map_err(OrchestratorError::from)?;

        let (stt_tx, stt_events) = mpsc::channel(256);
        let stt = SttStream::connect(&config.stt, stt_tx)
            .await
            .map_err(OrchestratorError::from)?;

        let call_id = uuid::Uuid::new_v4().to_string();
        let history = ConversationHistory::new(agent_config.system_prompt.clone());
        let metrics = CallMetrics::new(
            call_id.clone(),
            agent_config.tenant_id.clone(),
            agent_config.agent_id.clone(),
        );

        let call_context = CallContext {
            direction,
            answered_by: AnsweredBy::from_provider_str(answered_by_raw),
            customer_name,
        };
        let mut agent_config = agent_config;
        agent_config.call_context = call_context;

        Ok(Self {
            config,
            deps,
            agent_config,
            call_id,
            history,
            metrics,
            interrupt: InterruptToken::new(),
            stt,
            stt_events,
            is_ai_speaking: false,
            call_stopped: false,
        })
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Drives the call end to end: handles the outbound-machine short-circuit, the
    /// outbound-to-human greeting, then loops on inbound transport frames and STT events
    /// until Teardown. Always finalizes metrics and emits telemetry before returning.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<InboundFrame>) -> Result<()> {
        let outcome = self.run_inner(&mut inbound).await;

        let status = match &outcome {
            Ok(()) => CallStatus::Completed,
            Err(OrchestratorError::SttFatal(_)) => CallStatus::Failed,
            Err(_) => CallStatus::Completed,
        };
        self.metrics.finish(status, outcome.as_ref().err().map(|e| e.to_string()));
        let _ = self.stt.finish().await;
        self.deps.telemetry.emit_call_ended(&self.metrics).await;

        outcome
    }

    async fn run_inner(&mut self, inbound: &mut mpsc::Receiver<InboundFrame>) -> Result<()> {
        // The transport can't carry outbound audio until the media stream's `start` frame
        // has set a stream id, so wait for it before speaking a greeting or entering the
        // main loop. `media`/`connected` frames arriving first are harmless to skip here;
        // STT hasn't been fed any audio yet either way.
        loop {
            match inbound.recv().await {
                Some(InboundFrame::Started { stream_id }) => {
                    self.deps.transport.set_stream_id(stream_id).await;
                    break;
                }
                Some(InboundFrame::Stopped) | None => return Ok(()),
                Some(_) => continue,
            }
        }

        let ctx = self.agent_config.call_context.clone();
        if ctx.direction == CallDirection::Outbound {
            if ctx.answered_by == AnsweredBy::Machine {
                info!(target: "orchestrator", call_id = %self.call_id, "machine answered outbound call, skipping speech");
                return Ok(());
            }
            let greeting = synthesize_greeting(ctx.customer_name.as_deref());
            self.history.push(Message::assistant_text(greeting.clone()));
            self.speak(&greeting).await?;
        }

        loop {
            tokio::select! {
                frame = inbound.recv() => {
                    match frame {
                        Some(InboundFrame::Started { stream_id }) => {
                            self.deps.transport.set_stream_id(stream_id).await;
                        }
                        Some(InboundFrame::Media { pcm16 }) => {
                            if let Err(err) = self.stt.send_audio(&pcm16).await {
                                warn!(target: "orchestrator", call_id = %self.call_id, %err, "failed to forward audio to stt");
                            }
                        }
                        Some(InboundFrame::Stopped) | None => return Ok(()),
                        Some(InboundFrame::Connected) | Some(InboundFrame::Mark { .. }) | Some(InboundFrame::Unknown) => {}
                    }
                }
                event = self.stt_events.recv() => {
                    match event {
                        Some(SttEvent::SpeechStart) => {
                            if self.is_ai_speaking {
                                self.interrupt.raise();
                                let _ = self.deps.transport.send_clear().await;
                            }
                        }
                        Some(SttEvent::Transcript { text, is_final: true }) if !text.is_empty() => {
                            let redacted = redact::redact_text(&text);
                            self.history.push(Message::user(redacted.clone()));
                            self.deps.telemetry.emit_transcript(&self.call_id, "user", &redacted).await;
                            self.run_turn(inbound).await?;
                            if self.call_stopped {
                                return Ok(());
                            }
                        }
                        Some(SttEvent::Transcript { .. }) => {}
                        Some(SttEvent::Closed) | None => {
                            return Err(OrchestratorError::SttFatal("stt connection closed".to_string()));
                        }
                    }
                }
            }
        }
    }

    /// One full turn: up to `MAX_LLM_STEPS_PER_TURN` LLM steps, each either producing
    /// speech or a bounded batch of tool calls fed back into the next step.
    ///
    /// Inbound media and STT events keep draining for the whole turn, not just between
    /// turns: the caller's audio has to keep reaching STT for a mid-turn barge-in to ever
    /// raise `SpeechStart` in the first place, and that event has to be observable while
    /// the turn's own LLM/TTS pipeline is being awaited rather than only once it returns.
    async fn run_turn(&mut self, inbound: &mut mpsc::Receiver<InboundFrame>) -> Result<()> {
        self.interrupt.reset();
        let turn_start = Instant::now();
        let first_audio_logged = Arc::new(AtomicBool::new(false));

        let rag_context = if let Some(rag) = &self.deps.rag {
            let query = self
                .history
                .messages()
                .iter()
                .rev()
                .find(|m| m.role == crate::model::Role::User)
                .and_then(|m| m.content.clone());
            match query {
                Some(q) => rag.retrieve(&q, &self.agent_config.tenant_id).await,
                None => None,
            }
        } else {
            None
        };

        'turn: for step in 0..MAX_LLM_STEPS_PER_TURN {
            let messages = self.history.turn_messages(rag_context.as_deref());
            let schemas = self.deps.tool_registry.tool_schemas();
            let mut rx = self.deps.llm.stream_with_tools(&messages, schemas);

            let mut text_buffer = String::new();
            let mut assembler = ToolCallAssembler::new();
            let mut tts_text_tx: Option<mpsc::Sender<String>> = None;
            let mut speak_task: Option<tokio::task::JoinHandle<()>> = None;
            self.is_ai_speaking = true;

            'stream: loop {
                if self.interrupt.is_raised() {
                    break 'stream;
                }
                tokio::select! {
                    event = rx.recv() => {
                        let Some(event) = event else { break 'stream };
                        match event {
                            LlmStreamEvent::ContentToken(token) => {
                                text_buffer.push_str(&token);
                                if tts_text_tx.is_none() {
                                    let (tx, handle) = self
                                        .spawn_speak_pipeline(turn_start, first_audio_logged.clone())
                                        .await;
                                    tts_text_tx = Some(tx);
                                    speak_task = Some(handle);
                                }
                                if let Some(tx) = &tts_text_tx {
                                    let _ = tx.send(token).await;
                                }
                            }
                            LlmStreamEvent::ToolCallFragment { index, id, name, arguments_fragment } => {
                                assembler.push_fragment(index, id, name, &arguments_fragment);
                            }
                            LlmStreamEvent::Usage { input_tokens, output_tokens } => {
                                self.metrics.record_usage(input_tokens, output_tokens);
                            }
                            LlmStreamEvent::Done => break 'stream,
                        }
                    }
                    frame = inbound.recv() => {
                        match frame {
                            Some(InboundFrame::Started { stream_id }) => {
                                self.deps.transport.set_stream_id(stream_id).await;
                            }
                            Some(InboundFrame::Media { pcm16 }) => {
                                if let Err(err) = self.stt.send_audio(&pcm16).await {
                                    warn!(target: "orchestrator", call_id = %self.call_id, %err, "failed to forward audio to stt");
                                }
                            }
                            Some(InboundFrame::Stopped) | None => {
                                self.call_stopped = true;
                                break 'stream;
                            }
                            Some(InboundFrame::Connected) | Some(InboundFrame::Mark { .. }) | Some(InboundFrame::Unknown) => {}
                        }
                    }
                    stt_event = self.stt_events.recv() => {
                        match stt_event {
                            Some(SttEvent::SpeechStart) => {
                                if self.is_ai_speaking {
                                    self.interrupt.raise();
                                    let _ = self.deps.transport.send_clear().await;
                                }
                            }
                            Some(SttEvent::Transcript { .. }) => {}
                            Some(SttEvent::Closed) | None => {
                                drop(tts_text_tx);
                                if let Some(handle) = speak_task {
                                    let _ = handle.await;
                                }
                                self.is_ai_speaking = false;
                                return Err(OrchestratorError::SttFatal("stt connection closed".to_string()));
                            }
                        }
                    }
                }
            }

            drop(tts_text_tx);
            if let Some(handle) = speak_task {
                let _ = handle.await;
            }
            self.is_ai_speaking = false;

            if self.call_stopped {
                if !text_buffer.is_empty() {
                    self.history.push(Message::assistant_text(text_buffer));
                }
                break 'turn;
            }

            if self.interrupt.is_raised() {
                if !text_buffer.is_empty() {
                    self.history.push(Message::assistant_text(text_buffer));
                }
                return Ok(());
            }

            if !assembler.is_empty() {
                let requests = assembler.flush();
                self.history.push(Message::assistant_tool_calls(requests.clone()));
                for request in &requests {
                    let result = self.deps.tool_registry.execute(request).await;
                    self.history.push(Message::tool_response(request.id.clone(), result));
                }
                if step + 1 == MAX_LLM_STEPS_PER_TURN {
                    warn!(target: "orchestrator", call_id = %self.call_id, "tool-loop depth cap reached, exiting turn");
                }
                continue;
            }

            if !text_buffer.is_empty() {
                self.history.push(Message::assistant_text(text_buffer));
            }
            return Ok(());
        }

        Ok(())
    }

    /// Speak a literal line with no LLM step (used for the outbound greeting).
    async fn speak(&mut self, text: &str) -> Result<()> {
        self.is_ai_speaking = true;
        let (tx, handle) = self
            .spawn_speak_pipeline(Instant::now(), Arc::new(AtomicBool::new(false)))
            .await;
        let _ = tx.send(text.to_string()).await;
        drop(tx);
        let _ = handle.await;
        self.is_ai_speaking = false;
        Ok(())
    }

    /// Spawns the TTS connection plus the audio-forwarding loop for one speak pipeline,
    /// returning the text-chunk sender the caller pumps LLM tokens (or a literal line)
    /// into. The spawned task observes `interrupt` at every audio-frame boundary and logs
    /// the turn's time-to-first-audio the first time it actually sends a frame over the
    /// transport; `first_audio_logged` is shared across every step of one turn so only the
    /// very first outbound frame of that turn is timed.
    async fn spawn_speak_pipeline(
        &self,
        turn_start: Instant,
        first_audio_logged: Arc<AtomicBool>,
    ) -> (mpsc::Sender<String>, tokio::task::JoinHandle<()>) {
        let (text_tx, text_rx) = mpsc::channel::<String>(32);
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<i16>>(32);
        let tts_config = self.config.tts.clone();
        let voice_id = self.agent_config.voice_id.clone();
        let transport = self.deps.transport.clone();
        let interrupt = self.interrupt.clone();
        let call_id = self.call_id.clone();

        let handle = tokio::spawn(async move {
            let audio_forward = tokio::spawn(async move {
                while let Some(frame) = audio_rx.recv().await {
                    if interrupt.is_raised() {
                        break;
                    }
                    match transport.send_audio(&frame).await {
                        Ok(()) => {
                            if !first_audio_logged.swap(true, Ordering::SeqCst) {
                                let elapsed = turn_start.elapsed();
                                info!(target: "orchestrator", call_id = %call_id, latency_ms = elapsed.as_millis() as u64, "first outbound audio frame of turn");
                            }
                        }
                        Err(err) => {
                            warn!(target: "orchestrator", call_id = %call_id, %err, "failed to send audio frame");
                            break;
                        }
                    }
                }
            });

            match TtsStream::connect(&tts_config, &voice_id).await {
                Ok(tts) => {
                    if let Err(err) = tts.run(text_rx, audio_tx).await {
                        warn!(target: "tts", %err, "tts pipeline ended with error");
                    }
                }
                Err(err) => {
                    warn!(target: "tts", %err, "failed to connect tts stream");
                }
            }
            let _ = audio_forward.await;
        });

        (text_tx, handle)
    }
}

/// Builds the outbound-to-human opening line from the customer's name when known.
fn synthesize_greeting(customer_name: Option<&str>) -> String {
    let name = customer_name.unwrap_or("there");
    format!("Hello {name}, I am calling from Acme Corp. Is this a good time?")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_uses_customer_name_when_present() {
        assert_eq!(
            synthesize_greeting(Some("Sam")),
            "Hello Sam, I am calling from Acme Corp. Is this a good time?"
        );
    }

    #[test]
    fn greeting_falls_back_when_name_missing() {
        assert_eq!(
            synthesize_greeting(None),
            "Hello there, I am calling from Acme Corp. Is this a good time?"
        );
    }

    #[test]
    fn tool_loop_cap_matches_spec() {
        assert_eq!(MAX_LLM_STEPS_PER_TURN, 3);
    }
}
