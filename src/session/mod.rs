//! Realtime voice sessions
//!
//! A session is an explicit state machine driven by a single inbound queue:
//!
//! ```text
//!  Idle ──audio──▶ Listening ──silence/stop/max──▶ Thinking ──reply──▶ Speaking
//!   ▲                  │                              │                   │
//!   └──── interrupt ───┴──────── error/interrupt ─────┴───── audio_end ───┘
//! ```
//!
//! `end` or a closed inbound queue moves any state to `Closed`. Work in
//! `Thinking` and `Speaking` runs inside a `tokio::select!` against the
//! inbound queue so that an interrupt or disconnect drops it mid-flight.

pub mod events;
pub mod manager;
pub mod segmenter;

pub use events::{
    AudioFrame, ClientEvent, ServerEvent, SessionInput, SessionUpdate, SettingsView,
};
pub use manager::{SessionHandle, SessionInfo, SessionManager};
pub use segmenter::{EndReason, Segment, SegmentParams, Segmenter, Utterance};

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::Result;
use crate::audio::SpeechMetrics;
use crate::chat::{ChatMessage, ChatReply, ChatService};
use crate::config::SessionConfig;
use crate::providers::TaskType;
use crate::speech::{SpeechOrchestrator, normalize_speed};

/// Where a session is in its turn cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Listening,
    Thinking,
    Speaking,
    Closed,
}

/// Services shared by every session
#[derive(Debug)]
pub struct SessionServices {
    pub chat: Arc<ChatService>,
    pub speech: Arc<SpeechOrchestrator>,
    pub system_prompt: String,
    /// Completed turns replayed to the chat model
    pub history_turns: usize,
}

/// One completed exchange
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub user: String,
    pub assistant: String,
    pub provider: String,
    pub model: String,
    pub metrics: SpeechMetrics,
    pub at: DateTime<Utc>,
}

/// Outcome of work raced against the inbound queue
enum Flow<T> {
    Done(T),
    Interrupted,
    Closed,
}

/// What the thinking phase produced
struct Reply {
    user: String,
    chat: ChatReply,
    metrics: SpeechMetrics,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

async fn send(outbound: &mpsc::Sender<ServerEvent>, event: ServerEvent) {
    if outbound.send(event).await.is_err() {
        tracing::trace!("outbound queue closed, dropping event");
    }
}

/// Transcribe the utterance and ask the chat pipeline for a reply
///
/// Returns `None` when nothing was said.
async fn think(
    services: Arc<SessionServices>,
    outbound: mpsc::Sender<ServerEvent>,
    utterance: Utterance,
    sample_rate: u32,
    engine_hint: Option<String>,
    task: TaskType,
    mut messages: Vec<ChatMessage>,
) -> Result<Option<Reply>> {
    let (transcription, engine) = services
        .speech
        .transcribe(&utterance.pcm, sample_rate, engine_hint.as_deref())
        .await?;
    let text = transcription.text.trim().to_string();

    send(
        &outbound,
        ServerEvent::Transcription {
            text: text.clone(),
            duration: transcription.duration.as_secs_f64(),
            is_final: true,
            engine,
        },
    )
    .await;

    if text.is_empty() {
        return Ok(None);
    }

    messages.push(ChatMessage::user(text.clone()));
    let chat = services.chat.complete(task, &messages).await?;
    let metrics = SpeechMetrics::compute(
        &text,
        utterance.duration,
        utterance.silence,
        utterance.mean_energy,
    );

    Ok(Some(Reply {
        user: text,
        chat,
        metrics,
    }))
}

/// How far an audio stream got before it finished or was cut off
#[derive(Debug, Default)]
struct Streamed {
    started: AtomicBool,
    bytes: AtomicUsize,
}

/// Synthesize a reply and stream it out in fixed-size chunks
#[allow(clippy::too_many_arguments)]
async fn speak(
    services: Arc<SessionServices>,
    outbound: mpsc::Sender<ServerEvent>,
    text: String,
    voice: String,
    speed: f32,
    engine_hint: Option<String>,
    chunk_size: usize,
    streamed: &Streamed,
) -> Result<()> {
    let (audio, engine) = services
        .speech
        .synthesize(&text, &voice, speed, engine_hint.as_deref())
        .await?;

    send(
        &outbound,
        ServerEvent::AudioStart {
            format: audio.format,
            engine,
        },
    )
    .await;
    streamed.started.store(true, Ordering::SeqCst);
    for (seq, chunk) in (0u64..).zip(audio.bytes.chunks(chunk_size.max(1))) {
        send(
            &outbound,
            ServerEvent::AudioChunk {
                seq,
                data: chunk.to_vec(),
            },
        )
        .await;
        streamed.bytes.fetch_add(chunk.len(), Ordering::SeqCst);
    }
    send(
        &outbound,
        ServerEvent::AudioEnd {
            bytes: audio.bytes.len(),
        },
    )
    .await;
    Ok(())
}

/// One client's realtime voice conversation
pub struct RealtimeVoiceSession {
    id: Uuid,
    state: SessionState,
    services: Arc<SessionServices>,
    config: SessionConfig,
    transcription_engine: Option<String>,
    synthesis_engine: Option<String>,
    segmenter: Segmenter,
    history: Vec<Turn>,
    outbound: mpsc::Sender<ServerEvent>,
    partial: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for RealtimeVoiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeVoiceSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("turns", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl RealtimeVoiceSession {
    #[must_use]
    pub fn new(
        id: Uuid,
        services: Arc<SessionServices>,
        config: SessionConfig,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> Self {
        let segmenter = Segmenter::new(segment_params(&config));
        Self {
            id,
            state: SessionState::Idle,
            services,
            config,
            transcription_engine: None,
            synthesis_engine: None,
            segmenter,
            history: Vec::new(),
            outbound,
            partial: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until `end` or until the inbound queue closes
    ///
    /// Returns the completed turns.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<SessionInput>) -> Vec<Turn> {
        tracing::info!(session_id = %self.id, "voice session started");
        self.emit(ServerEvent::Connected {
            session_id: self.id.to_string(),
        })
        .await;
        self.emit(ServerEvent::State {
            state: self.state,
        })
        .await;

        while let Some(input) = inbound.recv().await {
            if !self.handle(input, &mut inbound).await {
                break;
            }
        }

        self.close().await;
        self.history
    }

    async fn emit(&self, event: ServerEvent) {
        send(&self.outbound, event).await;
    }

    async fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!(session_id = %self.id, from = ?self.state, to = ?state, "session state");
            self.state = state;
            self.emit(ServerEvent::State { state }).await;
        }
    }

    /// Handle one input outside of a turn; `false` ends the session
    async fn handle(
        &mut self,
        input: SessionInput,
        inbound: &mut mpsc::Receiver<SessionInput>,
    ) -> bool {
        match input {
            SessionInput::Ping => self.emit(ServerEvent::Pong).await,
            SessionInput::Configure(update) => self.configure(update).await,
            SessionInput::End => return false,
            SessionInput::StartAudio => {
                if self.state == SessionState::Idle {
                    self.set_state(SessionState::Listening).await;
                }
            }
            SessionInput::Interrupt => {
                if self.state == SessionState::Listening {
                    self.abort_partial();
                    self.segmenter.reset();
                    self.set_state(SessionState::Idle).await;
                }
            }
            SessionInput::StopAudio => {
                if self.state == SessionState::Listening {
                    if self.segmenter.is_empty() {
                        self.set_state(SessionState::Idle).await;
                    } else {
                        let utterance = self.segmenter.take(EndReason::Stopped);
                        return self.run_turn(utterance, inbound).await;
                    }
                }
            }
            SessionInput::Audio(frame) => {
                self.apply_frame_hints(&frame);
                if self.state == SessionState::Idle {
                    self.set_state(SessionState::Listening).await;
                }
                match self.segmenter.push(&frame.pcm) {
                    Ok(Segment::Continue | Segment::Discarded) => {}
                    Ok(Segment::Partial) => self.spawn_partial(),
                    Ok(Segment::Complete(reason)) => {
                        tracing::debug!(session_id = %self.id, ?reason, "utterance complete");
                        let utterance = self.segmenter.take(reason);
                        return self.run_turn(utterance, inbound).await;
                    }
                    Err(e) => self.emit(ServerEvent::error(&e)).await,
                }
            }
        }
        true
    }

    /// Run `Thinking` then `Speaking` for one utterance
    async fn run_turn(
        &mut self,
        utterance: Utterance,
        inbound: &mut mpsc::Receiver<SessionInput>,
    ) -> bool {
        self.abort_partial();
        self.set_state(SessionState::Thinking).await;

        let thinking = think(
            Arc::clone(&self.services),
            self.outbound.clone(),
            utterance,
            self.config.sample_rate,
            self.transcription_engine.clone(),
            self.config.task,
            self.chat_context(),
        );
        let reply = match self.cancellable(inbound, thinking).await {
            Flow::Closed => return false,
            Flow::Interrupted => {
                self.set_state(SessionState::Idle).await;
                return true;
            }
            Flow::Done(Err(e)) => {
                self.fail_turn(&e).await;
                return true;
            }
            Flow::Done(Ok(None)) => {
                self.set_state(SessionState::Idle).await;
                return true;
            }
            Flow::Done(Ok(Some(reply))) => reply,
        };

        self.emit(ServerEvent::AiResponse {
            text: reply.chat.text.clone(),
            provider: reply.chat.provider.clone(),
            model: reply.chat.model.clone(),
            metrics: reply.metrics.clone(),
        })
        .await;
        let text = reply.chat.text.clone();
        self.history.push(Turn {
            user: reply.user,
            assistant: reply.chat.text,
            provider: reply.chat.provider,
            model: reply.chat.model,
            metrics: reply.metrics,
            at: Utc::now(),
        });

        self.set_state(SessionState::Speaking).await;
        let streamed = Streamed::default();
        let speaking = speak(
            Arc::clone(&self.services),
            self.outbound.clone(),
            text,
            self.config.voice.clone(),
            self.config.speed,
            self.synthesis_engine.clone(),
            self.config.chunk_size,
            &streamed,
        );
        match self.cancellable(inbound, speaking).await {
            Flow::Closed => {
                self.end_cut_stream(&streamed).await;
                return false;
            }
            Flow::Interrupted => self.end_cut_stream(&streamed).await,
            Flow::Done(Ok(())) => {}
            Flow::Done(Err(e)) => {
                self.fail_turn(&e).await;
                return true;
            }
        }
        self.set_state(SessionState::Idle).await;
        true
    }

    /// Race work against the inbound queue
    async fn cancellable<T>(
        &mut self,
        inbound: &mut mpsc::Receiver<SessionInput>,
        work: impl Future<Output = T>,
    ) -> Flow<T> {
        tokio::pin!(work);
        loop {
            tokio::select! {
                out = &mut work => return Flow::Done(out),
                input = inbound.recv() => match input {
                    None | Some(SessionInput::End) => return Flow::Closed,
                    Some(SessionInput::Interrupt) => {
                        tracing::debug!(session_id = %self.id, state = ?self.state, "turn interrupted");
                        return Flow::Interrupted;
                    }
                    Some(SessionInput::Ping) => self.emit(ServerEvent::Pong).await,
                    Some(SessionInput::Configure(update)) => self.configure(update).await,
                    Some(SessionInput::Audio(_)) => {
                        tracing::trace!(session_id = %self.id, "discarding frame while busy");
                    }
                    Some(SessionInput::StartAudio | SessionInput::StopAudio) => {}
                },
            }
        }
    }

    /// Close an audio stream that was cut off after `audio_start`
    async fn end_cut_stream(&self, streamed: &Streamed) {
        if streamed.started.load(Ordering::SeqCst) {
            let bytes = streamed.bytes.load(Ordering::SeqCst);
            tracing::debug!(session_id = %self.id, bytes, "audio stream cut off");
            self.emit(ServerEvent::AudioEnd { bytes }).await;
        }
    }

    async fn fail_turn(&mut self, error: &crate::Error) {
        tracing::warn!(session_id = %self.id, state = ?self.state, error = %error, "turn failed");
        self.emit(ServerEvent::error(error)).await;
        self.set_state(SessionState::Idle).await;
    }

    async fn close(&mut self) {
        self.abort_partial();
        self.segmenter.reset();
        self.set_state(SessionState::Closed).await;
        self.emit(ServerEvent::Closed).await;
        tracing::info!(session_id = %self.id, turns = self.history.len(), "voice session closed");
    }

    /// System prompt plus the most recent turns
    fn chat_context(&self) -> Vec<ChatMessage> {
        let skip = self
            .history
            .len()
            .saturating_sub(self.services.history_turns);
        let mut messages = vec![ChatMessage::system(self.services.system_prompt.clone())];
        for turn in &self.history[skip..] {
            messages.push(ChatMessage::user(turn.user.clone()));
            messages.push(ChatMessage::assistant(turn.assistant.clone()));
        }
        messages
    }

    fn apply_frame_hints(&mut self, frame: &AudioFrame) {
        if let Some(voice) = &frame.voice {
            self.config.voice = voice.trim().to_ascii_lowercase();
        }
        if let Some(engine) = &frame.engine {
            self.transcription_engine = non_empty(engine);
        }
        if let Some(engine) = &frame.synthesis_engine {
            self.synthesis_engine = non_empty(engine);
        }
    }

    async fn configure(&mut self, update: SessionUpdate) {
        if let Some(ms) = update.silence_threshold_ms.filter(|ms| *ms > 0) {
            self.config.silence_threshold = Duration::from_millis(ms);
        }
        if let Some(v) = update.vad_threshold.filter(|v| v.is_finite() && *v >= 0.0) {
            self.config.vad_threshold = v;
        }
        if let Some(ms) = update.min_speech_ms.filter(|ms| *ms > 0) {
            self.config.min_speech = Duration::from_millis(ms);
        }
        if let Some(ms) = update.max_utterance_ms.filter(|ms| *ms > 0) {
            self.config.max_utterance = Duration::from_millis(ms);
        }
        if let Some(ms) = update.partial_interval_ms {
            self.config.partial_interval = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(voice) = update.voice {
            self.config.voice = voice.trim().to_ascii_lowercase();
        }
        if let Some(speed) = update.speed {
            self.config.speed = normalize_speed(speed);
        }
        if let Some(engine) = update.transcription_engine {
            self.transcription_engine = non_empty(&engine);
        }
        if let Some(engine) = update.synthesis_engine {
            self.synthesis_engine = non_empty(&engine);
        }
        self.segmenter.set_params(segment_params(&self.config));

        self.emit(ServerEvent::Configured {
            settings: self.settings_view(),
        })
        .await;
    }

    fn settings_view(&self) -> SettingsView {
        SettingsView {
            silence_threshold_ms: millis(self.config.silence_threshold),
            vad_threshold: self.config.vad_threshold,
            min_speech_ms: millis(self.config.min_speech),
            max_utterance_ms: millis(self.config.max_utterance),
            partial_interval_ms: self.config.partial_interval.map(millis),
            voice: self.config.voice.clone(),
            speed: self.config.speed,
            transcription_engine: self.transcription_engine.clone(),
            synthesis_engine: self.synthesis_engine.clone(),
        }
    }

    /// Transcribe the buffer so far in the background
    fn spawn_partial(&mut self) {
        self.abort_partial();
        let pcm = self.segmenter.buffered().to_vec();
        let services = Arc::clone(&self.services);
        let outbound = self.outbound.clone();
        let sample_rate = self.config.sample_rate;
        let hint = self.transcription_engine.clone();
        let id = self.id;

        self.partial = Some(tokio::spawn(async move {
            match services
                .speech
                .transcribe(&pcm, sample_rate, hint.as_deref())
                .await
            {
                Ok((transcription, engine)) => {
                    send(
                        &outbound,
                        ServerEvent::Transcription {
                            text: transcription.text.trim().to_string(),
                            duration: transcription.duration.as_secs_f64(),
                            is_final: false,
                            engine,
                        },
                    )
                    .await;
                }
                Err(e) => {
                    tracing::debug!(session_id = %id, error = %e, "partial transcription failed");
                }
            }
        }));
    }

    fn abort_partial(&mut self) {
        if let Some(handle) = self.partial.take() {
            handle.abort();
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn segment_params(config: &SessionConfig) -> SegmentParams {
    SegmentParams {
        sample_rate: config.sample_rate,
        vad_threshold: config.vad_threshold,
        silence_threshold: config.silence_threshold,
        min_speech: config.min_speech,
        max_utterance: config.max_utterance,
        partial_interval: config.partial_interval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty("  "), None);
        assert_eq!(non_empty(" espeak "), Some("espeak".to_string()));
    }

    #[test]
    fn test_segment_params_follow_config() {
        let config = SessionConfig {
            silence_threshold: Duration::from_millis(800),
            ..SessionConfig::default()
        };
        let params = segment_params(&config);
        assert_eq!(params.silence_threshold, Duration::from_millis(800));
        assert_eq!(params.sample_rate, 16_000);
        assert_eq!(params.partial_interval, None);
    }
}
