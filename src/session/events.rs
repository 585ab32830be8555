//! Wire events of a realtime voice session

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize, Serializer};

use super::SessionState;
use crate::audio::SpeechMetrics;
use crate::speech::AudioFormat;
use crate::{Error, Result};

/// Settings a client may change mid-session
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionUpdate {
    pub silence_threshold_ms: Option<u64>,
    pub vad_threshold: Option<f32>,
    pub min_speech_ms: Option<u64>,
    pub max_utterance_ms: Option<u64>,
    /// Zero disables partial transcripts
    pub partial_interval_ms: Option<u64>,
    pub voice: Option<String>,
    pub speed: Option<f32>,
    pub transcription_engine: Option<String>,
    pub synthesis_engine: Option<String>,
}

/// Incoming JSON message from a client
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    StartAudio,
    AudioData {
        /// Base64 PCM16 mono
        data: String,
        #[serde(default)]
        voice: Option<String>,
        #[serde(default)]
        engine: Option<String>,
        #[serde(default)]
        synthesis_engine: Option<String>,
    },
    StopAudio,
    /// Barge-in: cancel the current turn
    Interrupt,
    Configure(SessionUpdate),
    Ping,
    End,
}

impl ClientEvent {
    /// Decode into a session input
    ///
    /// # Errors
    ///
    /// Returns `InvalidAudioFormat` if audio data is not valid base64
    pub fn into_input(self) -> Result<SessionInput> {
        Ok(match self {
            Self::StartAudio => SessionInput::StartAudio,
            Self::AudioData {
                data,
                voice,
                engine,
                synthesis_engine,
            } => SessionInput::Audio(AudioFrame {
                pcm: STANDARD
                    .decode(data.trim())
                    .map_err(|e| Error::InvalidAudioFormat(format!("bad base64: {e}")))?,
                voice,
                engine,
                synthesis_engine,
            }),
            Self::StopAudio => SessionInput::StopAudio,
            Self::Interrupt => SessionInput::Interrupt,
            Self::Configure(update) => SessionInput::Configure(update),
            Self::Ping => SessionInput::Ping,
            Self::End => SessionInput::End,
        })
    }
}

/// One frame of raw audio with optional per-frame hints
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioFrame {
    pub pcm: Vec<u8>,
    pub voice: Option<String>,
    pub engine: Option<String>,
    pub synthesis_engine: Option<String>,
}

impl AudioFrame {
    #[must_use]
    pub const fn raw(pcm: Vec<u8>) -> Self {
        Self {
            pcm,
            voice: None,
            engine: None,
            synthesis_engine: None,
        }
    }
}

/// Decoded input consumed by the session loop
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    StartAudio,
    Audio(AudioFrame),
    StopAudio,
    Interrupt,
    Configure(SessionUpdate),
    Ping,
    End,
}

/// Effective settings echoed back after `configure`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingsView {
    pub silence_threshold_ms: u64,
    pub vad_threshold: f32,
    pub min_speech_ms: u64,
    pub max_utterance_ms: u64,
    pub partial_interval_ms: Option<u64>,
    pub voice: String,
    pub speed: f32,
    pub transcription_engine: Option<String>,
    pub synthesis_engine: Option<String>,
}

fn as_base64<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

/// Outgoing message to a client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected {
        session_id: String,
    },
    State {
        state: SessionState,
    },
    Transcription {
        text: String,
        /// Seconds of audio transcribed
        duration: f64,
        is_final: bool,
        engine: String,
    },
    AiResponse {
        text: String,
        provider: String,
        model: String,
        metrics: SpeechMetrics,
    },
    AudioStart {
        format: AudioFormat,
        engine: String,
    },
    /// Sent as a binary frame over WebSocket; base64 when serialized
    AudioChunk {
        seq: u64,
        #[serde(serialize_with = "as_base64")]
        data: Vec<u8>,
    },
    AudioEnd {
        bytes: usize,
    },
    Error {
        kind: String,
        message: String,
    },
    Pong,
    Configured {
        settings: SettingsView,
    },
    Closed,
}

impl ServerEvent {
    #[must_use]
    pub fn error(err: &Error) -> Self {
        Self::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}
