//! Speech engines, their availability, and engine failover
//!
//! Engines implement [`Transcriber`] or [`Synthesizer`]. The
//! [`EngineAvailabilityRegistry`] probes them at startup and tracks which
//! are usable; the [`SpeechOrchestrator`] routes each request through the
//! usable engines in priority order.

pub mod engines;
pub mod orchestrator;
pub mod registry;

pub use orchestrator::SpeechOrchestrator;
pub use registry::{EngineAvailabilityRegistry, EngineDescriptor, EngineState};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::Result;

/// Slowest supported synthesis speed
pub const MIN_SPEED: f32 = 0.25;

/// Fastest supported synthesis speed
pub const MAX_SPEED: f32 = 4.0;

/// Voice names accepted by `OpenAI`-style synthesis APIs
pub const OPENAI_VOICES: [&str; 6] = ["alloy", "echo", "fable", "onyx", "nova", "shimmer"];

/// Clamp a requested speed into the supported range
#[must_use]
pub fn normalize_speed(speed: f32) -> f32 {
    if speed.is_finite() {
        speed.clamp(MIN_SPEED, MAX_SPEED)
    } else {
        1.0
    }
}

/// What an engine does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Transcription,
    Synthesis,
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transcription => "transcription",
            Self::Synthesis => "synthesis",
        })
    }
}

/// Where an engine runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Local model run in-process or through a CLI
    LocalModel,
    /// Remote HTTP API
    Network,
    /// Operating system speech facility
    System,
}

/// Encoding of synthesized audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    Mp3,
    Wav,
}

impl AudioFormat {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
        }
    }
}

/// Text recognized from an utterance
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub text: String,
    /// Length of the transcribed audio
    pub duration: Duration,
}

/// A synthesis request after validation
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    /// `OpenAI`-style voice name; each engine maps it to a local voice
    pub voice: String,
    /// Already clamped to the supported range
    pub speed: f32,
}

/// Encoded audio produced by a synthesizer
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
}

/// Speech-to-text engine
#[async_trait]
pub trait Transcriber: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> EngineKind;

    /// Check that the engine can run
    ///
    /// # Errors
    ///
    /// Returns `EngineUnavailable` with a diagnostic when it cannot
    async fn probe(&self) -> Result<()>;

    /// Transcribe PCM16 mono audio
    ///
    /// # Errors
    ///
    /// Returns `TranscriptionFailed` if the engine fails
    async fn transcribe(&self, pcm: &[u8], sample_rate: u32) -> Result<Transcription>;
}

/// Text-to-speech engine
#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> EngineKind;

    /// Check that the engine can run
    ///
    /// # Errors
    ///
    /// Returns `EngineUnavailable` with a diagnostic when it cannot
    async fn probe(&self) -> Result<()>;

    /// Synthesize speech for a validated request
    ///
    /// # Errors
    ///
    /// Returns `SynthesisFailed` if the engine fails
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesizedAudio>;
}

/// A configured engine of either modality
#[derive(Clone)]
pub enum Engine {
    Transcriber(Arc<dyn Transcriber>),
    Synthesizer(Arc<dyn Synthesizer>),
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.id())
            .field("modality", &self.modality())
            .finish()
    }
}

impl Engine {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Transcriber(t) => t.id(),
            Self::Synthesizer(s) => s.id(),
        }
    }

    #[must_use]
    pub const fn modality(&self) -> Modality {
        match self {
            Self::Transcriber(_) => Modality::Transcription,
            Self::Synthesizer(_) => Modality::Synthesis,
        }
    }

    #[must_use]
    pub fn kind(&self) -> EngineKind {
        match self {
            Self::Transcriber(t) => t.kind(),
            Self::Synthesizer(s) => s.kind(),
        }
    }

    /// Probe the underlying engine
    ///
    /// # Errors
    ///
    /// Returns the engine's diagnostic when it cannot run
    pub async fn probe(&self) -> Result<()> {
        match self {
            Self::Transcriber(t) => t.probe().await,
            Self::Synthesizer(s) => s.probe().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_clamped() {
        assert!((normalize_speed(10.0) - MAX_SPEED).abs() < f32::EPSILON);
        assert!((normalize_speed(0.0) - MIN_SPEED).abs() < f32::EPSILON);
        assert!((normalize_speed(1.5) - 1.5).abs() < f32::EPSILON);
        assert!((normalize_speed(f32::NAN) - 1.0).abs() < f32::EPSILON);
    }
}
