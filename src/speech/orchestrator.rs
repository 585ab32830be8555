//! Engine selection and failover for transcription and synthesis

use std::sync::Arc;

use super::{
    EngineAvailabilityRegistry, Modality, SynthesisRequest, SynthesizedAudio, Transcription,
    normalize_speed,
};
use crate::config::Timeouts;
use crate::fallback;
use crate::monitor::PerformanceMonitor;
use crate::providers::TaskType;
use crate::{Error, Result};

/// Routes speech requests through usable engines in priority order
#[derive(Debug)]
pub struct SpeechOrchestrator {
    registry: Arc<EngineAvailabilityRegistry>,
    monitor: Arc<PerformanceMonitor>,
    timeouts: Timeouts,
}

/// Move a usable hinted engine to the front of the order
fn apply_hint(mut order: Vec<String>, hint: Option<&str>) -> Vec<String> {
    if let Some(hint) = hint
        && let Some(pos) = order.iter().position(|id| id == hint)
    {
        let preferred = order.remove(pos);
        order.insert(0, preferred);
    }
    order
}

impl SpeechOrchestrator {
    #[must_use]
    pub const fn new(
        registry: Arc<EngineAvailabilityRegistry>,
        monitor: Arc<PerformanceMonitor>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            registry,
            monitor,
            timeouts,
        }
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<EngineAvailabilityRegistry> {
        &self.registry
    }

    fn record(&self, task: TaskType, engine: &str, attempt: &fallback::Attempt<'_>) {
        self.monitor.record(
            engine,
            task,
            attempt.latency_ms(),
            attempt.error.is_none(),
            attempt.error.map(Error::kind),
        );
        if let Some(e) = attempt.error
            && !e.is_caller_error()
        {
            self.registry.mark_degraded(engine, &e.to_string());
        }
    }

    /// Transcribe PCM16 mono audio
    ///
    /// Returns the transcription and the id of the engine that produced it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAudioFormat` for empty or odd-length audio,
    /// `EngineUnavailable` when no engine is usable, or `AllEnginesExhausted`
    /// when every engine fails
    pub async fn transcribe(
        &self,
        pcm: &[u8],
        sample_rate: u32,
        hint: Option<&str>,
    ) -> Result<(Transcription, String)> {
        if pcm.is_empty() {
            return Err(Error::InvalidAudioFormat("empty audio".to_string()));
        }
        if pcm.len() % 2 != 0 {
            return Err(Error::InvalidAudioFormat(format!(
                "PCM16 payload has odd length {}",
                pcm.len()
            )));
        }

        let order = apply_hint(self.registry.get_ready(Modality::Transcription), hint);
        if order.is_empty() {
            return Err(Error::EngineUnavailable(
                "no transcription engine is ready".to_string(),
            ));
        }

        let registry = &self.registry;
        fallback::first_success(
            order,
            self.timeouts.transcription,
            |id| {
                let engine = registry.transcriber(&id);
                async move {
                    let engine = engine.ok_or_else(|| Error::EngineUnavailable(id.clone()))?;
                    engine.transcribe(pcm, sample_rate).await
                }
            },
            |id, attempt| self.record(TaskType::Transcription, id, attempt),
        )
        .await
        .map(|(id, transcription)| {
            tracing::debug!(engine = %id, chars = transcription.text.len(), "transcribed");
            (transcription, id)
        })
        .map_err(|exhausted| {
            exhausted.into_error(|attempts| Error::AllEnginesExhausted {
                modality: Modality::Transcription.to_string(),
                attempts,
            })
        })
    }

    /// Synthesize speech
    ///
    /// Returns the audio and the id of the engine that produced it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for empty text, `EngineUnavailable` when no
    /// engine is usable, or `AllEnginesExhausted` when every engine fails
    pub async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        speed: f32,
        hint: Option<&str>,
    ) -> Result<(SynthesizedAudio, String)> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::InvalidInput("text to synthesize is empty".to_string()));
        }
        let request = SynthesisRequest {
            text: text.to_string(),
            voice: voice.trim().to_ascii_lowercase(),
            speed: normalize_speed(speed),
        };

        let order = apply_hint(self.registry.get_ready(Modality::Synthesis), hint);
        if order.is_empty() {
            return Err(Error::EngineUnavailable(
                "no synthesis engine is ready".to_string(),
            ));
        }

        let registry = &self.registry;
        let request = &request;
        fallback::first_success(
            order,
            self.timeouts.synthesis,
            |id| {
                let engine = registry.synthesizer(&id);
                async move {
                    let engine = engine.ok_or_else(|| Error::EngineUnavailable(id.clone()))?;
                    engine.synthesize(request).await
                }
            },
            |id, attempt| self.record(TaskType::Synthesis, id, attempt),
        )
        .await
        .map(|(id, audio)| {
            tracing::debug!(engine = %id, bytes = audio.bytes.len(), "synthesized");
            (audio, id)
        })
        .map_err(|exhausted| {
            exhausted.into_error(|attempts| Error::AllEnginesExhausted {
                modality: Modality::Synthesis.to_string(),
                attempts,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_hint_moves_to_front() {
        assert_eq!(
            apply_hint(ids(&["a", "b", "c"]), Some("c")),
            ids(&["c", "a", "b"])
        );
    }

    #[test]
    fn test_unusable_hint_ignored() {
        assert_eq!(apply_hint(ids(&["a", "b"]), Some("z")), ids(&["a", "b"]));
        assert_eq!(apply_hint(ids(&["a", "b"]), None), ids(&["a", "b"]));
    }
}
