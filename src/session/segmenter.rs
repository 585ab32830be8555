//! Utterance segmentation by frame energy
//!
//! Each inbound frame is classified as speech or silence by its RMS energy.
//! Trailing silence accumulates until it crosses the silence threshold; the
//! utterance is then complete if enough speech was heard, or discarded.

use std::time::Duration;

use crate::Result;
use crate::audio::{calculate_energy, pcm16_duration, pcm16_samples};

/// Thresholds driving segmentation
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentParams {
    pub sample_rate: u32,
    pub vad_threshold: f32,
    pub silence_threshold: Duration,
    pub min_speech: Duration,
    pub max_utterance: Duration,
    pub partial_interval: Option<Duration>,
}

/// Why an utterance ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Silence,
    MaxUtterance,
    Stopped,
}

/// What the segmenter decided after a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    Continue,
    /// Enough new audio for a partial transcript
    Partial,
    Complete(EndReason),
    /// Silence threshold reached with too little speech; buffer dropped
    Discarded,
}

/// A buffered utterance ready for transcription
#[derive(Debug, Clone)]
pub struct Utterance {
    pub pcm: Vec<u8>,
    pub frames: usize,
    pub duration: Duration,
    pub speech: Duration,
    pub silence: Duration,
    pub mean_energy: f32,
    pub reason: EndReason,
}

#[derive(Debug)]
pub struct Segmenter {
    params: SegmentParams,
    buffer: Vec<u8>,
    frames: usize,
    speech: Duration,
    trailing_silence: Duration,
    total_silence: Duration,
    energy_sum: f64,
    since_partial: Duration,
}

impl Segmenter {
    #[must_use]
    pub const fn new(params: SegmentParams) -> Self {
        Self {
            params,
            buffer: Vec::new(),
            frames: 0,
            speech: Duration::ZERO,
            trailing_silence: Duration::ZERO,
            total_silence: Duration::ZERO,
            energy_sum: 0.0,
            since_partial: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn params(&self) -> &SegmentParams {
        &self.params
    }

    /// Replace thresholds; buffered audio is kept
    pub fn set_params(&mut self, params: SegmentParams) {
        self.params = params;
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[must_use]
    pub const fn frames(&self) -> usize {
        self.frames
    }

    /// Buffered audio so far
    #[must_use]
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        pcm16_duration(self.buffer.len(), self.params.sample_rate)
    }

    /// Append one PCM16 frame and decide whether the utterance is over
    ///
    /// # Errors
    ///
    /// Returns `InvalidAudioFormat` for an odd-length frame, which is not
    /// buffered
    pub fn push(&mut self, pcm: &[u8]) -> Result<Segment> {
        let samples = pcm16_samples(pcm)?;
        if samples.is_empty() {
            return Ok(Segment::Continue);
        }

        let frame = pcm16_duration(pcm.len(), self.params.sample_rate);
        let energy = calculate_energy(&samples);

        self.buffer.extend_from_slice(pcm);
        self.frames += 1;
        self.energy_sum += f64::from(energy);
        self.since_partial += frame;

        if energy >= self.params.vad_threshold {
            self.speech += frame;
            self.trailing_silence = Duration::ZERO;
        } else {
            self.trailing_silence += frame;
            self.total_silence += frame;
        }

        if self.duration() >= self.params.max_utterance {
            return Ok(Segment::Complete(EndReason::MaxUtterance));
        }

        if self.trailing_silence >= self.params.silence_threshold {
            if self.speech >= self.params.min_speech {
                return Ok(Segment::Complete(EndReason::Silence));
            }
            tracing::trace!(
                speech_ms = self.speech.as_millis(),
                "silence without enough speech, discarding buffer"
            );
            self.reset();
            return Ok(Segment::Discarded);
        }

        if let Some(interval) = self.params.partial_interval
            && self.since_partial >= interval
        {
            self.since_partial = Duration::ZERO;
            return Ok(Segment::Partial);
        }

        Ok(Segment::Continue)
    }

    /// Take the buffered utterance and reset
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn take(&mut self, reason: EndReason) -> Utterance {
        let mean_energy = if self.frames == 0 {
            0.0
        } else {
            (self.energy_sum / self.frames as f64) as f32
        };
        let utterance = Utterance {
            duration: self.duration(),
            pcm: std::mem::take(&mut self.buffer),
            frames: self.frames,
            speech: self.speech,
            silence: self.total_silence,
            mean_energy,
            reason,
        };
        self.reset();
        utterance
    }

    /// Drop buffered audio and counters
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.frames = 0;
        self.speech = Duration::ZERO;
        self.trailing_silence = Duration::ZERO;
        self.total_silence = Duration::ZERO;
        self.energy_sum = 0.0;
        self.since_partial = Duration::ZERO;
    }
}
