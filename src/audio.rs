//! PCM16 helpers and derived speech metrics

use std::time::Duration;

use serde::Serialize;

use crate::{Error, Result};

/// Decode little-endian PCM16 mono bytes into samples
///
/// # Errors
///
/// Returns `InvalidAudioFormat` for an odd byte count
pub fn pcm16_samples(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(Error::InvalidAudioFormat(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect())
}

/// RMS energy of samples, normalized to `[0, 1]`
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn calculate_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let v = f64::from(s) / 32768.0;
            v * v
        })
        .sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Playback duration of a PCM16 mono payload
#[must_use]
pub fn pcm16_duration(byte_len: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let samples = (byte_len / 2) as u64;
    Duration::from_micros(samples.saturating_mul(1_000_000) / u64::from(sample_rate))
}

/// Wrap PCM16 mono bytes in a WAV container
///
/// # Errors
///
/// Returns `InvalidAudioFormat` if the payload is malformed or encoding fails
pub fn pcm16_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    let samples = pcm16_samples(pcm)?;
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| Error::InvalidAudioFormat(e.to_string()))?;
        for sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::InvalidAudioFormat(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| Error::InvalidAudioFormat(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Coarse delivery label derived from rate, energy and pauses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Calm,
    Energetic,
    Hesitant,
    Rushed,
}

/// Words per minute above which delivery counts as rushed
const RUSHED_WPM: f64 = 180.0;

/// Share of silent audio above which delivery counts as hesitant
const HESITANT_PAUSE_RATIO: f64 = 0.4;

/// RMS energy above which delivery counts as energetic
const ENERGETIC_RMS: f64 = 0.1;

impl Tone {
    #[must_use]
    pub fn classify(words_per_minute: f64, mean_energy: f64, pause_ratio: f64) -> Self {
        if pause_ratio > HESITANT_PAUSE_RATIO {
            Self::Hesitant
        } else if words_per_minute > RUSHED_WPM {
            Self::Rushed
        } else if mean_energy > ENERGETIC_RMS {
            Self::Energetic
        } else {
            Self::Calm
        }
    }
}

/// Delivery metrics attached to every assistant reply
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeechMetrics {
    pub words_per_minute: f64,
    pub mean_energy: f64,
    /// Silent audio over total audio
    pub pause_ratio: f64,
    pub tone: Tone,
}

impl SpeechMetrics {
    /// Derive metrics for one utterance
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(transcript: &str, total: Duration, silence: Duration, mean_energy: f32) -> Self {
        let total_secs = total.as_secs_f64();
        let words = word_count(transcript) as f64;
        let words_per_minute = if total_secs > 0.0 {
            words * 60.0 / total_secs
        } else {
            0.0
        };
        let pause_ratio = if total_secs > 0.0 {
            (silence.as_secs_f64() / total_secs).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let mean_energy = f64::from(mean_energy);

        Self {
            words_per_minute,
            mean_energy,
            pause_ratio,
            tone: Tone::classify(words_per_minute, mean_energy, pause_ratio),
        }
    }
}

/// Count words; each CJK ideograph counts as one word
#[must_use]
pub fn word_count(text: &str) -> usize {
    text.split_whitespace()
        .map(|token| {
            let cjk = token.chars().filter(|c| is_cjk(*c)).count();
            let rest = token.chars().any(|c| c.is_alphanumeric() && !is_cjk(c));
            cjk + usize::from(rest)
        })
        .sum()
}

const fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' | '\u{F900}'..='\u{FAFF}')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_odd_length_rejected() {
        let err = pcm16_samples(&[0, 1, 2]).unwrap_err();
        assert_eq!(err.kind(), "invalid_audio_format");
    }

    #[test]
    fn test_energy() {
        assert!(calculate_energy(&[]).abs() < f32::EPSILON);
        assert!(calculate_energy(&[0; 160]).abs() < f32::EPSILON);
        let loud = calculate_energy(&[16384, -16384, 16384, -16384]);
        assert!((loud - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_duration() {
        assert_eq!(pcm16_duration(3200, 16_000), Duration::from_millis(100));
        assert_eq!(pcm16_duration(32_000, 16_000), Duration::from_secs(1));
    }

    #[test]
    fn test_wav_header() {
        let wav = pcm16_to_wav(&pcm(&[1, 2, 3, 4]), 16_000).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(wav.len(), 44 + 8);
        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
    }

    #[test]
    fn test_word_count() {
        assert_eq!(word_count("I led the migration"), 4);
        assert_eq!(word_count("我负责 the migration"), 5);
        assert_eq!(word_count("  "), 0);
    }

    #[test]
    fn test_tone() {
        let m = SpeechMetrics::compute(
            "one two three four five six",
            Duration::from_secs(2),
            Duration::ZERO,
            0.05,
        );
        assert!((m.words_per_minute - 180.0).abs() < 1e-9);
        assert_eq!(m.tone, Tone::Calm);

        let hesitant = SpeechMetrics::compute(
            "well",
            Duration::from_secs(4),
            Duration::from_secs(2),
            0.05,
        );
        assert_eq!(hesitant.tone, Tone::Hesitant);
        assert!((hesitant.pause_ratio - 0.5).abs() < 1e-9);

        assert_eq!(Tone::classify(200.0, 0.0, 0.0), Tone::Rushed);
        assert_eq!(Tone::classify(120.0, 0.2, 0.1), Tone::Energetic);
    }
}
