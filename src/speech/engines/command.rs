//! Engines backed by an external command-line program
//!
//! Transcription runs a whisper.cpp style CLI over a temporary WAV file and
//! reads plain text from stdout. Synthesis runs an espeak-ng style CLI that
//! writes a WAV file.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::audio::{pcm16_duration, pcm16_to_wav};
use crate::speech::{
    AudioFormat, EngineKind, SynthesisRequest, SynthesizedAudio, Synthesizer, Transcriber,
    Transcription,
};
use crate::{Error, Result};

/// Default speaking rate of espeak-ng, in words per minute
const ESPEAK_BASE_WPM: f32 = 175.0;

fn require_binary(binary: &str) -> Result<PathBuf> {
    which::which(binary)
        .map_err(|_| Error::EngineUnavailable(format!("{binary} not found on PATH")))
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    let start = trimmed
        .char_indices()
        .rev()
        .nth(199)
        .map_or(0, |(i, _)| i);
    trimmed[start..].to_string()
}

/// Local transcription model run through a CLI
#[derive(Debug)]
pub struct CommandTranscriber {
    id: String,
    binary: String,
    model_path: Option<PathBuf>,
    args: Vec<String>,
}

impl CommandTranscriber {
    #[must_use]
    pub const fn new(
        id: String,
        binary: String,
        model_path: Option<PathBuf>,
        args: Vec<String>,
    ) -> Self {
        Self {
            id,
            binary,
            model_path,
            args,
        }
    }

    fn command(&self, binary: PathBuf, wav_path: &std::path::Path) -> Command {
        let mut cmd = Command::new(binary);
        if let Some(model) = &self.model_path {
            cmd.arg("-m").arg(model);
        }
        cmd.arg("-f")
            .arg(wav_path)
            .args(["-nt", "-np"])
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Transcriber for CommandTranscriber {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> EngineKind {
        EngineKind::LocalModel
    }

    async fn probe(&self) -> Result<()> {
        require_binary(&self.binary)?;
        if let Some(model) = &self.model_path
            && !model.exists()
        {
            return Err(Error::EngineUnavailable(format!(
                "model file missing: {}",
                model.display()
            )));
        }
        Ok(())
    }

    async fn transcribe(&self, pcm: &[u8], sample_rate: u32) -> Result<Transcription> {
        let binary = require_binary(&self.binary)?;
        let wav = pcm16_to_wav(pcm, sample_rate)?;

        let file = tempfile::Builder::new()
            .prefix("vita-utterance-")
            .suffix(".wav")
            .tempfile()?;
        tokio::fs::write(file.path(), &wav).await?;

        tracing::debug!(engine = %self.id, audio_bytes = pcm.len(), "running local transcription");

        let output = self
            .command(binary, file.path())
            .output()
            .await
            .map_err(|e| Error::TranscriptionFailed(format!("{}: {e}", self.binary)))?;

        if !output.status.success() {
            return Err(Error::TranscriptionFailed(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr_tail(&output.stderr)
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        Ok(Transcription {
            text,
            duration: pcm16_duration(pcm.len(), sample_rate),
        })
    }
}

/// Offline system synthesizer run through a CLI
#[derive(Debug)]
pub struct CommandSynthesizer {
    id: String,
    binary: String,
    default_voice: Option<String>,
}

impl CommandSynthesizer {
    #[must_use]
    pub const fn new(id: String, binary: String, default_voice: Option<String>) -> Self {
        Self {
            id,
            binary,
            default_voice,
        }
    }

    /// Map an `OpenAI`-style voice name to an espeak-ng voice
    fn local_voice(&self, voice: &str) -> String {
        let mapped = match voice {
            "alloy" => Some("en-us"),
            "echo" => Some("en-us+m3"),
            "fable" => Some("en-gb"),
            "onyx" => Some("en-us+m7"),
            "nova" => Some("en-us+f3"),
            "shimmer" => Some("en-us+f4"),
            _ => None,
        };
        mapped.map_or_else(
            || {
                self.default_voice
                    .clone()
                    .unwrap_or_else(|| "en-us".to_string())
            },
            String::from,
        )
    }
}

#[async_trait]
impl Synthesizer for CommandSynthesizer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> EngineKind {
        EngineKind::System
    }

    async fn probe(&self) -> Result<()> {
        require_binary(&self.binary).map(|_| ())
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesizedAudio> {
        let binary = require_binary(&self.binary)?;
        let file = tempfile::Builder::new()
            .prefix("vita-speech-")
            .suffix(".wav")
            .tempfile()?;
        let wpm = (ESPEAK_BASE_WPM * request.speed).round() as u32;

        let output = Command::new(binary)
            .arg("-v")
            .arg(self.local_voice(&request.voice))
            .arg("-s")
            .arg(wpm.to_string())
            .arg("-w")
            .arg(file.path())
            .arg("--")
            .arg(&request.text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::SynthesisFailed(format!("{}: {e}", self.binary)))?;

        if !output.status.success() {
            return Err(Error::SynthesisFailed(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr_tail(&output.stderr)
            )));
        }

        let bytes = tokio::fs::read(file.path()).await?;
        if bytes.is_empty() {
            return Err(Error::SynthesisFailed(format!(
                "{} produced no audio",
                self.binary
            )));
        }

        Ok(SynthesizedAudio {
            bytes,
            format: AudioFormat::Wav,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_probe() {
        let engine = CommandTranscriber::new(
            "local".into(),
            "vita-no-such-binary".into(),
            None,
            Vec::new(),
        );
        let err = engine.probe().await.unwrap_err();
        assert_eq!(err.kind(), "engine_unavailable");
        assert!(err.to_string().contains("not found on PATH"));
    }

    #[tokio::test]
    async fn test_missing_binary_synthesizer_probe() {
        let engine = CommandSynthesizer::new("espeak".into(), "vita-no-such-binary".into(), None);
        assert!(engine.probe().await.is_err());
    }

    #[test]
    fn test_voice_mapping() {
        let engine = CommandSynthesizer::new("espeak".into(), "espeak-ng".into(), None);
        assert_eq!(engine.local_voice("fable"), "en-gb");
        assert_eq!(engine.local_voice("unknown"), "en-us");

        let custom = CommandSynthesizer::new("espeak".into(), "espeak-ng".into(), Some("de".into()));
        assert_eq!(custom.local_voice("unknown"), "de");
    }

    /// Writes an executable script that parses options like espeak-ng
    #[cfg(unix)]
    fn fake_espeak(dir: &std::path::Path) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("espeak-ng");
        let script = r#"#!/bin/sh
out=""
while getopts "v:s:w:" opt; do
  case "$opt" in
    w) out="$OPTARG" ;;
    v|s) ;;
    *) exit 1 ;;
  esac
done
shift $((OPTIND - 1))
printf '%s' "$*" > "$out"
"#;
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reply_starting_with_dash_is_spoken() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CommandSynthesizer::new("espeak".into(), fake_espeak(dir.path()), None);

        for text in [
            "Tell me about yourself.",
            "- First, describe a project you led.",
            "--help",
        ] {
            let request = SynthesisRequest {
                text: text.to_string(),
                voice: "alloy".to_string(),
                speed: 1.0,
            };
            let audio = engine.synthesize(&request).await.unwrap();
            assert_eq!(audio.bytes, text.as_bytes());
            assert_eq!(audio.format, AudioFormat::Wav);
        }
    }

    #[test]
    fn test_stderr_tail_keeps_end() {
        let long = "x".repeat(500) + "boom";
        let tail = stderr_tail(long.as_bytes());
        assert_eq!(tail.len(), 200);
        assert!(tail.ends_with("boom"));
    }
}
