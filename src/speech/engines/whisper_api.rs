//! Hosted Whisper-compatible transcription

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::audio::{pcm16_duration, pcm16_to_wav};
use crate::speech::{EngineKind, Transcriber, Transcription};
use crate::{Error, Result};

#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes through an `OpenAI`-compatible `/audio/transcriptions` endpoint
pub struct WhisperApiTranscriber {
    client: reqwest::Client,
    id: String,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
    api_key_env: String,
}

impl std::fmt::Debug for WhisperApiTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperApiTranscriber")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("has_key", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

impl WhisperApiTranscriber {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        id: String,
        base_url: &str,
        model: String,
        api_key: Option<SecretString>,
        api_key_env: String,
    ) -> Self {
        Self {
            client,
            id,
            endpoint: format!("{}/audio/transcriptions", base_url.trim_end_matches('/')),
            model,
            api_key,
            api_key_env,
        }
    }

    fn key(&self) -> Result<&SecretString> {
        self.api_key.as_ref().ok_or_else(|| {
            Error::EngineUnavailable(format!("missing credential {}", self.api_key_env))
        })
    }
}

#[async_trait]
impl Transcriber for WhisperApiTranscriber {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Network
    }

    async fn probe(&self) -> Result<()> {
        self.key().map(|_| ())
    }

    async fn transcribe(&self, pcm: &[u8], sample_rate: u32) -> Result<Transcription> {
        let key = self.key()?;
        let wav = pcm16_to_wav(pcm, sample_rate)?;
        tracing::debug!(engine = %self.id, audio_bytes = wav.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::TranscriptionFailed(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(key.expose_secret())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(engine = %self.id, status = %status, "Whisper API error");
            return Err(Error::TranscriptionFailed(format!(
                "Whisper API error {status}: {body}"
            )));
        }

        let result: WhisperResponse = response.json().await?;
        Ok(Transcription {
            text: result.text.trim().to_string(),
            duration: pcm16_duration(pcm.len(), sample_rate),
        })
    }
}
