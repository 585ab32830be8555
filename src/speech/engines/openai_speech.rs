//! Hosted `OpenAI`-compatible speech synthesis

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::speech::{
    AudioFormat, EngineKind, OPENAI_VOICES, SynthesisRequest, SynthesizedAudio, Synthesizer,
};
use crate::{Error, Result};

#[derive(serde::Serialize)]
struct TtsRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
}

/// Synthesizes MP3 through an `/audio/speech` endpoint
pub struct OpenAiSpeechSynthesizer {
    client: reqwest::Client,
    id: String,
    endpoint: String,
    model: String,
    default_voice: String,
    api_key: Option<SecretString>,
    api_key_env: String,
}

impl std::fmt::Debug for OpenAiSpeechSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiSpeechSynthesizer")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("has_key", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

impl OpenAiSpeechSynthesizer {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        id: String,
        base_url: &str,
        model: String,
        default_voice: String,
        api_key: Option<SecretString>,
        api_key_env: String,
    ) -> Self {
        Self {
            client,
            id,
            endpoint: format!("{}/audio/speech", base_url.trim_end_matches('/')),
            model,
            default_voice,
            api_key,
            api_key_env,
        }
    }

    fn key(&self) -> Result<&SecretString> {
        self.api_key.as_ref().ok_or_else(|| {
            Error::EngineUnavailable(format!("missing credential {}", self.api_key_env))
        })
    }

    fn voice<'a>(&'a self, requested: &'a str) -> &'a str {
        if OPENAI_VOICES.contains(&requested) {
            requested
        } else {
            &self.default_voice
        }
    }
}

#[async_trait]
impl Synthesizer for OpenAiSpeechSynthesizer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Network
    }

    async fn probe(&self) -> Result<()> {
        self.key().map(|_| ())
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesizedAudio> {
        let key = self.key()?;
        let body = TtsRequest {
            model: &self.model,
            input: &request.text,
            voice: self.voice(&request.voice),
            speed: request.speed,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(key.expose_secret())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::SynthesisFailed(format!(
                "speech API error {status}: {text}"
            )));
        }

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(Error::SynthesisFailed("speech API returned no audio".into()));
        }
        Ok(SynthesizedAudio {
            bytes: audio.to_vec(),
            format: AudioFormat::Mp3,
        })
    }
}
