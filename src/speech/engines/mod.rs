//! Concrete speech engine adapters

mod command;
mod openai_speech;
mod whisper_api;

pub use command::{CommandSynthesizer, CommandTranscriber};
pub use openai_speech::OpenAiSpeechSynthesizer;
pub use whisper_api::WhisperApiTranscriber;

use std::sync::Arc;

use super::Engine;
use crate::config::{EngineConfigs, SynthesisEngineConfig, TranscriptionEngineConfig};

/// Build every configured engine, transcription first, in priority order
#[must_use]
pub fn build(config: &EngineConfigs, client: &reqwest::Client) -> Vec<Engine> {
    let transcribers = config.transcription.iter().map(|c| match c {
        TranscriptionEngineConfig::Command {
            id,
            binary,
            model_path,
            args,
        } => Engine::Transcriber(Arc::new(CommandTranscriber::new(
            id.clone(),
            binary.clone(),
            model_path.clone(),
            args.clone(),
        ))),
        TranscriptionEngineConfig::WhisperApi {
            id,
            base_url,
            api_key_env,
            model,
            api_key,
        } => Engine::Transcriber(Arc::new(WhisperApiTranscriber::new(
            client.clone(),
            id.clone(),
            base_url,
            model.clone(),
            api_key.clone(),
            api_key_env.clone(),
        ))),
    });

    let synthesizers = config.synthesis.iter().map(|c| match c {
        SynthesisEngineConfig::OpenaiSpeech {
            id,
            base_url,
            api_key_env,
            model,
            default_voice,
            api_key,
        } => Engine::Synthesizer(Arc::new(OpenAiSpeechSynthesizer::new(
            client.clone(),
            id.clone(),
            base_url,
            model.clone(),
            default_voice.clone(),
            api_key.clone(),
            api_key_env.clone(),
        ))),
        SynthesisEngineConfig::Command {
            id,
            binary,
            default_voice,
        } => Engine::Synthesizer(Arc::new(CommandSynthesizer::new(
            id.clone(),
            binary.clone(),
            default_voice.clone(),
        ))),
    });

    transcribers.chain(synthesizers).collect()
}
