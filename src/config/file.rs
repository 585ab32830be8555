//! TOML configuration file loading
//!
//! Supports `~/.config/vita/config.toml` as a persistent config source.
//! Every field is optional; the file is a partial overlay on top of defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{SynthesisEngineConfig, TranscriptionEngineConfig};
use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VitaConfigFile {
    /// Server/runtime configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Chat providers keyed by id; entries matching a built-in id overlay it
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderFileConfig>,

    /// Primary selection and switching policy
    #[serde(default)]
    pub switching: SwitchingFileConfig,

    /// Provider health policy
    #[serde(default)]
    pub health: HealthFileConfig,

    /// Performance window and thresholds
    #[serde(default)]
    pub performance: PerformanceFileConfig,

    /// Speech engines per modality, listed in priority order
    #[serde(default)]
    pub engines: EnginesFileConfig,

    /// Realtime session tuning
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Per-call timeouts in seconds
    #[serde(default)]
    pub timeouts: TimeoutsFileConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,

    /// System prompt prepended to every interview turn
    pub system_prompt: Option<String>,

    /// Number of previous turns sent as chat history
    pub history_turns: Option<usize>,
}

/// One chat provider entry
#[derive(Debug, Default, Deserialize)]
pub struct ProviderFileConfig {
    /// `OpenAI`-compatible base URL
    pub base_url: Option<String>,

    /// Environment variable holding the credential
    pub api_key_env: Option<String>,

    /// Inline credential (env var wins when both are set)
    pub api_key: Option<String>,

    /// Capabilities ("chat", "analysis", "code", "math")
    pub capabilities: Option<Vec<String>>,

    /// Task type to model identifier
    pub models: Option<BTreeMap<String, String>>,

    /// Model used for cheap liveness round-trips
    pub probe_model: Option<String>,

    /// Disabled providers stay registered but are never selected
    pub enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SwitchingFileConfig {
    pub primary: Option<String>,
    pub fallback_order: Option<Vec<String>>,
    pub cooldown_secs: Option<u64>,
    /// Relative score improvement required to switch (0.2 = 20%)
    pub improvement: Option<f64>,
    pub auto_switch: Option<bool>,
    pub fallback_enabled: Option<bool>,
    pub evaluate_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HealthFileConfig {
    pub failure_threshold: Option<u32>,
    pub backoff_base_secs: Option<u64>,
    pub backoff_cap_secs: Option<u64>,
    pub probe_cache_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PerformanceFileConfig {
    pub window: Option<usize>,
    pub slow_threshold_ms: Option<u64>,
    pub error_rate_threshold: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EnginesFileConfig {
    /// Replaces the built-in transcription list when present
    pub transcription: Option<Vec<TranscriptionEngineConfig>>,

    /// Replaces the built-in synthesis list when present
    pub synthesis: Option<Vec<SynthesisEngineConfig>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    pub sample_rate: Option<u32>,
    pub vad_threshold: Option<f32>,
    pub silence_threshold_ms: Option<u64>,
    pub min_speech_ms: Option<u64>,
    pub max_utterance_ms: Option<u64>,
    pub partial_interval_ms: Option<u64>,
    pub chunk_size: Option<usize>,
    pub voice: Option<String>,
    pub speed: Option<f32>,
    pub task: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TimeoutsFileConfig {
    pub transcription_secs: Option<u64>,
    pub synthesis_secs: Option<u64>,
    pub chat_secs: Option<u64>,
    pub probe_secs: Option<u64>,
}

/// Load the TOML config file
///
/// An explicit `path` must exist. Without one, the platform config path is
/// used when present and defaults are returned otherwise.
///
/// # Errors
///
/// Returns an error if an explicit file is missing, or if a file exists but
/// cannot be read or parsed
pub fn load_config_file(path: Option<&Path>) -> Result<VitaConfigFile> {
    let path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            p.to_path_buf()
        }
        None => match config_file_path() {
            Some(p) if p.exists() => p,
            _ => return Ok(VitaConfigFile::default()),
        },
    };

    let content = std::fs::read_to_string(&path)?;
    let config = parse(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Parse TOML text into the file schema
///
/// # Errors
///
/// Returns an error if the text is not valid for the schema
pub fn parse(content: &str) -> Result<VitaConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/vita/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("vita").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        let fc = parse("").unwrap();
        assert!(fc.providers.is_empty());
        assert!(fc.server.port.is_none());
    }

    #[test]
    fn test_parse_provider_table() {
        let fc = parse(
            r#"
            [providers.local]
            base_url = "http://localhost:8000/v1"
            capabilities = ["chat"]
            [providers.local.models]
            chat = "llama3"
            interview = "llama3"
            "#,
        )
        .unwrap();
        let local = &fc.providers["local"];
        assert_eq!(local.base_url.as_deref(), Some("http://localhost:8000/v1"));
        assert_eq!(local.models.as_ref().unwrap()["interview"], "llama3");
    }

    #[test]
    fn test_parse_engine_lists() {
        let fc = parse(
            r#"
            [[engines.transcription]]
            kind = "command"
            id = "whisper-tiny"
            binary = "whisper-cli"
            model_path = "models/ggml-tiny.bin"

            [[engines.synthesis]]
            kind = "command"
            id = "espeak"
            binary = "espeak-ng"
            "#,
        )
        .unwrap();
        assert_eq!(fc.engines.transcription.unwrap().len(), 1);
        assert_eq!(fc.engines.synthesis.unwrap()[0].id(), "espeak");
    }

    #[test]
    fn test_missing_explicit_path_fails() {
        let err = load_config_file(Some(Path::new("/nonexistent/vita.toml"))).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_invalid_toml_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "server = [").unwrap();
        assert!(load_config_file(Some(&path)).is_err());
    }
}
