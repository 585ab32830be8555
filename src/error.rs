//! Error types for the VITA gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A single chat backend could not serve the call
    #[error("provider {provider} unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },

    /// Every configured chat backend failed or was skipped
    #[error("all providers exhausted for task {task}: {attempts} attempt(s) failed")]
    AllProvidersExhausted { task: String, attempts: usize },

    /// No usable speech engine for a modality, or a named engine is not usable
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Every candidate speech engine failed
    #[error("all {modality} engines exhausted: {attempts} attempt(s) failed")]
    AllEnginesExhausted { modality: String, attempts: usize },

    /// Speech-to-text error
    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    /// Text-to-speech error
    #[error("synthesis failed: {0}")]
    SynthesisFailed(String),

    /// Audio payload could not be interpreted
    #[error("invalid audio format: {0}")]
    InvalidAudioFormat(String),

    /// Stale or unknown session id
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Malformed request from a caller
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// External call did not complete in time
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Chat backend returned an error response
    #[error("chat error: {0}")]
    Chat(String),

    /// A switch was requested inside the cooldown window
    #[error("switch cooldown active: {remaining_secs}s remaining")]
    CooldownActive { remaining_secs: u64 },

    /// Provider id not present in configuration
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// Engine id not present in configuration
    #[error("unknown engine: {0}")]
    UnknownEngine(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Stable, machine-readable kind reported to clients
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::AllProvidersExhausted { .. } => "all_providers_exhausted",
            Self::EngineUnavailable(_) => "engine_unavailable",
            Self::AllEnginesExhausted { .. } => "all_engines_exhausted",
            Self::TranscriptionFailed(_) => "transcription_failed",
            Self::SynthesisFailed(_) => "synthesis_failed",
            Self::InvalidAudioFormat(_) => "invalid_audio_format",
            Self::SessionNotFound(_) => "session_not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::Timeout(_) => "timeout",
            Self::Chat(_) => "chat_failed",
            Self::CooldownActive { .. } => "cooldown_active",
            Self::UnknownProvider(_) => "unknown_provider",
            Self::UnknownEngine(_) => "unknown_engine",
            Self::Io(_) => "io",
            Self::Http(_) => "http",
            Self::Serialization(_) => "serialization",
            Self::Toml(_) => "toml",
        }
    }

    /// Whether the error is caused by the caller and must not be retried
    #[must_use]
    pub const fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidAudioFormat(_) | Self::InvalidInput(_) | Self::SessionNotFound(_)
        )
    }
}
