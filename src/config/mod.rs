//! Configuration management for the VITA gateway
//!
//! Values are layered: built-in defaults, then the optional TOML file, then
//! environment variables.

pub mod file;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

pub use file::VitaConfigFile;

use crate::providers::{Capability, KeyFormat, TaskType};
use crate::{Error, Result};

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 18800;

const DEFAULT_SYSTEM_PROMPT: &str = "You are VITA, a professional interviewer. Ask one \
question at a time, follow up on the candidate's answers, and keep replies short enough \
to be spoken aloud.";

/// VITA gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server and conversation settings
    pub server: ServerConfig,

    /// Registered chat providers, in registration order
    pub providers: Vec<ProviderConfig>,

    /// Initial primary provider
    pub primary: Option<String>,

    /// Providers tried after the primary, in order
    pub fallback_order: Vec<String>,

    /// Provider health policy
    pub health: HealthPolicy,

    /// Rolling window and thresholds
    pub performance: PerformanceConfig,

    /// Primary switching policy
    pub switching: SwitchConfig,

    /// Speech engines per modality, in priority order
    pub engines: EngineConfigs,

    /// Realtime session defaults
    pub session: SessionConfig,

    /// Per-call timeouts
    pub timeouts: Timeouts,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub system_prompt: String,
    pub history_turns: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            history_turns: 6,
        }
    }
}

/// One `OpenAI`-compatible chat provider
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub id: String,
    pub base_url: String,

    /// Environment variable the credential was read from
    pub api_key_env: Option<String>,

    /// Resolved credential; never logged
    pub api_key: Option<SecretString>,

    pub capabilities: Vec<Capability>,

    /// Per-task model table; a missing task means the provider cannot serve it
    pub models: BTreeMap<TaskType, String>,

    /// Model used by health probes; falls back to the chat model
    pub probe_model: Option<String>,

    pub enabled: bool,
}

impl ProviderConfig {
    /// The provider's own model for a task
    #[must_use]
    pub fn model_for(&self, task: TaskType) -> Option<&str> {
        self.models.get(&task).map(String::as_str)
    }

    /// Whether the provider advertises the capability and maps the task
    #[must_use]
    pub fn supports(&self, task: TaskType) -> bool {
        self.capabilities.contains(&task.required_capability()) && self.models.contains_key(&task)
    }

    #[must_use]
    pub fn credential_format(&self) -> KeyFormat {
        self.api_key
            .as_ref()
            .map_or(KeyFormat::Missing, |k| KeyFormat::detect(k.expose_secret()))
    }

    /// Model for probes: explicit probe model, else chat, else any mapped model
    #[must_use]
    pub fn probe_model(&self) -> Option<&str> {
        self.probe_model
            .as_deref()
            .or_else(|| self.model_for(TaskType::Chat))
            .or_else(|| self.models.values().next().map(String::as_str))
    }
}

#[derive(Debug, Clone)]
pub struct HealthPolicy {
    /// Consecutive failures before a provider becomes unavailable
    pub failure_threshold: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// How long a healthy probe result is reused
    pub probe_cache: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            backoff_base: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(300),
            probe_cache: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PerformanceConfig {
    /// Samples kept per (provider, task) window
    pub window: usize,
    pub slow_threshold_ms: u64,
    pub error_rate_threshold: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            window: 100,
            slow_threshold_ms: 3000,
            error_rate_threshold: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SwitchConfig {
    pub cooldown: Duration,
    pub improvement: f64,
    pub auto_switch: bool,
    pub fallback_enabled: bool,
    pub evaluate_interval: Duration,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(60),
            improvement: 0.2,
            auto_switch: true,
            fallback_enabled: true,
            evaluate_interval: Duration::from_secs(30),
        }
    }
}

/// A transcription engine definition
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptionEngineConfig {
    /// Local model run through an external CLI
    Command {
        id: String,
        binary: String,
        model_path: Option<PathBuf>,
        #[serde(default)]
        args: Vec<String>,
    },
    /// `OpenAI`-compatible `/audio/transcriptions` endpoint
    WhisperApi {
        id: String,
        base_url: String,
        api_key_env: String,
        model: String,
        #[serde(skip)]
        api_key: Option<SecretString>,
    },
}

impl TranscriptionEngineConfig {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Command { id, .. } | Self::WhisperApi { id, .. } => id,
        }
    }
}

/// A synthesis engine definition
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SynthesisEngineConfig {
    /// `OpenAI`-compatible `/audio/speech` endpoint
    OpenaiSpeech {
        id: String,
        base_url: String,
        api_key_env: String,
        model: String,
        #[serde(default = "default_voice")]
        default_voice: String,
        #[serde(skip)]
        api_key: Option<SecretString>,
    },
    /// Offline system engine writing a WAV file
    Command {
        id: String,
        binary: String,
        #[serde(default)]
        default_voice: Option<String>,
    },
}

impl SynthesisEngineConfig {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::OpenaiSpeech { id, .. } | Self::Command { id, .. } => id,
        }
    }
}

fn default_voice() -> String {
    "nova".to_string()
}

#[derive(Debug, Clone)]
pub struct EngineConfigs {
    pub transcription: Vec<TranscriptionEngineConfig>,
    pub synthesis: Vec<SynthesisEngineConfig>,
}

impl Default for EngineConfigs {
    fn default() -> Self {
        Self {
            transcription: vec![
                TranscriptionEngineConfig::Command {
                    id: "whisper-local-medium".to_string(),
                    binary: "whisper-cli".to_string(),
                    model_path: Some(PathBuf::from("models/ggml-medium.bin")),
                    args: Vec::new(),
                },
                TranscriptionEngineConfig::Command {
                    id: "whisper-local-base".to_string(),
                    binary: "whisper-cli".to_string(),
                    model_path: Some(PathBuf::from("models/ggml-base.bin")),
                    args: Vec::new(),
                },
                TranscriptionEngineConfig::WhisperApi {
                    id: "whisper-api".to_string(),
                    base_url: "https://api.openai.com/v1".to_string(),
                    api_key_env: "OPENAI_API_KEY".to_string(),
                    model: "whisper-1".to_string(),
                    api_key: None,
                },
            ],
            synthesis: vec![
                SynthesisEngineConfig::OpenaiSpeech {
                    id: "openai-tts".to_string(),
                    base_url: "https://api.openai.com/v1".to_string(),
                    api_key_env: "OPENAI_API_KEY".to_string(),
                    model: "tts-1".to_string(),
                    default_voice: default_voice(),
                    api_key: None,
                },
                SynthesisEngineConfig::Command {
                    id: "espeak".to_string(),
                    binary: "espeak-ng".to_string(),
                    default_voice: None,
                },
            ],
        }
    }
}

/// Realtime session defaults; a client may adjust them per session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// PCM16 mono sample rate of inbound audio
    pub sample_rate: u32,
    /// RMS energy at or above which a frame counts as speech
    pub vad_threshold: f32,
    pub silence_threshold: Duration,
    pub min_speech: Duration,
    pub max_utterance: Duration,
    /// Interval between partial transcripts; `None` disables them
    pub partial_interval: Option<Duration>,
    /// Outbound audio chunk size in bytes
    pub chunk_size: usize,
    pub voice: String,
    pub speed: f32,
    /// Task type used for the chat call of each turn
    pub task: TaskType,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            vad_threshold: 0.01,
            silence_threshold: Duration::from_millis(1500),
            min_speech: Duration::from_millis(300),
            max_utterance: Duration::from_secs(30),
            partial_interval: None,
            chunk_size: 32 * 1024,
            voice: default_voice(),
            speed: 1.0,
            task: TaskType::Interview,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Timeouts {
    pub transcription: Duration,
    pub synthesis: Duration,
    pub chat: Duration,
    pub probe: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            transcription: Duration::from_secs(30),
            synthesis: Duration::from_secs(30),
            chat: Duration::from_secs(45),
            probe: Duration::from_secs(10),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            providers: default_providers(),
            primary: Some("doubao".to_string()),
            fallback_order: vec!["qwen".to_string(), "llama".to_string()],
            health: HealthPolicy::default(),
            performance: PerformanceConfig::default(),
            switching: SwitchConfig::default(),
            engines: EngineConfigs::default(),
            session: SessionConfig::default(),
            timeouts: Timeouts::default(),
        }
    }
}

fn provider(
    id: &str,
    base_url: &str,
    api_key_env: &str,
    probe_model: &str,
    models: &[(TaskType, &str)],
) -> ProviderConfig {
    ProviderConfig {
        id: id.to_string(),
        base_url: base_url.to_string(),
        api_key_env: Some(api_key_env.to_string()),
        api_key: None,
        capabilities: vec![
            Capability::Chat,
            Capability::Analysis,
            Capability::Code,
            Capability::Math,
        ],
        models: models
            .iter()
            .map(|(task, model)| (*task, (*model).to_string()))
            .collect(),
        probe_model: Some(probe_model.to_string()),
        enabled: true,
    }
}

/// Built-in providers: Doubao, Qwen and Llama
fn default_providers() -> Vec<ProviderConfig> {
    let mut llama = provider(
        "llama",
        "https://api.llama.com/compat/v1",
        "LLAMA_API_KEY",
        "Llama-3.3-8B-Instruct",
        &[
            (TaskType::Chat, "Llama-3.3-70B-Instruct"),
            (TaskType::Interview, "Llama-3.3-70B-Instruct"),
        ],
    );
    llama.capabilities = vec![Capability::Chat];

    vec![
        provider(
            "doubao",
            "https://ark.cn-beijing.volces.com/api/v3",
            "DOUBAO_API_KEY",
            "Doubao-lite-4k",
            &[
                (TaskType::Chat, "Doubao-Seed-1.6-flash"),
                (TaskType::Interview, "Doubao-Seed-1.6-thinking"),
                (TaskType::Analysis, "Doubao-Seed-1.6-thinking"),
                (TaskType::Code, "Doubao-Seed-1.6-thinking"),
                (TaskType::Math, "Doubao-Seed-1.6-thinking"),
            ],
        ),
        provider(
            "qwen",
            "https://dashscope.aliyuncs.com/compatible-mode/v1",
            "QWEN_API_KEY",
            "qwen-turbo",
            &[
                (TaskType::Chat, "qwen-plus"),
                (TaskType::Interview, "qwen-plus"),
                (TaskType::Analysis, "qwen-plus"),
                (TaskType::Code, "Qwen/Qwen2.5-Coder-32B-Instruct"),
                (TaskType::Math, "Qwen/Qwen2.5-Math-72B-Instruct"),
            ],
        ),
        llama,
    ]
}

/// Platform data directory (`~/.local/share/vita` on Linux)
#[must_use]
pub fn data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("vita"))
}

impl Config {
    /// Load configuration from the process environment and an optional file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or if the result
    /// fails validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Load configuration with an explicit environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or if the result
    /// fails validation
    pub fn load_with_env<F>(path: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| env("VITA_CONFIG").map(PathBuf::from));
        let fc = file::load_config_file(explicit.as_deref())?;
        Self::resolve(fc, env)
    }

    /// Layer a parsed file and the environment over the built-in defaults
    ///
    /// # Errors
    ///
    /// Returns error if a value cannot be parsed or the result fails validation
    #[allow(clippy::too_many_lines)]
    pub fn resolve<F>(fc: VitaConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let server = ServerConfig {
            port: parse_env(&env, "VITA_PORT")?
                .or(fc.server.port)
                .unwrap_or(defaults.server.port),
            system_prompt: fc
                .server
                .system_prompt
                .unwrap_or(defaults.server.system_prompt),
            history_turns: fc
                .server
                .history_turns
                .unwrap_or(defaults.server.history_turns),
        };

        let providers = merge_providers(defaults.providers, fc.providers, &env)?;

        let primary = env("VITA_PRIMARY_PROVIDER")
            .or(fc.switching.primary)
            .or(defaults.primary)
            .filter(|p| !p.trim().is_empty());
        let fallback_order = env("VITA_FALLBACK_ORDER")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect()
            })
            .or(fc.switching.fallback_order)
            .unwrap_or(defaults.fallback_order);

        let health = HealthPolicy {
            failure_threshold: parse_env(&env, "VITA_FAILURE_THRESHOLD")?
                .or(fc.health.failure_threshold)
                .unwrap_or(defaults.health.failure_threshold),
            backoff_base: fc
                .health
                .backoff_base_secs
                .map_or(defaults.health.backoff_base, Duration::from_secs),
            backoff_cap: fc
                .health
                .backoff_cap_secs
                .map_or(defaults.health.backoff_cap, Duration::from_secs),
            probe_cache: fc
                .health
                .probe_cache_secs
                .map_or(defaults.health.probe_cache, Duration::from_secs),
        };

        let performance = PerformanceConfig {
            window: parse_env(&env, "VITA_PERF_WINDOW")?
                .or(fc.performance.window)
                .unwrap_or(defaults.performance.window),
            slow_threshold_ms: fc
                .performance
                .slow_threshold_ms
                .unwrap_or(defaults.performance.slow_threshold_ms),
            error_rate_threshold: fc
                .performance
                .error_rate_threshold
                .unwrap_or(defaults.performance.error_rate_threshold),
        };

        let switching = SwitchConfig {
            cooldown: parse_env::<u64, _>(&env, "VITA_SWITCH_COOLDOWN_SECS")?
                .or(fc.switching.cooldown_secs)
                .map_or(defaults.switching.cooldown, Duration::from_secs),
            improvement: parse_env(&env, "VITA_SWITCH_IMPROVEMENT")?
                .or(fc.switching.improvement)
                .unwrap_or(defaults.switching.improvement),
            auto_switch: env_bool(&env, "VITA_AUTO_SWITCH")?
                .or(fc.switching.auto_switch)
                .unwrap_or(defaults.switching.auto_switch),
            fallback_enabled: fc
                .switching
                .fallback_enabled
                .unwrap_or(defaults.switching.fallback_enabled),
            evaluate_interval: fc
                .switching
                .evaluate_interval_secs
                .map_or(defaults.switching.evaluate_interval, Duration::from_secs),
        };

        let mut engines = EngineConfigs {
            transcription: fc
                .engines
                .transcription
                .unwrap_or(defaults.engines.transcription),
            synthesis: fc.engines.synthesis.unwrap_or(defaults.engines.synthesis),
        };
        resolve_engine_keys(&mut engines, &env);

        let s = fc.session;
        let session = SessionConfig {
            sample_rate: s.sample_rate.unwrap_or(defaults.session.sample_rate),
            vad_threshold: s.vad_threshold.unwrap_or(defaults.session.vad_threshold),
            silence_threshold: parse_env::<u64, _>(&env, "VITA_SILENCE_THRESHOLD_MS")?
                .or(s.silence_threshold_ms)
                .map_or(defaults.session.silence_threshold, Duration::from_millis),
            min_speech: s
                .min_speech_ms
                .map_or(defaults.session.min_speech, Duration::from_millis),
            max_utterance: s
                .max_utterance_ms
                .map_or(defaults.session.max_utterance, Duration::from_millis),
            partial_interval: s
                .partial_interval_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            chunk_size: s.chunk_size.unwrap_or(defaults.session.chunk_size),
            voice: s.voice.unwrap_or(defaults.session.voice),
            speed: s.speed.unwrap_or(defaults.session.speed),
            task: s
                .task
                .map(|t| t.parse::<TaskType>())
                .transpose()?
                .unwrap_or(defaults.session.task),
        };

        let t = fc.timeouts;
        let timeouts = Timeouts {
            transcription: t
                .transcription_secs
                .map_or(defaults.timeouts.transcription, Duration::from_secs),
            synthesis: t
                .synthesis_secs
                .map_or(defaults.timeouts.synthesis, Duration::from_secs),
            chat: t
                .chat_secs
                .map_or(defaults.timeouts.chat, Duration::from_secs),
            probe: t
                .probe_secs
                .map_or(defaults.timeouts.probe, Duration::from_secs),
        };

        let config = Self {
            server,
            providers,
            primary,
            fallback_order,
            health,
            performance,
            switching,
            engines,
            session,
            timeouts,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency
    ///
    /// # Errors
    ///
    /// Returns a `Config` error describing the first problem found
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for p in &self.providers {
            if !seen.insert(p.id.as_str()) {
                return Err(Error::Config(format!("duplicate provider id: {}", p.id)));
            }
            if p.base_url.trim().is_empty() {
                return Err(Error::Config(format!("provider {} has no base_url", p.id)));
            }
        }

        let known = |id: &str| self.providers.iter().any(|p| p.id == id);
        if let Some(primary) = &self.primary
            && !known(primary)
        {
            return Err(Error::Config(format!("unknown primary provider: {primary}")));
        }
        if let Some(unknown) = self.fallback_order.iter().find(|id| !known(id)) {
            return Err(Error::Config(format!(
                "unknown provider in fallback order: {unknown}"
            )));
        }

        let mut engine_ids = HashSet::new();
        let ids = self
            .engines
            .transcription
            .iter()
            .map(TranscriptionEngineConfig::id)
            .chain(self.engines.synthesis.iter().map(SynthesisEngineConfig::id));
        for id in ids {
            if !engine_ids.insert(id) {
                return Err(Error::Config(format!("duplicate engine id: {id}")));
            }
        }

        if self.health.failure_threshold == 0 {
            return Err(Error::Config("failure_threshold must be at least 1".into()));
        }
        if self.performance.window == 0 {
            return Err(Error::Config("performance window must be at least 1".into()));
        }
        if self.switching.improvement.is_nan() || self.switching.improvement < 0.0 {
            return Err(Error::Config("improvement must be non-negative".into()));
        }
        if !(0.0..=1.0).contains(&self.session.vad_threshold) {
            return Err(Error::Config("vad_threshold must be within 0..=1".into()));
        }
        if self.session.chunk_size == 0 || self.session.sample_rate == 0 {
            return Err(Error::Config(
                "chunk_size and sample_rate must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Look up a provider by id
    #[must_use]
    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }
}

fn parse_env<T, F>(env: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid value for {key}: {raw}")))
        })
        .transpose()
}

fn env_bool<F>(env: &F, key: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(Error::Config(format!("invalid value for {key}: {raw}"))),
        })
        .transpose()
}

fn merge_providers<F>(
    mut providers: Vec<ProviderConfig>,
    overlay: BTreeMap<String, file::ProviderFileConfig>,
    env: &F,
) -> Result<Vec<ProviderConfig>>
where
    F: Fn(&str) -> Option<String>,
{
    for (id, entry) in overlay {
        let idx = if let Some(idx) = providers.iter().position(|p| p.id == id) {
            idx
        } else {
            let base_url = entry
                .base_url
                .clone()
                .ok_or_else(|| Error::Config(format!("provider {id} needs a base_url")))?;
            providers.push(ProviderConfig {
                id: id.clone(),
                base_url,
                api_key_env: None,
                api_key: None,
                capabilities: vec![Capability::Chat],
                models: BTreeMap::new(),
                probe_model: None,
                enabled: true,
            });
            providers.len() - 1
        };

        let p = &mut providers[idx];
        if let Some(url) = entry.base_url {
            p.base_url = url;
        }
        if let Some(var) = entry.api_key_env {
            p.api_key_env = Some(var);
        }
        if let Some(key) = entry.api_key {
            p.api_key = Some(SecretString::from(key));
        }
        if let Some(caps) = entry.capabilities {
            p.capabilities = caps
                .iter()
                .map(|c| c.parse())
                .collect::<Result<Vec<Capability>>>()?;
        }
        if let Some(models) = entry.models {
            p.models = models
                .into_iter()
                .map(|(task, model)| Ok((task.parse::<TaskType>()?, model)))
                .collect::<Result<_>>()?;
        }
        if let Some(model) = entry.probe_model {
            p.probe_model = Some(model);
        }
        if let Some(enabled) = entry.enabled {
            p.enabled = enabled;
        }
    }

    // Env credential wins over an inline file key
    for p in &mut providers {
        if let Some(key) = p
            .api_key_env
            .as_deref()
            .and_then(env)
            .filter(|k| !k.trim().is_empty())
        {
            p.api_key = Some(SecretString::from(key));
        }
        let format = p.credential_format();
        if format == KeyFormat::Unrecognized {
            tracing::warn!(provider = %p.id, "credential has an unrecognized format");
        }
    }

    Ok(providers)
}

fn resolve_engine_keys<F>(engines: &mut EngineConfigs, env: &F)
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |var: &str| env(var).filter(|k| !k.trim().is_empty()).map(SecretString::from);

    for engine in &mut engines.transcription {
        if let TranscriptionEngineConfig::WhisperApi {
            api_key_env,
            api_key,
            ..
        } = engine
        {
            *api_key = lookup(api_key_env);
        }
    }
    for engine in &mut engines.synthesis {
        if let SynthesisEngineConfig::OpenaiSpeech {
            api_key_env,
            api_key,
            ..
        } = engine
        {
            *api_key = lookup(api_key_env);
        }
    }
}
