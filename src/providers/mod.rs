//! Chat provider health, selection, and primary switching
//!
//! Providers are the redundant AI backends that serve chat, analysis, code,
//! and math requests. Three cooperating pieces live here:
//!
//! - [`ProviderHealthRegistry`] tracks liveness and credentials
//! - [`ProviderSelector`] picks a usable backend for a task
//! - [`DynamicSwitchManager`] promotes the best performer to primary

pub mod credentials;
pub mod health;
pub mod selector;
pub mod switch;

pub use credentials::KeyFormat;
pub use health::{HealthTransition, ProviderHealthRegistry, ProviderStatus};
pub use selector::{ProviderSelector, Selection, SharedPrimary};
pub use switch::{DynamicSwitchManager, SwitchDecision, SwitchEvent, SwitchStatus};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Kind of work a provider or engine is asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Chat,
    Interview,
    Analysis,
    Code,
    Math,
    Transcription,
    Synthesis,
}

impl TaskType {
    /// Every task type, in declaration order
    pub const ALL: [Self; 7] = [
        Self::Chat,
        Self::Interview,
        Self::Analysis,
        Self::Code,
        Self::Math,
        Self::Transcription,
        Self::Synthesis,
    ];

    /// Capability a provider must advertise to serve this task
    #[must_use]
    pub const fn required_capability(self) -> Capability {
        match self {
            Self::Chat | Self::Interview => Capability::Chat,
            Self::Analysis => Capability::Analysis,
            Self::Code => Capability::Code,
            Self::Math => Capability::Math,
            Self::Transcription => Capability::Transcription,
            Self::Synthesis => Capability::Synthesis,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Interview => "interview",
            Self::Analysis => "analysis",
            Self::Code => "code",
            Self::Math => "math",
            Self::Transcription => "transcription",
            Self::Synthesis => "synthesis",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Config(format!("unknown task type: {s}")))
    }
}

/// Something a provider is able to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    Analysis,
    Code,
    Math,
    Transcription,
    Synthesis,
}

impl FromStr for Capability {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(Self::Chat),
            "analysis" => Ok(Self::Analysis),
            "code" => Ok(Self::Code),
            "math" => Ok(Self::Math),
            "transcription" => Ok(Self::Transcription),
            "synthesis" => Ok(Self::Synthesis),
            other => Err(Error::Config(format!("unknown capability: {other}"))),
        }
    }
}

/// Liveness classification of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Not probed yet
    #[default]
    Unknown,
    Healthy,
    /// Recent failures, still usable
    Degraded,
    /// Skipped by selection until a successful probe
    Unavailable,
}

impl HealthState {
    /// Whether selection may route traffic to a provider in this state
    #[must_use]
    pub const fn is_usable(self) -> bool {
        !matches!(self, Self::Unavailable)
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unavailable => "unavailable",
        })
    }
}
