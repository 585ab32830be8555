//! Credential shape detection
//!
//! Keys are classified by their format so operators can spot a key pasted
//! into the wrong provider slot. Detection never rejects a key.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static UUID_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("valid regex")
});

/// Recognized credential formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyFormat {
    /// UUID-shaped key (Volcengine Ark)
    Volcengine,
    /// `LLM|...` key
    Llama,
    /// `sk-proj-...` key
    OpenAi,
    /// Generic `sk-...` key (`DashScope` and other compatible APIs)
    Dashscope,
    /// Present but of no known shape
    Unrecognized,
    /// Empty or missing
    Missing,
}

impl KeyFormat {
    /// Classify a raw key
    #[must_use]
    pub fn detect(key: &str) -> Self {
        let key = key.trim();
        if key.is_empty() {
            return Self::Missing;
        }
        if UUID_KEY.is_match(key) {
            return Self::Volcengine;
        }
        if key.starts_with("LLM|") {
            return Self::Llama;
        }
        // sk-proj- must be checked before the generic sk- prefix
        if key.starts_with("sk-proj-") {
            return Self::OpenAi;
        }
        if key.starts_with("sk-") {
            return Self::Dashscope;
        }
        Self::Unrecognized
    }

    #[must_use]
    pub const fn is_present(self) -> bool {
        !matches!(self, Self::Missing)
    }
}
