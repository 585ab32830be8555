//! Health-aware provider selection
//!
//! The primary is preferred whenever it is healthy or degraded and maps the
//! task. Otherwise the fallback order is walked. A selection always carries
//! the chosen provider's own model for the task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde::Serialize;

use super::{HealthState, ProviderHealthRegistry, TaskType};
use crate::{Error, Result};

/// Primary provider pointer shared by the selector and the switch manager
pub type SharedPrimary = Arc<RwLock<Option<String>>>;

/// A provider and the model it uses for the requested task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub provider: String,
    pub model: String,
}

/// Chooses a usable provider for each task
#[derive(Debug)]
pub struct ProviderSelector {
    health: Arc<ProviderHealthRegistry>,
    primary: SharedPrimary,
    fallback_order: RwLock<Vec<String>>,
    fallback_enabled: AtomicBool,
}

impl ProviderSelector {
    #[must_use]
    pub fn new(
        health: Arc<ProviderHealthRegistry>,
        primary: SharedPrimary,
        fallback_order: Vec<String>,
        fallback_enabled: bool,
    ) -> Self {
        Self {
            health,
            primary,
            fallback_order: RwLock::new(fallback_order),
            fallback_enabled: AtomicBool::new(fallback_enabled),
        }
    }

    /// Current primary provider id
    #[must_use]
    pub fn primary(&self) -> Option<String> {
        self.primary
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    #[must_use]
    pub fn fallback_order(&self) -> Vec<String> {
        self.fallback_order
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    #[must_use]
    pub fn fallback_enabled(&self) -> bool {
        self.fallback_enabled.load(Ordering::Relaxed)
    }

    /// Enable or disable fallback beyond the primary
    pub fn set_fallback_enabled(&self, enabled: bool) {
        let was = self.fallback_enabled.swap(enabled, Ordering::Relaxed);
        if was != enabled {
            tracing::info!(enabled, "provider fallback toggled");
        }
    }

    /// Best usable provider for a task
    ///
    /// # Errors
    ///
    /// Returns `AllProvidersExhausted` when no provider qualifies
    pub fn select(&self, task: TaskType, prefer_primary: bool) -> Result<Selection> {
        self.candidates(task, prefer_primary)
            .into_iter()
            .next()
            .ok_or_else(|| Error::AllProvidersExhausted {
                task: task.to_string(),
                attempts: 0,
            })
    }

    /// Every usable provider for a task, in the order they should be tried
    #[must_use]
    pub fn candidates(&self, task: TaskType, prefer_primary: bool) -> Vec<Selection> {
        let mut out: Vec<Selection> = Vec::new();

        let primary = self.primary();
        if prefer_primary && let Some(primary) = primary.as_deref() {
            let state = self.health.state(primary);
            if matches!(state, Some(HealthState::Healthy | HealthState::Degraded))
                && let Some(selection) = self.selection_for(primary, task)
            {
                out.push(selection);
            }
        }

        if !self.fallback_enabled() {
            return out;
        }

        for id in self.fallback_order() {
            if out.iter().any(|s| s.provider == id) {
                continue;
            }
            if !self.health.state(&id).is_some_and(HealthState::is_usable) {
                continue;
            }
            if let Some(selection) = self.selection_for(&id, task) {
                out.push(selection);
            }
        }

        out
    }

    fn selection_for(&self, id: &str, task: TaskType) -> Option<Selection> {
        let config = self.health.config(id)?;
        if !config.enabled || !config.supports(task) {
            return None;
        }
        config.model_for(task).map(|model| Selection {
            provider: id.to_string(),
            model: model.to_string(),
        })
    }
}
