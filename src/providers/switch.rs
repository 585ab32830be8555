//! Dynamic promotion of the best performing provider to primary
//!
//! A switch is proposed only when an alternative beats the current primary's
//! score by the configured relative improvement and the cooldown since the
//! last switch has elapsed. Application re-checks both under one lock, so at
//! most one switch happens at a time.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use super::{HealthState, ProviderHealthRegistry, SharedPrimary};
use crate::config::SwitchConfig;
use crate::monitor::PerformanceMonitor;
use crate::{Error, Result};

/// Switch events kept in memory
const HISTORY_CAPACITY: usize = 100;

/// A proposed primary change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchDecision {
    pub from: Option<String>,
    pub to: String,
    pub score_from: Option<f64>,
    pub score_to: f64,
    pub reason: String,
}

/// An applied primary change
#[derive(Debug, Clone, Serialize)]
pub struct SwitchEvent {
    pub at: DateTime<Utc>,
    pub from: Option<String>,
    pub to: String,
    pub reason: String,
    pub score_from: Option<f64>,
    pub score_to: Option<f64>,
    pub manual: bool,
}

/// Switching state exposed to operators
#[derive(Debug, Clone, Serialize)]
pub struct SwitchStatus {
    pub primary: Option<String>,
    pub auto_switch: bool,
    pub cooldown_secs: u64,
    pub cooldown_remaining_secs: u64,
    pub improvement: f64,
    pub scores: BTreeMap<String, f64>,
    pub history: Vec<SwitchEvent>,
}

#[derive(Debug, Default)]
struct SwitchState {
    last_switch: Option<Instant>,
    history: VecDeque<SwitchEvent>,
}

impl SwitchState {
    fn cooldown_remaining(&self, cooldown: Duration) -> Duration {
        self.last_switch
            .map_or(Duration::ZERO, |t| cooldown.saturating_sub(t.elapsed()))
    }

    fn push(&mut self, event: SwitchEvent) {
        if self.history.len() >= HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(event);
        self.last_switch = Some(Instant::now());
    }
}

/// Promotes and demotes the primary provider
#[derive(Debug)]
pub struct DynamicSwitchManager {
    config: SwitchConfig,
    health: Arc<ProviderHealthRegistry>,
    monitor: Arc<PerformanceMonitor>,
    primary: SharedPrimary,
    auto_switch: AtomicBool,
    state: Mutex<SwitchState>,
}

impl DynamicSwitchManager {
    #[must_use]
    pub fn new(
        config: SwitchConfig,
        health: Arc<ProviderHealthRegistry>,
        monitor: Arc<PerformanceMonitor>,
        primary: SharedPrimary,
    ) -> Self {
        let auto_switch = AtomicBool::new(config.auto_switch);
        Self {
            config,
            health,
            monitor,
            primary,
            auto_switch,
            state: Mutex::new(SwitchState::default()),
        }
    }

    fn current_primary(&self) -> Option<String> {
        self.primary
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    #[must_use]
    pub fn auto_switch_enabled(&self) -> bool {
        self.auto_switch.load(Ordering::Relaxed)
    }

    pub fn set_auto_switch(&self, enabled: bool) {
        let was = self.auto_switch.swap(enabled, Ordering::Relaxed);
        if was != enabled {
            tracing::info!(enabled, "automatic switching toggled");
        }
    }

    /// Time left before another switch is allowed
    #[must_use]
    pub fn cooldown_remaining(&self) -> Duration {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cooldown_remaining(self.config.cooldown)
    }

    /// Propose a switch if an alternative clearly outperforms the primary
    #[must_use]
    pub fn evaluate(&self) -> Option<SwitchDecision> {
        if !self.cooldown_remaining().is_zero() {
            return None;
        }

        let from = self.current_primary();
        let score_from = from.as_deref().and_then(|p| self.monitor.provider_score(p));
        let primary_down = from
            .as_deref()
            .and_then(|p| self.health.state(p))
            .is_some_and(|s| s == HealthState::Unavailable);

        let (to, score_to) = self
            .health
            .snapshot()
            .into_iter()
            .filter(|s| s.enabled && s.state.is_usable())
            .filter(|s| Some(s.id.as_str()) != from.as_deref())
            .filter_map(|s| self.monitor.provider_score(&s.id).map(|score| (s.id, score)))
            .max_by(|a, b| a.1.total_cmp(&b.1))?;

        let reason = match score_from {
            _ if primary_down => "primary unavailable".to_string(),
            None => "primary has no performance data".to_string(),
            Some(current) if score_to > current * (1.0 + self.config.improvement) => format!(
                "score {score_to:.2} exceeds {current:.2} by more than {:.0}%",
                self.config.improvement * 100.0
            ),
            Some(_) => return None,
        };

        Some(SwitchDecision {
            from,
            to,
            score_from,
            score_to,
            reason,
        })
    }

    /// Apply a decision produced by [`Self::evaluate`]
    ///
    /// # Errors
    ///
    /// Returns `CooldownActive` if another switch happened inside the
    /// cooldown, or `InvalidInput` if the primary changed since evaluation
    pub fn apply(&self, decision: &SwitchDecision) -> Result<SwitchEvent> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let remaining = state.cooldown_remaining(self.config.cooldown);
        if !remaining.is_zero() {
            return Err(cooldown_error(remaining));
        }
        if self.current_primary() != decision.from {
            return Err(Error::InvalidInput(
                "primary changed since the decision was made".to_string(),
            ));
        }

        let event = SwitchEvent {
            at: Utc::now(),
            from: decision.from.clone(),
            to: decision.to.clone(),
            reason: decision.reason.clone(),
            score_from: decision.score_from,
            score_to: Some(decision.score_to),
            manual: false,
        };
        self.set_primary(&event);
        state.push(event.clone());
        Ok(event)
    }

    /// Evaluate and apply in one step
    pub fn evaluate_and_apply(&self) -> Option<SwitchEvent> {
        let decision = self.evaluate()?;
        match self.apply(&decision) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!(error = %e, "switch decision discarded");
                None
            }
        }
    }

    /// Operator-requested switch
    ///
    /// Bypasses the improvement threshold. The cooldown still applies unless
    /// `force` is set.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider` for an unregistered id, `InvalidInput` if the
    /// provider is already primary, or `CooldownActive` inside the cooldown
    pub fn manual_switch(&self, provider: &str, reason: &str, force: bool) -> Result<SwitchEvent> {
        if self.health.config(provider).is_none() {
            return Err(Error::UnknownProvider(provider.to_string()));
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let from = self.current_primary();
        if from.as_deref() == Some(provider) {
            return Err(Error::InvalidInput(format!("{provider} is already primary")));
        }

        let remaining = state.cooldown_remaining(self.config.cooldown);
        if !force && !remaining.is_zero() {
            return Err(cooldown_error(remaining));
        }

        if self
            .health
            .state(provider)
            .is_some_and(|s| s == HealthState::Unavailable)
        {
            tracing::warn!(provider, "switching primary to an unavailable provider");
        }

        let event = SwitchEvent {
            at: Utc::now(),
            score_from: from.as_deref().and_then(|p| self.monitor.provider_score(p)),
            score_to: self.monitor.provider_score(provider),
            from,
            to: provider.to_string(),
            reason: reason.to_string(),
            manual: true,
        };
        self.set_primary(&event);
        state.push(event.clone());
        Ok(event)
    }

    fn set_primary(&self, event: &SwitchEvent) {
        *self.primary.write().unwrap_or_else(|e| e.into_inner()) = Some(event.to.clone());
        tracing::info!(
            from = event.from.as_deref().unwrap_or("none"),
            to = %event.to,
            manual = event.manual,
            reason = %event.reason,
            "primary provider switched"
        );
    }

    /// Switch history, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<SwitchEvent> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .history
            .iter()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn status(&self) -> SwitchStatus {
        let scores = self
            .health
            .ids()
            .into_iter()
            .filter_map(|id| self.monitor.provider_score(&id).map(|s| (id, s)))
            .collect();

        SwitchStatus {
            primary: self.current_primary(),
            auto_switch: self.auto_switch_enabled(),
            cooldown_secs: self.config.cooldown.as_secs(),
            cooldown_remaining_secs: self.cooldown_remaining().as_secs(),
            improvement: self.config.improvement,
            scores,
            history: self.history(),
        }
    }

    /// Periodically evaluate while automatic switching is enabled
    #[must_use]
    pub fn spawn_auto_switch(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !self.auto_switch_enabled() {
                    continue;
                }
                if let Some(event) = self.evaluate_and_apply() {
                    tracing::debug!(to = %event.to, "automatic switch applied");
                }
            }
        })
    }
}

fn cooldown_error(remaining: Duration) -> Error {
    Error::CooldownActive {
        remaining_secs: remaining.as_secs().max(1),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::RwLock;

    use secrecy::SecretString;

    use super::*;
    use crate::config::{Config, HealthPolicy, PerformanceConfig};
    use crate::providers::TaskType;

    struct Fixture {
        health: Arc<ProviderHealthRegistry>,
        monitor: Arc<PerformanceMonitor>,
        manager: DynamicSwitchManager,
    }

    fn fixture(cooldown: Duration) -> Fixture {
        let health = Arc::new(ProviderHealthRegistry::new(
            HealthPolicy::default(),
            Duration::from_secs(1),
        ));
        for mut p in Config::default().providers {
            p.api_key = Some(SecretString::from("sk-test"));
            health.register(p, None);
        }
        for id in health.ids() {
            health.record_success(&id);
        }
        let monitor = Arc::new(PerformanceMonitor::new(PerformanceConfig::default()));
        let manager = DynamicSwitchManager::new(
            SwitchConfig {
                cooldown,
                ..SwitchConfig::default()
            },
            Arc::clone(&health),
            Arc::clone(&monitor),
            Arc::new(RwLock::new(Some("doubao".to_string()))),
        );
        Fixture {
            health,
            monitor,
            manager,
        }
    }

    fn record(monitor: &PerformanceMonitor, provider: &str, latency: u64, success: bool) {
        monitor.record(provider, TaskType::Chat, latency, success, None);
    }

    #[test]
    fn test_no_data_no_switch() {
        let f = fixture(Duration::ZERO);
        assert!(f.manager.evaluate().is_none());
    }

    #[test]
    fn test_small_improvement_ignored() {
        let f = fixture(Duration::ZERO);
        // doubao 4.0, qwen 4.5: 12.5% better, below 20%
        record(&f.monitor, "doubao", 1500, true);
        record(&f.monitor, "qwen", 750, true);
        assert!(f.manager.evaluate().is_none());
    }

    #[test]
    fn test_large_improvement_switches() {
        let f = fixture(Duration::ZERO);
        // doubao 1.5, qwen 5.0
        record(&f.monitor, "doubao", 0, true);
        record(&f.monitor, "doubao", 6000, false);
        record(&f.monitor, "qwen", 0, true);

        let decision = f.manager.evaluate().unwrap();
        assert_eq!(decision.to, "qwen");
        assert_eq!(decision.from.as_deref(), Some("doubao"));

        let event = f.manager.apply(&decision).unwrap();
        assert!(!event.manual);
        assert_eq!(f.manager.status().primary.as_deref(), Some("qwen"));
        assert_eq!(f.manager.history().len(), 1);
    }

    #[test]
    fn test_no_second_switch_within_cooldown() {
        let f = fixture(Duration::from_secs(3600));
        record(&f.monitor, "doubao", 6000, false);
        record(&f.monitor, "qwen", 0, true);
        let first = f.manager.evaluate_and_apply().unwrap();
        assert_eq!(first.to, "qwen");

        // qwen now collapses and llama shines; the gap qualifies but cooldown holds
        for _ in 0..5 {
            record(&f.monitor, "qwen", 6000, false);
        }
        record(&f.monitor, "llama", 0, true);
        assert!(f.manager.evaluate().is_none());
        assert!(f.manager.evaluate_and_apply().is_none());

        let stale = SwitchDecision {
            from: Some("qwen".to_string()),
            to: "llama".to_string(),
            score_from: Some(0.0),
            score_to: 5.0,
            reason: "test".to_string(),
        };
        let err = f.manager.apply(&stale).unwrap_err();
        assert_eq!(err.kind(), "cooldown_active");
        assert_eq!(f.manager.history().len(), 1);
    }

    #[test]
    fn test_apply_rejects_stale_primary() {
        let f = fixture(Duration::ZERO);
        let decision = SwitchDecision {
            from: Some("qwen".to_string()),
            to: "llama".to_string(),
            score_from: None,
            score_to: 5.0,
            reason: "test".to_string(),
        };
        assert!(f.manager.apply(&decision).is_err());
        assert_eq!(f.manager.status().primary.as_deref(), Some("doubao"));
    }

    #[test]
    fn test_unavailable_alternative_not_chosen() {
        let f = fixture(Duration::ZERO);
        record(&f.monitor, "doubao", 6000, false);
        record(&f.monitor, "qwen", 0, true);
        for _ in 0..3 {
            f.health.record_failure("qwen", "timeout");
        }
        assert!(f.manager.evaluate().is_none());
    }

    #[test]
    fn test_manual_switch_respects_cooldown_unless_forced() {
        let f = fixture(Duration::from_secs(3600));
        f.manager.manual_switch("qwen", "operator", false).unwrap();

        let err = f.manager.manual_switch("llama", "operator", false).unwrap_err();
        assert_eq!(err.kind(), "cooldown_active");

        let event = f.manager.manual_switch("llama", "operator", true).unwrap();
        assert!(event.manual);
        assert_eq!(event.from.as_deref(), Some("qwen"));
        assert_eq!(f.manager.history().len(), 2);
    }

    #[test]
    fn test_manual_switch_unknown_provider() {
        let f = fixture(Duration::ZERO);
        let err = f.manager.manual_switch("ghost", "x", true).unwrap_err();
        assert_eq!(err.kind(), "unknown_provider");
    }

    #[test]
    fn test_toggle_auto_switch() {
        let f = fixture(Duration::ZERO);
        assert!(f.manager.auto_switch_enabled());
        f.manager.set_auto_switch(false);
        assert!(!f.manager.status().auto_switch);
    }
}
