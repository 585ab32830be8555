//! Provider liveness and credential tracking
//!
//! Each provider has a health record behind its own mutex. A provider turns
//! `degraded` on its first consecutive failure and `unavailable` once the
//! failure threshold is reached. Unavailable providers are re-probed only
//! after an exponential backoff window.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Capability, HealthState, KeyFormat};
use crate::chat::ChatBackend;
use crate::config::{HealthPolicy, ProviderConfig};
use crate::{Error, Result};

/// Maximum entries kept in the state-change log
const TRANSITION_LOG_CAPACITY: usize = 256;

/// A recorded health state change
#[derive(Debug, Clone, Serialize)]
pub struct HealthTransition {
    pub provider: String,
    pub from: HealthState,
    pub to: HealthState,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of one provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub id: String,
    pub state: HealthState,
    pub enabled: bool,
    pub capabilities: Vec<Capability>,
    pub credential_format: KeyFormat,
    pub consecutive_failures: u32,
    pub probe_failure_streak: u32,
    pub last_probe: Option<DateTime<Utc>>,
    /// Seconds until an unavailable provider may be re-probed
    pub next_probe_in_secs: Option<u64>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct HealthRecord {
    state: HealthState,
    consecutive_failures: u32,
    probe_failure_streak: u32,
    last_probe: Option<DateTime<Utc>>,
    last_healthy_probe: Option<Instant>,
    next_probe_at: Option<Instant>,
    last_error: Option<String>,
}

struct ProviderEntry {
    config: ProviderConfig,
    backend: Option<Arc<dyn ChatBackend>>,
    record: Mutex<HealthRecord>,
}

/// Registry of provider health, shared by selection and the chat pipeline
pub struct ProviderHealthRegistry {
    policy: HealthPolicy,
    probe_timeout: Duration,
    providers: RwLock<Vec<Arc<ProviderEntry>>>,
    transitions: Mutex<VecDeque<HealthTransition>>,
}

impl std::fmt::Debug for ProviderHealthRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHealthRegistry")
            .field("policy", &self.policy)
            .field("providers", &self.ids())
            .finish_non_exhaustive()
    }
}

/// Delay before the next probe of an unavailable provider
///
/// `base × 2^streak`, capped at `policy.backoff_cap`.
#[must_use]
pub fn backoff_delay(policy: &HealthPolicy, streak: u32) -> Duration {
    policy
        .backoff_base
        .saturating_mul(2u32.saturating_pow(streak))
        .min(policy.backoff_cap)
}

impl ProviderHealthRegistry {
    #[must_use]
    pub fn new(policy: HealthPolicy, probe_timeout: Duration) -> Self {
        Self {
            policy,
            probe_timeout,
            providers: RwLock::new(Vec::new()),
            transitions: Mutex::new(VecDeque::new()),
        }
    }

    /// Register a provider with an optional backend used for probe round-trips
    ///
    /// Re-registering an id replaces the previous entry and resets its health.
    pub fn register(&self, config: ProviderConfig, backend: Option<Arc<dyn ChatBackend>>) {
        let id = config.id.clone();
        let enabled = config.enabled;
        let entry = Arc::new(ProviderEntry {
            config,
            backend,
            record: Mutex::new(HealthRecord::default()),
        });

        {
            let mut providers = self.providers.write().unwrap_or_else(|e| e.into_inner());
            if let Some(slot) = providers.iter_mut().find(|e| e.config.id == id) {
                *slot = Arc::clone(&entry);
            } else {
                providers.push(Arc::clone(&entry));
            }
        }

        tracing::debug!(provider = %id, enabled, "registered provider");

        if !enabled {
            let mut record = entry.record.lock().unwrap_or_else(|e| e.into_inner());
            self.transition(
                &entry,
                &mut record,
                HealthState::Unavailable,
                "disabled in configuration",
            );
        }
    }

    /// Registered provider ids, in registration order
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.providers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|e| e.config.id.clone())
            .collect()
    }

    fn entry(&self, id: &str) -> Option<Arc<ProviderEntry>> {
        self.providers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|e| e.config.id == id)
            .cloned()
    }

    fn entries(&self) -> Vec<Arc<ProviderEntry>> {
        self.providers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Static configuration of a provider
    #[must_use]
    pub fn config(&self, id: &str) -> Option<ProviderConfig> {
        self.entry(id).map(|e| e.config.clone())
    }

    /// Backend used to serve calls for a provider
    #[must_use]
    pub fn backend(&self, id: &str) -> Option<Arc<dyn ChatBackend>> {
        self.entry(id).and_then(|e| e.backend.clone())
    }

    /// Current health state
    #[must_use]
    pub fn state(&self, id: &str) -> Option<HealthState> {
        self.entry(id)
            .map(|e| e.record.lock().unwrap_or_else(|e| e.into_inner()).state)
    }

    /// Probe one provider: credential check plus an optional ping
    ///
    /// A provider that was healthy on a probe within the cache window is
    /// reported healthy without a round-trip.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider` if the id was never registered
    pub async fn probe(&self, id: &str) -> Result<HealthState> {
        let entry = self
            .entry(id)
            .ok_or_else(|| Error::UnknownProvider(id.to_string()))?;

        if !entry.config.enabled {
            return Ok(HealthState::Unavailable);
        }

        {
            let record = entry.record.lock().unwrap_or_else(|e| e.into_inner());
            if record.state == HealthState::Healthy
                && record
                    .last_healthy_probe
                    .is_some_and(|t| t.elapsed() < self.policy.probe_cache)
            {
                tracing::trace!(provider = %id, "probe served from cache");
                return Ok(HealthState::Healthy);
            }
        }

        let format = entry.config.credential_format();
        if !format.is_present() {
            return Ok(self.probe_failed(&entry, "missing credentials".to_string()));
        }

        let outcome = match (&entry.backend, entry.config.probe_model()) {
            (Some(backend), Some(model)) => {
                match tokio::time::timeout(self.probe_timeout, backend.ping(model)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(Error::Timeout(self.probe_timeout).to_string()),
                }
            }
            // Credential check only
            _ => Ok(()),
        };

        Ok(match outcome {
            Ok(()) => self.probe_succeeded(&entry),
            Err(message) => self.probe_failed(&entry, message),
        })
    }

    /// Probe every registered provider
    pub async fn probe_all(&self) -> Vec<(String, HealthState)> {
        let ids = self.ids();
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let state = self.probe(&id).await.unwrap_or(HealthState::Unavailable);
            results.push((id, state));
        }
        results
    }

    /// Re-probe every unavailable provider whose backoff has elapsed
    ///
    /// Providers never probed are probed too.
    pub async fn probe_due(&self) -> Vec<(String, HealthState)> {
        let now = Instant::now();
        let due: Vec<String> = self
            .entries()
            .into_iter()
            .filter(|e| e.config.enabled)
            .filter(|e| {
                let record = e.record.lock().unwrap_or_else(|e| e.into_inner());
                match record.state {
                    HealthState::Unknown => true,
                    HealthState::Unavailable => record.next_probe_at.is_none_or(|t| t <= now),
                    HealthState::Healthy | HealthState::Degraded => false,
                }
            })
            .map(|e| e.config.id.clone())
            .collect();

        let mut results = Vec::with_capacity(due.len());
        for id in due {
            if let Ok(state) = self.probe(&id).await {
                results.push((id, state));
            }
        }
        results
    }

    /// First usable provider advertising a capability
    ///
    /// Healthy providers are preferred in registration order, then degraded
    /// ones. Unknown and unavailable providers are never returned.
    #[must_use]
    pub fn get_healthy(&self, capability: Capability, exclude: &[&str]) -> Option<ProviderStatus> {
        let candidates: Vec<ProviderStatus> = self
            .snapshot()
            .into_iter()
            .filter(|s| s.enabled && s.capabilities.contains(&capability))
            .filter(|s| !exclude.contains(&s.id.as_str()))
            .collect();

        let pick = |state: HealthState| candidates.iter().find(|s| s.state == state).cloned();
        pick(HealthState::Healthy).or_else(|| pick(HealthState::Degraded))
    }

    /// Record a successful call; resets the failure counter
    pub fn record_success(&self, id: &str) {
        let Some(entry) = self.entry(id) else {
            return;
        };
        let mut record = entry.record.lock().unwrap_or_else(|e| e.into_inner());
        record.consecutive_failures = 0;
        record.probe_failure_streak = 0;
        record.next_probe_at = None;
        record.last_error = None;
        self.transition(&entry, &mut record, HealthState::Healthy, "call succeeded");
    }

    /// Record a failed call
    pub fn record_failure(&self, id: &str, kind: &str) {
        let Some(entry) = self.entry(id) else {
            return;
        };
        let mut record = entry.record.lock().unwrap_or_else(|e| e.into_inner());
        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        record.last_error = Some(kind.to_string());
        let failures = record.consecutive_failures;
        let target = if failures >= self.policy.failure_threshold {
            if record.state != HealthState::Unavailable {
                record.next_probe_at =
                    Some(Instant::now() + backoff_delay(&self.policy, record.probe_failure_streak));
            }
            HealthState::Unavailable
        } else {
            HealthState::Degraded
        };

        tracing::warn!(provider = %id, failures, error_kind = kind, "provider call failed");
        self.transition(
            &entry,
            &mut record,
            target,
            &format!("{failures} consecutive failure(s), last: {kind}"),
        );
    }

    /// Snapshot of every provider, in registration order
    #[must_use]
    pub fn snapshot(&self) -> Vec<ProviderStatus> {
        let now = Instant::now();
        self.entries()
            .iter()
            .map(|e| {
                let record = e.record.lock().unwrap_or_else(|e| e.into_inner());
                ProviderStatus {
                    id: e.config.id.clone(),
                    state: record.state,
                    enabled: e.config.enabled,
                    capabilities: e.config.capabilities.clone(),
                    credential_format: e.config.credential_format(),
                    consecutive_failures: record.consecutive_failures,
                    probe_failure_streak: record.probe_failure_streak,
                    last_probe: record.last_probe,
                    next_probe_in_secs: (record.state == HealthState::Unavailable)
                        .then_some(record.next_probe_at)
                        .flatten()
                        .map(|t| t.saturating_duration_since(now).as_secs()),
                    last_error: record.last_error.clone(),
                }
            })
            .collect()
    }

    /// State-change log, oldest first
    #[must_use]
    pub fn transitions(&self) -> Vec<HealthTransition> {
        self.transitions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    fn probe_succeeded(&self, entry: &ProviderEntry) -> HealthState {
        let mut record = entry.record.lock().unwrap_or_else(|e| e.into_inner());
        record.consecutive_failures = 0;
        record.probe_failure_streak = 0;
        record.next_probe_at = None;
        record.last_error = None;
        record.last_probe = Some(Utc::now());
        record.last_healthy_probe = Some(Instant::now());
        self.transition(entry, &mut record, HealthState::Healthy, "probe succeeded");
        HealthState::Healthy
    }

    fn probe_failed(&self, entry: &ProviderEntry, message: String) -> HealthState {
        let mut record = entry.record.lock().unwrap_or_else(|e| e.into_inner());
        let delay = backoff_delay(&self.policy, record.probe_failure_streak);
        record.probe_failure_streak = record.probe_failure_streak.saturating_add(1);
        record.next_probe_at = Some(Instant::now() + delay);
        record.last_probe = Some(Utc::now());
        record.last_healthy_probe = None;
        record.last_error = Some(message.clone());

        tracing::warn!(
            provider = %entry.config.id,
            error = %message,
            retry_in_secs = delay.as_secs(),
            "provider probe failed"
        );
        self.transition(entry, &mut record, HealthState::Unavailable, &message);
        HealthState::Unavailable
    }

    /// Apply a state change while the caller holds the record lock
    fn transition(
        &self,
        entry: &ProviderEntry,
        record: &mut HealthRecord,
        to: HealthState,
        reason: &str,
    ) {
        let from = record.state;
        if from == to {
            return;
        }
        record.state = to;

        tracing::info!(
            provider = %entry.config.id,
            from = %from,
            to = %to,
            reason,
            "provider health changed"
        );

        let mut log = self.transitions.lock().unwrap_or_else(|e| e.into_inner());
        if log.len() >= TRANSITION_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(HealthTransition {
            provider: entry.config.id.clone(),
            from,
            to,
            reason: reason.to_string(),
            at: Utc::now(),
        });
    }
}
