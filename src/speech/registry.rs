//! Speech engine availability
//!
//! Probing is best-effort: a missing binary, model file or credential marks
//! the engine `error` with a diagnostic and never fails the caller. Only
//! engines that probed successfully can be fetched for use.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Engine, EngineKind, Modality, Synthesizer, Transcriber};
use crate::{Error, Result};

/// Readiness of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Ready,
    /// Probed fine but failed at runtime since
    Degraded,
    Error,
}

impl EngineState {
    #[must_use]
    pub const fn is_usable(self) -> bool {
        matches!(self, Self::Ready | Self::Degraded)
    }
}

/// Descriptor of one configured engine
#[derive(Debug, Clone, Serialize)]
pub struct EngineDescriptor {
    pub id: String,
    pub modality: Modality,
    pub kind: EngineKind,
    /// Position in the modality's priority list, 0 first
    pub priority: usize,
    pub state: EngineState,
    pub message: Option<String>,
    pub last_probed: Option<DateTime<Utc>>,
}

/// Tracks which speech engines can be used
pub struct EngineAvailabilityRegistry {
    engines: Vec<(usize, Engine)>,
    probe_timeout: Duration,
    descriptors: RwLock<HashMap<String, EngineDescriptor>>,
    available: RwLock<HashMap<String, Engine>>,
}

impl std::fmt::Debug for EngineAvailabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineAvailabilityRegistry")
            .field("engines", &self.engines.len())
            .field("health_score", &self.health_score())
            .finish_non_exhaustive()
    }
}

impl EngineAvailabilityRegistry {
    /// Create a registry; engine priority follows list order per modality
    ///
    /// Engines start in the `error` state until probed.
    #[must_use]
    pub fn new(engines: Vec<Engine>, probe_timeout: Duration) -> Self {
        let mut next_priority: HashMap<Modality, usize> = HashMap::new();
        let engines: Vec<(usize, Engine)> = engines
            .into_iter()
            .map(|engine| {
                let slot = next_priority.entry(engine.modality()).or_insert(0);
                let priority = *slot;
                *slot += 1;
                (priority, engine)
            })
            .collect();

        let descriptors = engines
            .iter()
            .map(|(priority, engine)| {
                (
                    engine.id().to_string(),
                    EngineDescriptor {
                        id: engine.id().to_string(),
                        modality: engine.modality(),
                        kind: engine.kind(),
                        priority: *priority,
                        state: EngineState::Error,
                        message: Some("not probed".to_string()),
                        last_probed: None,
                    },
                )
            })
            .collect();

        Self {
            engines,
            probe_timeout,
            descriptors: RwLock::new(descriptors),
            available: RwLock::new(HashMap::new()),
        }
    }

    async fn probe_engine(&self, engine: &Engine) -> EngineDescriptor {
        let outcome = match tokio::time::timeout(self.probe_timeout, engine.probe()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.probe_timeout)),
        };

        let (state, message) = match outcome {
            Ok(()) => {
                tracing::info!(engine = engine.id(), modality = %engine.modality(), "engine ready");
                (EngineState::Ready, None)
            }
            Err(e) => {
                tracing::warn!(
                    engine = engine.id(),
                    modality = %engine.modality(),
                    error = %e,
                    "engine unavailable"
                );
                (EngineState::Error, Some(e.to_string()))
            }
        };

        {
            let mut available = self.available.write().unwrap_or_else(|e| e.into_inner());
            if state == EngineState::Ready {
                available.insert(engine.id().to_string(), engine.clone());
            } else {
                available.remove(engine.id());
            }
        }

        let mut descriptors = self.descriptors.write().unwrap_or_else(|e| e.into_inner());
        let descriptor = descriptors
            .entry(engine.id().to_string())
            .or_insert_with(|| EngineDescriptor {
                id: engine.id().to_string(),
                modality: engine.modality(),
                kind: engine.kind(),
                priority: 0,
                state,
                message: None,
                last_probed: None,
            });
        descriptor.state = state;
        descriptor.message = message;
        descriptor.last_probed = Some(Utc::now());
        descriptor.clone()
    }

    /// Probe every configured engine
    pub async fn probe_all(&self) -> BTreeMap<String, EngineDescriptor> {
        let mut out = BTreeMap::new();
        for (_, engine) in &self.engines {
            let descriptor = self.probe_engine(engine).await;
            out.insert(descriptor.id.clone(), descriptor);
        }
        let ready = out.values().filter(|d| d.state == EngineState::Ready).count();
        tracing::info!(ready, total = out.len(), "speech engines probed");
        out
    }

    /// Re-probe one engine
    ///
    /// # Errors
    ///
    /// Returns `UnknownEngine` if the id is not configured
    pub async fn reload(&self, id: &str) -> Result<EngineDescriptor> {
        let engine = self
            .engines
            .iter()
            .find(|(_, e)| e.id() == id)
            .map(|(_, e)| e.clone())
            .ok_or_else(|| Error::UnknownEngine(id.to_string()))?;
        Ok(self.probe_engine(&engine).await)
    }

    /// Usable engine ids for a modality, in priority order
    #[must_use]
    pub fn get_ready(&self, modality: Modality) -> Vec<String> {
        let mut usable: Vec<(usize, String)> = self
            .descriptors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|d| d.modality == modality && d.state.is_usable())
            .map(|d| (d.priority, d.id.clone()))
            .collect();
        usable.sort();
        usable.into_iter().map(|(_, id)| id).collect()
    }

    /// Mark an engine degraded after a runtime failure
    pub fn mark_degraded(&self, id: &str, message: &str) {
        let mut descriptors = self.descriptors.write().unwrap_or_else(|e| e.into_inner());
        if let Some(d) = descriptors.get_mut(id)
            && d.state == EngineState::Ready
        {
            tracing::warn!(engine = id, error = message, "engine degraded");
            d.state = EngineState::Degraded;
            d.message = Some(message.to_string());
        }
    }

    /// Share of engines that are fully ready
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn health_score(&self) -> f64 {
        let descriptors = self.descriptors.read().unwrap_or_else(|e| e.into_inner());
        if descriptors.is_empty() {
            return 0.0;
        }
        let ready = descriptors
            .values()
            .filter(|d| d.state == EngineState::Ready)
            .count();
        ready as f64 / descriptors.len() as f64
    }

    /// All descriptors, grouped by modality in priority order
    #[must_use]
    pub fn descriptors(&self) -> Vec<EngineDescriptor> {
        let mut all: Vec<EngineDescriptor> = self
            .descriptors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|d| (d.modality, d.priority));
        all
    }

    #[must_use]
    pub fn descriptor(&self, id: &str) -> Option<EngineDescriptor> {
        self.descriptors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// A transcriber that probed successfully
    #[must_use]
    pub fn transcriber(&self, id: &str) -> Option<Arc<dyn Transcriber>> {
        match self
            .available
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
        {
            Some(Engine::Transcriber(t)) => Some(Arc::clone(t)),
            _ => None,
        }
    }

    /// A synthesizer that probed successfully
    #[must_use]
    pub fn synthesizer(&self, id: &str) -> Option<Arc<dyn Synthesizer>> {
        match self
            .available
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
        {
            Some(Engine::Synthesizer(s)) => Some(Arc::clone(s)),
            _ => None,
        }
    }
}
