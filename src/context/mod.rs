//! Application context
//!
//! Every registry and service is constructed once here and shared by `Arc`
//! with the HTTP surface and the voice sessions.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::Result;
use crate::chat::{ChatBackend, ChatService, OpenAiCompatBackend};
use crate::config::Config;
use crate::monitor::PerformanceMonitor;
use crate::providers::{DynamicSwitchManager, ProviderHealthRegistry, ProviderSelector};
use crate::session::{SessionManager, SessionServices};
use crate::speech::{Engine, EngineAvailabilityRegistry, SpeechOrchestrator, engines};

/// Shared application state
#[derive(Debug)]
pub struct AppContext {
    pub config: Config,
    pub health: Arc<ProviderHealthRegistry>,
    pub monitor: Arc<PerformanceMonitor>,
    pub selector: Arc<ProviderSelector>,
    pub switcher: Arc<DynamicSwitchManager>,
    pub chat: Arc<ChatService>,
    pub engines: Arc<EngineAvailabilityRegistry>,
    pub speech: Arc<SpeechOrchestrator>,
    pub sessions: Arc<SessionManager>,
    pub started_at: DateTime<Utc>,
}

impl AppContext {
    /// Build the context with HTTP backends and configured engines
    ///
    /// Providers without a credential are registered without a backend and
    /// report the missing credential when probed.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the HTTP client
    /// cannot be created
    pub fn build(config: Config) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let mut backends: HashMap<String, Arc<dyn ChatBackend>> = HashMap::new();
        for provider in config.providers.iter().filter(|p| p.enabled) {
            match OpenAiCompatBackend::new(client.clone(), provider) {
                Ok(backend) => {
                    backends.insert(provider.id.clone(), Arc::new(backend));
                }
                Err(e) => {
                    tracing::warn!(provider = %provider.id, error = %e, "provider registered without backend");
                }
            }
        }

        let engines = engines::build(&config.engines, &client);
        Ok(Self::assemble(config, backends, engines))
    }

    /// Wire the context from ready-made backends and engines
    #[must_use]
    pub fn assemble(
        config: Config,
        mut backends: HashMap<String, Arc<dyn ChatBackend>>,
        engines: Vec<Engine>,
    ) -> Self {
        let health = Arc::new(ProviderHealthRegistry::new(
            config.health.clone(),
            config.timeouts.probe,
        ));
        for provider in &config.providers {
            let backend = backends.remove(&provider.id);
            health.register(provider.clone(), backend);
        }

        let monitor = Arc::new(PerformanceMonitor::new(config.performance.clone()));
        let primary = Arc::new(RwLock::new(config.primary.clone()));
        let selector = Arc::new(ProviderSelector::new(
            Arc::clone(&health),
            Arc::clone(&primary),
            config.fallback_order.clone(),
            config.switching.fallback_enabled,
        ));
        let switcher = Arc::new(DynamicSwitchManager::new(
            config.switching.clone(),
            Arc::clone(&health),
            Arc::clone(&monitor),
            primary,
        ));
        let chat = Arc::new(ChatService::new(
            Arc::clone(&selector),
            Arc::clone(&health),
            Arc::clone(&monitor),
            config.timeouts.chat,
        ));

        let engines = Arc::new(EngineAvailabilityRegistry::new(
            engines,
            config.timeouts.probe,
        ));
        let speech = Arc::new(SpeechOrchestrator::new(
            Arc::clone(&engines),
            Arc::clone(&monitor),
            config.timeouts.clone(),
        ));

        let services = Arc::new(SessionServices {
            chat: Arc::clone(&chat),
            speech: Arc::clone(&speech),
            system_prompt: config.server.system_prompt.clone(),
            history_turns: config.server.history_turns,
        });
        let sessions = Arc::new(SessionManager::new(services, config.session.clone()));

        Self {
            config,
            health,
            monitor,
            selector,
            switcher,
            chat,
            engines,
            speech,
            sessions,
            started_at: Utc::now(),
        }
    }

    /// Probe every provider and engine once
    pub async fn warm_up(&self) {
        let providers = self.health.probe_all().await;
        let usable = providers.iter().filter(|(_, s)| s.is_usable()).count();
        tracing::info!(usable, total = providers.len(), "providers probed");
        self.engines.probe_all().await;
    }

    /// Start the re-probe loop and the automatic switch loop
    #[must_use]
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        let health = Arc::clone(&self.health);
        let interval = self.config.health.backoff_base.max(Duration::from_secs(1));
        let reprobe = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                for (id, state) in health.probe_due().await {
                    tracing::debug!(provider = %id, state = %state, "provider re-probed");
                }
            }
        });

        let switching = Arc::clone(&self.switcher)
            .spawn_auto_switch(self.config.switching.evaluate_interval);

        vec![reprobe, switching]
    }

    /// Seconds since the context was built
    #[must_use]
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
