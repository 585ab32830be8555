//! Chat pipeline with provider failover
//!
//! [`ChatService`] asks the selector for candidates, tries them in order,
//! and records every attempt in the performance monitor and the health
//! registry. Only exhaustion reaches the caller.

mod openai;

pub use openai::OpenAiCompatBackend;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::fallback;
use crate::monitor::PerformanceMonitor;
use crate::providers::{ProviderHealthRegistry, ProviderSelector, TaskType};
use crate::{Error, Result};

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A backend able to serve chat completions for one provider
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Complete a conversation with the given model
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String>;

    /// Cheap liveness round-trip
    async fn ping(&self, model: &str) -> Result<()> {
        self.complete(model, &[ChatMessage::user("ping")])
            .await
            .map(|_| ())
    }
}

/// A successful completion and where it came from
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub text: String,
    pub provider: String,
    pub model: String,
    pub latency_ms: u64,
    /// Attempts made, including the successful one
    pub attempts: usize,
}

/// Chat requests routed through selection and failover
#[derive(Debug)]
pub struct ChatService {
    selector: Arc<ProviderSelector>,
    health: Arc<ProviderHealthRegistry>,
    monitor: Arc<PerformanceMonitor>,
    timeout: Duration,
}

impl ChatService {
    #[must_use]
    pub const fn new(
        selector: Arc<ProviderSelector>,
        health: Arc<ProviderHealthRegistry>,
        monitor: Arc<PerformanceMonitor>,
        timeout: Duration,
    ) -> Self {
        Self {
            selector,
            health,
            monitor,
            timeout,
        }
    }

    /// Complete a conversation for a task
    ///
    /// # Errors
    ///
    /// Returns `AllProvidersExhausted` when no provider qualifies or every
    /// candidate fails
    pub async fn complete(&self, task: TaskType, messages: &[ChatMessage]) -> Result<ChatReply> {
        let candidates = self.selector.candidates(task, true);
        if candidates.is_empty() {
            tracing::error!(task = %task, "no usable provider for task");
            return Err(Error::AllProvidersExhausted {
                task: task.to_string(),
                attempts: 0,
            });
        }

        let mut attempts = 0usize;
        let mut last_latency_ms = 0;

        let outcome = fallback::first_success(
            candidates,
            self.timeout,
            |selection| {
                let backend = self.health.backend(&selection.provider);
                async move {
                    let backend = backend.ok_or_else(|| Error::ProviderUnavailable {
                        provider: selection.provider.clone(),
                        message: "no backend registered".to_string(),
                    })?;
                    backend.complete(&selection.model, messages).await
                }
            },
            |selection, attempt| {
                attempts += 1;
                last_latency_ms = attempt.latency_ms();
                self.monitor.record(
                    &selection.provider,
                    task,
                    attempt.latency_ms(),
                    attempt.error.is_none(),
                    attempt.error.map(Error::kind),
                );
                match attempt.error {
                    None => self.health.record_success(&selection.provider),
                    Some(e) => self.health.record_failure(&selection.provider, e.kind()),
                }
            },
        )
        .await;

        match outcome {
            Ok((selection, text)) => {
                tracing::debug!(
                    task = %task,
                    provider = %selection.provider,
                    model = %selection.model,
                    latency_ms = last_latency_ms,
                    "chat completed"
                );
                Ok(ChatReply {
                    text,
                    provider: selection.provider,
                    model: selection.model,
                    latency_ms: last_latency_ms,
                    attempts,
                })
            }
            Err(exhausted) => {
                tracing::error!(task = %task, attempts, "all providers failed");
                Err(exhausted.into_error(|attempts| Error::AllProvidersExhausted {
                    task: task.to_string(),
                    attempts,
                }))
            }
        }
    }
}
