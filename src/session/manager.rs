//! Live session bookkeeping

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{RealtimeVoiceSession, ServerEvent, SessionInput, SessionServices, Turn};
use crate::config::SessionConfig;
use crate::{Error, Result};

const INBOUND_CAPACITY: usize = 64;
const OUTBOUND_CAPACITY: usize = 256;

#[derive(Debug)]
struct SessionEntry {
    /// Weak so that dropping the handle's sender closes the session
    inbound: mpsc::WeakSender<SessionInput>,
    started_at: DateTime<Utc>,
}

/// Summary of a live session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// Both ends of a running session
#[derive(Debug)]
pub struct SessionHandle {
    pub id: Uuid,
    pub inbound: mpsc::Sender<SessionInput>,
    pub outbound: mpsc::Receiver<ServerEvent>,
    /// Extra outbound sender for transport-level errors
    pub events: mpsc::Sender<ServerEvent>,
    /// Resolves to the completed turns once the session closes
    pub task: JoinHandle<Vec<Turn>>,
}

/// Spawns sessions and tracks the live ones
#[derive(Debug)]
pub struct SessionManager {
    services: Arc<SessionServices>,
    defaults: SessionConfig,
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
}

impl SessionManager {
    #[must_use]
    pub fn new(services: Arc<SessionServices>, defaults: SessionConfig) -> Self {
        Self {
            services,
            defaults,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Start a session on its own task
    ///
    /// The session is deregistered when it closes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the requested id is already live
    pub async fn open(self: &Arc<Self>, requested: Option<Uuid>) -> Result<SessionHandle> {
        let id = requested.unwrap_or_else(Uuid::new_v4);
        let (in_tx, in_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);

        {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(&id) {
                return Err(Error::InvalidInput(format!("session {id} is already active")));
            }
            sessions.insert(
                id,
                SessionEntry {
                    inbound: in_tx.downgrade(),
                    started_at: Utc::now(),
                },
            );
        }

        let session = RealtimeVoiceSession::new(
            id,
            Arc::clone(&self.services),
            self.defaults.clone(),
            out_tx.clone(),
        );
        let manager = Arc::clone(self);
        let task = tokio::spawn(async move {
            let turns = session.run(in_rx).await;
            manager.sessions.write().await.remove(&id);
            turns
        });

        Ok(SessionHandle {
            id,
            inbound: in_tx,
            outbound: out_rx,
            events: out_tx,
            task,
        })
    }

    /// Live sessions, oldest first
    pub async fn list(&self) -> Vec<SessionInfo> {
        let mut live: Vec<SessionInfo> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, entry)| SessionInfo {
                id: *id,
                started_at: entry.started_at,
            })
            .collect();
        live.sort_by_key(|s| s.started_at);
        live
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Ask a live session to end
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if no such session is live
    pub async fn end(&self, id: Uuid) -> Result<()> {
        let inbound = self
            .sessions
            .read()
            .await
            .get(&id)
            .and_then(|entry| entry.inbound.upgrade())
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        inbound
            .send(SessionInput::End)
            .await
            .map_err(|_| Error::SessionNotFound(id.to_string()))
    }
}
