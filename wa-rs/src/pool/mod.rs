//! Adapter over the external automation client pool.
//!
//! The live browser-backed client is not owned by this crate; the pool only
//! tracks which session identifiers have a client and whether that client has
//! finished initializing. Protocol operations, browser lifecycle and pairing
//! flows all happen on the other side of this boundary.

use crate::db::{Database, SessionStatus};
use crate::error::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Readiness of a live client handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Initializing,
    Connected,
}

impl ClientState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::Connected => "CONNECTED",
        }
    }
}

/// Opaque handle to one live client.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub session_id: String,
    pub state: ClientState,
}

impl ClientHandle {
    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Connected
    }
}

/// Registry of live clients, keyed by session identifier.
pub struct ClientPool {
    clients: RwLock<HashMap<String, ClientHandle>>,
}

impl ClientPool {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Liveness: is there a client for this identifier at all.
    pub async fn has(&self, session_id: &str) -> bool {
        self.clients.read().await.contains_key(session_id)
    }

    pub async fn get(&self, session_id: &str) -> Option<ClientHandle> {
        self.clients.read().await.get(session_id).cloned()
    }

    /// Create a client for the session. Idempotent: an existing handle is
    /// left untouched.
    pub async fn setup_session(&self, session_id: &str) -> Result<()> {
        let mut clients = self.clients.write().await;

        if clients.contains_key(session_id) {
            debug!("Client already set up for session {}", session_id);
            return Ok(());
        }

        clients.insert(
            session_id.to_string(),
            ClientHandle {
                session_id: session_id.to_string(),
                state: ClientState::Initializing,
            },
        );

        info!("Client set up for session {}", session_id);
        Ok(())
    }

    /// Readiness callback for the automation side of the boundary: the
    /// external client transport invokes this when the underlying client
    /// finishes initializing. Nothing in this crate drives the transition.
    pub async fn mark_connected(&self, session_id: &str) {
        let mut clients = self.clients.write().await;
        if let Some(handle) = clients.get_mut(session_id) {
            handle.state = ClientState::Connected;
        }
    }

    /// Dispose of the live client. The session record is untouched.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let removed = self.clients.write().await.remove(session_id);
        if removed.is_some() {
            info!("Client disposed for session {}", session_id);
        }
        Ok(())
    }

    /// Re-create clients for every session that was active when the process
    /// last stopped. Returns how many were restored.
    pub async fn restore_sessions(&self, db: &Database) -> Result<usize> {
        let active = db.list_sessions_by_status(SessionStatus::Active).await?;

        for session in &active {
            self.setup_session(&session.session_id).await?;
        }

        Ok(active.len())
    }
}

impl Default for ClientPool {
    fn default() -> Self {
        Self::new()
    }
}
