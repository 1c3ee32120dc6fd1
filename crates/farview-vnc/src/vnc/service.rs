//! VNC service — multi-session manager.
//!
//! `VncService` maintains a collection of sessions keyed by id and is
//! the surface consumed by presentation and service layers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::vnc::errors::VncError;
use crate::vnc::framebuffer::Frame;
use crate::vnc::session::VncSessionHandle;
use crate::vnc::types::{SessionInfo, SessionState, VncConfig};

/// Thread-safe wrapper for shared service state.
pub type VncServiceState = Arc<Mutex<VncService>>;

/// Multi-session VNC service.
#[derive(Default)]
pub struct VncService {
    sessions: HashMap<String, VncSessionHandle>,
}

impl VncService {
    /// Create a new (empty) service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a service wrapped in `Arc<Mutex<_>>` for shared ownership.
    pub fn new_state() -> VncServiceState {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Connect a new session.  Returns the session id on success.
    ///
    /// A second live connection to the same host:port is rejected.
    pub async fn connect(&mut self, config: VncConfig) -> Result<String, VncError> {
        for session in self.sessions.values() {
            if session.config.host == config.host
                && session.config.port == config.port
                && session.state().is_active()
            {
                return Err(VncError::AlreadyConnected(format!(
                    "{}:{}",
                    config.host, config.port
                )));
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let handle = VncSessionHandle::connect(id.clone(), config).await?;
        self.sessions.insert(id.clone(), handle);
        Ok(id)
    }

    fn session(&self, session_id: &str) -> Result<&VncSessionHandle, VncError> {
        self.sessions
            .get(session_id)
            .ok_or_else(|| VncError::SessionNotFound(session_id.into()))
    }

    /// Disconnect a session, keeping it in the registry for inspection.
    pub async fn disconnect(&self, session_id: &str) -> Result<(), VncError> {
        self.session(session_id)?.disconnect().await;
        Ok(())
    }

    /// Remove a session from the registry.
    pub fn remove_session(&mut self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    /// Disconnect and remove a session.
    pub async fn disconnect_and_remove(&mut self, session_id: &str) {
        if let Ok(session) = self.session(session_id) {
            session.disconnect().await;
        }
        self.remove_session(session_id);
    }

    /// Disconnect every session and clear the registry.  Returns the ids
    /// that were present.
    pub async fn disconnect_all(&mut self) -> Vec<String> {
        let mut ids = Vec::with_capacity(self.sessions.len());
        for (id, session) in &self.sessions {
            session.disconnect().await;
            ids.push(id.clone());
        }
        self.sessions.clear();
        ids
    }

    /// Relay a key event to a session.
    pub async fn send_key(&self, session_id: &str, keysym: u32, down: bool) -> Result<(), VncError> {
        self.session(session_id)?.send_key(keysym, down).await
    }

    /// Relay a pointer event to a session.
    pub async fn send_pointer(
        &self,
        session_id: &str,
        x: u16,
        y: u16,
        button_mask: u8,
    ) -> Result<(), VncError> {
        self.session(session_id)?.send_pointer(x, y, button_mask).await
    }

    /// The most recently published frame of a session.
    pub fn latest_frame(&self, session_id: &str) -> Result<Option<Frame>, VncError> {
        Ok(self.session(session_id)?.latest_frame())
    }

    /// Subscribe to a session's published frames.
    pub fn watch_frames(
        &self,
        session_id: &str,
    ) -> Result<watch::Receiver<Option<Frame>>, VncError> {
        Ok(self.session(session_id)?.watch_frames())
    }

    /// Current state of a session.
    pub fn session_state(&self, session_id: &str) -> Result<SessionState, VncError> {
        Ok(self.session(session_id)?.state())
    }

    /// Subscribe to a session's state changes.
    pub fn watch_state(
        &self,
        session_id: &str,
    ) -> Result<watch::Receiver<SessionState>, VncError> {
        Ok(self.session(session_id)?.watch_state())
    }

    /// The most recent error a session recorded.
    pub fn last_error(&self, session_id: &str) -> Result<Option<VncError>, VncError> {
        Ok(self.session(session_id)?.last_error())
    }

    /// Metadata for one session.
    pub fn get_session_info(&self, session_id: &str) -> Result<SessionInfo, VncError> {
        Ok(self.session(session_id)?.info())
    }

    /// Ids of all registered sessions.
    pub fn list_sessions(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    /// Metadata for all registered sessions.
    pub fn list_session_info(&self) -> Vec<SessionInfo> {
        self.sessions.values().map(VncSessionHandle::info).collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Drop sessions that reached a terminal state.  Returns the removed
    /// ids.
    pub fn prune_disconnected(&mut self) -> Vec<String> {
        let dead: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.state().is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &dead {
            self.sessions.remove(id);
        }
        dead
    }
}
