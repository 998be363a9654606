//! Per-session state keyed by session id.
//!
//! Each session sits behind its own async mutex. The orchestrator holds
//! that lock for a whole turn, which is what limits a session to one turn
//! in flight; different sessions never contend.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use studybuddy_core::{DeveloperInfo, Roster, Session, SessionContext, SessionKey};

/// Everything a session owns.
#[derive(Debug)]
pub struct SessionState {
    /// Turn history
    pub session: Session,

    /// Context threaded through each turn of this session
    pub context: SessionContext,

    /// Agents available to this session, fixed at session start
    pub roster: Arc<Roster>,
}

impl SessionState {
    pub fn new(key: SessionKey, developer: Option<DeveloperInfo>, roster: Arc<Roster>) -> Self {
        Self {
            session: Session::new(key.clone()),
            context: SessionContext::new(key, developer),
            roster,
        }
    }
}

/// Handle to one session's state.
pub type SessionHandle = Arc<Mutex<SessionState>>;

pub struct SessionStore {
    sessions: RwLock<HashMap<SessionKey, SessionHandle>>,
    developer: Option<DeveloperInfo>,
    roster: Arc<Roster>,
}

impl SessionStore {
    /// New sessions get `roster` and the `developer` record.
    pub fn new(roster: Arc<Roster>, developer: Option<DeveloperInfo>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            developer,
            roster,
        }
    }

    /// Return the session for `key`, creating it on first use.
    pub fn get_or_create(&self, key: &SessionKey) -> SessionHandle {
        if let Some(handle) = self.sessions.read().get(key) {
            return handle.clone();
        }

        self.sessions
            .write()
            .entry(key.clone())
            .or_insert_with(|| {
                tracing::info!(session = %key, "Session started");
                Arc::new(Mutex::new(SessionState::new(
                    key.clone(),
                    self.developer.clone(),
                    self.roster.clone(),
                )))
            })
            .clone()
    }

    pub fn get(&self, key: &SessionKey) -> Option<SessionHandle> {
        self.sessions.read().get(key).cloned()
    }

    /// Drop a session from the store and return its handle.
    pub fn remove(&self, key: &SessionKey) -> Option<SessionHandle> {
        self.sessions.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
