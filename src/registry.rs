//! In-flight session bookkeeping
//!
//! Every relayed request owns one slot in the [`SessionRegistry`] for as long
//! as its [`SessionGuard`] is alive. The registry is bounded: once
//! `max_sessions` slots are taken, new registrations fail immediately with
//! [`Error::CapacityExceeded`].

use super::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Opaque session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    fn generate() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(SessionId)
    }
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Pending,
    Streaming,
    Complete,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Complete | SessionState::Failed | SessionState::Cancelled
        )
    }

    /// Transitions only move forward; terminal states are final
    pub fn can_transition_to(self, next: SessionState) -> bool {
        match (self, next) {
            (SessionState::Pending, SessionState::Pending) => false,
            (SessionState::Pending, _) => true,
            (SessionState::Streaming, next) => next.is_terminal(),
            _ => false,
        }
    }
}

struct Entry {
    state: SessionState,
    model: String,
    streaming: bool,
    created_at: DateTime<Utc>,
    cancel: CancellationToken,
}

/// Public view of one in-flight session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub state: SessionState,
    pub model: String,
    pub streaming: bool,
    pub created_at: DateTime<Utc>,
}

/// Bounded registry of in-flight sessions
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Entry>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            max_sessions,
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Entry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim a slot for a new session.
    ///
    /// The returned guard releases the slot when dropped.
    pub fn register(self: &Arc<Self>, model: &str, streaming: bool) -> Result<SessionGuard> {
        let id = SessionId::generate();
        let cancel = CancellationToken::new();

        {
            let mut sessions = self.lock();
            if sessions.len() >= self.max_sessions {
                warn!(
                    "Rejecting session: {} of {} slots in use",
                    sessions.len(),
                    self.max_sessions
                );
                return Err(Error::CapacityExceeded {
                    limit: self.max_sessions,
                });
            }
            sessions.insert(
                id,
                Entry {
                    state: SessionState::Pending,
                    model: model.to_string(),
                    streaming,
                    created_at: Utc::now(),
                    cancel: cancel.clone(),
                },
            );
        }

        debug!(session = %id, model, streaming, "Session registered");
        Ok(SessionGuard {
            id,
            registry: Arc::clone(self),
            cancel,
        })
    }

    fn transition(&self, id: SessionId, next: SessionState) -> bool {
        let mut sessions = self.lock();
        let Some(entry) = sessions.get_mut(&id) else {
            return false;
        };
        if !entry.state.can_transition_to(next) {
            debug!(session = %id, "Ignoring transition {:?} -> {:?}", entry.state, next);
            return false;
        }
        entry.state = next;
        true
    }

    /// Move a terminal-bound session to `state` and drop it from the registry
    fn finish(&self, id: SessionId, state: SessionState) -> bool {
        let mut sessions = self.lock();
        let Some(entry) = sessions.remove(&id) else {
            return false;
        };
        let applied = entry.state.can_transition_to(state);
        debug!(
            session = %id,
            "Session finished as {:?} (was {:?})",
            if applied { state } else { entry.state },
            entry.state
        );
        applied
    }

    /// Mark that the first upstream bytes have arrived
    pub fn mark_streaming(&self, id: SessionId) -> bool {
        self.transition(id, SessionState::Streaming)
    }

    /// Mark the session complete and release its slot
    pub fn complete(&self, id: SessionId) -> bool {
        self.finish(id, SessionState::Complete)
    }

    /// Mark the session failed and release its slot
    pub fn fail(&self, id: SessionId) -> bool {
        self.finish(id, SessionState::Failed)
    }

    /// Cancel a session and signal its upstream call to abort.
    ///
    /// The slot stays taken until the relaying task lets go of its guard.
    pub fn cancel(&self, id: SessionId) -> bool {
        let token = {
            let mut sessions = self.lock();
            let Some(entry) = sessions.get_mut(&id) else {
                return false;
            };
            if !entry.state.can_transition_to(SessionState::Cancelled) {
                return false;
            }
            entry.state = SessionState::Cancelled;
            entry.cancel.clone()
        };
        token.cancel();
        info!(session = %id, "Session cancelled");
        true
    }

    /// Cancel every in-flight session, returning how many were signalled
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<SessionId> = self.lock().keys().copied().collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    fn release(&self, id: SessionId) {
        if let Some(entry) = self.lock().remove(&id) {
            if !entry.state.is_terminal() {
                debug!(session = %id, "Session dropped while {:?}", entry.state);
            }
        }
    }

    /// Current state of a session still in the registry
    pub fn state(&self, id: SessionId) -> Option<SessionState> {
        self.lock().get(&id).map(|entry| entry.state)
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upper bound on concurrent sessions
    pub fn capacity(&self) -> usize {
        self.max_sessions
    }

    /// Sessions currently in flight, oldest first
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .lock()
            .iter()
            .map(|(id, entry)| SessionInfo {
                id: *id,
                state: entry.state,
                model: entry.model.clone(),
                streaming: entry.streaming,
                created_at: entry.created_at,
            })
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }
}

/// Scoped ownership of a registry slot.
///
/// Dropping the guard releases the slot and fires the session's cancellation
/// token, so an upstream call still in flight is told to stop.
pub struct SessionGuard {
    id: SessionId,
    registry: Arc<SessionRegistry>,
    cancel: CancellationToken,
}

impl SessionGuard {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Token that fires when the session is cancelled or dropped
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn mark_streaming(&self) -> bool {
        self.registry.mark_streaming(self.id)
    }

    pub fn complete(&self) -> bool {
        self.registry.complete(self.id)
    }

    pub fn fail(&self) -> bool {
        self.registry.fail(self.id)
    }

    /// Record the terminal state that matches `err`
    pub fn finish_with(&self, err: &Error) {
        if err.is_cancellation() {
            self.registry.finish(self.id, SessionState::Cancelled);
        } else {
            self.fail();
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.registry.release(self.id);
    }
}

impl fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGuard").field("id", &self.id).finish()
    }
}
