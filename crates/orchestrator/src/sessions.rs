//! Process-wide table of in-flight script executions.
//!
//! The registry only stores and looks up sessions. Ownership checks happen in
//! the caller before `cancel` is invoked.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use events::{Event, EventBus};
use provision_core::{Owner, SessionSummary};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One registered script run. The running process itself is owned by the
/// runner; the session only carries the cancellation handle.
#[derive(Debug)]
pub struct ExecutionSession {
    pub id: Uuid,
    pub instance_id: String,
    pub owner: Owner,
    pub created_at: DateTime<Utc>,
    cancel: CancellationToken,
    cancel_requested: AtomicBool,
}

impl ExecutionSession {
    pub fn new(instance_id: impl Into<String>, owner: Owner) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id: instance_id.into(),
            owner,
            created_at: Utc::now(),
            cancel: CancellationToken::new(),
            cancel_requested: AtomicBool::new(false),
        }
    }

    /// Token the runner watches.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            instance_id: self.instance_id.clone(),
            organization_id: self.owner.organization_id.clone(),
            user_id: self.owner.user_id.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, Arc<ExecutionSession>>>>,
    event_bus: Option<EventBus>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn register(&self, session: ExecutionSession) -> Arc<ExecutionSession> {
        let session = Arc::new(session);
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id, Arc::clone(&session));

        info!(
            session_id = %session.id,
            instance = %session.instance_id,
            user_id = %session.owner.user_id,
            "Session registered"
        );
        if let Some(ref bus) = self.event_bus {
            bus.emit(Event::SessionStarted {
                session_id: session.id,
                instance_id: session.instance_id.clone(),
                user_id: session.owner.user_id.clone(),
            });
        }
        session
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<ExecutionSession>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Signal cancellation. Returns `false` for unknown sessions and for
    /// sessions that were already cancelled.
    pub fn cancel(&self, id: Uuid) -> bool {
        let Some(session) = self.get(id) else {
            debug!(session_id = %id, "Cancel requested for unknown session");
            return false;
        };
        if session
            .cancel_requested
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(session_id = %id, "Session already cancelled");
            return false;
        }
        session.cancel.cancel();
        info!(session_id = %id, instance = %session.instance_id, "Session cancelled");
        true
    }

    pub fn unregister(&self, id: Uuid) -> Option<Arc<ExecutionSession>> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if removed.is_some() {
            debug!(session_id = %id, "Session unregistered");
        }
        removed
    }

    /// In-flight sessions started by `owner`, oldest first.
    pub fn sessions_for(&self, owner: &Owner) -> Vec<SessionSummary> {
        let mut sessions: Vec<_> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| &s.owner == owner)
            .map(|s| s.summary())
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn emit_ended(&self, session: &ExecutionSession, outcome: &str) {
        if let Some(ref bus) = self.event_bus {
            bus.emit(Event::SessionEnded {
                session_id: session.id,
                instance_id: session.instance_id.clone(),
                outcome: outcome.to_string(),
            });
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}

/// Removes a session from the registry when the run ends, however it ends.
pub struct SessionGuard {
    registry: SessionRegistry,
    session: Arc<ExecutionSession>,
    outcome: Option<String>,
}

impl SessionGuard {
    pub fn register(registry: &SessionRegistry, session: ExecutionSession) -> Self {
        let session = registry.register(session);
        Self {
            registry: registry.clone(),
            session,
            outcome: None,
        }
    }

    pub fn session(&self) -> &Arc<ExecutionSession> {
        &self.session
    }

    pub fn id(&self) -> Uuid {
        self.session.id
    }

    /// Record how the run ended; published when the guard drops.
    pub fn finish(&mut self, outcome: impl Into<String>) {
        self.outcome = Some(outcome.into());
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.session.id);
        let outcome = match self.outcome.take() {
            Some(outcome) => outcome,
            None => {
                warn!(
                    session_id = %self.session.id,
                    "Session guard dropped without an outcome"
                );
                "terminated unexpectedly".to_string()
            }
        };
        self.registry.emit_ended(&self.session, &outcome);
    }
}
