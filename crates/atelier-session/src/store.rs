use crate::durable::DurableStore;
use crate::session::{
    derive_session_id, NewEvent, NewSession, Session, SessionEvent, SessionStatus,
};
use atelier_core::{ErrorCode, GatewayError, GatewayResult};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Default cap on in-memory events retained per session.
pub const DEFAULT_EVENT_RETENTION: usize = 200;

#[derive(Default)]
struct State {
    by_id: HashMap<String, Session>,
    /// `"{channel}|{lowercase(externalSessionId)}"` -> session id.
    by_external: HashMap<String, String>,
    events: HashMap<String, VecDeque<SessionEvent>>,
}

/// Read filters for [`SessionStore::list_sessions`].
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub channel: Option<String>,
    pub status: Option<SessionStatus>,
}

/// The session and event store.
///
/// In-memory writes complete before the caller observes the result; durable
/// persistence runs as a fire-and-forget background task whose failures are
/// logged and never propagated. Callers that need at-least-once durability
/// before responding use the awaited `persist_*` methods instead.
pub struct SessionStore {
    state: RwLock<State>,
    durable: Arc<dyn DurableStore>,
    retention: usize,
}

impl SessionStore {
    pub fn new(durable: Arc<dyn DurableStore>) -> Self {
        Self::with_retention(durable, DEFAULT_EVENT_RETENTION)
    }

    pub fn with_retention(durable: Arc<dyn DurableStore>, retention: usize) -> Self {
        Self {
            state: RwLock::new(State::default()),
            durable,
            retention: retention.max(1),
        }
    }

    /// Create a session, or return the existing one unchanged when an
    /// external session id is given and already known (idempotent create).
    pub fn create_session(&self, channel: &str, seed: NewSession) -> GatewayResult<Session> {
        let channel = normalize(channel);
        if channel.is_empty() {
            return Err(GatewayError::new(
                ErrorCode::ChannelRequired,
                "channel is required",
            ));
        }

        let external = seed
            .external_session_id
            .as_deref()
            .map(normalize)
            .filter(|s| !s.is_empty());

        let mut state = self.state.write();

        if let Some(external) = &external {
            let key = external_key(&channel, external);
            if let Some(existing_id) = state.by_external.get(&key) {
                if let Some(existing) = state.by_id.get(existing_id) {
                    return Ok(existing.clone());
                }
            }
        }

        let id = match seed.id {
            Some(id) if !id.trim().is_empty() => {
                let id = id.trim().to_string();
                if let Some(existing) = state.by_id.get(&id) {
                    return Ok(existing.clone());
                }
                id
            }
            _ => match &external {
                Some(external) => derive_session_id(&channel, external),
                None => Uuid::new_v4().to_string(),
            },
        };

        // A deterministic id can collide with a session created through a
        // previous ensure call; resolve to it rather than overwriting.
        if let Some(existing) = state.by_id.get(&id) {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let session = Session {
            id: id.clone(),
            channel: channel.clone(),
            external_session_id: external.clone(),
            draft_id: seed.draft_id.filter(|d| !d.trim().is_empty()),
            roles: normalize_roles(&seed.roles),
            metadata: seed.metadata,
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
        };

        if let Some(external) = &external {
            state
                .by_external
                .insert(external_key(&channel, external), id.clone());
        }
        state.by_id.insert(id.clone(), session.clone());
        state.events.insert(id, VecDeque::new());
        drop(state);

        self.spawn_persist(Some(session.clone()), None);
        Ok(session)
    }

    /// Required-external-id variant of [`Self::create_session`].
    pub fn ensure_external_session(
        &self,
        channel: &str,
        external_session_id: &str,
        mut seed: NewSession,
    ) -> GatewayResult<Session> {
        if channel.trim().is_empty() {
            return Err(GatewayError::new(
                ErrorCode::ChannelRequired,
                "channel is required",
            ));
        }
        if external_session_id.trim().is_empty() {
            return Err(GatewayError::new(
                ErrorCode::ExternalSessionRequired,
                "externalSessionId is required",
            ));
        }
        seed.external_session_id = Some(external_session_id.to_string());
        self.create_session(channel, seed)
    }

    /// Append an event to an active session.
    ///
    /// Roles and the event type are lowercased and trimmed at write time so
    /// routing and filtering stay case-insensitive.
    pub fn append_event(&self, session_id: &str, event: NewEvent) -> GatewayResult<SessionEvent> {
        let from_role = normalize(&event.from_role);
        if from_role.is_empty() {
            return Err(GatewayError::new(
                ErrorCode::FromRoleRequired,
                "fromRole is required",
            ));
        }
        let event_type = normalize(&event.event_type);
        if event_type.is_empty() {
            return Err(GatewayError::new(
                ErrorCode::EventTypeRequired,
                "type is required",
            ));
        }
        let to_role = event.to_role.as_deref().map(normalize).filter(|r| !r.is_empty());

        let mut state = self.state.write();
        let session = state.by_id.get_mut(session_id).ok_or_else(|| {
            GatewayError::new(
                ErrorCode::SessionNotFound,
                format!("unknown session '{session_id}'"),
            )
        })?;
        if session.is_closed() {
            return Err(GatewayError::new(
                ErrorCode::SessionClosed,
                format!("session '{session_id}' is closed"),
            ));
        }

        let now = Utc::now();
        session.updated_at = now;
        let snapshot = session.clone();

        let record = SessionEvent {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            from_role,
            to_role,
            event_type,
            payload: event.payload,
            created_at: now,
        };

        let ring = state.events.entry(session_id.to_string()).or_default();
        ring.push_back(record.clone());
        while ring.len() > self.retention {
            ring.pop_front();
        }
        drop(state);

        self.spawn_persist(Some(snapshot), Some(record.clone()));
        Ok(record)
    }

    /// Close a session. Closing an already-closed session is a no-op that
    /// returns the current state.
    pub fn close_session(&self, session_id: &str) -> GatewayResult<Session> {
        let mut state = self.state.write();
        let session = state.by_id.get_mut(session_id).ok_or_else(|| {
            GatewayError::new(
                ErrorCode::SessionNotFound,
                format!("unknown session '{session_id}'"),
            )
        })?;
        if session.is_closed() {
            return Ok(session.clone());
        }
        session.status = SessionStatus::Closed;
        session.updated_at = Utc::now();
        let snapshot = session.clone();
        drop(state);

        self.spawn_persist(Some(snapshot.clone()), None);
        Ok(snapshot)
    }

    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.state.read().by_id.get(session_id).cloned()
    }

    /// Sessions known to this process, newest-updated first.
    pub fn list_sessions(&self, limit: usize, filter: &SessionFilter) -> Vec<Session> {
        let state = self.state.read();
        let mut sessions: Vec<Session> = state
            .by_id
            .values()
            .filter(|s| {
                filter.channel.as_deref().map_or(true, |c| s.channel == c)
                    && filter.status.map_or(true, |status| s.status == status)
            })
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(limit);
        sessions
    }

    /// The in-memory event ring for a session, oldest first.
    pub fn events(&self, session_id: &str) -> Vec<SessionEvent> {
        self.state
            .read()
            .events
            .get(session_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Awaited durable upsert of a session. Safe to retry.
    pub async fn persist_session(&self, session: &Session) -> GatewayResult<()> {
        self.durable.upsert_session(session).await.map_err(|e| {
            GatewayError::new(ErrorCode::StoreUnavailable, format!("session persist failed: {e}"))
        })
    }

    /// Awaited durable upsert of an event. Safe to retry.
    pub async fn persist_event(&self, event: &SessionEvent) -> GatewayResult<()> {
        self.durable.upsert_event(event).await.map_err(|e| {
            GatewayError::new(ErrorCode::StoreUnavailable, format!("event persist failed: {e}"))
        })
    }

    /// Durable-store lookup for sessions this process has no local knowledge
    /// of (e.g. created by a different gateway instance).
    pub async fn get_persisted_session(&self, session_id: &str) -> GatewayResult<Option<Session>> {
        self.durable.get_session(session_id).await.map_err(|e| {
            GatewayError::new(ErrorCode::StoreUnavailable, format!("session read failed: {e}"))
        })
    }

    pub async fn list_persisted_sessions(&self, limit: usize) -> GatewayResult<Vec<Session>> {
        self.durable.list_sessions(limit).await.map_err(|e| {
            GatewayError::new(ErrorCode::StoreUnavailable, format!("session list failed: {e}"))
        })
    }

    /// Background dual-write. Failures are logged, never surfaced: the
    /// in-memory write already succeeded and the caller has its answer.
    fn spawn_persist(&self, session: Option<Session>, event: Option<SessionEvent>) {
        let durable = Arc::clone(&self.durable);
        tokio::spawn(async move {
            if let Some(event) = event {
                if let Err(e) = durable.upsert_event(&event).await {
                    warn!(event_id = %event.id, error = %e, "background event persist failed");
                }
            }
            if let Some(session) = session {
                if let Err(e) = durable.upsert_session(&session).await {
                    warn!(session_id = %session.id, error = %e, "background session persist failed");
                }
            }
        });
    }
}

fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn external_key(channel: &str, external: &str) -> String {
    format!("{channel}|{}", external.to_lowercase())
}

fn normalize_roles(roles: &[String]) -> BTreeSet<String> {
    roles
        .iter()
        .map(|r| normalize(r))
        .filter(|r| !r.is_empty())
        .collect()
}
