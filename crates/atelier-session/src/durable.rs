use crate::session::{Session, SessionEvent};
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable-store failure. Background persistence logs these; awaited
/// persistence maps them to a 503 at the gateway boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Durable storage for sessions and events.
///
/// Upserts must be retry-safe: repeated persistence of the same id is a
/// no-op, so fire-and-forget writers can always try again.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn upsert_session(&self, session: &Session) -> StoreResult<()>;
    async fn upsert_event(&self, event: &SessionEvent) -> StoreResult<()>;
    async fn get_session(&self, id: &str) -> StoreResult<Option<Session>>;
    /// Newest-updated first.
    async fn list_sessions(&self, limit: usize) -> StoreResult<Vec<Session>>;
    /// Full event history for a session, oldest first.
    async fn events_for_session(&self, session_id: &str) -> StoreResult<Vec<SessionEvent>>;
}

/// Discards every write. Used when durability is disabled (tests, ephemeral
/// deployments).
pub struct NullStore;

#[async_trait]
impl DurableStore for NullStore {
    async fn upsert_session(&self, _session: &Session) -> StoreResult<()> {
        Ok(())
    }

    async fn upsert_event(&self, _event: &SessionEvent) -> StoreResult<()> {
        Ok(())
    }

    async fn get_session(&self, _id: &str) -> StoreResult<Option<Session>> {
        Ok(None)
    }

    async fn list_sessions(&self, _limit: usize) -> StoreResult<Vec<Session>> {
        Ok(Vec::new())
    }

    async fn events_for_session(&self, _session_id: &str) -> StoreResult<Vec<SessionEvent>> {
        Ok(Vec::new())
    }
}

/// File-based durable store: one JSON file per session under `sessions/`,
/// one per event under `events/<session_id>/`. Overwriting the same id with
/// the same record makes retries no-ops.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub async fn new(dir: PathBuf) -> StoreResult<Self> {
        tokio::fs::create_dir_all(dir.join("sessions")).await?;
        tokio::fs::create_dir_all(dir.join("events")).await?;
        Ok(Self { dir })
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.dir.join("sessions").join(format!("{id}.json"))
    }

    fn event_dir(&self, session_id: &str) -> PathBuf {
        self.dir.join("events").join(session_id)
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn upsert_session(&self, session: &Session) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(session)?;
        tokio::fs::write(self.session_path(&session.id), json).await?;
        Ok(())
    }

    async fn upsert_event(&self, event: &SessionEvent) -> StoreResult<()> {
        let dir = self.event_dir(&event.session_id);
        tokio::fs::create_dir_all(&dir).await?;
        let json = serde_json::to_string(event)?;
        tokio::fs::write(dir.join(format!("{}.json", event.id)), json).await?;
        Ok(())
    }

    async fn get_session(&self, id: &str) -> StoreResult<Option<Session>> {
        let path = self.session_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(path).await?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    async fn list_sessions(&self, limit: usize) -> StoreResult<Vec<Session>> {
        let mut sessions = Vec::new();
        let mut entries = tokio::fs::read_dir(self.dir.join("sessions")).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_str().is_some_and(|n| n.ends_with(".json")) {
                let data = tokio::fs::read_to_string(entry.path()).await?;
                if let Ok(session) = serde_json::from_str::<Session>(&data) {
                    sessions.push(session);
                }
            }
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(limit);
        Ok(sessions)
    }

    async fn events_for_session(&self, session_id: &str) -> StoreResult<Vec<SessionEvent>> {
        let dir = self.event_dir(session_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut events = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let data = tokio::fs::read_to_string(entry.path()).await?;
            if let Ok(event) = serde_json::from_str::<SessionEvent>(&data) {
                events.push(event);
            }
        }
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(events)
    }
}
