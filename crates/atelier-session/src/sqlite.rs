//! `rusqlite`-backed durable store. Enabled with the `sqlite` cargo feature.

use crate::durable::{DurableStore, StoreError, StoreResult};
use crate::session::{Session, SessionEvent, SessionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    channel TEXT NOT NULL,
    external_session_id TEXT,
    draft_id TEXT,
    roles TEXT NOT NULL,
    metadata TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    from_role TEXT NOT NULL,
    to_role TEXT,
    event_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_session ON events(session_id, created_at);
";

/// SQLite durable store. Upserts use `ON CONFLICT` so repeated persistence
/// of the same id is a no-op.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .map_err(|e| StoreError::Backend(format!("store task failed: {e}")))?
    }
}

fn parse_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("bad timestamp '{raw}': {e}")))
}

/// Raw session columns before JSON/timestamp decoding.
struct SessionRow {
    id: String,
    channel: String,
    external_session_id: Option<String>,
    draft_id: Option<String>,
    roles: String,
    metadata: String,
    status: String,
    created_at: String,
    updated_at: String,
}

impl SessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            channel: row.get(1)?,
            external_session_id: row.get(2)?,
            draft_id: row.get(3)?,
            roles: row.get(4)?,
            metadata: row.get(5)?,
            status: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_session(self) -> StoreResult<Session> {
        Ok(Session {
            id: self.id,
            channel: self.channel,
            external_session_id: self.external_session_id,
            draft_id: self.draft_id,
            roles: serde_json::from_str(&self.roles)?,
            metadata: serde_json::from_str(&self.metadata)?,
            status: match self.status.as_str() {
                "closed" => SessionStatus::Closed,
                _ => SessionStatus::Active,
            },
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

/// Raw event columns before JSON/timestamp decoding.
struct EventRow {
    id: String,
    session_id: String,
    from_role: String,
    to_role: Option<String>,
    event_type: String,
    payload: String,
    created_at: String,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            from_role: row.get(2)?,
            to_role: row.get(3)?,
            event_type: row.get(4)?,
            payload: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_event(self) -> StoreResult<SessionEvent> {
        Ok(SessionEvent {
            id: self.id,
            session_id: self.session_id,
            from_role: self.from_role,
            to_role: self.to_role,
            event_type: self.event_type,
            payload: serde_json::from_str(&self.payload)?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn upsert_session(&self, session: &Session) -> StoreResult<()> {
        let session = session.clone();
        self.with_conn(move |conn| {
            let roles = serde_json::to_string(&session.roles)?;
            let metadata = serde_json::to_string(&session.metadata)?;
            let status = match session.status {
                SessionStatus::Active => "active",
                SessionStatus::Closed => "closed",
            };
            conn.execute(
                "INSERT INTO sessions
                     (id, channel, external_session_id, draft_id, roles, metadata, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                     roles = excluded.roles,
                     metadata = excluded.metadata,
                     status = excluded.status,
                     updated_at = excluded.updated_at",
                params![
                    session.id,
                    session.channel,
                    session.external_session_id,
                    session.draft_id,
                    roles,
                    metadata,
                    status,
                    session.created_at.to_rfc3339(),
                    session.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn upsert_event(&self, event: &SessionEvent) -> StoreResult<()> {
        let event = event.clone();
        self.with_conn(move |conn| {
            let payload = serde_json::to_string(&event.payload)?;
            // Events are immutable: a conflicting id means a retried write.
            conn.execute(
                "INSERT INTO events
                     (id, session_id, from_role, to_role, event_type, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO NOTHING",
                params![
                    event.id,
                    event.session_id,
                    event.from_role,
                    event.to_role,
                    event.event_type,
                    payload,
                    event.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_session(&self, id: &str) -> StoreResult<Option<Session>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let loaded = conn
                .query_row(
                    "SELECT id, channel, external_session_id, draft_id, roles, metadata, status, created_at, updated_at
                     FROM sessions WHERE id = ?1",
                    params![id],
                    SessionRow::from_row,
                )
                .optional()?;
            loaded.map(SessionRow::into_session).transpose()
        })
        .await
    }

    async fn list_sessions(&self, limit: usize) -> StoreResult<Vec<Session>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, channel, external_session_id, draft_id, roles, metadata, status, created_at, updated_at
                 FROM sessions ORDER BY updated_at DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], SessionRow::from_row)?;
            let mut sessions = Vec::new();
            for row in rows {
                sessions.push(row?.into_session()?);
            }
            Ok(sessions)
        })
        .await
    }

    async fn events_for_session(&self, session_id: &str) -> StoreResult<Vec<SessionEvent>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, from_role, to_role, event_type, payload, created_at
                 FROM events WHERE session_id = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map(params![session_id], EventRow::from_row)?;
            let mut events = Vec::new();
            for row in rows {
                events.push(row?.into_event()?);
            }
            Ok(events)
        })
        .await
    }
}
