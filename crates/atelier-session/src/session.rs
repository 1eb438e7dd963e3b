use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};

/// Session lifecycle. Monotonic: `Active -> Closed`, never reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Closed,
}

/// A logical collaboration thread identified by `(channel, externalSessionId)`
/// or an internal id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub channel: String,
    pub external_session_id: Option<String>,
    pub draft_id: Option<String>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn is_closed(&self) -> bool {
        self.status == SessionStatus::Closed
    }
}

/// An immutable, role-attributed message appended to a session's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    pub id: String,
    pub session_id: String,
    pub from_role: String,
    pub to_role: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Optional seed data for a session being created or ensured.
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub id: Option<String>,
    pub external_session_id: Option<String>,
    pub draft_id: Option<String>,
    pub roles: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Fields for an event about to be appended.
#[derive(Debug, Clone, Default)]
pub struct NewEvent {
    pub from_role: String,
    pub to_role: Option<String>,
    pub event_type: String,
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// Deterministic session id for externally-anchored sessions.
///
/// Retried "ensure session" calls for the same `(channel, externalSessionId)`
/// pair resolve to the same id without any lookup table, even across process
/// restarts.
pub fn derive_session_id(channel: &str, external_session_id: &str) -> String {
    let digest = Sha256::digest(
        format!("{channel}|{}", external_session_id.to_lowercase()).as_bytes(),
    );
    let hex = hex::encode(digest);
    format!("ext-{}", &hex[..32])
}
