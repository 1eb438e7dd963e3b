//! The authoritative state machine for gateway sessions and their
//! append-only event logs.
//!
//! Writes land in an in-memory index first (the one callers observe), then
//! flow to a durable store as fire-and-forget background tasks. The
//! in-memory index is a single-process cache; the durable store is the
//! cross-instance source of truth.

pub mod durable;
pub mod session;
pub mod store;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use durable::{DurableStore, FileStore, NullStore, StoreError, StoreResult};
pub use session::{
    derive_session_id, NewEvent, NewSession, Session, SessionEvent, SessionStatus,
};
pub use store::{SessionFilter, SessionStore};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
