//! The network-facing Atelier gateway: envelope validation, connector
//! policy resolution, HMAC signature verification, idempotent event
//! application, and sliding-window admission control — everything sitting
//! between untrusted network input and the session store.

pub mod counter;
pub mod extract;
pub mod ingest;
pub mod server;
pub mod validate;

pub use counter::{CounterError, CounterStore, MemoryCounterStore};
pub use extract::derive_external_session_id;
pub use ingest::{IngestHeaders, IngestOutcome, IngestPipeline, IngestSettings};
pub use server::{AppState, GatewayServer};
pub use validate::{BudgetConfig, IngestBody, SizeBudget};
