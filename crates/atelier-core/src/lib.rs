//! Core vocabulary shared by every Atelier crate: the typed error model and
//! the adapter kinds.
//!
//! Gateway failures are `(code, message, HTTP status)` triples so that the
//! network layer, the stores, and the telemetry stream all speak the same
//! vocabulary.

pub mod adapter;
pub mod error;

pub use adapter::AdapterKind;
pub use error::{ErrorCode, GatewayError, GatewayResult};
