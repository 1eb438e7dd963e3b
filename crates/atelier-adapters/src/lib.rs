//! Adapter resolution for the Atelier gateway.
//!
//! Turns an arbitrary external event description into a gateway-native
//! event, tagging it with the logical adapter that handled it and recording
//! telemetry around every routing attempt.

pub mod adapter;
pub mod router;

pub use adapter::{adapter_for_channel, resolve_adapter};
pub use router::{AdapterRouter, ExternalEvent, RoutedEvent, SessionEventRequest};
