//! Security primitives for the Atelier gateway: HMAC signature verification
//! with key rotation, identifier sanitization, and the append-only
//! telemetry stream.

pub mod sanitize;
pub mod signature;
pub mod telemetry;

pub use sanitize::{sanitize_external_id, validate_identifier, EXTERNAL_ID_MAX_LEN};
pub use signature::{
    canonical_json, compute_signature, parse_global_secret_list, resolve_signature_candidates,
    verify_signature_with_candidates, CandidateQuery, ConnectorSecret, SecretSource,
    SignatureCandidate,
};
pub use telemetry::{TelemetryCapture, TelemetryEvent, TelemetryLog, TelemetryOutcome};
