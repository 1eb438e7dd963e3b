use serde::Serialize;
use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Machine-readable rejection codes surfaced on the wire as
/// `{"error": "<CODE>", "message": "..."}`.
///
/// Each code carries its HTTP status so callers never have to re-derive the
/// mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation (400)
    InvalidFields,
    InvalidQueryFields,
    InvalidIdentifier,
    ChannelRequired,
    ExternalSessionRequired,
    FromRoleRequired,
    EventTypeRequired,
    EventIdRequired,
    AdapterUnsupported,
    PayloadTooLarge,
    MetadataTooLarge,
    // Authentication (401)
    SignatureRequired,
    SignatureInvalid,
    SignatureTimestampRequired,
    SignatureTimestampInvalid,
    SignatureExpired,
    SignatureKeyUnknown,
    // Authorization (403)
    ConnectorForbidden,
    ConnectorSecretRequired,
    // Not found (404)
    SessionNotFound,
    // State conflict (409)
    SessionClosed,
    // Admission control (429)
    RateLimited,
    // Unavailable (503)
    IngestSecretNotConfigured,
    CounterStoreUnavailable,
    StoreUnavailable,
}

impl ErrorCode {
    /// The SCREAMING_SNAKE code written into responses and telemetry.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidFields => "INVALID_FIELDS",
            Self::InvalidQueryFields => "INVALID_QUERY_FIELDS",
            Self::InvalidIdentifier => "INVALID_IDENTIFIER",
            Self::ChannelRequired => "CHANNEL_REQUIRED",
            Self::ExternalSessionRequired => "EXTERNAL_SESSION_REQUIRED",
            Self::FromRoleRequired => "FROM_ROLE_REQUIRED",
            Self::EventTypeRequired => "EVENT_TYPE_REQUIRED",
            Self::EventIdRequired => "EVENT_ID_REQUIRED",
            Self::AdapterUnsupported => "ADAPTER_UNSUPPORTED",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::MetadataTooLarge => "METADATA_TOO_LARGE",
            Self::SignatureRequired => "SIGNATURE_REQUIRED",
            Self::SignatureInvalid => "SIGNATURE_INVALID",
            Self::SignatureTimestampRequired => "SIGNATURE_TIMESTAMP_REQUIRED",
            Self::SignatureTimestampInvalid => "SIGNATURE_TIMESTAMP_INVALID",
            Self::SignatureExpired => "SIGNATURE_EXPIRED",
            Self::SignatureKeyUnknown => "SIGNATURE_KEY_UNKNOWN",
            Self::ConnectorForbidden => "CONNECTOR_FORBIDDEN",
            Self::ConnectorSecretRequired => "CONNECTOR_SECRET_REQUIRED",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::SessionClosed => "SESSION_CLOSED",
            Self::RateLimited => "RATE_LIMITED",
            Self::IngestSecretNotConfigured => "INGEST_SECRET_NOT_CONFIGURED",
            Self::CounterStoreUnavailable => "COUNTER_STORE_UNAVAILABLE",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
        }
    }

    /// HTTP status for this code.
    pub fn http_status(self) -> u16 {
        match self {
            Self::InvalidFields
            | Self::InvalidQueryFields
            | Self::InvalidIdentifier
            | Self::ChannelRequired
            | Self::ExternalSessionRequired
            | Self::FromRoleRequired
            | Self::EventTypeRequired
            | Self::EventIdRequired
            | Self::AdapterUnsupported
            | Self::PayloadTooLarge
            | Self::MetadataTooLarge => 400,
            Self::SignatureRequired
            | Self::SignatureInvalid
            | Self::SignatureTimestampRequired
            | Self::SignatureTimestampInvalid
            | Self::SignatureExpired
            | Self::SignatureKeyUnknown => 401,
            Self::ConnectorForbidden | Self::ConnectorSecretRequired => 403,
            Self::SessionNotFound => 404,
            Self::SessionClosed => 409,
            Self::RateLimited => 429,
            Self::IngestSecretNotConfigured
            | Self::CounterStoreUnavailable
            | Self::StoreUnavailable => 503,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A gateway rejection: typed code plus a human-readable message.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct GatewayError {
    pub code: ErrorCode,
    pub message: String,
    /// Retry hint in seconds, only set for rate-limit rejections.
    pub retry_after: Option<u64>,
}

impl GatewayError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Rate-limit rejection with a `Retry-After` hint.
    pub fn rate_limited(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self {
            code: ErrorCode::RateLimited,
            message: message.into(),
            retry_after: Some(retry_after_secs),
        }
    }

    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_code_string_and_status() {
        assert_eq!(ErrorCode::SessionClosed.as_str(), "SESSION_CLOSED");
        assert_eq!(ErrorCode::SessionClosed.http_status(), 409);
        assert_eq!(ErrorCode::RateLimited.http_status(), 429);
        assert_eq!(ErrorCode::IngestSecretNotConfigured.http_status(), 503);
    }

    #[test]
    fn test_error_display() {
        let err = GatewayError::new(ErrorCode::SessionNotFound, "unknown session 'abc'");
        assert_eq!(err.to_string(), "SESSION_NOT_FOUND: unknown session 'abc'");
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn test_rate_limited_carries_retry_hint() {
        let err = GatewayError::rate_limited("limit exceeded", 42);
        assert_eq!(err.retry_after, Some(42));
        assert_eq!(err.code, ErrorCode::RateLimited);
    }
}
