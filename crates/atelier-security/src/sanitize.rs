use atelier_core::{ErrorCode, GatewayError, GatewayResult};
use once_cell::sync::Lazy;
use regex::Regex;

/// Derived external session ids are capped at this length.
pub const EXTERNAL_ID_MAX_LEN: usize = 128;

// Lowercase alnum start, then a limited punctuation set, bounded length.
#[allow(clippy::expect_used)]
static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9_.:-]{0,63}$").expect("identifier regex is valid")
});

/// Normalize and validate a routing identifier (channel, role, event type,
/// connector id, adapter name).
///
/// Identifiers are lowercased and trimmed before matching so routing and
/// filtering stay case-insensitive.
pub fn validate_identifier(field: &str, value: &str) -> GatewayResult<String> {
    let normalized = value.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(GatewayError::new(
            ErrorCode::InvalidIdentifier,
            format!("field '{field}' cannot be blank"),
        ));
    }
    if !IDENTIFIER_RE.is_match(&normalized) {
        return Err(GatewayError::new(
            ErrorCode::InvalidIdentifier,
            format!("field '{field}' has an invalid value"),
        ));
    }
    Ok(normalized)
}

/// Sanitize an externally-derived session identifier.
///
/// Lowercases, maps whitespace to underscores, strips everything outside
/// the allowed charset, and caps the result at [`EXTERNAL_ID_MAX_LEN`].
pub fn sanitize_external_id(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '.' | '-'))
        .take(EXTERNAL_ID_MAX_LEN)
        .collect()
}
