use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Where a signing secret came from. Connector-scoped secrets always outrank
/// global ones during candidate resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretSource {
    Connector,
    Global,
}

/// A signing secret configured for a specific connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorSecret {
    /// Present for keyed rotation (`x-gateway-key-id` pins a specific key).
    pub key_id: Option<String>,
    pub secret: String,
}

/// One candidate secret to try during verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureCandidate {
    pub key_id: Option<String>,
    pub secret: String,
    pub source: SecretSource,
}

/// Build the global secret list from the primary secret plus a CSV of
/// previous secrets kept alive during rotation.
///
/// Blanks are dropped, duplicates removed, and the primary stays first so
/// the common case verifies on the first HMAC computation.
pub fn parse_global_secret_list(primary: Option<&str>, previous_csv: Option<&str>) -> Vec<String> {
    let mut secrets: Vec<String> = Vec::new();
    let candidates = primary
        .into_iter()
        .chain(previous_csv.iter().flat_map(|csv| csv.split(',')));
    for raw in candidates {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !secrets.iter().any(|s| s == trimmed) {
            secrets.push(trimmed.to_string());
        }
    }
    secrets
}

/// Inputs to [`resolve_signature_candidates`].
#[derive(Debug, Clone, Copy)]
pub struct CandidateQuery<'a> {
    pub connector_secrets: &'a [ConnectorSecret],
    pub global_secrets: &'a [String],
    /// Value of the `x-gateway-key-id` header, if the caller pinned a key.
    pub requested_key_id: Option<&'a str>,
    pub require_connector_secret: bool,
}

/// Resolve the ordered list of secrets to try for a request.
///
/// Connector secrets win outright when configured. A connector that
/// requires its own secret but has none gets an empty list, which the
/// caller must turn into a 403. Otherwise the global rotation list is used
/// with synthesized key ids (`global-primary`, `global-prev-1`, ...).
pub fn resolve_signature_candidates(query: &CandidateQuery<'_>) -> Vec<SignatureCandidate> {
    if !query.connector_secrets.is_empty() {
        return query
            .connector_secrets
            .iter()
            .filter(|entry| match query.requested_key_id {
                Some(requested) => entry.key_id.as_deref() == Some(requested),
                None => true,
            })
            .map(|entry| SignatureCandidate {
                key_id: entry.key_id.clone(),
                secret: entry.secret.clone(),
                source: SecretSource::Connector,
            })
            .collect();
    }

    if query.require_connector_secret {
        return Vec::new();
    }

    query
        .global_secrets
        .iter()
        .enumerate()
        .map(|(index, secret)| SignatureCandidate {
            key_id: Some(if index == 0 {
                "global-primary".to_string()
            } else {
                format!("global-prev-{index}")
            }),
            secret: secret.clone(),
            source: SecretSource::Global,
        })
        .filter(|candidate| match query.requested_key_id {
            Some(requested) => candidate.key_id.as_deref() == Some(requested),
            None => true,
        })
        .collect()
}

/// Serialize a JSON value with object keys recursively sorted, so signer and
/// verifier agree on the byte representation regardless of field order.
pub fn canonical_json(value: &Value) -> String {
    fn sort(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut sorted = serde_json::Map::with_capacity(entries.len());
                for (key, inner) in entries {
                    sorted.insert(key.clone(), sort(inner));
                }
                Value::Object(sorted)
            }
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    sort(value).to_string()
}

/// Compute `HMAC-SHA256(secret, "{timestamp}.{canonical_body}")` as lowercase hex.
///
/// Signers (and the test suite) use this to produce `x-gateway-signature`
/// values.
pub fn compute_signature(secret: &str, timestamp: i64, canonical_body: &str) -> String {
    // HMAC accepts keys of any length, so new_from_slice cannot fail here.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(format!("{timestamp}.{canonical_body}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Try every candidate in order and return the first whose HMAC matches.
///
/// Comparison goes through `Mac::verify_slice`, which is constant-time, so
/// an attacker cannot learn how many signature bytes matched. Returns `None`
/// when the hex is malformed or no candidate verifies.
pub fn verify_signature_with_candidates<'a>(
    signature_hex: &str,
    timestamp: i64,
    canonical_body: &str,
    candidates: &'a [SignatureCandidate],
) -> Option<&'a SignatureCandidate> {
    let signature = hex::decode(signature_hex.trim()).ok()?;
    let message = format!("{timestamp}.{canonical_body}");

    candidates.iter().find(|candidate| {
        let Ok(mut mac) = HmacSha256::new_from_slice(candidate.secret.as_bytes()) else {
            return false;
        };
        mac.update(message.as_bytes());
        mac.verify_slice(&signature).is_ok()
    })
}
