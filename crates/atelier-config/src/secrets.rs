use crate::error::ConfigError;
use atelier_security::ConnectorSecret;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Raw shape of one connector's secrets entry before normalization.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SecretsValue {
    /// A single secret.
    Single(String),
    /// Unkeyed rotation: old and new secrets coexist until rotation completes.
    Rotation(Vec<String>),
    /// Keyed rotation: callers can pin a key via `x-gateway-key-id`.
    Keyed(BTreeMap<String, String>),
}

/// Parse the connector-secrets JSON blob into `connectorId -> secrets`.
///
/// Accepted value shapes per connector: a plain string, an array of strings,
/// or an object of `keyId -> secret`. Blank secrets are dropped silently;
/// connectors whose entries are all blank are omitted entirely. Any other
/// shape is a startup error naming the connector.
pub fn parse_connector_secrets(
    raw: &str,
) -> Result<HashMap<String, Vec<ConnectorSecret>>, ConfigError> {
    if raw.trim().is_empty() {
        return Ok(HashMap::new());
    }

    let value: Value = serde_json::from_str(raw)?;
    let Value::Object(entries) = value else {
        return Err(ConfigError::NotAnObject);
    };

    let mut secrets = HashMap::with_capacity(entries.len());
    for (connector, entry) in entries {
        let parsed: SecretsValue = serde_json::from_value(entry).map_err(|_| {
            ConfigError::connector(
                &connector,
                "secrets must be a string, an array of strings, or an object of keyId -> secret",
            )
        })?;

        let candidates: Vec<(Option<String>, String)> = match parsed {
            SecretsValue::Single(secret) => vec![(None, secret)],
            SecretsValue::Rotation(list) => list.into_iter().map(|s| (None, s)).collect(),
            SecretsValue::Keyed(map) => map.into_iter().map(|(k, s)| (Some(k), s)).collect(),
        };

        let cleaned: Vec<ConnectorSecret> = candidates
            .into_iter()
            .filter(|(_, secret)| !secret.trim().is_empty())
            .map(|(key_id, secret)| ConnectorSecret {
                key_id: key_id.map(|k| k.trim().to_string()),
                secret: secret.trim().to_string(),
            })
            .collect();

        if !cleaned.is_empty() {
            secrets.insert(connector.trim().to_lowercase(), cleaned);
        }
    }

    Ok(secrets)
}
