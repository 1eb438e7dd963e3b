use crate::error::ConfigError;
use atelier_core::AdapterKind;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;

/// Per-connector request defaults. Any field explicitly present in the
/// inbound request body overrides the corresponding profile default, never
/// the reverse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectorProfile {
    pub adapter: Option<AdapterKind>,
    pub channel: Option<String>,
    pub from_role: Option<String>,
    pub to_role: Option<String>,
    pub event_type: Option<String>,
}

impl ConnectorProfile {
    fn is_empty(&self) -> bool {
        self.adapter.is_none()
            && self.channel.is_none()
            && self.from_role.is_none()
            && self.to_role.is_none()
            && self.event_type.is_none()
    }
}

/// Parse the connector-profile JSON blob into `connectorId -> profile`.
///
/// Value shapes: a channel shorthand string, or an object with optional
/// `adapter` (one of the known adapter kinds), `channel`, `fromRole`,
/// `toRole`, `type`. An object with no fields set is rejected.
pub fn parse_connector_profiles(
    raw: &str,
) -> Result<HashMap<String, ConnectorProfile>, ConfigError> {
    if raw.trim().is_empty() {
        return Ok(HashMap::new());
    }

    let value: Value = serde_json::from_str(raw)?;
    let Value::Object(entries) = value else {
        return Err(ConfigError::NotAnObject);
    };

    let mut profiles = HashMap::with_capacity(entries.len());
    for (connector, entry) in entries {
        let profile = parse_profile_value(&connector, entry)?;
        profiles.insert(connector.trim().to_lowercase(), profile);
    }
    Ok(profiles)
}

fn parse_profile_value(connector: &str, value: Value) -> Result<ConnectorProfile, ConfigError> {
    match value {
        Value::String(channel) => {
            let channel = channel.trim().to_lowercase();
            if channel.is_empty() {
                return Err(ConfigError::connector(connector, "channel shorthand cannot be blank"));
            }
            Ok(ConnectorProfile {
                channel: Some(channel),
                ..ConnectorProfile::default()
            })
        }
        Value::Object(fields) => {
            let mut profile = ConnectorProfile::default();
            for (field, field_value) in fields {
                match field.as_str() {
                    "adapter" => {
                        let raw = string_field(connector, "adapter", &field_value)?;
                        profile.adapter = Some(AdapterKind::from_str(&raw).map_err(|_| {
                            ConfigError::connector(
                                connector,
                                format!("field 'adapter' has unsupported value '{raw}'"),
                            )
                        })?);
                    }
                    "channel" => {
                        profile.channel = Some(string_field(connector, "channel", &field_value)?);
                    }
                    "fromRole" => {
                        profile.from_role =
                            Some(string_field(connector, "fromRole", &field_value)?);
                    }
                    "toRole" => {
                        profile.to_role = Some(string_field(connector, "toRole", &field_value)?);
                    }
                    "type" => {
                        profile.event_type = Some(string_field(connector, "type", &field_value)?);
                    }
                    other => {
                        return Err(ConfigError::connector(
                            connector,
                            format!("unknown profile field '{other}'"),
                        ));
                    }
                }
            }
            if profile.is_empty() {
                return Err(ConfigError::connector(connector, "profile cannot be empty"));
            }
            Ok(profile)
        }
        _ => Err(ConfigError::connector(
            connector,
            "profile must be a channel string or an object",
        )),
    }
}

fn string_field(connector: &str, field: &str, value: &Value) -> Result<String, ConfigError> {
    let raw = value
        .as_str()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ConfigError::connector(
                connector,
                format!("field '{field}' must be a non-empty string"),
            )
        })?;
    Ok(raw)
}
