use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// How much the gateway trusts a connector. Drives payload/metadata budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Restricted,
    Standard,
    Trusted,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Restricted => "restricted",
            Self::Standard => "standard",
            Self::Trusted => "trusted",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "restricted" => Some(Self::Restricted),
            "standard" => Some(Self::Standard),
            "trusted" => Some(Self::Trusted),
            _ => None,
        }
    }
}

/// Per-connector admission policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorPolicy {
    pub risk_level: RiskLevel,
    /// Overrides the global per-window rate limit. Can only tighten it.
    pub rate_limit_max: Option<u32>,
    /// When set, the connector must have its own secret configured; a valid
    /// global signature is not enough.
    pub require_connector_secret: bool,
}

impl Default for ConnectorPolicy {
    fn default() -> Self {
        Self {
            risk_level: RiskLevel::Standard,
            rate_limit_max: None,
            require_connector_secret: false,
        }
    }
}

/// Parse the connector-policy JSON blob into `connectorId -> policy`.
///
/// Value shapes: a risk-level shorthand string, or an object with optional
/// `riskLevel`, `rateLimitMax` (positive integer or null), and
/// `requireConnectorSecret` (boolean). Any field present but invalid is a
/// startup error naming the connector and field.
pub fn parse_connector_policies(
    raw: &str,
) -> Result<HashMap<String, ConnectorPolicy>, ConfigError> {
    if raw.trim().is_empty() {
        return Ok(HashMap::new());
    }

    let value: Value = serde_json::from_str(raw)?;
    let Value::Object(entries) = value else {
        return Err(ConfigError::NotAnObject);
    };

    let mut policies = HashMap::with_capacity(entries.len());
    for (connector, entry) in entries {
        let policy = parse_policy_value(&connector, entry)?;
        policies.insert(connector.trim().to_lowercase(), policy);
    }
    Ok(policies)
}

fn parse_policy_value(connector: &str, value: Value) -> Result<ConnectorPolicy, ConfigError> {
    match value {
        Value::String(shorthand) => {
            let risk_level = RiskLevel::parse(&shorthand).ok_or_else(|| {
                ConfigError::connector(
                    connector,
                    format!("unknown risk level '{shorthand}' (expected restricted|standard|trusted)"),
                )
            })?;
            Ok(ConnectorPolicy {
                risk_level,
                ..ConnectorPolicy::default()
            })
        }
        Value::Object(fields) => {
            let mut policy = ConnectorPolicy::default();
            for (field, field_value) in fields {
                match field.as_str() {
                    "riskLevel" => {
                        policy.risk_level = field_value
                            .as_str()
                            .and_then(RiskLevel::parse)
                            .ok_or_else(|| {
                                ConfigError::connector(
                                    connector,
                                    "field 'riskLevel' must be restricted|standard|trusted",
                                )
                            })?;
                    }
                    "rateLimitMax" => {
                        policy.rate_limit_max = match field_value {
                            Value::Null => None,
                            other => {
                                let max = other
                                    .as_u64()
                                    .filter(|n| *n > 0 && *n <= u64::from(u32::MAX))
                                    .ok_or_else(|| {
                                        ConfigError::connector(
                                            connector,
                                            "field 'rateLimitMax' must be a positive integer",
                                        )
                                    })?;
                                Some(max as u32)
                            }
                        };
                    }
                    "requireConnectorSecret" => {
                        policy.require_connector_secret =
                            field_value.as_bool().ok_or_else(|| {
                                ConfigError::connector(
                                    connector,
                                    "field 'requireConnectorSecret' must be a boolean",
                                )
                            })?;
                    }
                    other => {
                        return Err(ConfigError::connector(
                            connector,
                            format!("unknown policy field '{other}'"),
                        ));
                    }
                }
            }
            Ok(policy)
        }
        _ => Err(ConfigError::connector(
            connector,
            "policy must be a risk-level string or an object",
        )),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_shorthand_risk_level() {
        let policies = parse_connector_policies(r#"{"telegram-main": "trusted"}"#).unwrap();
        let policy = &policies["telegram-main"];
        assert_eq!(policy.risk_level, RiskLevel::Trusted);
        assert_eq!(policy.rate_limit_max, None);
        assert!(!policy.require_connector_secret);
    }

    #[test]
    fn test_structured_policy() {
        let policies = parse_connector_policies(
            r#"{"slack-bot": {"riskLevel": "restricted", "rateLimitMax": 25, "requireConnectorSecret": true}}"#,
        )
        .unwrap();
        let policy = &policies["slack-bot"];
        assert_eq!(policy.risk_level, RiskLevel::Restricted);
        assert_eq!(policy.rate_limit_max, Some(25));
        assert!(policy.require_connector_secret);
    }

    #[test]
    fn test_null_rate_limit_means_no_override() {
        let policies =
            parse_connector_policies(r#"{"a": {"rateLimitMax": null}}"#).unwrap();
        assert_eq!(policies["a"].rate_limit_max, None);
    }

    #[test]
    fn test_invalid_fields_name_connector_and_field() {
        let err = parse_connector_policies(r#"{"c1": {"rateLimitMax": 0}}"#).unwrap_err();
        assert!(err.to_string().contains("c1"));
        assert!(err.to_string().contains("rateLimitMax"));

        let err = parse_connector_policies(r#"{"c2": {"riskLevel": "nope"}}"#).unwrap_err();
        assert!(err.to_string().contains("c2"));
        assert!(err.to_string().contains("riskLevel"));

        let err =
            parse_connector_policies(r#"{"c3": {"requireConnectorSecret": "yes"}}"#).unwrap_err();
        assert!(err.to_string().contains("requireConnectorSecret"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = parse_connector_policies(r#"{"c": {"burstLimit": 3}}"#).unwrap_err();
        assert!(err.to_string().contains("burstLimit"));
    }

    #[test]
    fn test_unknown_shorthand_rejected() {
        let err = parse_connector_policies(r#"{"c": "reckless"}"#).unwrap_err();
        assert!(err.to_string().contains("reckless"));
    }

    #[test]
    fn test_default_policy_is_standard() {
        let policy = ConnectorPolicy::default();
        assert_eq!(policy.risk_level, RiskLevel::Standard);
        assert_eq!(policy.rate_limit_max, None);
        assert!(!policy.require_connector_secret);
    }
}
