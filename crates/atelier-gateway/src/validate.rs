use atelier_config::RiskLevel;
use atelier_core::{ErrorCode, GatewayError, GatewayResult};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Every body field the ingest endpoint accepts. Anything else is rejected.
const ALLOWED_BODY_FIELDS: &[&str] = &[
    "adapter",
    "channel",
    "externalSessionId",
    "draftId",
    "roles",
    "metadata",
    "fromRole",
    "toRole",
    "type",
    "payload",
    "connectorId",
    "eventId",
];

/// The ingest endpoint takes no query parameters; the allowlist is empty.
const ALLOWED_QUERY_FIELDS: &[&str] = &[];

/// Typed view of the ingest body after the field allowlist has passed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestBody {
    pub adapter: Option<String>,
    pub channel: Option<String>,
    pub external_session_id: Option<String>,
    pub draft_id: Option<String>,
    pub roles: Option<Vec<String>>,
    pub metadata: Option<HashMap<String, Value>>,
    pub from_role: Option<String>,
    pub to_role: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub payload: Option<Map<String, Value>>,
    pub connector_id: Option<String>,
    pub event_id: Option<String>,
}

/// Validate the envelope against the strict field allowlists and decode it.
pub fn parse_ingest_body(body: &Value) -> GatewayResult<IngestBody> {
    let Value::Object(fields) = body else {
        return Err(GatewayError::new(
            ErrorCode::InvalidFields,
            "request body must be a JSON object",
        ));
    };

    let unknown: Vec<&str> = fields
        .keys()
        .map(String::as_str)
        .filter(|key| !ALLOWED_BODY_FIELDS.contains(key))
        .collect();
    if !unknown.is_empty() {
        return Err(GatewayError::new(
            ErrorCode::InvalidFields,
            format!("unknown body fields: {}", unknown.join(", ")),
        ));
    }

    serde_json::from_value(body.clone()).map_err(|e| {
        GatewayError::new(ErrorCode::InvalidFields, format!("body failed validation: {e}"))
    })
}

pub fn validate_query_fields(query: &HashMap<String, String>) -> GatewayResult<()> {
    let unknown: Vec<&str> = query
        .keys()
        .map(String::as_str)
        .filter(|key| !ALLOWED_QUERY_FIELDS.contains(key))
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(GatewayError::new(
            ErrorCode::InvalidQueryFields,
            format!("unknown query fields: {}", unknown.join(", ")),
        ))
    }
}

/// Byte and key-count budget for one open-ended object field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeBudget {
    pub max_bytes: usize,
    pub max_keys: usize,
}

impl SizeBudget {
    fn min(self, other: SizeBudget) -> SizeBudget {
        SizeBudget {
            max_bytes: self.max_bytes.min(other.max_bytes),
            max_keys: self.max_keys.min(other.max_keys),
        }
    }
}

/// Payload and metadata budgets, resolved per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetConfig {
    pub payload: SizeBudget,
    pub metadata: SizeBudget,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            payload: SizeBudget {
                max_bytes: 16 * 1024,
                max_keys: 64,
            },
            metadata: SizeBudget {
                max_bytes: 8 * 1024,
                max_keys: 32,
            },
        }
    }
}

impl BudgetConfig {
    /// Budgets the risk level would grant on its own.
    fn for_risk(risk: RiskLevel) -> BudgetConfig {
        match risk {
            RiskLevel::Restricted => BudgetConfig {
                payload: SizeBudget {
                    max_bytes: 4 * 1024,
                    max_keys: 16,
                },
                metadata: SizeBudget {
                    max_bytes: 2 * 1024,
                    max_keys: 8,
                },
            },
            RiskLevel::Standard | RiskLevel::Trusted => BudgetConfig::default(),
        }
    }

    /// Effective budgets: the risk level can tighten, never loosen, the
    /// configured global defaults.
    pub fn effective(self, risk: RiskLevel) -> BudgetConfig {
        let risk_budget = Self::for_risk(risk);
        BudgetConfig {
            payload: self.payload.min(risk_budget.payload),
            metadata: self.metadata.min(risk_budget.metadata),
        }
    }
}

/// Enforce a budget over one object field.
pub fn check_budget(
    field: &str,
    value: &Map<String, Value>,
    budget: SizeBudget,
    code: ErrorCode,
) -> GatewayResult<()> {
    if value.len() > budget.max_keys {
        return Err(GatewayError::new(
            code,
            format!("{field} has too many keys ({} > {})", value.len(), budget.max_keys),
        ));
    }
    let bytes = Value::Object(value.clone()).to_string().len();
    if bytes > budget.max_bytes {
        return Err(GatewayError::new(
            code,
            format!("{field} too large ({bytes} > {} bytes)", budget.max_bytes),
        ));
    }
    Ok(())
}
