use thiserror::Error;

/// Configuration parse failure. Fatal at startup, never per-request.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("connector config is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("connector config must be a JSON object of connectorId -> value")]
    NotAnObject,

    #[error("connector '{connector}': {reason}")]
    InvalidConnector { connector: String, reason: String },
}

impl ConfigError {
    pub fn connector(connector: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConnector {
            connector: connector.into(),
            reason: reason.into(),
        }
    }
}
