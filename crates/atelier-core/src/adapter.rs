use crate::error::{ErrorCode, GatewayError};
use serde::{Deserialize, Serialize};

/// The logical transport kind an event was routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    /// Browser-facing surfaces: draft cycles, control-plane traffic.
    Web,
    /// Realtime co-editing sessions.
    LiveSession,
    /// Anything arriving from an external platform webhook.
    ExternalWebhook,
}

impl AdapterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::LiveSession => "live_session",
            Self::ExternalWebhook => "external_webhook",
        }
    }

    /// Every adapter the gateway knows about.
    pub fn all() -> [AdapterKind; 3] {
        [Self::Web, Self::LiveSession, Self::ExternalWebhook]
    }
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AdapterKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "web" => Ok(Self::Web),
            "live_session" => Ok(Self::LiveSession),
            "external_webhook" => Ok(Self::ExternalWebhook),
            other => Err(GatewayError::new(
                ErrorCode::AdapterUnsupported,
                format!("unsupported adapter '{other}'"),
            )),
        }
    }
}
