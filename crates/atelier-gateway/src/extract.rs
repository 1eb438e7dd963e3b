use atelier_security::sanitize_external_id;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Derive a stable external session identity from channel-specific payload
/// shapes.
///
/// An explicit id always wins. Known chat platforms get their native
/// conversation id extracted and prefixed; unknown channels fall back to
/// `metadata.externalSessionId`, `payload.externalSessionId`, then
/// `payload.sessionId`. Every derived id is sanitized and length-capped.
pub fn derive_external_session_id(
    channel: &str,
    explicit: Option<&str>,
    metadata: &HashMap<String, Value>,
    payload: &Map<String, Value>,
) -> Option<String> {
    if let Some(explicit) = explicit {
        let sanitized = sanitize_external_id(explicit);
        if !sanitized.is_empty() {
            return Some(sanitized);
        }
    }

    let derived = match channel {
        "telegram" => telegram_chat_id(payload).map(|id| format!("telegram_chat:{id}")),
        "slack" => slack_channel_id(payload).map(|id| format!("slack_channel:{id}")),
        "discord" => discord_channel_id(payload).map(|id| format!("discord_channel:{id}")),
        _ => fallback_id(metadata, payload),
    };

    derived
        .map(|id| sanitize_external_id(&id))
        .filter(|id| !id.is_empty())
}

/// First present chat id among the update shapes Telegram delivers.
fn telegram_chat_id(payload: &Map<String, Value>) -> Option<String> {
    const PATHS: &[&[&str]] = &[
        &["message", "chat", "id"],
        &["edited_message", "chat", "id"],
        &["channel_post", "chat", "id"],
        &["callback_query", "message", "chat", "id"],
    ];
    PATHS.iter().find_map(|path| value_at(payload, path))
}

fn slack_channel_id(payload: &Map<String, Value>) -> Option<String> {
    value_at(payload, &["event", "channel"])
        .or_else(|| value_at(payload, &["event", "channel_id"]))
        .or_else(|| value_at(payload, &["channel_id"]))
}

fn discord_channel_id(payload: &Map<String, Value>) -> Option<String> {
    value_at(payload, &["channel_id"])
}

fn fallback_id(metadata: &HashMap<String, Value>, payload: &Map<String, Value>) -> Option<String> {
    metadata
        .get("externalSessionId")
        .and_then(id_string)
        .or_else(|| payload.get("externalSessionId").and_then(id_string))
        .or_else(|| payload.get("sessionId").and_then(id_string))
}

fn value_at(payload: &Map<String, Value>, path: &[&str]) -> Option<String> {
    let (first, rest) = path.split_first()?;
    let mut current = payload.get(*first)?;
    for segment in rest {
        current = current.get(segment)?;
    }
    id_string(current)
}

/// Chat ids arrive as numbers (possibly negative) or strings.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_explicit_id_wins() {
        let body = payload(json!({"message": {"chat": {"id": -100}}}));
        let id = derive_external_session_id("telegram", Some("My Thread"), &HashMap::new(), &body);
        assert_eq!(id.as_deref(), Some("my_thread"));
    }

    #[test]
    fn test_telegram_message_chat_id() {
        let body = payload(json!({"message": {"chat": {"id": -100123456}}}));
        let id = derive_external_session_id("telegram", None, &HashMap::new(), &body);
        assert_eq!(id.as_deref(), Some("telegram_chat:-100123456"));
    }

    #[test]
    fn test_telegram_update_shape_priority() {
        let body = payload(json!({
            "edited_message": {"chat": {"id": 7}},
            "callback_query": {"message": {"chat": {"id": 9}}}
        }));
        let id = derive_external_session_id("telegram", None, &HashMap::new(), &body);
        assert_eq!(id.as_deref(), Some("telegram_chat:7"));
    }

    #[test]
    fn test_slack_event_channel() {
        let body = payload(json!({"event": {"channel": "C042ABC"}}));
        let id = derive_external_session_id("slack", None, &HashMap::new(), &body);
        assert_eq!(id.as_deref(), Some("slack_channel:c042abc"));
    }

    #[test]
    fn test_discord_channel_id() {
        let body = payload(json!({"channel_id": "987654321"}));
        let id = derive_external_session_id("discord", None, &HashMap::new(), &body);
        assert_eq!(id.as_deref(), Some("discord_channel:987654321"));
    }

    #[test]
    fn test_unknown_channel_fallbacks() {
        let metadata = HashMap::from([("externalSessionId".to_string(), json!("Meta-Id"))]);
        let id = derive_external_session_id("custom", None, &metadata, &Map::new());
        assert_eq!(id.as_deref(), Some("meta-id"));

        let body = payload(json!({"sessionId": "From-Payload"}));
        let id = derive_external_session_id("custom", None, &HashMap::new(), &body);
        assert_eq!(id.as_deref(), Some("from-payload"));
    }

    #[test]
    fn test_no_identity_yields_none() {
        let id = derive_external_session_id("telegram", None, &HashMap::new(), &Map::new());
        assert!(id.is_none());

        // Whitespace-only explicit id sanitizes away entirely.
        let id = derive_external_session_id("custom", Some("  !!  "), &HashMap::new(), &Map::new());
        assert!(id.is_none());
    }
}
