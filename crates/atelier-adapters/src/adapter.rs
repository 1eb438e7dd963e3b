use atelier_core::AdapterKind;

/// Channel-to-adapter routing table. The mapping is data, not scattered
/// conditionals; unknown channels fall through to the webhook adapter.
const CHANNEL_ADAPTERS: &[(&str, AdapterKind)] = &[
    ("live_session", AdapterKind::LiveSession),
    ("draft_cycle", AdapterKind::Web),
    ("ws-control-plane", AdapterKind::Web),
    ("web", AdapterKind::Web),
];

/// Infer the adapter for a channel.
pub fn adapter_for_channel(channel: &str) -> AdapterKind {
    CHANNEL_ADAPTERS
        .iter()
        .find(|(name, _)| *name == channel)
        .map(|(_, adapter)| *adapter)
        .unwrap_or(AdapterKind::ExternalWebhook)
}

/// An explicitly requested adapter wins; otherwise infer from the channel.
pub fn resolve_adapter(explicit: Option<AdapterKind>, channel: &str) -> AdapterKind {
    explicit.unwrap_or_else(|| adapter_for_channel(channel))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_known_channels() {
        assert_eq!(adapter_for_channel("live_session"), AdapterKind::LiveSession);
        assert_eq!(adapter_for_channel("draft_cycle"), AdapterKind::Web);
        assert_eq!(adapter_for_channel("ws-control-plane"), AdapterKind::Web);
        assert_eq!(adapter_for_channel("web"), AdapterKind::Web);
    }

    #[test]
    fn test_unknown_channels_default_to_webhook() {
        assert_eq!(adapter_for_channel("telegram"), AdapterKind::ExternalWebhook);
        assert_eq!(adapter_for_channel("slack"), AdapterKind::ExternalWebhook);
        assert_eq!(adapter_for_channel(""), AdapterKind::ExternalWebhook);
    }

    #[test]
    fn test_explicit_adapter_wins() {
        assert_eq!(
            resolve_adapter(Some(AdapterKind::Web), "telegram"),
            AdapterKind::Web
        );
        assert_eq!(
            resolve_adapter(None, "telegram"),
            AdapterKind::ExternalWebhook
        );
    }
}
