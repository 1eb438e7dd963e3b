use crate::adapter::resolve_adapter;
use atelier_core::{AdapterKind, GatewayResult};
use atelier_security::{TelemetryLog, TelemetryOutcome};
use atelier_session::{NewEvent, NewSession, Session, SessionEvent, SessionStore};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// An external event description about to be routed into a session.
#[derive(Debug, Clone, Default)]
pub struct ExternalEvent {
    pub adapter: Option<AdapterKind>,
    pub channel: String,
    pub external_session_id: String,
    pub draft_id: Option<String>,
    pub roles: Vec<String>,
    pub metadata: HashMap<String, Value>,
    pub from_role: String,
    pub to_role: Option<String>,
    pub event_type: String,
    pub payload: serde_json::Map<String, Value>,
    /// Await durable persistence before returning. Used on hot paths where
    /// at-least-once durability matters before responding 2xx.
    pub persist: bool,
}

/// Same contract applied to an already-known session id.
#[derive(Debug, Clone, Default)]
pub struct SessionEventRequest {
    pub adapter: Option<AdapterKind>,
    pub session_id: String,
    pub from_role: String,
    pub to_role: Option<String>,
    pub event_type: String,
    pub payload: serde_json::Map<String, Value>,
    pub persist: bool,
}

/// Result of a successful routing attempt.
#[derive(Debug, Clone)]
pub struct RoutedEvent {
    pub adapter: AdapterKind,
    pub session: Session,
    pub event: SessionEvent,
    pub persisted: bool,
}

/// Routes external event descriptions through the session store, tagging
/// payloads with the adapter that handled them and telemetering every
/// attempt.
pub struct AdapterRouter {
    store: Arc<SessionStore>,
    telemetry: Arc<TelemetryLog>,
}

impl AdapterRouter {
    pub fn new(store: Arc<SessionStore>, telemetry: Arc<TelemetryLog>) -> Self {
        Self { store, telemetry }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Ensure the externally-anchored session and append the event through
    /// the resolved adapter.
    pub async fn route_external_event(&self, request: ExternalEvent) -> GatewayResult<RoutedEvent> {
        let adapter = resolve_adapter(request.adapter, &request.channel);
        let result = self.route_inner(adapter, request).await;
        self.record_attempt(adapter, &result);
        result
    }

    /// Append an event to a session the caller already knows by id.
    pub async fn append_session_event(
        &self,
        request: SessionEventRequest,
    ) -> GatewayResult<RoutedEvent> {
        // Channel-based inference needs the session, so resolve it first;
        // an unknown id fails before any adapter is chosen.
        let adapter = match (&request.adapter, self.store.get_session(&request.session_id)) {
            (Some(adapter), _) => *adapter,
            (None, Some(session)) => resolve_adapter(None, &session.channel),
            (None, None) => AdapterKind::Web,
        };

        let result = self.append_inner(adapter, request).await;
        self.record_attempt(adapter, &result);
        result
    }

    async fn route_inner(
        &self,
        adapter: AdapterKind,
        request: ExternalEvent,
    ) -> GatewayResult<RoutedEvent> {
        let session = self.store.ensure_external_session(
            &request.channel,
            &request.external_session_id,
            NewSession {
                id: None,
                external_session_id: None,
                draft_id: request.draft_id,
                roles: request.roles,
                metadata: request.metadata,
            },
        )?;

        let payload = tag_payload(request.payload, adapter, &session.channel);
        let event = self.store.append_event(
            &session.id,
            NewEvent {
                from_role: request.from_role,
                to_role: request.to_role,
                event_type: request.event_type,
                payload,
            },
        )?;

        let persisted = self.maybe_persist(&session.id, &event, request.persist).await?;
        let session = self.store.get_session(&session.id).unwrap_or(session);
        Ok(RoutedEvent {
            adapter,
            session,
            event,
            persisted,
        })
    }

    async fn append_inner(
        &self,
        adapter: AdapterKind,
        request: SessionEventRequest,
    ) -> GatewayResult<RoutedEvent> {
        // append_event handles the not-found case with the proper error.
        let channel = self
            .store
            .get_session(&request.session_id)
            .map(|s| s.channel)
            .unwrap_or_default();

        let payload = tag_payload(request.payload, adapter, &channel);
        let event = self.store.append_event(
            &request.session_id,
            NewEvent {
                from_role: request.from_role,
                to_role: request.to_role,
                event_type: request.event_type,
                payload,
            },
        )?;

        let persisted = self
            .maybe_persist(&request.session_id, &event, request.persist)
            .await?;
        // The session exists: append_event would have failed otherwise.
        let session = self
            .store
            .get_session(&request.session_id)
            .ok_or_else(|| {
                atelier_core::GatewayError::new(
                    atelier_core::ErrorCode::SessionNotFound,
                    format!("unknown session '{}'", request.session_id),
                )
            })?;

        Ok(RoutedEvent {
            adapter,
            session,
            event,
            persisted,
        })
    }

    async fn maybe_persist(
        &self,
        session_id: &str,
        event: &SessionEvent,
        persist: bool,
    ) -> GatewayResult<bool> {
        if !persist {
            return Ok(false);
        }
        self.store.persist_event(event).await?;
        if let Some(snapshot) = self.store.get_session(session_id) {
            self.store.persist_session(&snapshot).await?;
        }
        Ok(true)
    }

    /// Success and failure both leave a telemetry trail. The write itself
    /// can never fail the routing call.
    fn record_attempt(&self, adapter: AdapterKind, result: &GatewayResult<RoutedEvent>) {
        match result {
            Ok(routed) => self.telemetry.record_kind(
                format!("{adapter}_routed"),
                None,
                Some(routed.session.id.clone()),
                TelemetryOutcome::Accepted,
                json!({
                    "channel": routed.session.channel,
                    "type": routed.event.event_type,
                    "persisted": routed.persisted,
                }),
            ),
            Err(err) => self.telemetry.record_kind(
                format!("{adapter}_route_failed"),
                None,
                None,
                TelemetryOutcome::Failed,
                json!({"error": err.code.as_str(), "message": err.message}),
            ),
        }
    }
}

/// Shallow-merge the `gatewayAdapter` tag into the payload, preserving any
/// pre-existing nested tag fields.
fn tag_payload(
    mut payload: serde_json::Map<String, Value>,
    adapter: AdapterKind,
    channel: &str,
) -> serde_json::Map<String, Value> {
    let tag = payload
        .entry("gatewayAdapter".to_string())
        .or_insert_with(|| json!({}));
    if !tag.is_object() {
        *tag = json!({});
    }
    if let Value::Object(fields) = tag {
        fields.insert("name".to_string(), json!(adapter.as_str()));
        fields.insert("channel".to_string(), json!(channel));
    }
    payload
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use atelier_core::ErrorCode;
    use atelier_security::TelemetryCapture;
    use atelier_session::NullStore;

    fn router() -> (AdapterRouter, TelemetryCapture) {
        let (telemetry, capture) = TelemetryLog::in_memory();
        let store = Arc::new(SessionStore::new(Arc::new(NullStore)));
        (AdapterRouter::new(store, Arc::new(telemetry)), capture)
    }

    fn external_event(channel: &str) -> ExternalEvent {
        ExternalEvent {
            channel: channel.to_string(),
            external_session_id: format!("{channel}_chat:-1"),
            from_role: "observer".to_string(),
            event_type: "observer_message".to_string(),
            ..ExternalEvent::default()
        }
    }

    #[tokio::test]
    async fn test_routes_and_tags_payload() {
        let (router, capture) = router();
        let mut request = external_event("telegram");
        request.payload = serde_json::json!({"text": "hi", "gatewayAdapter": {"traceId": "t-1"}})
            .as_object()
            .cloned()
            .unwrap();

        let routed = router.route_external_event(request).await.unwrap();
        assert_eq!(routed.adapter, AdapterKind::ExternalWebhook);
        assert_eq!(routed.session.channel, "telegram");

        let tag = &routed.event.payload["gatewayAdapter"];
        assert_eq!(tag["name"], "external_webhook");
        assert_eq!(tag["channel"], "telegram");
        // Pre-existing nested tag fields survive the merge.
        assert_eq!(tag["traceId"], "t-1");

        assert_eq!(capture.kinds(), vec!["external_webhook_routed"]);
    }

    #[tokio::test]
    async fn test_explicit_adapter_overrides_inference() {
        let (router, _capture) = router();
        let mut request = external_event("telegram");
        request.adapter = Some(AdapterKind::LiveSession);
        let routed = router.route_external_event(request).await.unwrap();
        assert_eq!(routed.adapter, AdapterKind::LiveSession);
    }

    #[tokio::test]
    async fn test_same_identity_reuses_session() {
        let (router, _capture) = router();
        let first = router
            .route_external_event(external_event("telegram"))
            .await
            .unwrap();
        let second = router
            .route_external_event(external_event("telegram"))
            .await
            .unwrap();
        assert_eq!(first.session.id, second.session.id);
        assert_eq!(router.store().events(&first.session.id).len(), 2);
    }

    #[tokio::test]
    async fn test_failure_records_route_failed_telemetry() {
        let (router, capture) = router();
        let routed = router
            .route_external_event(external_event("telegram"))
            .await
            .unwrap();
        router.store().close_session(&routed.session.id).unwrap();

        let err = router
            .route_external_event(external_event("telegram"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionClosed);

        let kinds = capture.kinds();
        assert_eq!(kinds.last().unwrap(), "external_webhook_route_failed");
    }

    #[tokio::test]
    async fn test_append_to_known_session() {
        let (router, _capture) = router();
        let routed = router
            .route_external_event(external_event("live_session"))
            .await
            .unwrap();
        assert_eq!(routed.adapter, AdapterKind::LiveSession);

        let appended = router
            .append_session_event(SessionEventRequest {
                session_id: routed.session.id.clone(),
                from_role: "judge".to_string(),
                event_type: "verdict".to_string(),
                ..SessionEventRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(appended.adapter, AdapterKind::LiveSession);
        assert_eq!(appended.event.from_role, "judge");
    }

    #[tokio::test]
    async fn test_append_unknown_session_fails() {
        let (router, _capture) = router();
        let err = router
            .append_session_event(SessionEventRequest {
                session_id: "missing".to_string(),
                from_role: "judge".to_string(),
                event_type: "verdict".to_string(),
                ..SessionEventRequest::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionNotFound);
    }

    #[tokio::test]
    async fn test_persist_flag_awaits_durability() {
        let (telemetry, _capture) = TelemetryLog::in_memory();
        let tmp = tempfile::tempdir().unwrap();
        let durable = Arc::new(
            atelier_session::FileStore::new(tmp.path().to_path_buf())
                .await
                .unwrap(),
        );
        let store = Arc::new(SessionStore::new(durable.clone()));
        let router = AdapterRouter::new(store, Arc::new(telemetry));

        let mut request = external_event("telegram");
        request.persist = true;
        let routed = router.route_external_event(request).await.unwrap();
        assert!(routed.persisted);

        use atelier_session::DurableStore;
        let persisted = durable.get_session(&routed.session.id).await.unwrap();
        assert!(persisted.is_some());
        assert_eq!(
            durable
                .events_for_session(&routed.session.id)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
