use crate::counter::CounterStore;
use crate::extract::derive_external_session_id;
use crate::validate::{
    check_budget, parse_ingest_body, validate_query_fields, BudgetConfig,
};
use atelier_adapters::{resolve_adapter, AdapterRouter, ExternalEvent};
use atelier_config::{ConnectorPolicy, ConnectorProfile};
use atelier_core::{AdapterKind, ErrorCode, GatewayError, GatewayResult};
use atelier_security::{
    canonical_json, resolve_signature_candidates, sanitize_external_id, validate_identifier,
    verify_signature_with_candidates, CandidateQuery, ConnectorSecret, SecretSource,
    SignatureCandidate, TelemetryLog, TelemetryOutcome,
};
use atelier_session::SessionEvent;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Connector id used for counters and telemetry when the caller sends none
/// and no allowlist forces one.
const ANONYMOUS_CONNECTOR: &str = "anonymous";

/// Operator-tunable knobs plus the parsed connector configuration maps.
/// Immutable for the process lifetime once built.
pub struct IngestSettings {
    pub connector_secrets: HashMap<String, Vec<ConnectorSecret>>,
    pub connector_policies: HashMap<String, ConnectorPolicy>,
    pub connector_profiles: HashMap<String, ConnectorProfile>,
    pub connector_allowlist: Option<HashSet<String>>,
    pub global_secrets: Vec<String>,
    /// Allowed distance between `x-gateway-timestamp` and now, in seconds.
    pub timestamp_skew_secs: i64,
    pub rate_limit_window_secs: u64,
    /// Global per-window cap. Connector policies can only tighten it.
    pub rate_limit_max: u32,
    pub idempotency_ttl_secs: u64,
    pub budgets: BudgetConfig,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            connector_secrets: HashMap::new(),
            connector_policies: HashMap::new(),
            connector_profiles: HashMap::new(),
            connector_allowlist: None,
            global_secrets: Vec::new(),
            timestamp_skew_secs: 300,
            rate_limit_window_secs: 60,
            rate_limit_max: 60,
            idempotency_ttl_secs: 3600,
            budgets: BudgetConfig::default(),
        }
    }
}

/// The protocol headers the ingest endpoint reads.
#[derive(Debug, Clone, Default)]
pub struct IngestHeaders {
    pub connector_id: Option<String>,
    pub signature: Option<String>,
    pub timestamp: Option<String>,
    pub key_id: Option<String>,
    pub idempotency_key: Option<String>,
}

/// Result of a processed ingest request.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// First application of this event id: a session event was created.
    Applied {
        adapter: AdapterKind,
        channel: String,
        connector_id: String,
        event_id: String,
        session_id: String,
        event: SessionEvent,
    },
    /// Replay of an already-seen idempotency key: nothing was reprocessed.
    Replayed {
        adapter: AdapterKind,
        channel: String,
        connector_id: String,
        event_id: String,
    },
}

#[derive(Default)]
struct RequestContext {
    connector_id: Option<String>,
    /// Set once this request owns a freshly-acquired idempotency key, so a
    /// later failure can release it for retries.
    idempotency_key: Option<String>,
}

/// The network-facing orchestrator: validate, authenticate, admit, route.
pub struct IngestPipeline {
    settings: IngestSettings,
    router: Arc<AdapterRouter>,
    counters: Arc<dyn CounterStore>,
    telemetry: Arc<TelemetryLog>,
}

impl IngestPipeline {
    pub fn new(
        settings: IngestSettings,
        router: Arc<AdapterRouter>,
        counters: Arc<dyn CounterStore>,
        telemetry: Arc<TelemetryLog>,
    ) -> Self {
        Self {
            settings,
            router,
            counters,
            telemetry,
        }
    }

    pub fn router(&self) -> &Arc<AdapterRouter> {
        &self.router
    }

    /// Run the full ingest state machine for one request.
    ///
    /// Every accepted, replayed, or rejected request leaves a telemetry
    /// entry. A failure after the idempotency key was acquired releases the
    /// key so the caller can safely retry the same event id.
    pub async fn process(
        &self,
        headers: &IngestHeaders,
        query: &HashMap<String, String>,
        body: &Value,
    ) -> GatewayResult<IngestOutcome> {
        let mut ctx = RequestContext::default();
        let result = self.process_inner(headers, query, body, &mut ctx).await;

        match &result {
            Ok(IngestOutcome::Applied {
                adapter,
                channel,
                connector_id,
                event_id,
                session_id,
                ..
            }) => self.telemetry.record_kind(
                "ingest_accepted",
                Some(connector_id.clone()),
                Some(session_id.clone()),
                TelemetryOutcome::Accepted,
                json!({"adapter": adapter.as_str(), "channel": channel, "eventId": event_id}),
            ),
            Ok(IngestOutcome::Replayed {
                adapter,
                channel,
                connector_id,
                event_id,
            }) => self.telemetry.record_kind(
                "ingest_replayed",
                Some(connector_id.clone()),
                None,
                TelemetryOutcome::Replayed,
                json!({"adapter": adapter.as_str(), "channel": channel, "eventId": event_id}),
            ),
            Err(err) => {
                if let Some(key) = &ctx.idempotency_key {
                    if let Err(remove_err) = self.counters.remove(key).await {
                        warn!(key = %key, error = %remove_err, "failed to release idempotency key");
                    }
                }
                self.telemetry.record_kind(
                    "ingest_rejected",
                    ctx.connector_id.clone(),
                    None,
                    TelemetryOutcome::Rejected,
                    json!({"error": err.code.as_str(), "message": err.message}),
                );
            }
        }
        result
    }

    async fn process_inner(
        &self,
        headers: &IngestHeaders,
        query: &HashMap<String, String>,
        body: &Value,
        ctx: &mut RequestContext,
    ) -> GatewayResult<IngestOutcome> {
        // 1. Strict envelope validation.
        validate_query_fields(query)?;
        let fields = parse_ingest_body(body)?;

        // 2. Connector resolution and allowlisting.
        let connector_id = match fields
            .connector_id
            .as_deref()
            .or(headers.connector_id.as_deref())
        {
            Some(raw) => validate_identifier("connectorId", raw)?,
            None => ANONYMOUS_CONNECTOR.to_string(),
        };
        ctx.connector_id = Some(connector_id.clone());
        if let Some(allowlist) = &self.settings.connector_allowlist {
            if !allowlist.contains(&connector_id) {
                return Err(GatewayError::new(
                    ErrorCode::ConnectorForbidden,
                    format!("connector '{connector_id}' is not allowlisted"),
                ));
            }
        }

        // 3. Profile defaults merged under explicit body fields.
        let profile = self
            .settings
            .connector_profiles
            .get(&connector_id)
            .cloned()
            .unwrap_or_default();

        let channel = fields
            .channel
            .clone()
            .or_else(|| profile.channel.clone())
            .ok_or_else(|| GatewayError::new(ErrorCode::ChannelRequired, "channel is required"))?;
        let channel = validate_identifier("channel", &channel)?;

        let explicit_adapter = match fields.adapter.as_deref() {
            Some(raw) => Some(AdapterKind::from_str(raw)?),
            None => profile.adapter,
        };
        let adapter = resolve_adapter(explicit_adapter, &channel);

        let from_role = fields
            .from_role
            .clone()
            .or_else(|| profile.from_role.clone())
            .ok_or_else(|| {
                GatewayError::new(ErrorCode::FromRoleRequired, "fromRole is required")
            })?;
        let from_role = validate_identifier("fromRole", &from_role)?;

        let to_role = match fields.to_role.clone().or_else(|| profile.to_role.clone()) {
            Some(role) => Some(validate_identifier("toRole", &role)?),
            None => None,
        };

        let event_type = fields
            .event_type
            .clone()
            .or_else(|| profile.event_type.clone())
            .ok_or_else(|| GatewayError::new(ErrorCode::EventTypeRequired, "type is required"))?;
        let event_type = validate_identifier("type", &event_type)?;

        // 4. Policy and size budgets (tighten only).
        let policy = self
            .settings
            .connector_policies
            .get(&connector_id)
            .cloned()
            .unwrap_or_default();
        let budgets = self.settings.budgets.effective(policy.risk_level);

        let payload = fields.payload.clone().unwrap_or_default();
        check_budget("payload", &payload, budgets.payload, ErrorCode::PayloadTooLarge)?;

        let metadata = fields.metadata.clone().unwrap_or_default();
        let metadata_object: serde_json::Map<String, Value> =
            metadata.clone().into_iter().collect();
        check_budget(
            "metadata",
            &metadata_object,
            budgets.metadata,
            ErrorCode::MetadataTooLarge,
        )?;

        // 5. External session identity.
        let external_session_id = derive_external_session_id(
            &channel,
            fields.external_session_id.as_deref(),
            &metadata,
            &payload,
        )
        .ok_or_else(|| {
            GatewayError::new(
                ErrorCode::ExternalSessionRequired,
                "no external session identity could be derived",
            )
        })?;

        // 6. Idempotency key.
        let event_id = fields
            .event_id
            .clone()
            .or_else(|| headers.idempotency_key.clone())
            .map(|id| sanitize_external_id(&id))
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                GatewayError::new(
                    ErrorCode::EventIdRequired,
                    "eventId or x-idempotency-key is required",
                )
            })?;

        // 7. Signature verification over the canonicalized full body.
        let matched = self.verify_signature(headers, body, &connector_id, &policy)?;

        // 8. Per-connector rate limit.
        self.enforce_rate_limit(&connector_id, &policy).await?;

        // 9. Idempotency.
        let idem_key = format!("idem:{connector_id}:{adapter}:{channel}:{event_id}");
        let seen = self
            .counters
            .increment(
                &idem_key,
                Duration::from_secs(self.settings.idempotency_ttl_secs),
            )
            .await
            .map_err(counter_unavailable)?;
        if seen > 1 {
            return Ok(IngestOutcome::Replayed {
                adapter,
                channel,
                connector_id,
                event_id,
            });
        }
        ctx.idempotency_key = Some(idem_key);

        // 10. Route with awaited durability, enriching metadata for audit.
        let mut metadata = metadata;
        metadata.insert("connectorId".to_string(), json!(connector_id));
        metadata.insert("riskLevel".to_string(), json!(policy.risk_level.as_str()));
        metadata.insert(
            "signature".to_string(),
            json!({"keyId": matched.key_id, "source": matched.source}),
        );
        metadata.insert(
            "budgets".to_string(),
            json!({
                "payloadMaxBytes": budgets.payload.max_bytes,
                "payloadMaxKeys": budgets.payload.max_keys,
                "metadataMaxBytes": budgets.metadata.max_bytes,
                "metadataMaxKeys": budgets.metadata.max_keys,
            }),
        );

        let routed = self
            .router
            .route_external_event(ExternalEvent {
                adapter: Some(adapter),
                channel: channel.clone(),
                external_session_id,
                draft_id: fields.draft_id.clone(),
                roles: fields.roles.clone().unwrap_or_default(),
                metadata,
                from_role,
                to_role,
                event_type,
                payload,
                persist: true,
            })
            .await?;

        // 11. Applied.
        Ok(IngestOutcome::Applied {
            adapter,
            channel,
            connector_id,
            event_id,
            session_id: routed.session.id.clone(),
            event: routed.event,
        })
    }

    fn verify_signature(
        &self,
        headers: &IngestHeaders,
        body: &Value,
        connector_id: &str,
        policy: &ConnectorPolicy,
    ) -> GatewayResult<SignatureCandidate> {
        let signature_hex = parse_signature_header(headers.signature.as_deref())?;
        let timestamp =
            parse_signature_timestamp(headers.timestamp.as_deref(), self.settings.timestamp_skew_secs)?;

        let connector_secrets: &[ConnectorSecret] = self
            .settings
            .connector_secrets
            .get(connector_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let candidates = resolve_signature_candidates(&CandidateQuery {
            connector_secrets,
            global_secrets: &self.settings.global_secrets,
            requested_key_id: headers.key_id.as_deref(),
            require_connector_secret: policy.require_connector_secret,
        });

        if candidates.is_empty() {
            return Err(
                if policy.require_connector_secret && connector_secrets.is_empty() {
                    GatewayError::new(
                        ErrorCode::ConnectorSecretRequired,
                        format!("connector '{connector_id}' requires its own signing secret"),
                    )
                } else if !connector_secrets.is_empty() || !self.settings.global_secrets.is_empty()
                {
                    // Secrets exist, but the requested key id matched none.
                    GatewayError::new(
                        ErrorCode::SignatureKeyUnknown,
                        "no signing secret matches the requested key id",
                    )
                } else {
                    GatewayError::new(
                        ErrorCode::IngestSecretNotConfigured,
                        "no ingest signing secret is configured",
                    )
                },
            );
        }

        let canonical = canonical_json(body);
        let matched =
            verify_signature_with_candidates(&signature_hex, timestamp, &canonical, &candidates)
                .ok_or_else(|| {
                    GatewayError::new(ErrorCode::SignatureInvalid, "signature verification failed")
                })?;

        if policy.require_connector_secret && matched.source != SecretSource::Connector {
            return Err(GatewayError::new(
                ErrorCode::ConnectorSecretRequired,
                format!("connector '{connector_id}' must sign with its own secret"),
            ));
        }

        Ok(matched.clone())
    }

    async fn enforce_rate_limit(
        &self,
        connector_id: &str,
        policy: &ConnectorPolicy,
    ) -> GatewayResult<()> {
        let window = self.settings.rate_limit_window_secs.max(1);
        let bucket = now_unix() / window;
        let rate_key = format!("rate:{connector_id}:{bucket}");

        let count = self
            .counters
            .increment(&rate_key, Duration::from_secs(window))
            .await
            .map_err(counter_unavailable)?;

        let effective_max = policy
            .rate_limit_max
            .map_or(self.settings.rate_limit_max, |m| {
                m.min(self.settings.rate_limit_max)
            });

        if count > u64::from(effective_max) {
            let retry_after = self
                .counters
                .ttl_remaining(&rate_key)
                .await
                .ok()
                .flatten()
                .map_or(window, |d| d.as_secs().max(1));
            return Err(GatewayError::rate_limited(
                format!(
                    "connector '{connector_id}' exceeded {effective_max} requests per {window}s window"
                ),
                retry_after,
            ));
        }
        Ok(())
    }
}

fn now_unix() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// Counter failures fail closed: admission control must not silently
/// degrade to unlimited.
fn counter_unavailable(e: crate::counter::CounterError) -> GatewayError {
    GatewayError::new(ErrorCode::CounterStoreUnavailable, e.to_string())
}

fn parse_signature_header(raw: Option<&str>) -> GatewayResult<String> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            GatewayError::new(
                ErrorCode::SignatureRequired,
                "x-gateway-signature header is required",
            )
        })?;
    let hex_part = raw.strip_prefix("v1=").ok_or_else(|| {
        GatewayError::new(
            ErrorCode::SignatureInvalid,
            "signature must use the v1=<hex> format",
        )
    })?;
    if hex_part.len() != 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(GatewayError::new(
            ErrorCode::SignatureInvalid,
            "signature must be 64 hex characters",
        ));
    }
    Ok(hex_part.to_string())
}

fn parse_signature_timestamp(raw: Option<&str>, skew_secs: i64) -> GatewayResult<i64> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            GatewayError::new(
                ErrorCode::SignatureTimestampRequired,
                "x-gateway-timestamp header is required",
            )
        })?;
    let timestamp: i64 = raw.parse().map_err(|_| {
        GatewayError::new(
            ErrorCode::SignatureTimestampInvalid,
            "timestamp must be unix seconds",
        )
    })?;
    if (Utc::now().timestamp() - timestamp).abs() > skew_secs {
        return Err(GatewayError::new(
            ErrorCode::SignatureExpired,
            format!("timestamp is outside the {skew_secs}s skew window"),
        ));
    }
    Ok(timestamp)
}
