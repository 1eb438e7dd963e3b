use crate::ingest::{IngestHeaders, IngestOutcome, IngestPipeline};
use atelier_core::GatewayError;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub pipeline: IngestPipeline,
}

/// The main gateway server.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the router: the external ingest endpoint plus a health probe.
    pub fn build(pipeline: IngestPipeline) -> Router {
        let state = Arc::new(AppState { pipeline });
        Router::new()
            .route("/agent-gateway/adapters/ingest", post(ingest_handler))
            .route("/health", get(health_handler))
            .with_state(state)
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "ok", "service": "atelier"}))
}

/// Wire rendering for [`GatewayError`]: `{error, message}` JSON with the
/// code's HTTP status, plus `Retry-After` on rate-limit rejections.
struct ApiError(GatewayError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = StatusCode::from_u16(err.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (
            status,
            Json(json!({"error": err.code.as_str(), "message": err.message})),
        )
            .into_response();
        if let Some(secs) = err.retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let ingest_headers = read_ingest_headers(&headers);
    let outcome = state
        .pipeline
        .process(&ingest_headers, &query, &body)
        .await
        .map_err(ApiError)?;

    Ok(match outcome {
        IngestOutcome::Applied {
            adapter,
            channel,
            connector_id,
            event_id,
            session_id,
            event,
        } => (
            StatusCode::CREATED,
            Json(json!({
                "applied": true,
                "deduplicated": false,
                "adapter": adapter.as_str(),
                "channel": channel,
                "connectorId": connector_id,
                "eventId": event_id,
                "sessionId": session_id,
                "event": event,
            })),
        )
            .into_response(),
        IngestOutcome::Replayed {
            adapter,
            channel,
            connector_id,
            event_id,
        } => (
            StatusCode::OK,
            Json(json!({
                "applied": false,
                "deduplicated": true,
                "adapter": adapter.as_str(),
                "channel": channel,
                "connectorId": connector_id,
                "eventId": event_id,
            })),
        )
            .into_response(),
    })
}

fn read_ingest_headers(headers: &HeaderMap) -> IngestHeaders {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    IngestHeaders {
        connector_id: get("x-gateway-connector-id"),
        signature: get("x-gateway-signature"),
        timestamp: get("x-gateway-timestamp"),
        key_id: get("x-gateway-key-id"),
        idempotency_key: get("x-idempotency-key"),
    }
}
