use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// What happened to the request or routing attempt being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryOutcome {
    Accepted,
    Replayed,
    Rejected,
    Failed,
}

/// One entry in the append-only telemetry stream.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryEvent {
    pub timestamp: DateTime<Utc>,
    /// e.g. `ingest_accepted`, `ingest_replayed`, `external_webhook_route_failed`.
    pub kind: String,
    pub connector_id: Option<String>,
    pub session_id: Option<String>,
    pub outcome: TelemetryOutcome,
    pub detail: serde_json::Value,
}

/// Append-only telemetry log recording every accept/replay/reject.
///
/// Writes happen on a background task so the request path never blocks on
/// disk; a failed write is logged and dropped, never surfaced to callers.
pub struct TelemetryLog {
    tx: Option<mpsc::UnboundedSender<TelemetryEvent>>,
    capture: Option<Arc<Mutex<Vec<TelemetryEvent>>>>,
}

/// Handle to the in-memory mirror used by tests to assert on recorded events.
#[derive(Clone)]
pub struct TelemetryCapture(Arc<Mutex<Vec<TelemetryEvent>>>);

impl TelemetryCapture {
    pub fn snapshot(&self) -> Vec<TelemetryEvent> {
        self.0.lock().clone()
    }

    /// Kinds recorded so far, in order.
    pub fn kinds(&self) -> Vec<String> {
        self.0.lock().iter().map(|e| e.kind.clone()).collect()
    }
}

impl TelemetryLog {
    /// Create a telemetry log backed by `<log_dir>/telemetry.jsonl`.
    /// Spawns the background writer task.
    pub fn new(log_dir: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<TelemetryEvent>();

        tokio::spawn(async move {
            let _ = tokio::fs::create_dir_all(&log_dir).await;
            let log_file = log_dir.join("telemetry.jsonl");

            while let Some(event) = rx.recv().await {
                if let Ok(line) = serde_json::to_string(&event) {
                    let open = tokio::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&log_file)
                        .await;
                    match open {
                        Ok(mut file) => {
                            use tokio::io::AsyncWriteExt;
                            let line = format!("{line}\n");
                            if let Err(e) = file.write_all(line.as_bytes()).await {
                                tracing::warn!(error = %e, "telemetry write failed");
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "telemetry log open failed"),
                    }
                }
            }
        });

        Self {
            tx: Some(tx),
            capture: None,
        }
    }

    /// In-memory telemetry log for tests: nothing touches disk, every event
    /// is mirrored into the returned capture handle.
    pub fn in_memory() -> (Self, TelemetryCapture) {
        let capture = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                tx: None,
                capture: Some(capture.clone()),
            },
            TelemetryCapture(capture),
        )
    }

    /// Record an event. Never fails; a dropped receiver or full disk only
    /// costs the entry.
    pub fn record(&self, event: TelemetryEvent) {
        info!(
            kind = %event.kind,
            connector = event.connector_id.as_deref().unwrap_or("-"),
            outcome = ?event.outcome,
            "telemetry"
        );
        if let Some(capture) = &self.capture {
            capture.lock().push(event.clone());
        }
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn record_kind(
        &self,
        kind: impl Into<String>,
        connector_id: Option<String>,
        session_id: Option<String>,
        outcome: TelemetryOutcome,
        detail: serde_json::Value,
    ) {
        self.record(TelemetryEvent {
            timestamp: Utc::now(),
            kind: kind.into(),
            connector_id,
            session_id,
            outcome,
            detail,
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_capture() {
        let (log, capture) = TelemetryLog::in_memory();
        log.record_kind(
            "ingest_accepted",
            Some("telegram-main".to_string()),
            Some("sess-1".to_string()),
            TelemetryOutcome::Accepted,
            serde_json::json!({"adapter": "external_webhook"}),
        );
        log.record_kind(
            "ingest_replayed",
            Some("telegram-main".to_string()),
            None,
            TelemetryOutcome::Replayed,
            serde_json::json!({}),
        );

        let events = capture.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(capture.kinds(), vec!["ingest_accepted", "ingest_replayed"]);
        assert_eq!(events[0].outcome, TelemetryOutcome::Accepted);
    }

    #[tokio::test]
    async fn test_file_backed_log_appends_jsonl() {
        let tmp = tempfile::tempdir().unwrap();
        let log = TelemetryLog::new(tmp.path().to_path_buf());
        log.record_kind(
            "ingest_rejected",
            Some("slack-bot".to_string()),
            None,
            TelemetryOutcome::Rejected,
            serde_json::json!({"error": "SIGNATURE_INVALID"}),
        );

        // The writer is fire-and-forget; give it a moment.
        let log_file = tmp.path().join("telemetry.jsonl");
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if log_file.exists() {
                break;
            }
        }
        let contents = tokio::fs::read_to_string(&log_file).await.unwrap();
        let entry: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(entry["kind"], "ingest_rejected");
        assert_eq!(entry["outcome"], "rejected");
    }
}
