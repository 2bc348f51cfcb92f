//! Event tracker (`SPEC_FULL.md` §4.5, component C5): per-session change log
//! plus the append-only error notifier.

use chrono::Utc;
use sa_core::models::{AuditEvent, ErrorLogEntry, Session, SessionEvent, SessionSummary};
use sa_core::Result;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::RwLock;

/// Lifecycle: `start_sync` -> N `push`/`log_error` calls -> `end_sync`.
/// At most one session is ever in progress for a given tracker (invariant iv).
pub struct EventTracker {
    changes_dir: PathBuf,
    errors_dir: PathBuf,
    current: RwLock<Option<Session>>,
    errors: Mutex<Vec<ErrorLogEntry>>,
    last_notification_sent: Mutex<Option<f64>>,
}

impl EventTracker {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        Self {
            changes_dir: output_dir.join("changes"),
            errors_dir: output_dir.join("errors"),
            current: RwLock::new(None),
            errors: Mutex::new(Vec::new()),
            last_notification_sent: Mutex::new(None),
        }
    }

    /// Starts a new session. Per invariant (iv) this must not be called while
    /// another session is in progress — callers enforce that at the
    /// orchestrator level (`sync_in_progress`).
    pub async fn start_sync(&self, sync_type: impl Into<String>) -> Result<()> {
        let now = Utc::now().timestamp() as f64;
        let mut guard = self.current.write().await;
        *guard = Some(Session::new(sync_type, now));
        Ok(())
    }

    pub async fn push(&self, event: SessionEvent) {
        metrics::counter!(
            "changes_total",
            "entity_type" => entity_type_of(&event),
            "operation" => operation_name(&event),
            "status" => status_of(&event),
        )
        .increment(1);
        let mut guard = self.current.write().await;
        if let Some(session) = guard.as_mut() {
            session.push(event);
        }
    }

    pub async fn log_error(
        &self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        message: impl Into<String>,
        operation: impl Into<String>,
        details: Option<Value>,
        source: impl Into<String>,
    ) {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        let message = message.into();
        let operation = operation.into();
        let now = Utc::now().timestamp() as f64;

        self.push(SessionEvent::Errors {
            timestamp: now,
            entity_type: entity_type.clone(),
            entity_id: entity_id.clone(),
            error_message: message.clone(),
            error_type: operation.clone(),
            payload: details.clone(),
        })
        .await;

        let entry = ErrorLogEntry {
            timestamp: now,
            error_type: operation,
            entity_type,
            entity_id,
            error_message: message,
            error_details: details,
            source: source.into(),
        };
        let mut errors = self.errors.lock().unwrap();
        errors.push(entry);
    }

    /// Persists the in-progress session to `output/changes/<id>.json` and
    /// clears it so a new one may start.
    pub async fn end_sync(&self) -> Result<Option<Session>> {
        let mut guard = self.current.write().await;
        let Some(mut session) = guard.take() else {
            return Ok(None);
        };
        session.ended_at = Some(Utc::now().timestamp() as f64);

        tokio::fs::create_dir_all(&self.changes_dir).await?;
        let path = self.changes_dir.join(format!("{}.json", session.id));
        let bytes = serde_json::to_vec_pretty(&session)?;
        tokio::fs::write(path, bytes).await?;

        self.flush_errors().await?;

        Ok(Some(session))
    }

    pub async fn sync_in_progress(&self) -> bool {
        self.current.read().await.is_some()
    }

    async fn flush_errors(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.errors_dir).await?;
        let errors = self.errors.lock().unwrap().clone();
        let path = self.errors_dir.join("error_log.json");
        let bytes = serde_json::to_vec_pretty(&errors)?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    pub fn errors_since(&self, hours: f64) -> Vec<ErrorLogEntry> {
        let cutoff = Utc::now().timestamp() as f64 - hours * 3600.0;
        self.errors
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    /// At most one notification per hour, and only if an error occurred
    /// since the last one was sent.
    pub fn should_send_hourly_notification(&self) -> bool {
        let recent = self.errors_since(1.0);
        if recent.is_empty() {
            return false;
        }
        let last_sent = *self.last_notification_sent.lock().unwrap();
        match last_sent {
            None => true,
            Some(ts) => Utc::now().timestamp() as f64 - ts >= 3600.0,
        }
    }

    pub async fn mark_notification_sent(&self) -> Result<()> {
        let now = Utc::now().timestamp() as f64;
        *self.last_notification_sent.lock().unwrap() = Some(now);
        tokio::fs::create_dir_all(&self.errors_dir).await?;
        let path = self.errors_dir.join("last_notification.json");
        let bytes = serde_json::to_vec_pretty(&serde_json::json!({ "last_sent_ts": now }))?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    /// Recent sessions by file modtime, most recent first.
    pub async fn recent_sessions(&self, limit: usize) -> Result<Vec<Session>> {
        let mut entries = match tokio::fs::read_dir(&self.changes_dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let modified = entry.metadata().await?.modified()?;
            files.push((modified, path));
        }
        files.sort_by(|a, b| b.0.cmp(&a.0));
        files.truncate(limit);

        let mut sessions = Vec::with_capacity(files.len());
        for (_, path) in files {
            let bytes = tokio::fs::read(&path).await?;
            if let Ok(session) = serde_json::from_slice(&bytes) {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }

    pub fn summary_of(session: &Session) -> &SessionSummary {
        &session.summary
    }
}

fn entity_type_of(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Created { entity_type, .. }
        | SessionEvent::Updated { entity_type, .. }
        | SessionEvent::Deleted { entity_type, .. }
        | SessionEvent::Skipped { entity_type, .. }
        | SessionEvent::Errors { entity_type, .. } => entity_type.clone(),
    }
}

fn operation_name(event: &SessionEvent) -> &'static str {
    match event {
        SessionEvent::Created { .. } => "created",
        SessionEvent::Updated { .. } => "updated",
        SessionEvent::Deleted { .. } => "deleted",
        SessionEvent::Skipped { .. } => "skipped",
        SessionEvent::Errors { .. } => "error",
    }
}

fn status_of(event: &SessionEvent) -> &'static str {
    match event {
        SessionEvent::Errors { .. } => "error",
        _ => "ok",
    }
}

/// In-memory audit ring for mutating dashboard calls (`SPEC_FULL.md` §4.8).
pub struct AuditLog {
    ring: Mutex<std::collections::VecDeque<AuditEvent>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(std::collections::VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn record(&self, event: AuditEvent) {
        let mut ring = self.ring.lock().unwrap();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(event);
    }

    pub fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        let ring = self.ring.lock().unwrap();
        ring.iter().rev().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_lifecycle_persists_summary_counts() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = EventTracker::new(dir.path());
        tracker.start_sync("employees").await.unwrap();
        assert!(tracker.sync_in_progress().await);

        tracker
            .push(SessionEvent::Created {
                timestamp: 1.0,
                entity_type: "employee".into(),
                entity_id: "1".into(),
                payload: serde_json::json!({}),
            })
            .await;
        tracker
            .push(SessionEvent::Skipped {
                timestamp: 2.0,
                entity_type: "employee".into(),
                entity_id: "2".into(),
                reason: "prior failure".into(),
            })
            .await;

        let session = tracker.end_sync().await.unwrap().unwrap();
        assert_eq!(session.summary.created, 1);
        assert_eq!(session.summary.skipped, 1);
        assert!(!tracker.sync_in_progress().await);
    }

    #[tokio::test]
    async fn hourly_notification_requires_a_fresh_error() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = EventTracker::new(dir.path());
        assert!(!tracker.should_send_hourly_notification());

        tracker
            .log_error("employee", "1", "boom", "http_error", None, "syncer")
            .await;
        assert!(tracker.should_send_hourly_notification());

        tracker.mark_notification_sent().await.unwrap();
        assert!(!tracker.should_send_hourly_notification());
    }

    #[tokio::test]
    async fn audit_log_is_bounded() {
        let log = AuditLog::new(2);
        for i in 0..5 {
            log.record(AuditEvent {
                timestamp: i as f64,
                actor: None,
                action: "test".into(),
                path: "/x".into(),
                body_summary: None,
            });
        }
        assert_eq!(log.recent(10).len(), 2);
    }
}
