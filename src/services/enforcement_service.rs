use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::dto::proctor_dto::{
    ActivityPayload, ClientMessage, ScreenshotReason, ScreenshotRequest, ScreenshotUpload,
    ServerMessage, UploadAck, UploadStatus,
};
use crate::models::proctor_event::{NewProctorEvent, ProctorEventType};
use crate::services::attempt_service::AttemptStore;
use crate::services::event_log::EventLog;
use crate::services::gateway_service::ConnectionGateway;
use crate::services::screenshot_service::{ScreenshotStore, UploadOutcome};

/// Applies the proctoring policy to inbound signals.
///
/// For every signal the event is persisted first, then the policy runs, then
/// any outbound command is emitted. Persistence is best-effort; a failed
/// write is logged and never blocks termination or the screenshot request.
#[derive(Clone)]
pub struct EnforcementService {
    gateway: ConnectionGateway,
    events: Arc<dyn EventLog>,
    attempts: Arc<dyn AttemptStore>,
    screenshots: ScreenshotStore,
}

impl EnforcementService {
    pub fn new(
        gateway: ConnectionGateway,
        events: Arc<dyn EventLog>,
        attempts: Arc<dyn AttemptStore>,
        screenshots: ScreenshotStore,
    ) -> Self {
        Self {
            gateway,
            events,
            attempts,
            screenshots,
        }
    }

    pub async fn handle(&self, connection_id: Uuid, message: ClientMessage) {
        match message {
            ClientMessage::UserOnline(Some(user_id)) => {
                self.gateway.announce(connection_id, user_id).await;
            }
            ClientMessage::UserOnline(None) => {
                tracing::debug!(%connection_id, "Ignoring user_online without a valid user id");
            }
            ClientMessage::Activity(kind, payload) => {
                self.handle_activity(connection_id, kind, payload).await;
            }
            ClientMessage::ScreenshotUpload(upload) => {
                self.handle_screenshot(connection_id, upload).await;
            }
        }
    }

    async fn handle_activity(
        &self,
        connection_id: Uuid,
        kind: ProctorEventType,
        payload: ActivityPayload,
    ) {
        let attempt_id = payload.attempt_id;
        tracing::info!(
            %connection_id,
            event_type = %kind,
            attempt_id = ?attempt_id,
            exam_id = ?payload.exam_id,
            user_id = ?payload.user_id,
            "Proctoring signal received"
        );

        let message = activity_message(kind, &payload);
        if let Some(attempt_id) = attempt_id {
            let event = NewProctorEvent::new(attempt_id, kind)
                .with_message(message)
                .with_metadata(payload.raw.clone());
            self.record(event).await;
        } else {
            tracing::debug!(%connection_id, event_type = %kind, "Dropping event without attempt reference");
        }

        if kind.is_violation() {
            match attempt_id {
                Some(attempt_id) => self.terminate(attempt_id).await,
                None => tracing::warn!(
                    %connection_id,
                    event_type = %kind,
                    "Violation without attempt reference, termination skipped"
                ),
            }
            let reason = if kind == ProctorEventType::TabSwitch {
                ScreenshotReason::TabSwitch
            } else {
                ScreenshotReason::WindowFocusChange
            };
            let request = ScreenshotRequest {
                reason,
                requested_at: Utc::now(),
                exam_id: payload.exam_id,
                attempt_id,
            };
            self.gateway
                .send(connection_id, ServerMessage::RequestScreenshot(request))
                .await;
        } else if kind == ProctorEventType::ProctoringAlert {
            if let Some(attempt_id) = attempt_id {
                if let Err(e) = self.attempts.record_alert(attempt_id).await {
                    tracing::warn!(error = ?e, %attempt_id, "Failed to count proctoring alert");
                }
            }
        }
    }

    async fn handle_screenshot(&self, connection_id: Uuid, upload: ScreenshotUpload) {
        let ack = match self.screenshots.store(&upload).await {
            UploadOutcome::Ignored => return,
            UploadOutcome::Failed(message) => UploadAck {
                status: UploadStatus::Error,
                message: Some(message),
                path: None,
            },
            UploadOutcome::Stored(stored) => {
                if let Some(attempt_id) = upload.attempt_id {
                    let event = NewProctorEvent::new(attempt_id, ProctorEventType::ScreenCapture)
                        .with_message("Screenshot captured")
                        .with_metadata(json!({
                            "mimeType": stored.mime_type,
                            "examId": stored.exam_id,
                            "studentId": stored.student_id,
                            "path": stored.url,
                            "bytes": stored.bytes,
                            "capturedAt": stored.captured_at,
                        }));
                    self.record(event).await;
                    if let Err(e) = self.attempts.record_snapshot(attempt_id).await {
                        tracing::warn!(error = ?e, %attempt_id, "Failed to count snapshot");
                    }
                } else {
                    tracing::debug!(%connection_id, exam_id = %stored.exam_id, "Screenshot stored without attempt reference");
                }
                UploadAck {
                    status: UploadStatus::Ok,
                    message: None,
                    path: Some(stored.url),
                }
            }
        };
        self.gateway
            .send(connection_id, ServerMessage::ScreenshotUploaded(ack))
            .await;
    }

    async fn record(&self, event: NewProctorEvent) {
        let attempt_id = event.attempt_id;
        let event_type = event.event_type;
        match self.events.append(event).await {
            Ok(stored) => {
                tracing::debug!(event_id = %stored.id, %attempt_id, %event_type, "Proctoring event persisted");
            }
            Err(e) => {
                tracing::error!(error = ?e, %attempt_id, %event_type, "Failed to persist proctoring event");
            }
        }
    }

    async fn terminate(&self, attempt_id: Uuid) {
        match self.attempts.terminate(attempt_id).await {
            Ok(true) => tracing::warn!(%attempt_id, "Anti-cheat: attempt terminated"),
            Ok(false) => tracing::debug!(%attempt_id, "Attempt already terminated or unknown"),
            Err(e) => tracing::error!(error = ?e, %attempt_id, "Failed to terminate attempt"),
        }
    }
}

fn activity_message(kind: ProctorEventType, payload: &ActivityPayload) -> String {
    match kind {
        ProctorEventType::TabSwitch => "Tab switch detected".to_string(),
        ProctorEventType::WindowFocusChange => match payload.is_focused {
            Some(true) => "Window focus regained".to_string(),
            _ => "Window focus lost".to_string(),
        },
        ProctorEventType::ExamStarted => "Exam started".to_string(),
        ProctorEventType::ExamEnded => "Exam ended".to_string(),
        ProctorEventType::ProctoringAlert => payload
            .alert_type
            .clone()
            .unwrap_or_else(|| "Proctoring alert".to_string()),
        other => other.as_str().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::attempt::Attempt;
    use crate::services::attempt_service::MockAttemptStore;
    use crate::services::event_log::MockEventLog;
    use crate::services::gateway_service::OutboundReceiver;
    use crate::services::memory_store::{InMemoryAttemptStore, InMemoryEventLog, InMemoryUserStore};
    use crate::services::presence_service::PresenceRegistry;
    use serde_json::Value as JsonValue;
    use std::path::PathBuf;

    const PNG_BASE64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    struct Harness {
        engine: EnforcementService,
        events: Arc<InMemoryEventLog>,
        attempts: Arc<InMemoryAttemptStore>,
        connection: Uuid,
        outbound: OutboundReceiver,
        root: PathBuf,
    }

    async fn harness() -> Harness {
        let attempts = Arc::new(InMemoryAttemptStore::new());
        let events = Arc::new(InMemoryEventLog::new(attempts.clone()));
        let gateway = ConnectionGateway::new(PresenceRegistry::new(Arc::new(InMemoryUserStore::new())));
        let root = std::env::temp_dir().join(format!("proctor-engine-{}", Uuid::new_v4()));
        let engine = EnforcementService::new(
            gateway.clone(),
            events.clone(),
            attempts.clone(),
            ScreenshotStore::new(&root, "/uploads/screenshots"),
        );
        let (connection, outbound) = gateway.accept().await;
        Harness {
            engine,
            events,
            attempts,
            connection,
            outbound,
            root,
        }
    }

    fn seed(attempts: &InMemoryAttemptStore) -> Attempt {
        let attempt = Attempt::new(Uuid::new_v4(), Uuid::new_v4());
        attempts.insert(attempt.clone());
        attempt
    }

    fn activity(kind: ProctorEventType, payload: JsonValue) -> ClientMessage {
        ClientMessage::Activity(kind, ActivityPayload::from_value(payload))
    }

    #[tokio::test]
    async fn focus_loss_terminates_and_requests_screenshot() {
        let mut h = harness().await;
        let attempt = seed(&h.attempts);

        h.engine
            .handle(
                h.connection,
                activity(
                    ProctorEventType::WindowFocusChange,
                    json!({ "attemptId": attempt.id.to_string(), "examId": "E1", "isFocused": false }),
                ),
            )
            .await;

        let events = h.events.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, ProctorEventType::WindowFocusChange);
        assert_eq!(events[0].attempt_id, attempt.id);
        assert!(h.attempts.find(attempt.id).await.unwrap().unwrap().terminated);

        match h.outbound.try_recv() {
            Ok(ServerMessage::RequestScreenshot(request)) => {
                assert_eq!(request.reason, ScreenshotReason::WindowFocusChange);
                assert_eq!(request.exam_id.as_deref(), Some("E1"));
                assert_eq!(request.attempt_id, Some(attempt.id));
            }
            other => panic!("unexpected outbound: {:?}", other),
        }
    }

    #[tokio::test]
    async fn repeated_tab_switches_keep_attempt_terminated() {
        let mut h = harness().await;
        let attempt = seed(&h.attempts);

        for _ in 0..2 {
            h.engine
                .handle(
                    h.connection,
                    activity(ProctorEventType::TabSwitch, json!({ "attempt": attempt.id.to_string() })),
                )
                .await;
        }

        assert_eq!(h.events.len(), 2);
        assert!(h.attempts.find(attempt.id).await.unwrap().unwrap().terminated);
        for _ in 0..2 {
            assert!(matches!(
                h.outbound.try_recv(),
                Ok(ServerMessage::RequestScreenshot(ScreenshotRequest { reason: ScreenshotReason::TabSwitch, .. }))
            ));
        }
    }

    #[tokio::test]
    async fn violation_without_attempt_still_requests_screenshot() {
        let mut h = harness().await;

        h.engine
            .handle(h.connection, activity(ProctorEventType::TabSwitch, json!({ "examId": "E1" })))
            .await;

        assert!(h.events.is_empty());
        match h.outbound.try_recv() {
            Ok(ServerMessage::RequestScreenshot(request)) => {
                assert_eq!(request.reason, ScreenshotReason::TabSwitch);
                assert_eq!(request.attempt_id, None);
            }
            other => panic!("unexpected outbound: {:?}", other),
        }
    }

    #[tokio::test]
    async fn violation_for_unknown_attempt_stores_nothing() {
        let mut h = harness().await;
        let unknown = Uuid::new_v4();

        h.engine
            .handle(
                h.connection,
                activity(ProctorEventType::TabSwitch, json!({ "attemptId": unknown.to_string() })),
            )
            .await;
        h.engine
            .handle(
                h.connection,
                activity(ProctorEventType::ExamStarted, json!({ "attemptId": unknown.to_string() })),
            )
            .await;

        assert_eq!(h.events.len(), 0);
        assert!(h.attempts.find(unknown).await.unwrap().is_none());
        match h.outbound.try_recv() {
            Ok(ServerMessage::RequestScreenshot(request)) => {
                assert_eq!(request.reason, ScreenshotReason::TabSwitch);
                assert_eq!(request.attempt_id, Some(unknown));
            }
            other => panic!("unexpected outbound: {:?}", other),
        }
        assert!(h.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn advisory_signals_are_logged_only() {
        let mut h = harness().await;
        let attempt = seed(&h.attempts);
        let payload = json!({ "attemptId": attempt.id.to_string(), "alertType": "multiple faces" });

        h.engine
            .handle(h.connection, activity(ProctorEventType::ExamStarted, payload.clone()))
            .await;
        h.engine
            .handle(h.connection, activity(ProctorEventType::ProctoringAlert, payload.clone()))
            .await;
        h.engine
            .handle(h.connection, activity(ProctorEventType::ExamEnded, payload))
            .await;

        let events = h.events.snapshot();
        let kinds: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            vec![
                ProctorEventType::ExamStarted,
                ProctorEventType::ProctoringAlert,
                ProctorEventType::ExamEnded
            ]
        );
        assert_eq!(events[1].message.as_deref(), Some("multiple faces"));
        let stored = h.attempts.find(attempt.id).await.unwrap().unwrap();
        assert!(!stored.terminated);
        assert_eq!(stored.proctoring_alerts, 1);
        assert!(h.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_event_write_does_not_block_termination() {
        let mut events = MockEventLog::new();
        events
            .expect_append()
            .times(1)
            .returning(|_| Err(Error::Internal("log unavailable".into())));
        let attempts = Arc::new(InMemoryAttemptStore::new());
        let attempt = seed(&attempts);
        let gateway = ConnectionGateway::new(PresenceRegistry::new(Arc::new(InMemoryUserStore::new())));
        let engine = EnforcementService::new(
            gateway.clone(),
            Arc::new(events),
            attempts.clone(),
            ScreenshotStore::new(std::env::temp_dir(), "/uploads/screenshots"),
        );
        let (connection, mut outbound) = gateway.accept().await;

        engine
            .handle(
                connection,
                activity(ProctorEventType::TabSwitch, json!({ "attemptId": attempt.id.to_string() })),
            )
            .await;

        assert!(attempts.find(attempt.id).await.unwrap().unwrap().terminated);
        assert!(outbound.try_recv().is_ok());
    }

    #[tokio::test]
    async fn failed_termination_still_requests_screenshot() {
        let mut attempts = MockAttemptStore::new();
        attempts
            .expect_terminate()
            .times(1)
            .returning(|_| Err(Error::Internal("db down".into())));
        let known = Arc::new(InMemoryAttemptStore::new());
        let attempt = seed(&known);
        let events = Arc::new(InMemoryEventLog::new(known));
        let gateway = ConnectionGateway::new(PresenceRegistry::new(Arc::new(InMemoryUserStore::new())));
        let engine = EnforcementService::new(
            gateway.clone(),
            events.clone(),
            Arc::new(attempts),
            ScreenshotStore::new(std::env::temp_dir(), "/uploads/screenshots"),
        );
        let (connection, mut outbound) = gateway.accept().await;

        engine
            .handle(
                connection,
                activity(
                    ProctorEventType::WindowFocusChange,
                    json!({ "attemptId": attempt.id.to_string(), "isFocused": false }),
                ),
            )
            .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(outbound.try_recv(), Ok(ServerMessage::RequestScreenshot(_))));
    }

    #[tokio::test]
    async fn screenshot_upload_records_capture_and_acks() {
        let mut h = harness().await;
        let attempt = seed(&h.attempts);
        let upload = ScreenshotUpload::from_value(&json!({
            "examId": attempt.exam_id.to_string(),
            "studentId": attempt.student_id.to_string(),
            "imageData": format!("data:image/png;base64,{}", PNG_BASE64),
            "mimeType": "image/png",
            "attemptId": attempt.id.to_string(),
        }));

        h.engine
            .handle(h.connection, ClientMessage::ScreenshotUpload(upload))
            .await;

        let events = h.events.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, ProctorEventType::ScreenCapture);
        let metadata = events[0].metadata.clone().unwrap();
        assert_eq!(metadata["mimeType"], "image/png");
        assert_eq!(metadata["studentId"], attempt.student_id.to_string());
        assert_eq!(
            h.attempts.find(attempt.id).await.unwrap().unwrap().proctoring_snapshots,
            1
        );

        match h.outbound.try_recv() {
            Ok(ServerMessage::ScreenshotUploaded(ack)) => {
                assert_eq!(ack.status, UploadStatus::Ok);
                assert!(ack.path.unwrap().ends_with(".png"));
            }
            other => panic!("unexpected outbound: {:?}", other),
        }
        let _ = std::fs::remove_dir_all(&h.root);
    }

    #[tokio::test]
    async fn malformed_upload_is_silent() {
        let mut h = harness().await;
        let attempt = seed(&h.attempts);
        let upload = ScreenshotUpload::from_value(&json!({
            "studentId": attempt.student_id.to_string(),
            "imageData": PNG_BASE64,
            "attemptId": attempt.id.to_string(),
        }));

        h.engine
            .handle(h.connection, ClientMessage::ScreenshotUpload(upload))
            .await;

        assert!(h.events.is_empty());
        assert!(h.outbound.try_recv().is_err());
        assert!(!h.root.exists());
    }

    #[tokio::test]
    async fn storage_failure_acks_error_without_event() {
        let attempts = Arc::new(InMemoryAttemptStore::new());
        let events = Arc::new(InMemoryEventLog::new(attempts.clone()));
        let attempt = seed(&attempts);
        let blocker = std::env::temp_dir().join(format!("proctor-blocker-{}", Uuid::new_v4()));
        std::fs::write(&blocker, b"file").unwrap();
        let gateway = ConnectionGateway::new(PresenceRegistry::new(Arc::new(InMemoryUserStore::new())));
        let engine = EnforcementService::new(
            gateway.clone(),
            events.clone(),
            attempts.clone(),
            ScreenshotStore::new(&blocker, "/uploads/screenshots"),
        );
        let (connection, mut outbound) = gateway.accept().await;
        let upload = ScreenshotUpload::from_value(&json!({
            "examId": attempt.exam_id.to_string(),
            "studentId": attempt.student_id.to_string(),
            "imageData": PNG_BASE64,
            "attemptId": attempt.id.to_string(),
        }));

        engine
            .handle(connection, ClientMessage::ScreenshotUpload(upload))
            .await;

        assert!(events.is_empty());
        match outbound.try_recv() {
            Ok(ServerMessage::ScreenshotUploaded(ack)) => {
                assert_eq!(ack.status, UploadStatus::Error);
                assert!(ack.message.is_some());
            }
            other => panic!("unexpected outbound: {:?}", other),
        }
        let _ = std::fs::remove_file(blocker);
    }

    #[tokio::test]
    async fn user_online_binds_presence() {
        let users = Arc::new(InMemoryUserStore::new());
        let presence = PresenceRegistry::new(users.clone());
        let gateway = ConnectionGateway::new(presence.clone());
        let engine = EnforcementService::new(
            gateway.clone(),
            Arc::new(InMemoryEventLog::new(Arc::new(InMemoryAttemptStore::new()))),
            Arc::new(InMemoryAttemptStore::new()),
            ScreenshotStore::new(std::env::temp_dir(), "/uploads/screenshots"),
        );
        let (connection, _outbound) = gateway.accept().await;
        let user = Uuid::new_v4();

        engine.handle(connection, ClientMessage::UserOnline(Some(user))).await;
        engine.handle(connection, ClientMessage::UserOnline(None)).await;

        assert_eq!(presence.user_for(connection).await, Some(user));
        assert!(users.is_active(user));
    }
}
