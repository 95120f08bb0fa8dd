use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;
use validator::Validate;

use crate::models::proctor_event::{ProctorEvent, ProctorEventType};

pub const MSG_USER_ONLINE: &str = "user_online";
pub const MSG_TAB_SWITCH: &str = "tabSwitch";
pub const MSG_EXAM_STARTED: &str = "examStarted";
pub const MSG_EXAM_ENDED: &str = "examEnded";
pub const MSG_PROCTORING_ALERT: &str = "proctoringAlert";
pub const MSG_WINDOW_FOCUS_CHANGE: &str = "windowFocusChange";
pub const MSG_SCREENSHOT_UPLOAD: &str = "screenshot-upload";

/// Frame shape shared by both directions of the channel.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: JsonValue,
}

/// Inbound messages after dispatch on the declared type.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    UserOnline(Option<Uuid>),
    Activity(ProctorEventType, ActivityPayload),
    ScreenshotUpload(ScreenshotUpload),
}

impl ClientMessage {
    /// Returns `None` for message types this server does not handle.
    pub fn from_envelope(envelope: ClientEnvelope) -> Option<Self> {
        let payload = envelope.payload;
        let activity = |kind| {
            Some(ClientMessage::Activity(
                kind,
                ActivityPayload::from_value(payload.clone()),
            ))
        };
        match envelope.kind.as_str() {
            MSG_USER_ONLINE => {
                let user = match &payload {
                    JsonValue::String(s) => parse_id(Some(s)),
                    other => parse_id(str_field(other, "userId")),
                };
                Some(ClientMessage::UserOnline(user))
            }
            MSG_TAB_SWITCH => activity(ProctorEventType::TabSwitch),
            MSG_WINDOW_FOCUS_CHANGE => activity(ProctorEventType::WindowFocusChange),
            MSG_EXAM_STARTED => activity(ProctorEventType::ExamStarted),
            MSG_EXAM_ENDED => activity(ProctorEventType::ExamEnded),
            MSG_PROCTORING_ALERT => activity(ProctorEventType::ProctoringAlert),
            MSG_SCREENSHOT_UPLOAD => Some(ClientMessage::ScreenshotUpload(
                ScreenshotUpload::from_value(&payload),
            )),
            _ => None,
        }
    }
}

/// Payload of behavioral signals. Fields are read leniently: a field with
/// the wrong JSON type counts as absent instead of rejecting the frame.
#[derive(Debug, Clone, Default)]
pub struct ActivityPayload {
    pub attempt_id: Option<Uuid>,
    pub exam_id: Option<String>,
    pub user_id: Option<String>,
    pub is_focused: Option<bool>,
    pub alert_type: Option<String>,
    pub raw: JsonValue,
}

impl ActivityPayload {
    pub fn from_value(raw: JsonValue) -> Self {
        Self {
            attempt_id: attempt_ref(&raw),
            exam_id: str_field(&raw, "examId").map(str::to_string),
            user_id: str_field(&raw, "userId").map(str::to_string),
            is_focused: raw.get("isFocused").and_then(JsonValue::as_bool),
            alert_type: str_field(&raw, "alertType").map(str::to_string),
            raw,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScreenshotUpload {
    pub exam_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
    pub image_data: Option<String>,
    pub mime_type: Option<String>,
    pub attempt_id: Option<Uuid>,
}

impl ScreenshotUpload {
    pub fn from_value(raw: &JsonValue) -> Self {
        Self {
            exam_id: parse_id(str_field(raw, "examId")),
            student_id: parse_id(str_field(raw, "studentId")),
            image_data: str_field(raw, "imageData")
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string),
            mime_type: str_field(raw, "mimeType").map(str::to_string),
            attempt_id: attempt_ref(raw),
        }
    }
}

/// Resolves `attemptId`, falling back to `attempt`.
pub fn attempt_ref(raw: &JsonValue) -> Option<Uuid> {
    parse_id(str_field(raw, "attemptId")).or_else(|| parse_id(str_field(raw, "attempt")))
}

fn str_field<'a>(raw: &'a JsonValue, key: &str) -> Option<&'a str> {
    raw.get(key).and_then(JsonValue::as_str)
}

fn parse_id(value: Option<&str>) -> Option<Uuid> {
    value.and_then(|s| Uuid::parse_str(s.trim()).ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScreenshotReason {
    TabSwitch,
    WindowFocusChange,
    Scheduled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotRequest {
    pub reason: ScreenshotReason,
    pub requested_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exam_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<Uuid>,
}

impl ScreenshotRequest {
    pub fn scheduled() -> Self {
        Self {
            reason: ScreenshotReason::Scheduled,
            requested_at: Utc::now(),
            exam_id: None,
            attempt_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadAck {
    pub status: UploadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Commands pushed from the server down a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    #[serde(rename = "request-screenshot")]
    RequestScreenshot(ScreenshotRequest),
    #[serde(rename = "screenshot-uploaded")]
    ScreenshotUploaded(UploadAck),
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ListEventsQuery {
    pub attempt_id: Option<Uuid>,
    pub event_type: Option<ProctorEventType>,
    pub since: Option<DateTime<Utc>>,
    #[validate(range(min = 1))]
    pub limit: Option<i64>,
    #[validate(range(min = 0))]
    pub skip: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListEventsResponse {
    pub events: Vec<ProctorEvent>,
}
