use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProctorEventType {
    TabSwitch,
    WindowBlur,
    FullscreenExit,
    WebcamCapture,
    ScreenCapture,
    WindowFocusChange,
    ExamStarted,
    ExamEnded,
    ProctoringAlert,
    Warning,
    Info,
}

impl ProctorEventType {
    pub const ALL: [ProctorEventType; 11] = [
        ProctorEventType::TabSwitch,
        ProctorEventType::WindowBlur,
        ProctorEventType::FullscreenExit,
        ProctorEventType::WebcamCapture,
        ProctorEventType::ScreenCapture,
        ProctorEventType::WindowFocusChange,
        ProctorEventType::ExamStarted,
        ProctorEventType::ExamEnded,
        ProctorEventType::ProctoringAlert,
        ProctorEventType::Warning,
        ProctorEventType::Info,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProctorEventType::TabSwitch => "tab-switch",
            ProctorEventType::WindowBlur => "window-blur",
            ProctorEventType::FullscreenExit => "fullscreen-exit",
            ProctorEventType::WebcamCapture => "webcam-capture",
            ProctorEventType::ScreenCapture => "screen-capture",
            ProctorEventType::WindowFocusChange => "window-focus-change",
            ProctorEventType::ExamStarted => "exam-started",
            ProctorEventType::ExamEnded => "exam-ended",
            ProctorEventType::ProctoringAlert => "proctoring-alert",
            ProctorEventType::Warning => "warning",
            ProctorEventType::Info => "info",
        }
    }

    /// Hard violations end the attempt immediately.
    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            ProctorEventType::TabSwitch | ProctorEventType::WindowFocusChange
        )
    }
}

impl fmt::Display for ProctorEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown proctor event type: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for ProctorEventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProctorEventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

impl TryFrom<String> for ProctorEventType {
    type Error = UnknownEventType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProctorEvent {
    pub id: Uuid,
    pub attempt_id: Uuid,
    #[sqlx(try_from = "String")]
    pub event_type: ProctorEventType,
    pub message: Option<String>,
    pub metadata: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
}

/// An event ready to be appended to the log.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProctorEvent {
    pub attempt_id: Uuid,
    pub event_type: ProctorEventType,
    pub message: Option<String>,
    pub metadata: Option<JsonValue>,
}

impl NewProctorEvent {
    pub fn new(attempt_id: Uuid, event_type: ProctorEventType) -> Self {
        Self {
            attempt_id,
            event_type,
            message: None,
            metadata: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        let trimmed = message.trim();
        self.message = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_names_match_wire_format() {
        for kind in ProctorEventType::ALL {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json.as_str(), Some(kind.as_str()));
            assert_eq!(kind.as_str().parse::<ProctorEventType>(), Ok(kind));
        }
        assert!("tabSwitch".parse::<ProctorEventType>().is_err());
    }

    #[test]
    fn only_tab_switch_and_focus_change_are_violations() {
        let violations: Vec<_> = ProctorEventType::ALL
            .iter()
            .filter(|t| t.is_violation())
            .collect();
        assert_eq!(
            violations,
            vec![&ProctorEventType::TabSwitch, &ProctorEventType::WindowFocusChange]
        );
    }

    #[test]
    fn blank_messages_are_dropped() {
        let event = NewProctorEvent::new(Uuid::new_v4(), ProctorEventType::Info).with_message("   ");
        assert_eq!(event.message, None);
        let event = NewProctorEvent::new(Uuid::new_v4(), ProctorEventType::Info).with_message(" hi ");
        assert_eq!(event.message.as_deref(), Some("hi"));
    }
}
