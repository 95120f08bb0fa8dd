use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const STATUS_IN_PROGRESS: &str = "in-progress";

/// One student's session of one exam.
///
/// `terminated` is owned by the proctoring pipeline and only ever moves from
/// false to true. `status` belongs to the submission and grading flows.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub student_id: Uuid,
    pub status: String,
    pub terminated: bool,
    pub proctoring_alerts: i32,
    pub proctoring_snapshots: i32,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Attempt {
    pub fn new(exam_id: Uuid, student_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            exam_id,
            student_id,
            status: STATUS_IN_PROGRESS.to_string(),
            terminated: false,
            proctoring_alerts: 0,
            proctoring_snapshots: 0,
            started_at: now,
            submitted_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
