use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::dto::proctor_dto::ListEventsQuery;
use crate::error::Result;
use crate::models::proctor_event::{NewProctorEvent, ProctorEvent, ProctorEventType};

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct EventFilter {
    pub attempt_id: Option<Uuid>,
    pub event_type: Option<ProctorEventType>,
    pub since: Option<DateTime<Utc>>,
    pub limit: i64,
    pub skip: i64,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            attempt_id: None,
            event_type: None,
            since: None,
            limit: DEFAULT_LIST_LIMIT,
            skip: 0,
        }
    }
}

impl From<ListEventsQuery> for EventFilter {
    fn from(query: ListEventsQuery) -> Self {
        Self {
            attempt_id: query.attempt_id,
            event_type: query.event_type,
            since: query.since,
            limit: query
                .limit
                .unwrap_or(DEFAULT_LIST_LIMIT)
                .clamp(1, MAX_LIST_LIMIT),
            skip: query.skip.unwrap_or(0).max(0),
        }
    }
}

impl EventFilter {
    pub fn matches(&self, event: &ProctorEvent) -> bool {
        self.attempt_id.map_or(true, |id| event.attempt_id == id)
            && self.event_type.map_or(true, |t| event.event_type == t)
            && self.since.map_or(true, |since| event.created_at >= since)
    }
}

/// Append-only store of proctoring events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, event: NewProctorEvent) -> Result<ProctorEvent>;

    /// Newest first.
    async fn list(&self, filter: EventFilter) -> Result<Vec<ProctorEvent>>;
}

#[derive(Clone)]
pub struct PgEventLog {
    pool: PgPool,
}

impl PgEventLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventLog for PgEventLog {
    async fn append(&self, event: NewProctorEvent) -> Result<ProctorEvent> {
        let row = sqlx::query_as::<_, ProctorEvent>(
            r#"
            INSERT INTO proctor_events (attempt_id, event_type, message, metadata)
            VALUES ($1, $2, $3, $4)
            RETURNING id, attempt_id, event_type, message, metadata, created_at
            "#,
        )
        .bind(event.attempt_id)
        .bind(event.event_type.as_str())
        .bind(event.message)
        .bind(event.metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list(&self, filter: EventFilter) -> Result<Vec<ProctorEvent>> {
        let rows = sqlx::query_as::<_, ProctorEvent>(
            r#"
            SELECT id, attempt_id, event_type, message, metadata, created_at
            FROM proctor_events
            WHERE ($1::uuid IS NULL OR attempt_id = $1)
              AND ($2::text IS NULL OR event_type = $2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(filter.attempt_id)
        .bind(filter.event_type.map(|t| t.as_str()))
        .bind(filter.since)
        .bind(filter.limit)
        .bind(filter.skip)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
