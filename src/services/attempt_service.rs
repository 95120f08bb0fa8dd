use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::attempt::Attempt;

/// Mutable attempt state touched by the proctoring pipeline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn find(&self, attempt_id: Uuid) -> Result<Option<Attempt>>;

    /// Sets `terminated` in a single conditional write. Returns `true` only
    /// for the call that flipped the flag; repeats and unknown ids are `false`.
    async fn terminate(&self, attempt_id: Uuid) -> Result<bool>;

    async fn record_alert(&self, attempt_id: Uuid) -> Result<()>;

    async fn record_snapshot(&self, attempt_id: Uuid) -> Result<()>;
}

#[derive(Clone)]
pub struct PgAttemptStore {
    pool: PgPool,
}

impl PgAttemptStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttemptStore for PgAttemptStore {
    async fn find(&self, attempt_id: Uuid) -> Result<Option<Attempt>> {
        let attempt = sqlx::query_as::<_, Attempt>(r#"SELECT * FROM attempts WHERE id = $1"#)
            .bind(attempt_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(attempt)
    }

    async fn terminate(&self, attempt_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE attempts
            SET terminated = TRUE,
                updated_at = NOW()
            WHERE id = $1 AND terminated = FALSE
            "#,
        )
        .bind(attempt_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_alert(&self, attempt_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"UPDATE attempts SET proctoring_alerts = proctoring_alerts + 1, updated_at = NOW() WHERE id = $1"#,
        )
        .bind(attempt_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_snapshot(&self, attempt_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"UPDATE attempts SET proctoring_snapshots = proctoring_snapshots + 1, updated_at = NOW() WHERE id = $1"#,
        )
        .bind(attempt_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
