use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;

/// The external user record, reduced to the active flag presence maintains.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn set_active(&self, user_id: Uuid, active: bool) -> Result<()>;
}

#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn set_active(&self, user_id: Uuid, active: bool) -> Result<()> {
        let result = sqlx::query(
            r#"UPDATE users SET is_active = $1, updated_at = NOW() WHERE id = $2 AND is_active <> $1"#,
        )
        .bind(active)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            tracing::debug!(%user_id, active, "User active flag unchanged");
        }
        Ok(())
    }
}
