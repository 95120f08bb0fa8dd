pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::services::{
    attempt_service::{AttemptStore, PgAttemptStore},
    enforcement_service::EnforcementService,
    event_log::{EventLog, PgEventLog},
    gateway_service::ConnectionGateway,
    memory_store::{InMemoryAttemptStore, InMemoryEventLog, InMemoryUserStore},
    presence_service::PresenceRegistry,
    scheduler_service::ScreenshotScheduler,
    screenshot_service::ScreenshotStore,
    user_service::{PgUserStore, UserStore},
};

/// URL prefix the uploads directory is served under.
pub const UPLOADS_ROUTE: &str = "/uploads";

#[derive(Clone)]
pub struct AppState {
    pub gateway: ConnectionGateway,
    pub enforcement: EnforcementService,
    pub scheduler: ScreenshotScheduler,
    pub events: Arc<dyn EventLog>,
    pub max_message_bytes: usize,
}

impl AppState {
    pub fn new(
        events: Arc<dyn EventLog>,
        attempts: Arc<dyn AttemptStore>,
        users: Arc<dyn UserStore>,
        screenshots: ScreenshotStore,
        max_message_bytes: usize,
    ) -> Self {
        let gateway = ConnectionGateway::new(PresenceRegistry::new(users));
        let enforcement =
            EnforcementService::new(gateway.clone(), events.clone(), attempts, screenshots);
        let scheduler = ScreenshotScheduler::new(gateway.clone());

        Self {
            gateway,
            enforcement,
            scheduler,
            events,
            max_message_bytes,
        }
    }

    pub fn with_postgres(pool: PgPool, config: &Config) -> Self {
        Self::new(
            Arc::new(PgEventLog::new(pool.clone())),
            Arc::new(PgAttemptStore::new(pool.clone())),
            Arc::new(PgUserStore::new(pool)),
            screenshot_store(config),
            config.max_upload_bytes,
        )
    }

    pub fn in_memory(config: &Config) -> Self {
        let attempts = Arc::new(InMemoryAttemptStore::new());
        Self::new(
            Arc::new(InMemoryEventLog::new(attempts.clone())),
            attempts,
            Arc::new(InMemoryUserStore::new()),
            screenshot_store(config),
            config.max_upload_bytes,
        )
    }
}

fn screenshot_store(config: &Config) -> ScreenshotStore {
    ScreenshotStore::new(
        config.screenshots_dir(),
        format!("{}/screenshots", UPLOADS_ROUTE),
    )
}
