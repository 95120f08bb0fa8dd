use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::dto::proctor_dto::{ScreenshotRequest, ServerMessage};
use crate::error::Result;
use crate::services::gateway_service::ConnectionGateway;

/// Every five minutes, on the wall clock.
pub const SCREENSHOT_SCHEDULE: &str = "0 */5 * * * *";

/// Periodically asks every live connection for a fresh screenshot.
#[derive(Clone)]
pub struct ScreenshotScheduler {
    gateway: ConnectionGateway,
    last_fired: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl ScreenshotScheduler {
    pub fn new(gateway: ConnectionGateway) -> Self {
        Self {
            gateway,
            last_fired: Arc::new(Mutex::new(None)),
        }
    }

    pub fn last_fired(&self) -> Option<DateTime<Utc>> {
        self.last_fired.lock().ok().and_then(|guard| *guard)
    }

    /// Broadcasts one scheduled request and returns how many connections
    /// accepted it.
    pub async fn fire(&self) -> usize {
        let request = ScreenshotRequest::scheduled();
        let requested_at = request.requested_at;
        let delivered = self
            .gateway
            .broadcast(ServerMessage::RequestScreenshot(request))
            .await;
        if let Ok(mut guard) = self.last_fired.lock() {
            *guard = Some(requested_at);
        }
        tracing::info!(delivered, %requested_at, "Scheduled screenshot request sent");
        delivered
    }

    /// Registers the cron job and starts the scheduler. The caller owns the
    /// returned handle and shuts it down on exit.
    pub async fn start(&self) -> Result<JobScheduler> {
        let scheduler = JobScheduler::new().await?;
        let this = self.clone();
        let job = Job::new_async(SCREENSHOT_SCHEDULE, move |_job_id, _scheduler| {
            let this = this.clone();
            Box::pin(async move {
                this.fire().await;
            })
        })?;
        scheduler.add(job).await?;
        scheduler.start().await?;
        tracing::info!(schedule = SCREENSHOT_SCHEDULE, "Screenshot scheduler started");
        Ok(scheduler)
    }
}
