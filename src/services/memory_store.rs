//! Process-local stores used when no database is configured, and by tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::attempt::Attempt;
use crate::models::proctor_event::{NewProctorEvent, ProctorEvent};
use crate::services::attempt_service::AttemptStore;
use crate::services::event_log::{EventFilter, EventLog};
use crate::services::user_service::UserStore;

fn poisoned<T>(_: T) -> Error {
    Error::Internal("in-memory store mutex poisoned".to_string())
}

/// Append-only event list. Events must reference an attempt known to
/// `attempts`, mirroring the foreign key on `proctor_events`.
#[derive(Debug)]
pub struct InMemoryEventLog {
    events: Mutex<Vec<ProctorEvent>>,
    attempts: Arc<InMemoryAttemptStore>,
}

impl InMemoryEventLog {
    pub fn new(attempts: Arc<InMemoryAttemptStore>) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            attempts,
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Oldest first, in append order.
    pub fn snapshot(&self) -> Vec<ProctorEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, event: NewProctorEvent) -> Result<ProctorEvent> {
        if !self.attempts.contains(event.attempt_id)? {
            return Err(Error::NotFound(format!(
                "attempt {} does not exist",
                event.attempt_id
            )));
        }
        let stored = ProctorEvent {
            id: Uuid::new_v4(),
            attempt_id: event.attempt_id,
            event_type: event.event_type,
            message: event.message,
            metadata: event.metadata,
            created_at: Utc::now(),
        };
        self.events.lock().map_err(poisoned)?.push(stored.clone());
        Ok(stored)
    }

    async fn list(&self, filter: EventFilter) -> Result<Vec<ProctorEvent>> {
        let events = self.events.lock().map_err(poisoned)?;
        Ok(events
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .skip(filter.skip.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAttemptStore {
    attempts: Mutex<HashMap<Uuid, Attempt>>,
}

impl InMemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, attempt: Attempt) {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.insert(attempt.id, attempt);
        }
    }

    pub fn contains(&self, attempt_id: Uuid) -> Result<bool> {
        Ok(self
            .attempts
            .lock()
            .map_err(poisoned)?
            .contains_key(&attempt_id))
    }

    fn update<F>(&self, attempt_id: Uuid, f: F) -> Result<bool>
    where
        F: FnOnce(&mut Attempt) -> bool,
    {
        let mut attempts = self.attempts.lock().map_err(poisoned)?;
        let Some(attempt) = attempts.get_mut(&attempt_id) else {
            return Ok(false);
        };
        let changed = f(attempt);
        if changed {
            attempt.updated_at = Utc::now();
        }
        Ok(changed)
    }
}

#[async_trait]
impl AttemptStore for InMemoryAttemptStore {
    async fn find(&self, attempt_id: Uuid) -> Result<Option<Attempt>> {
        Ok(self.attempts.lock().map_err(poisoned)?.get(&attempt_id).cloned())
    }

    async fn terminate(&self, attempt_id: Uuid) -> Result<bool> {
        self.update(attempt_id, |attempt| {
            let flipped = !attempt.terminated;
            attempt.terminated = true;
            flipped
        })
    }

    async fn record_alert(&self, attempt_id: Uuid) -> Result<()> {
        self.update(attempt_id, |attempt| {
            attempt.proctoring_alerts += 1;
            true
        })?;
        Ok(())
    }

    async fn record_snapshot(&self, attempt_id: Uuid) -> Result<()> {
        self.update(attempt_id, |attempt| {
            attempt.proctoring_snapshots += 1;
            true
        })?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    active: Mutex<HashMap<Uuid, bool>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, user_id: Uuid) -> bool {
        self.active
            .lock()
            .map(|a| a.get(&user_id).copied().unwrap_or(false))
            .unwrap_or(false)
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn set_active(&self, user_id: Uuid, active: bool) -> Result<()> {
        self.active.lock().map_err(poisoned)?.insert(user_id, active);
        Ok(())
    }
}
