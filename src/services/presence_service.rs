use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::services::user_service::UserStore;

/// Live connection → user bindings.
///
/// The binding map is only locked for in-memory bookkeeping. User-store
/// writes run under a per-user lock and always write the user's current
/// state, so a slow write for one user never holds up another, and the
/// last write for a user reflects the latest binding change.
#[derive(Clone)]
pub struct PresenceRegistry {
    bindings: Arc<Mutex<HashMap<Uuid, Uuid>>>,
    user_locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
    users: Arc<dyn UserStore>,
}

impl PresenceRegistry {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self {
            bindings: Arc::new(Mutex::new(HashMap::new())),
            user_locks: Arc::new(Mutex::new(HashMap::new())),
            users,
        }
    }

    /// Binds `user_id` to the connection and flags the user active.
    /// Rebinding a connection to another user releases the previous one.
    pub async fn mark_online(&self, connection_id: Uuid, user_id: Uuid) {
        let released = {
            let mut bindings = self.bindings.lock().await;
            let previous = bindings
                .insert(connection_id, user_id)
                .filter(|previous| *previous != user_id);
            previous.filter(|previous| !bindings.values().any(|u| u == previous))
        };
        if let Some(previous) = released {
            self.sync_active(previous).await;
        }
        self.sync_active(user_id).await;
        tracing::info!(%connection_id, %user_id, "User online");
    }

    /// Drops the connection's binding. The user is flagged inactive only when
    /// this was their last live connection. Returns the released user.
    pub async fn mark_offline(&self, connection_id: Uuid) -> Option<Uuid> {
        let (user_id, still_online) = {
            let mut bindings = self.bindings.lock().await;
            let user_id = bindings.remove(&connection_id)?;
            let still_online = bindings.values().any(|u| *u == user_id);
            (user_id, still_online)
        };
        if still_online {
            tracing::debug!(%connection_id, %user_id, "User still has live connections");
        } else {
            self.sync_active(user_id).await;
            tracing::info!(%connection_id, %user_id, "User offline");
        }
        Some(user_id)
    }

    pub async fn user_for(&self, connection_id: Uuid) -> Option<Uuid> {
        self.bindings.lock().await.get(&connection_id).copied()
    }

    pub async fn online_users(&self) -> HashSet<Uuid> {
        self.bindings.lock().await.values().copied().collect()
    }

    async fn is_bound(&self, user_id: Uuid) -> bool {
        self.bindings.lock().await.values().any(|u| *u == user_id)
    }

    /// Writes the user's current online state to the store.
    async fn sync_active(&self, user_id: Uuid) {
        let lock = self
            .user_locks
            .lock()
            .await
            .entry(user_id)
            .or_default()
            .clone();
        {
            let _guard = lock.lock().await;
            let active = self.is_bound(user_id).await;
            if let Err(e) = self.users.set_active(user_id, active).await {
                tracing::warn!(error = ?e, %user_id, active, "Failed to update user active flag");
            }
        }

        let mut locks = self.user_locks.lock().await;
        // Only the map and this call still hold the lock: nobody is queued.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&user_id);
        }
    }
}
