use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::dto::proctor_dto::ServerMessage;
use crate::services::presence_service::PresenceRegistry;

pub type OutboundSender = mpsc::UnboundedSender<ServerMessage>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<ServerMessage>;

/// Owns the live connections. Each one is represented by the sending half of
/// its outbound queue; the socket writer task holds the receiving half.
#[derive(Clone)]
pub struct ConnectionGateway {
    connections: Arc<RwLock<HashMap<Uuid, OutboundSender>>>,
    presence: PresenceRegistry,
}

impl ConnectionGateway {
    pub fn new(presence: PresenceRegistry) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            presence,
        }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub async fn accept(&self) -> (Uuid, OutboundReceiver) {
        let connection_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.write().await.insert(connection_id, tx);
        tracing::info!(%connection_id, "Client connected");
        (connection_id, rx)
    }

    pub async fn announce(&self, connection_id: Uuid, user_id: Uuid) {
        if !self.connections.read().await.contains_key(&connection_id) {
            tracing::debug!(%connection_id, %user_id, "Ignoring announce on closed connection");
            return;
        }
        self.presence.mark_online(connection_id, user_id).await;
    }

    pub async fn disconnect(&self, connection_id: Uuid) {
        let removed = self.connections.write().await.remove(&connection_id);
        if removed.is_none() {
            return;
        }
        let user = self.presence.mark_offline(connection_id).await;
        tracing::info!(%connection_id, user_id = ?user, "Client disconnected");
    }

    /// Fire-and-forget. Returns whether the command was queued.
    pub async fn send(&self, connection_id: Uuid, message: ServerMessage) -> bool {
        let connections = self.connections.read().await;
        let Some(tx) = connections.get(&connection_id) else {
            tracing::debug!(%connection_id, "Dropping command for unknown connection");
            return false;
        };
        if tx.send(message).is_err() {
            tracing::debug!(%connection_id, "Dropping command for closed connection");
            return false;
        }
        true
    }

    /// Queues the command on every live connection and returns how many
    /// accepted it.
    pub async fn broadcast(&self, message: ServerMessage) -> usize {
        let connections = self.connections.read().await;
        connections
            .iter()
            .filter(|(connection_id, tx)| match tx.send(message.clone()) {
                Ok(()) => true,
                Err(_) => {
                    tracing::debug!(connection_id = %connection_id, "Broadcast skipped closed connection");
                    false
                }
            })
            .count()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::proctor_dto::ScreenshotRequest;
    use crate::services::memory_store::InMemoryUserStore;

    fn gateway() -> (ConnectionGateway, Arc<InMemoryUserStore>) {
        let users = Arc::new(InMemoryUserStore::new());
        let gateway = ConnectionGateway::new(PresenceRegistry::new(users.clone()));
        (gateway, users)
    }

    #[tokio::test]
    async fn send_reaches_only_the_target_connection() {
        let (gateway, _) = gateway();
        let (a, mut rx_a) = gateway.accept().await;
        let (_b, mut rx_b) = gateway.accept().await;

        let msg = ServerMessage::RequestScreenshot(ScreenshotRequest::scheduled());
        assert!(gateway.send(a, msg.clone()).await);
        assert_eq!(rx_a.try_recv().ok(), Some(msg));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_skips_disconnected_connections() {
        let (gateway, _) = gateway();
        let (_a, mut rx_a) = gateway.accept().await;
        let (b, mut rx_b) = gateway.accept().await;
        gateway.disconnect(b).await;

        let delivered = gateway
            .broadcast(ServerMessage::RequestScreenshot(ScreenshotRequest::scheduled()))
            .await;
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
        assert!(!gateway.send(b, ServerMessage::RequestScreenshot(ScreenshotRequest::scheduled())).await);
        assert_eq!(gateway.connection_count().await, 1);
    }

    #[tokio::test]
    async fn disconnect_marks_announced_user_offline() {
        let (gateway, users) = gateway();
        let (conn, _rx) = gateway.accept().await;
        let user = Uuid::new_v4();

        gateway.announce(conn, user).await;
        assert!(users.is_active(user));
        gateway.disconnect(conn).await;
        assert!(!users.is_active(user));

        gateway.announce(conn, user).await;
        assert!(!users.is_active(user));
    }

    #[tokio::test]
    async fn send_to_dropped_receiver_is_tolerated() {
        let (gateway, _) = gateway();
        let (conn, rx) = gateway.accept().await;
        drop(rx);
        assert!(!gateway.send(conn, ServerMessage::RequestScreenshot(ScreenshotRequest::scheduled())).await);
    }
}
