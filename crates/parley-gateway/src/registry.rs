use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Routing state for one live connection. Holds no message content.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub conn_id: Uuid,
    tx: mpsc::Sender<Arc<str>>,
    shutdown: CancellationToken,
}

impl ConnectionHandle {
    pub(crate) fn try_send(&self, payload: Arc<str>) -> Result<(), mpsc::error::TrySendError<Arc<str>>> {
        self.tx.try_send(payload)
    }

    /// Tells the connection's writer and reader to stop.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

/// The receiving half handed to a connection's writer.
pub struct Outbound {
    pub conn_id: Uuid,
    pub rx: mpsc::Receiver<Arc<str>>,
    pub shutdown: CancellationToken,
}

/// Live connections per user. Several per user is normal (multi-device).
#[derive(Default)]
pub struct Registry {
    conns: RwLock<HashMap<i64, HashMap<Uuid, ConnectionHandle>>>,
}

impl Registry {
    pub async fn register(&self, user_id: i64, capacity: usize) -> Outbound {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let shutdown = CancellationToken::new();

        let handle = ConnectionHandle {
            conn_id,
            tx,
            shutdown: shutdown.clone(),
        };
        self.conns
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id, handle);

        Outbound {
            conn_id,
            rx,
            shutdown,
        }
    }

    /// Removes the connection. Returns the handle if it was still registered.
    pub async fn unregister(&self, user_id: i64, conn_id: Uuid) -> Option<ConnectionHandle> {
        let mut conns = self.conns.write().await;
        let user_conns = conns.get_mut(&user_id)?;
        let handle = user_conns.remove(&conn_id);
        if user_conns.is_empty() {
            conns.remove(&user_id);
        }
        handle
    }

    /// Snapshot of a user's connections, taken so sends happen outside the lock.
    pub async fn connections(&self, user_id: i64) -> Vec<ConnectionHandle> {
        self.conns
            .read()
            .await
            .get(&user_id)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn connection_count(&self, user_id: i64) -> usize {
        self.conns.read().await.get(&user_id).map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_and_unregister() {
        let registry = Registry::default();
        let a = registry.register(1, 4).await;
        let b = registry.register(1, 4).await;
        assert_eq!(registry.connection_count(1).await, 2);

        assert!(registry.unregister(1, a.conn_id).await.is_some());
        assert!(registry.unregister(1, a.conn_id).await.is_none());
        assert_eq!(registry.connection_count(1).await, 1);

        registry.unregister(1, b.conn_id).await;
        assert_eq!(registry.connection_count(1).await, 0);
        assert!(registry.conns.read().await.is_empty());
    }
}
