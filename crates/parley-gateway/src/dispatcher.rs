use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, warn};
use uuid::Uuid;

use parley_types::events::Envelope;

use crate::registry::{Outbound, Registry};

/// Per-connection limits.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Outbound queue capacity. A full queue evicts the connection.
    pub queue_capacity: usize,
    pub ping_interval: Duration,
    /// Longest silence tolerated from a client, pongs included.
    pub read_deadline: Duration,
    pub write_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 32,
            ping_interval: Duration::from_secs(25),
            read_deadline: Duration::from_secs(60),
            write_timeout: Duration::from_secs(8),
        }
    }
}

/// Pushes envelopes to live connections. Never blocks on a slow client:
/// a connection whose queue is full is closed instead.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    registry: Registry,
    config: GatewayConfig,
}

impl Dispatcher {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                registry: Registry::default(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Registers a new connection for the user.
    pub async fn connect(&self, user_id: i64) -> Outbound {
        let outbound = self
            .inner
            .registry
            .register(user_id, self.inner.config.queue_capacity)
            .await;
        debug!(user_id, conn_id = %outbound.conn_id, "Connection registered");
        outbound
    }

    pub async fn disconnect(&self, user_id: i64, conn_id: Uuid) {
        if let Some(handle) = self.inner.registry.unregister(user_id, conn_id).await {
            handle.close();
            debug!(user_id, conn_id = %conn_id, "Connection unregistered");
        }
    }

    pub async fn connection_count(&self, user_id: i64) -> usize {
        self.inner.registry.connection_count(user_id).await
    }

    /// Enqueues the envelope on every live connection of the user. Returns
    /// how many connections accepted it; zero connections is not an error.
    pub async fn send_to_user(&self, user_id: i64, envelope: &Envelope) -> usize {
        match encode(envelope) {
            Some(payload) => self.deliver(user_id, payload).await,
            None => 0,
        }
    }

    /// Sends to each distinct user once. Returns the users that had at least
    /// one connection accept the envelope.
    pub async fn send_to_users<I>(&self, user_ids: I, envelope: &Envelope) -> Vec<i64>
    where
        I: IntoIterator<Item = i64>,
    {
        let Some(payload) = encode(envelope) else {
            return Vec::new();
        };

        let targets: BTreeSet<i64> = user_ids.into_iter().collect();
        let mut reached = Vec::new();
        for user_id in targets {
            if self.deliver(user_id, payload.clone()).await > 0 {
                reached.push(user_id);
            }
        }
        debug!(kind = envelope.kind(), reached = reached.len(), "Envelope fanned out");
        reached
    }

    async fn deliver(&self, user_id: i64, payload: Arc<str>) -> usize {
        let registry = &self.inner.registry;
        let mut delivered = 0;

        for handle in registry.connections(user_id).await {
            match handle.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(user_id, conn_id = %handle.conn_id, "Outbound queue full, evicting connection");
                    registry.unregister(user_id, handle.conn_id).await;
                    handle.close();
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(user_id, conn_id = %handle.conn_id, "Dropping closed connection");
                    registry.unregister(user_id, handle.conn_id).await;
                }
            }
        }
        delivered
    }
}

fn encode(envelope: &Envelope) -> Option<Arc<str>> {
    match serde_json::to_string(envelope) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            error!(kind = envelope.kind(), "Failed to encode envelope: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use parley_types::events::GatewayEvent;

    use super::*;

    fn dispatcher(capacity: usize) -> Dispatcher {
        Dispatcher::new(GatewayConfig {
            queue_capacity: capacity,
            ..GatewayConfig::default()
        })
    }

    fn envelope(n: i64) -> Envelope {
        Envelope::for_room(
            7,
            GatewayEvent::MemberRemoved {
                user_id: n,
                removed_by: 1,
            },
        )
    }

    #[tokio::test]
    async fn no_connections_is_a_no_op() {
        let d = dispatcher(4);
        assert_eq!(d.send_to_user(42, &envelope(1)).await, 0);
        assert!(d.send_to_users([42, 43], &envelope(1)).await.is_empty());
    }

    #[tokio::test]
    async fn every_device_receives() {
        let d = dispatcher(4);
        let mut a = d.connect(3).await;
        let mut b = d.connect(3).await;

        assert_eq!(d.send_to_user(3, &envelope(1)).await, 2);
        let got_a = a.rx.recv().await.unwrap();
        let got_b = b.rx.recv().await.unwrap();
        assert_eq!(got_a, got_b);
        assert!(got_a.contains("room.member_removed"));
    }

    #[tokio::test]
    async fn full_queue_evicts_only_that_connection() {
        let d = dispatcher(1);
        let slow = d.connect(3).await;
        let mut fast = d.connect(3).await;

        assert_eq!(d.send_to_user(3, &envelope(1)).await, 2);
        fast.rx.recv().await.unwrap();

        // slow never drained its single slot
        assert_eq!(d.send_to_user(3, &envelope(2)).await, 1);
        assert!(slow.shutdown.is_cancelled());
        assert!(!fast.shutdown.is_cancelled());
        assert_eq!(d.connection_count(3).await, 1);

        let got = fast.rx.recv().await.unwrap();
        assert!(got.contains("\"user_id\":2"));
    }

    #[tokio::test]
    async fn dropped_receiver_is_unregistered() {
        let d = dispatcher(4);
        let gone = d.connect(5).await;
        drop(gone);

        assert_eq!(d.send_to_user(5, &envelope(1)).await, 0);
        assert_eq!(d.connection_count(5).await, 0);
    }

    #[tokio::test]
    async fn duplicate_targets_receive_once() {
        let d = dispatcher(4);
        let mut conn = d.connect(8).await;

        let reached = d.send_to_users([8, 8, 9], &envelope(1)).await;
        assert_eq!(reached, vec![8]);
        conn.rx.recv().await.unwrap();
        assert!(conn.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_cancels_connection() {
        let d = dispatcher(4);
        let conn = d.connect(1).await;
        d.disconnect(1, conn.conn_id).await;
        assert!(conn.shutdown.is_cancelled());
        assert_eq!(d.connection_count(1).await, 0);
    }
}
