use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_types::events::{Envelope, GatewayEvent};

use crate::dispatcher::{Dispatcher, GatewayConfig};

/// Runs an authenticated websocket until the client leaves, stops answering,
/// or is evicted. The connection is registered for its whole lifetime.
pub async fn run_connection(socket: WebSocket, dispatcher: Dispatcher, user_id: i64) {
    let outbound = dispatcher.connect(user_id).await;
    let conn_id = outbound.conn_id;
    let shutdown = outbound.shutdown.clone();
    let config = dispatcher.config().clone();

    let devices = dispatcher.connection_count(user_id).await;
    info!(user_id, conn_id = %conn_id, devices, "Connected to gateway");

    let (sender, receiver) = socket.split();

    let ready = match serde_json::to_string(&Envelope::new(None, GatewayEvent::Ready { user_id })) {
        Ok(json) => Arc::<str>::from(json),
        Err(e) => {
            warn!(user_id, "Failed to encode ready envelope: {}", e);
            dispatcher.disconnect(user_id, conn_id).await;
            return;
        }
    };

    let mut send_task = tokio::spawn(write_loop(
        sender,
        outbound.rx,
        ready,
        shutdown.clone(),
        config.clone(),
    ));
    let mut recv_task = tokio::spawn(read_loop(receiver, shutdown.clone(), config, user_id));

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.disconnect(user_id, conn_id).await;
    shutdown.cancel();
    info!(user_id, conn_id = %conn_id, "Disconnected from gateway");
}

/// Single writer per connection: drains the outbound queue and sends pings.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Arc<str>>,
    ready: Arc<str>,
    shutdown: CancellationToken,
    config: GatewayConfig,
) {
    if !write(&mut sender, text(&ready), &config).await {
        return;
    }

    let mut heartbeat = tokio::time::interval(config.ping_interval);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                let _ = timeout(config.write_timeout, sender.send(Message::Close(None))).await;
                break;
            }
            next = rx.recv() => {
                let Some(payload) = next else { break };
                if !write(&mut sender, text(&payload), &config).await {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if !write(&mut sender, Message::Ping(Bytes::new()), &config).await {
                    break;
                }
            }
        }
    }
}

/// Client frames carry nothing we act on; any frame (pongs included)
/// resets the read deadline.
async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    shutdown: CancellationToken,
    config: GatewayConfig,
    user_id: i64,
) {
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = timeout(config.read_deadline, receiver.next()) => next,
        };

        match next {
            Err(_) => {
                warn!(user_id, "Read deadline passed, dropping connection");
                break;
            }
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => break,
            Ok(Some(Err(e))) => {
                debug!(user_id, "Websocket read error: {}", e);
                break;
            }
            Ok(Some(Ok(_))) => {}
        }
    }
}

async fn write(sender: &mut SplitSink<WebSocket, Message>, msg: Message, config: &GatewayConfig) -> bool {
    match timeout(config.write_timeout, sender.send(msg)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!("Websocket write failed: {}", e);
            false
        }
        Err(_) => {
            warn!("Websocket write timed out");
            false
        }
    }
}

fn text(payload: &Arc<str>) -> Message {
    Message::Text(payload.to_string().into())
}
