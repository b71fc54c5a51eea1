//! Per-subscriber delivery loop

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info};

use warrant_core::{Shutdown, SnapshotStore};

use crate::server::{BroadcasterStats, SubscriberId};

/// What a delivery loop needs besides its socket
pub struct SubscriberContext {
    pub client_id: SubscriberId,
    pub store: Arc<SnapshotStore>,
    pub cadence: Duration,
    pub stats: Arc<BroadcasterStats>,
}

/// Why a delivery loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryEnd {
    SendFailed,
    ClientClosed,
    Shutdown,
}

/// Push the latest snapshot every `cadence` until the subscriber goes away.
/// A failed send ends only this subscriber's loop.
pub async fn deliver<S>(ws: WebSocketStream<S>, ctx: SubscriberContext, shutdown: Shutdown) -> DeliveryEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut ticker = interval(ctx.cadence);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let client_id = ctx.client_id;

    let end = loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = ctx.store.latest();
                let payload = match snapshot.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        error!(client_id, "Failed to serialize snapshot: {}", e);
                        continue;
                    }
                };

                if let Err(e) = ws_tx.send(Message::Text(payload)).await {
                    debug!(client_id, "Send failed: {}", e);
                    ctx.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                    break DeliveryEnd::SendFailed;
                }
                ctx.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Ping(data))) => {
                        if ws_tx.send(Message::Pong(data)).await.is_err() {
                            break DeliveryEnd::SendFailed;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break DeliveryEnd::ClientClosed;
                    }
                    Some(Err(e)) => {
                        debug!(client_id, "WebSocket error: {}", e);
                        break DeliveryEnd::ClientClosed;
                    }
                    // Subscribers have nothing to say
                    Some(Ok(_)) => {}
                }
            }
            _ = shutdown.wait() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break DeliveryEnd::Shutdown;
            }
        }
    };

    info!(client_id, "Subscriber disconnected ({:?})", end);
    end
}
