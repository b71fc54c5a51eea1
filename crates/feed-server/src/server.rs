//! Snapshot broadcaster - WebSocket push server
//!
//! Every accepted subscriber gets its own delivery task that pushes the
//! latest enriched snapshot on a fixed cadence. Subscribers share nothing
//! but the read-only snapshot store, so one slow or dead client never
//! affects another or the aggregator.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn};

use warrant_core::{ServerConfig, Shutdown, SnapshotStore};

use crate::subscriber::{deliver, SubscriberContext};

/// Unique subscriber ID
pub type SubscriberId = u64;

/// Connected subscriber, for status reporting only
#[derive(Debug, Clone)]
pub struct SubscriberInfo {
    pub addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
}

/// Broadcaster counters
#[derive(Debug, Default)]
pub struct BroadcasterStats {
    pub connections_accepted: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub active_subscribers: AtomicU64,
    pub messages_sent: AtomicU64,
    pub send_failures: AtomicU64,
}

impl BroadcasterStats {
    pub fn snapshot(&self) -> BroadcasterStatsSnapshot {
        BroadcasterStatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            active_subscribers: self.active_subscribers.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of `BroadcasterStats`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcasterStatsSnapshot {
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub active_subscribers: u64,
    pub messages_sent: u64,
    pub send_failures: u64,
}

/// WebSocket server pushing `BoardSnapshot`s to subscribers
pub struct SnapshotBroadcaster {
    config: ServerConfig,
    store: Arc<SnapshotStore>,
    stats: Arc<BroadcasterStats>,
    subscribers: Arc<DashMap<SubscriberId, SubscriberInfo>>,
    /// One permit per subscriber, taken before the handshake
    slots: Arc<Semaphore>,
    next_id: AtomicU64,
}

impl SnapshotBroadcaster {
    pub fn new(config: ServerConfig, store: Arc<SnapshotStore>) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(config.max_subscribers)),
            config,
            store,
            stats: Arc::new(BroadcasterStats::default()),
            subscribers: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        let listener = TcpListener::bind(self.config.address()).await?;
        info!(
            "Snapshot broadcaster listening on ws://{}{}",
            listener.local_addr()?,
            self.config.path
        );
        Ok(listener)
    }

    pub fn stats(&self) -> &Arc<BroadcasterStats> {
        &self.stats
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn subscribers(&self) -> Vec<(SubscriberId, SubscriberInfo)> {
        self.subscribers
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    /// Accept subscribers until shutdown
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: Shutdown) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let this = Arc::clone(&self);
                            let shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                this.handle_connection(stream, addr, shutdown).await;
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown.wait() => {
                    info!("Snapshot broadcaster shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, shutdown: Shutdown) {
        let expected_path = self.config.path.clone();
        // Held for the whole connection; released on every exit path
        let permit = Arc::clone(&self.slots).try_acquire_owned().ok();
        let full = permit.is_none();

        let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            if request.uri().path() != expected_path {
                return Err(error_response(StatusCode::NOT_FOUND, "unknown path"));
            }
            if full {
                return Err(error_response(StatusCode::SERVICE_UNAVAILABLE, "too many subscribers"));
            }
            Ok(response)
        };

        let ws = match accept_hdr_async(stream, callback).await {
            Ok(ws) => ws,
            Err(e) => {
                self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                warn!(addr = %addr, "WebSocket handshake refused: {}", e);
                return;
            }
        };

        let client_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(
            client_id,
            SubscriberInfo {
                addr,
                connected_at: Utc::now(),
            },
        );
        self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.stats.active_subscribers.fetch_add(1, Ordering::Relaxed);
        info!(client_id, addr = %addr, "Subscriber connected");

        let context = SubscriberContext {
            client_id,
            store: Arc::clone(&self.store),
            cadence: self.config.cadence(),
            stats: Arc::clone(&self.stats),
        };
        deliver(ws, context, shutdown).await;

        self.subscribers.remove(&client_id);
        self.stats.active_subscribers.fetch_sub(1, Ordering::Relaxed);
        drop(permit);
        debug!(client_id, "Subscriber removed");
    }

    /// Subscriber slots still free
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }
}

fn error_response(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}
