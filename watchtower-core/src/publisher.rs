//! # Snapshot Publisher — REST and push surface for the dashboard
//!
//! Owns the single current snapshot of risk records and serves it two ways:
//! a pull endpoint (`GET /api/risks`) and a WebSocket push channel (`/ws`)
//! that receives the snapshot on connect and on every update. Each
//! subscriber has a bounded outbound queue; a subscriber whose queue is full
//! at broadcast time is slow and gets dropped. Reconnection is the client's
//! concern. Static dashboard files are served at `/`.

use crate::types::RiskRecord;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8090";
/// Outbound queue depth per subscriber.
const SUBSCRIBER_QUEUE: usize = 256;
/// Liveness probe cadence.
const PING_INTERVAL: Duration = Duration::from_secs(54);
/// Deadline on every outbound frame.
const WRITE_DEADLINE: Duration = Duration::from_secs(10);
/// A subscriber with no inbound frame for this long is unresponsive.
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// The frame pushed to every subscriber.
#[derive(Debug, Clone, Serialize)]
pub struct PushMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Vec<RiskRecord>,
}

impl PushMessage {
    fn risks_update(data: Vec<RiskRecord>) -> Self {
        Self {
            kind: "risks_update".into(),
            data,
        }
    }
}

pub struct SnapshotPublisher {
    snapshot: RwLock<Vec<RiskRecord>>,
    subscribers: Mutex<HashMap<u64, mpsc::Sender<PushMessage>>>,
    next_id: AtomicU64,
    updates: AtomicU64,
    dropped_subscribers: AtomicU64,
}

impl SnapshotPublisher {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Vec::new()),
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            updates: AtomicU64::new(0),
            dropped_subscribers: AtomicU64::new(0),
        }
    }

    /// Replace the stored snapshot and broadcast it. Sends are non-blocking;
    /// subscribers that cannot keep up are evicted here.
    pub fn update_snapshot(&self, records: Vec<RiskRecord>) {
        *self.snapshot.write() = records.clone();
        self.updates.fetch_add(1, Ordering::Relaxed);

        let message = PushMessage::risks_update(records);
        let mut subs = self.subscribers.lock();
        subs.retain(|id, tx| match tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(_) => {
                warn!(subscriber = id, "Subscriber queue full or closed, dropping");
                self.dropped_subscribers.fetch_add(1, Ordering::Relaxed);
                false
            }
        });
    }

    /// The current snapshot, as the pull endpoint serves it.
    pub fn snapshot(&self) -> Vec<RiskRecord> {
        self.snapshot.read().clone()
    }

    /// Register a push subscriber. The current snapshot is queued
    /// immediately so a fresh client never starts blank.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<PushMessage>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let _ = tx.try_send(PushMessage::risks_update(self.snapshot()));

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().insert(id, tx);
        info!(subscriber = id, total = self.subscriber_count(), "Push subscriber connected");
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        let removed = self.subscribers.lock().remove(&id).is_some();
        if removed {
            info!(subscriber = id, total = self.subscriber_count(), "Push subscriber disconnected");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    pub fn dropped_subscribers(&self) -> u64 {
        self.dropped_subscribers.load(Ordering::Relaxed)
    }
}

impl Default for SnapshotPublisher {
    fn default() -> Self {
        Self::new()
    }
}

// ── HTTP surface ────────────────────────────────────────────────────────────

#[derive(Clone)]
struct ServerState {
    publisher: Arc<SnapshotPublisher>,
    shutdown: watch::Receiver<bool>,
}

pub fn router(
    publisher: Arc<SnapshotPublisher>,
    static_dir: &str,
    shutdown: watch::Receiver<bool>,
) -> Router {
    let state = ServerState {
        publisher,
        shutdown,
    };
    Router::new()
        .route("/api/risks", get(api_risks))
        .route("/ws", get(ws_upgrade))
        .fallback_service(tower_http::services::ServeDir::new(static_dir))
        .with_state(state)
}

/// Bind and serve until the shutdown signal flips.
pub async fn serve(
    publisher: Arc<SnapshotPublisher>,
    bind_addr: &str,
    static_dir: &str,
    shutdown: watch::Receiver<bool>,
) -> Result<(), String> {
    let app = router(publisher, static_dir, shutdown.clone());
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| format!("Failed to bind dashboard server to {}: {}", bind_addr, e))?;

    info!(addr = %bind_addr, "Dashboard server started");

    let mut shutdown = shutdown;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .map_err(|e| format!("Dashboard server error: {}", e))?;

    info!("Dashboard server stopped");
    Ok(())
}

async fn api_risks(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.publisher.snapshot())
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<ServerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.publisher, state.shutdown))
}

/// Per-subscriber state machine: connected until evicted by a read error,
/// a write error, a missed deadline, or broadcast-time queue overflow.
async fn handle_socket(
    socket: WebSocket,
    publisher: Arc<SnapshotPublisher>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (id, mut updates) = publisher.subscribe();
    let (mut sink, mut stream) = socket.split();
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping.tick().await; // immediate first tick
    let mut last_read = Instant::now();

    loop {
        tokio::select! {
            update = updates.recv() => {
                // None: evicted by the broadcaster.
                let Some(message) = update else { break };
                let payload = match serde_json::to_string(&message) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(subscriber = id, error = %e, "Snapshot serialization failed");
                        continue;
                    }
                };
                match tokio::time::timeout(WRITE_DEADLINE, sink.send(Message::Text(payload.into()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(subscriber = id, error = %e, "Write failed");
                        break;
                    }
                    Err(_) => {
                        warn!(subscriber = id, "Write deadline exceeded");
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if last_read.elapsed() > READ_TIMEOUT {
                    warn!(subscriber = id, "No pong within the read timeout, evicting");
                    break;
                }
                match tokio::time::timeout(WRITE_DEADLINE, sink.send(Message::Ping(Default::default()))).await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
            frame = stream.next() => {
                match frame {
                    // Pongs and any client chatter just prove liveness.
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => last_read = Instant::now(),
                    Some(Err(e)) => {
                        debug!(subscriber = id, error = %e, "Read failed");
                        break;
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    publisher.unsubscribe(id);
    let _ = sink.close().await;
}
