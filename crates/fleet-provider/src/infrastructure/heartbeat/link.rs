//! The self-healing WebSocket link to the control plane.
//!
//! # Delivery model
//!
//! Every update goes through one FIFO queue drained by a single task.  The
//! drain task merges each update into a per-device cache (keyed by `udid`)
//! and writes it to the socket if one is installed.  While the link is down
//! updates are only cached.
//!
//! A separate read task watches the socket.  When the control plane closes
//! it, the read task pushes a `Disconnected` marker into the queue,
//! reconnects with backoff, repeats the handshake, and then pushes a
//! `Resync` item carrying the new socket.  On `Resync` the drain task
//! installs the socket and resends every cached record.  Because the new
//! socket travels through the same queue as the updates, every update queued
//! before the reconnect is delivered exactly once by the resend, and every
//! update queued after it is sent after the resend.
//!
//! Delivery is at-least-once: an update written to a socket that dies right
//! afterwards is resent with the cache on the next reconnect.

use async_trait::async_trait;
use fleet_core::domain::heartbeat::{update_message, Handshake, UDID_KEY};
use fleet_core::HeartbeatCache;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use crate::application::fleet_controller::DeviceReporter;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

/// Errors while establishing the link.  Never surfaced to callers of
/// [`HeartbeatLink`]; they only drive the reconnect loop.
#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("control plane closed the connection during the handshake")]
    ClosedDuringHandshake,
}

/// Everything the link needs to (re)connect.
#[derive(Debug, Clone)]
pub struct HeartbeatSettings {
    /// `ws://host:port/websocket/heartbeat`
    pub url: String,
    pub handshake: Handshake,
    /// Stamped on every update.
    pub platform: String,
    pub backoff: Backoff,
}

/// Whether the link currently has a live, handshaken socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connected,
    Disconnected,
}

enum Outbound {
    Update(Value),
    /// A freshly handshaken socket; install it and resend the cache.
    Resync(WsSink),
    Disconnected,
}

/// Handle to the running link.  Dropping it stops both background tasks.
pub struct HeartbeatLink {
    queue: mpsc::UnboundedSender<Outbound>,
    platform: String,
    status: watch::Receiver<LinkStatus>,
    tasks: Vec<JoinHandle<()>>,
}

impl HeartbeatLink {
    /// Connects and handshakes, retrying with backoff until the control plane
    /// accepts, then starts the drain and read tasks.
    pub async fn connect(settings: HeartbeatSettings) -> Self {
        let mut backoff = settings.backoff.clone();
        let (sink, source) = establish(&settings, &mut backoff).await;

        let (queue, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(LinkStatus::Connected);
        // The receiver is alive (owned by the drain task below), so this cannot fail.
        let _ = queue.send(Outbound::Resync(sink));

        let drain = tokio::spawn(Drain::default().run(rx));
        let read = tokio::spawn(read_loop(
            source,
            settings.clone(),
            backoff,
            queue.clone(),
            status_tx,
        ));

        Self {
            queue,
            platform: settings.platform,
            status,
            tasks: vec![drain, read],
        }
    }

    /// Queues an update for `data` (which should carry a `udid`).  Never
    /// blocks and never fails; delivery happens in the background.
    pub fn enqueue_update(&self, data: Value) {
        let message = update_message(data, &self.platform);
        if self.queue.send(Outbound::Update(message)).is_err() {
            warn!("heartbeat drain task is gone; update dropped");
        }
    }

    /// Watch channel following the link's connection state.
    pub fn status(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }
}

impl Drop for HeartbeatLink {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl DeviceReporter for HeartbeatLink {
    async fn device_update(&self, data: Value) {
        self.enqueue_update(data);
    }
}

// ── Drain task ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Drain {
    cache: HeartbeatCache,
    sink: Option<WsSink>,
}

impl Drain {
    async fn run(mut self, mut queue: mpsc::UnboundedReceiver<Outbound>) {
        while let Some(item) = queue.recv().await {
            match item {
                Outbound::Update(message) => {
                    if !self.cache.apply(&message) {
                        debug!("update without {UDID_KEY} is sent but not cached");
                    }
                    self.send(&message).await;
                }
                Outbound::Resync(sink) => {
                    self.sink = Some(sink);
                    let records: Vec<Value> = self.cache.records().cloned().collect();
                    if !records.is_empty() {
                        info!("resending {} cached device record(s)", records.len());
                    }
                    for record in &records {
                        self.send(record).await;
                    }
                }
                Outbound::Disconnected => {
                    self.sink = None;
                }
            }
        }
    }

    async fn send(&mut self, message: &Value) {
        let Some(sink) = self.sink.as_mut() else {
            let udid = held_udid(message);
            debug!("link down; {udid} held for resend");
            return;
        };
        if let Err(e) = sink.send(WsMessage::Text(message.to_string())).await {
            warn!("heartbeat send failed: {e}");
            self.sink = None;
        }
    }
}

/// Label for an update that could not be written.
fn held_udid(message: &Value) -> &str {
    message
        .get(UDID_KEY)
        .and_then(Value::as_str)
        .unwrap_or("<no udid>")
}

// ── Read task and reconnection ────────────────────────────────────────────────

async fn read_loop(
    mut source: WsSource,
    settings: HeartbeatSettings,
    mut backoff: Backoff,
    queue: mpsc::UnboundedSender<Outbound>,
    status: watch::Sender<LinkStatus>,
) {
    loop {
        while let Some(frame) = source.next().await {
            match frame {
                Ok(WsMessage::Close(_)) => break,
                Ok(message) => debug!("control plane: {message}"),
                Err(e) => {
                    warn!("heartbeat link error: {e}");
                    break;
                }
            }
        }

        warn!("heartbeat link to {} closed; reconnecting", settings.url);
        if queue.send(Outbound::Disconnected).is_err() {
            return;
        }
        status.send_replace(LinkStatus::Disconnected);

        let (sink, next) = establish(&settings, &mut backoff).await;
        if queue.send(Outbound::Resync(sink)).is_err() {
            return;
        }
        status.send_replace(LinkStatus::Connected);
        source = next;
    }
}

async fn establish(settings: &HeartbeatSettings, backoff: &mut Backoff) -> (WsSink, WsSource) {
    loop {
        match handshake(settings).await {
            Ok(pair) => {
                backoff.reset();
                info!("heartbeat link established with {}", settings.url);
                return pair;
            }
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(
                    "heartbeat connect to {} failed: {e}; retrying in {delay:?}",
                    settings.url
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn handshake(settings: &HeartbeatSettings) -> Result<(WsSink, WsSource), HeartbeatError> {
    let (ws, _response) = connect_async(settings.url.as_str()).await?;
    let (mut sink, mut source) = ws.split();
    sink.send(WsMessage::Text(settings.handshake.to_message().to_string()))
        .await?;

    // Any data frame counts as the acknowledgement.
    loop {
        match source.next().await {
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
            Some(Ok(WsMessage::Close(_))) | None => {
                return Err(HeartbeatError::ClosedDuringHandshake)
            }
            Some(Ok(ack)) => {
                debug!("handshake acknowledged: {ack}");
                return Ok((sink, source));
            }
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
