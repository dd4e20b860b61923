//! WebSocket transport edge.
//!
//! One task per connection. Each peer gets a bounded outbox; broadcasts are
//! delivered with `try_send` so one stalled connection can never block
//! delivery to the others. All roster mutation happens under the single
//! writer lock in [`Shared`], which keeps per-connection message order
//! intact end-to-end and serializes racing moves from different sessions.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use presence_wire::{ClientMessage, ServerMessage};
use tokio::sync::{
    RwLock,
    mpsc::{self, error::TrySendError},
};
use tracing::{debug, info, warn};

use crate::{Broadcast, Hub, MoveOutcome, ServerConfig, session::SessionId};

/// Hub plus the per-peer outboxes, mutated only under the writer lock.
struct Inner {
    hub: Hub,
    peers: HashMap<SessionId, mpsc::Sender<ServerMessage>>,
}

/// State shared by all connection tasks.
pub struct Shared {
    inner: RwLock<Inner>,
    config: ServerConfig,
}

impl Shared {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: RwLock::new(Inner {
                hub: Hub::new(),
                peers: HashMap::new(),
            }),
            config,
        }
    }

    /// Current roster size.
    pub async fn session_count(&self) -> usize {
        self.inner.read().await.hub.session_count()
    }
}

impl Default for Shared {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

/// Build the router serving the presence protocol on `/ws`.
pub fn router(shared: Arc<Shared>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(shared)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(shared): State<Arc<Shared>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, shared))
}

async fn handle_socket(socket: WebSocket, shared: Arc<Shared>) {
    let (outbox_tx, outbox_rx) = mpsc::channel(shared.config.peer_queue_capacity);

    // Register under the writer lock: the init frame goes through the
    // session's own outbox before the peer is visible to any broadcast, so
    // init always precedes every later message to this session.
    let session_id = {
        let mut inner = shared.inner.write().await;
        let connected = inner.hub.connect();
        let _ = outbox_tx.try_send(connected.init);
        inner.peers.insert(connected.session_id, outbox_tx);
        fan_out(&mut inner, connected.announce);
        connected.session_id
    };
    info!(session_id, "session connected");

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_outbox(
        sink,
        outbox_rx,
        shared.config.keepalive_interval,
    ));

    read_loop(stream, &shared, session_id).await;

    // The disconnect path runs exactly once, when the read side ends.
    disconnect(&shared, session_id).await;
    writer.abort();
    info!(session_id, "session disconnected");
}

/// Forward outbox messages to the socket, interleaved with keepalive pings.
/// A dead transport surfaces as a send error here and as a read error in the
/// read loop, which bounds how long a ghost session can linger.
async fn write_outbox(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbox: mpsc::Receiver<ServerMessage>,
    keepalive: std::time::Duration,
) {
    let mut ping = tokio::time::interval(keepalive);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first interval tick fires immediately; skip it.
    ping.tick().await;

    loop {
        tokio::select! {
            msg = outbox.recv() => {
                let Some(msg) = msg else { break };
                let text = match msg.to_json() {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(%err, "failed to encode frame");
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Decode inbound frames once and dispatch by match. Protocol errors are
/// logged and dropped; they never tear down the connection.
async fn read_loop(mut stream: SplitStream<WebSocket>, shared: &Shared, session_id: SessionId) {
    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                debug!(session_id, %err, "socket error, closing");
                break;
            }
        };

        match frame {
            Message::Text(text) => match ClientMessage::from_json(text.as_str()) {
                Ok(ClientMessage::Move { id, position }) => {
                    // The session id bound at connect time is authoritative;
                    // the id inside the frame is not trusted.
                    if id != session_id {
                        debug!(session_id, claimed = id, "move frame with mismatched id");
                    }
                    let mut inner = shared.inner.write().await;
                    match inner.hub.relay_move(session_id, position) {
                        MoveOutcome::Relayed(broadcast) => fan_out(&mut inner, broadcast),
                        MoveOutcome::DroppedUnknownSession => {
                            debug!(session_id, "move from unregistered session dropped");
                        }
                    }
                }
                Err(err) => {
                    warn!(session_id, %err, "malformed frame dropped");
                }
            },
            Message::Close(_) => break,
            // Pings are answered by the protocol layer; pongs and binary
            // frames carry nothing in this protocol.
            _ => {}
        }
    }
}

/// Deliver a broadcast to every registered peer except the excluded one.
///
/// A peer with a full or closed outbox is evicted from the roster, and its
/// own `remove` broadcast joins the work list; the loop drains until fan-out
/// completes with no further casualties.
fn fan_out(inner: &mut Inner, broadcast: Broadcast) {
    let mut pending = vec![broadcast];

    while let Some(Broadcast { exclude, message }) = pending.pop() {
        let mut dead = Vec::new();
        for (&peer, tx) in &inner.peers {
            if peer == exclude {
                continue;
            }
            match tx.try_send(message.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(peer, "peer outbox full, evicting slow session");
                    dead.push(peer);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(peer, "peer outbox closed, evicting session");
                    dead.push(peer);
                }
            }
        }
        for peer in dead {
            inner.peers.remove(&peer);
            if let Some(remove) = inner.hub.disconnect(peer) {
                pending.push(Broadcast {
                    exclude: peer,
                    message: remove,
                });
            }
        }
    }
}

/// Remove the session and tell the remaining peers. Safe to reach twice for
/// the same session (eviction then socket close): the second pass finds
/// nothing to remove.
async fn disconnect(shared: &Shared, session_id: SessionId) {
    let mut inner = shared.inner.write().await;
    inner.peers.remove(&session_id);
    if let Some(remove) = inner.hub.disconnect(session_id) {
        fan_out(
            &mut inner,
            Broadcast {
                exclude: session_id,
                message: remove,
            },
        );
    }
}

// ============================================================================
// Tests
// ============================================================================
