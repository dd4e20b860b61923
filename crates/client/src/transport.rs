//! Non-blocking WebSocket transport.
//!
//! One spawned I/O task owns the socket; the tick-side [`Connection`] handle
//! only touches channels. Sends use `try_send` and state checks so a call
//! from the render loop can never block, throw, or stall on a dead network —
//! connectivity loss degrades to "no remote players", nothing more.

use futures::{SinkExt, StreamExt};
use presence_wire::{ClientMessage, PlayerId, Pose, ServerMessage};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, warn};

/// Outbound queue depth. Moves are per-tick and disposable; a short queue
/// keeps a stalling socket from accumulating stale transforms.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 8;

/// Connection lifecycle. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Result of a per-tick send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Queued for transmission.
    Sent,
    /// Transport not open (still connecting, dropped, or backed up). The
    /// caller treats this as a silent skip, never as an error to handle.
    NotReady,
}

/// Errors internal to the I/O task. These end the task and flip the
/// connection to [`ConnectionState::Closed`]; they never reach the tick.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Tick-side handle to the presence connection.
pub struct Connection {
    outbound: mpsc::Sender<ClientMessage>,
    inbound: mpsc::UnboundedReceiver<ServerMessage>,
    state: watch::Receiver<ConnectionState>,
}

impl Connection {
    /// Start connecting to the server and return the handle immediately.
    /// Must be called within a tokio runtime. A failed connect leaves the
    /// handle permanently [`ConnectionState::Closed`]; every send becomes a
    /// no-op and the local loop is unaffected.
    pub fn connect(url: String) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        tokio::spawn(async move {
            if let Err(err) = run_io(&url, outbound_rx, inbound_tx, &state_tx).await {
                debug!(%err, "presence connection ended");
            }
            let _ = state_tx.send(ConnectionState::Closed);
        });

        Self {
            outbound: outbound_tx,
            inbound: inbound_rx,
            state: state_rx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Serialize and queue a `move` message. Non-blocking: while the
    /// connection is not open, or the outbound queue is full, the tick is
    /// skipped silently.
    pub fn send_transform(
        &self,
        id: PlayerId,
        position: [f64; 3],
        rotation: [f64; 2],
    ) -> SendStatus {
        if self.state() != ConnectionState::Open {
            debug!("transport not open, skipping transform send");
            return SendStatus::NotReady;
        }

        let msg = ClientMessage::Move {
            id,
            position: Pose {
                x: position[0],
                y: position[1],
                z: position[2],
                rx: rotation[0],
                ry: rotation[1],
            },
        };
        match self.outbound.try_send(msg) {
            Ok(()) => SendStatus::Sent,
            Err(_) => {
                debug!("outbound queue unavailable, skipping transform send");
                SendStatus::NotReady
            }
        }
    }

    /// Drain one inbound message without blocking; call until `None` each
    /// tick and feed the results to the sync agent.
    pub fn poll_message(&mut self) -> Option<ServerMessage> {
        self.inbound.try_recv().ok()
    }
}

async fn run_io(
    url: &str,
    mut outbound: mpsc::Receiver<ClientMessage>,
    inbound: mpsc::UnboundedSender<ServerMessage>,
    state: &watch::Sender<ConnectionState>,
) -> Result<(), TransportError> {
    let (ws, _) = connect_async(url).await?;
    let _ = state.send(ConnectionState::Open);
    debug!(url, "presence connection open");

    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            msg = outbound.recv() => {
                // None: the Connection handle was dropped.
                let Some(msg) = msg else { break };
                let text = msg.to_json()?;
                sink.send(Message::text(text)).await?;
            }
            frame = stream.next() => {
                let Some(frame) = frame else { break };
                match frame? {
                    Message::Text(text) => match ServerMessage::from_json(text.as_str()) {
                        Ok(msg) => {
                            if inbound.send(msg).is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(%err, "malformed frame dropped"),
                    },
                    Message::Close(_) => break,
                    // Pings are answered by the protocol layer.
                    _ => {}
                }
            }
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
