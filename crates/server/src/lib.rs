//! Presence Server
//!
//! The server owns the authoritative roster of connected sessions and relays
//! each session's transform to every other session. It is split into:
//! - [`Hub`]: the pure, synchronous core. Owns the roster, allocates
//!   identifiers, validates moves, and plans broadcasts. No I/O.
//! - [`net`]: the WebSocket transport edge. Performs all I/O on behalf of
//!   the hub and enforces the single-writer discipline on roster mutations.
//!
//! The hub never sends anything itself; its methods return the messages the
//! transport must deliver. Self-echo suppression is encoded in the
//! [`Broadcast`] type: a broadcast always names the one session it must not
//! be delivered to.

#![deny(unsafe_code)]

pub mod net;
pub mod session;

use std::collections::HashMap;
use std::time::Duration;

use presence_wire::{PlayerId, Pose, Position, ServerMessage};
use session::{Session, SessionId};

// ============================================================================
// Defaults
// ============================================================================

/// Default bind address for the server binary.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:9001";

/// Per-peer outbox capacity. A peer whose outbox fills up is disconnected
/// rather than allowed to stall the broadcaster.
pub const PEER_QUEUE_CAPACITY: usize = 64;

/// WebSocket keepalive ping interval in seconds.
pub const KEEPALIVE_INTERVAL_SECS: u64 = 15;

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub peer_queue_capacity: usize,
    pub keepalive_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            peer_queue_capacity: PEER_QUEUE_CAPACITY,
            keepalive_interval: Duration::from_secs(KEEPALIVE_INTERVAL_SECS),
        }
    }
}

// ============================================================================
// Broadcast Planning
// ============================================================================

/// A message to deliver to every connected session except `exclude`.
///
/// A session must never receive an `update` or `new_player` naming itself;
/// carrying the exclusion in the type keeps that invariant at the fan-out
/// site instead of scattered through handler logic.
#[derive(Debug, Clone, PartialEq)]
pub struct Broadcast {
    pub exclude: SessionId,
    pub message: ServerMessage,
}

/// Result of accepting a new connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Connected {
    pub session_id: SessionId,
    /// Sent to the new session only: roster snapshot + assigned identity.
    pub init: ServerMessage,
    /// Sent to everyone else: the new arrival.
    pub announce: Broadcast,
}

/// Result of relaying a `move` message.
#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    /// Transform stored; broadcast the update to everyone but the sender.
    Relayed(Broadcast),
    /// Dropped: the sender is not in the roster. Never a crash.
    DroppedUnknownSession,
}

impl MoveOutcome {
    pub fn is_relayed(&self) -> bool {
        matches!(self, Self::Relayed(_))
    }
}

// ============================================================================
// Hub
// ============================================================================

/// The authoritative roster owner.
///
/// All mutation goes through [`Hub::connect`], [`Hub::disconnect`] and
/// [`Hub::relay_move`]; the transport serializes calls under a single writer
/// lock so concurrent moves from different sessions cannot interleave a
/// mutation.
#[derive(Debug)]
pub struct Hub {
    roster: HashMap<SessionId, Session>,
    next_session_id: SessionId,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self {
            roster: HashMap::new(),
            next_session_id: 1,
        }
    }

    /// Number of sessions currently in the roster.
    pub fn session_count(&self) -> usize {
        self.roster.len()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.roster.contains_key(&id)
    }

    /// All connected session ids, in no particular order.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.roster.keys().copied().collect()
    }

    /// Roster snapshot as it goes on the wire in `init`.
    pub fn roster_snapshot(&self) -> HashMap<PlayerId, Position> {
        self.roster
            .iter()
            .map(|(&id, session)| (id, Position::from(session.transform)))
            .collect()
    }

    /// Register a new session at the spawn transform.
    ///
    /// Identifiers are allocated monotonically and never reused, so no client
    /// can end up holding a "current" id that later names someone else.
    pub fn connect(&mut self) -> Connected {
        let session_id = self.next_session_id;
        self.next_session_id += 1;

        let session = Session::new(session_id);
        let spawn = Position::from(session.transform);
        self.roster.insert(session_id, session);

        Connected {
            session_id,
            init: ServerMessage::Init {
                players: self.roster_snapshot(),
                id: session_id,
            },
            announce: Broadcast {
                exclude: session_id,
                message: ServerMessage::NewPlayer {
                    id: session_id,
                    position: spawn,
                },
            },
        }
    }

    /// Remove a session from the roster.
    ///
    /// Returns the `remove` message for the remaining sessions, or `None` if
    /// the session was already gone. Idempotent by design: the transport's
    /// slow-peer eviction and the normal close path can both land here.
    pub fn disconnect(&mut self, session_id: SessionId) -> Option<ServerMessage> {
        self.roster
            .remove(&session_id)
            .map(|_| ServerMessage::Remove { id: session_id })
    }

    /// Store a session's transform and plan the relay.
    ///
    /// Validation is limited to session existence; the floats are relayed
    /// verbatim (no clamping, no authority checks — a documented limitation
    /// of this design, not an oversight).
    pub fn relay_move(&mut self, session_id: SessionId, pose: Pose) -> MoveOutcome {
        let Some(session) = self.roster.get_mut(&session_id) else {
            return MoveOutcome::DroppedUnknownSession;
        };
        session.transform = pose.into();

        MoveOutcome::Relayed(Broadcast {
            exclude: session_id,
            message: ServerMessage::Update {
                id: session_id,
                position: pose,
            },
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
