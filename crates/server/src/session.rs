//! Session records for the presence server.

use presence_wire::{PlayerId, Transform};

/// Session identifier. The server-internal session id and the wire-visible
/// player id are the same value: one connection, one identity, never reused
/// for the lifetime of the process.
pub type SessionId = PlayerId;

/// One connected participant's identity and transform record.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    /// Latest transform reported by this session. Writable only via `move`
    /// messages arriving on this session's own connection.
    pub transform: Transform,
}

impl Session {
    /// Create a session at the spawn transform.
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            transform: Transform::default(),
        }
    }
}
