//! Presence Wire Protocol Types
//!
//! This crate defines the shared JSON message types exchanged between the
//! sync client and the presence server. Both binaries MUST depend on this
//! crate; it is the single source of truth for the protocol.
//!
//! Messages are text frames carrying a tagged JSON object. The `type` field
//! selects the variant (`init`, `new_player`, `move`, `update`, `remove`),
//! decoded once at the transport boundary into [`ClientMessage`] or
//! [`ServerMessage`] and dispatched by match from there.

#![deny(unsafe_code)]

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ============================================================================
// Type Aliases
// ============================================================================

/// Server-assigned session identifier, unique among connected sessions and
/// never reused for the lifetime of the server process.
pub type PlayerId = u64;

// ============================================================================
// Transform Types
// ============================================================================

/// Spawn/roster position as it appears on the wire (`init`, `new_player`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Full transform as it appears on the wire (`move`, `update`): world-space
/// position plus yaw (`rx`) and pitch (`ry`) in radians. No roll.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub rx: f64,
    pub ry: f64,
}

/// Application-side transform: position (3 floats) + rotation (yaw, pitch).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    pub position: [f64; 3],
    pub rotation: [f64; 2],
}

impl From<Transform> for Pose {
    fn from(t: Transform) -> Self {
        Self {
            x: t.position[0],
            y: t.position[1],
            z: t.position[2],
            rx: t.rotation[0],
            ry: t.rotation[1],
        }
    }
}

impl From<Pose> for Transform {
    fn from(p: Pose) -> Self {
        Self {
            position: [p.x, p.y, p.z],
            rotation: [p.rx, p.ry],
        }
    }
}

impl From<Transform> for Position {
    fn from(t: Transform) -> Self {
        Self {
            x: t.position[0],
            y: t.position[1],
            z: t.position[2],
        }
    }
}

impl From<Position> for Transform {
    fn from(p: Position) -> Self {
        Self {
            position: [p.x, p.y, p.z],
            rotation: [0.0, 0.0],
        }
    }
}

// ============================================================================
// Client -> Server Messages
// ============================================================================

/// Messages sent by the client over its connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Local transform update, sent about once per render tick.
    ///
    /// The `id` field is carried for protocol fidelity but the server binds
    /// the sender from the connection itself and does not trust it.
    Move { id: PlayerId, position: Pose },
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// ============================================================================
// Server -> Client Messages
// ============================================================================

/// Messages sent by the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Roster snapshot + assigned identity, sent once per connection.
    Init {
        // Internally tagged enums deserialize through serde's content buffer,
        // which presents JSON object keys as strings; parse them back to ids
        // explicitly so the roster map roundtrips.
        #[serde(deserialize_with = "deserialize_roster")]
        players: HashMap<PlayerId, Position>,
        id: PlayerId,
    },

    /// A new session joined.
    NewPlayer { id: PlayerId, position: Position },

    /// Relayed transform of another session.
    Update { id: PlayerId, position: Pose },

    /// A session disconnected.
    Remove { id: PlayerId },
}

fn deserialize_roster<'de, D>(deserializer: D) -> Result<HashMap<PlayerId, Position>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = HashMap::<String, Position>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, position)| {
            key.parse::<PlayerId>()
                .map(|id| (id, position))
                .map_err(serde::de::Error::custom)
        })
        .collect()
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_roundtrip() {
        let msg = ClientMessage::Move {
            id: 7,
            position: Pose {
                x: 1.0,
                y: 0.0,
                z: -2.5,
                rx: 0.25,
                ry: -0.5,
            },
        };
        let encoded = msg.to_json().unwrap();
        let decoded = ClientMessage::from_json(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_move_tag_is_move() {
        let msg = ClientMessage::Move {
            id: 1,
            position: Pose {
                x: 0.0,
                y: 0.0,
                z: 0.0,
                rx: 0.0,
                ry: 0.0,
            },
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "move");
        assert_eq!(value["position"]["rx"], 0.0);
    }

    #[test]
    fn test_init_roundtrip_with_roster() {
        let mut players = HashMap::new();
        players.insert(
            1,
            Position {
                x: 0.0,
                y: 0.0,
                z: 0.0,
            },
        );
        players.insert(
            2,
            Position {
                x: 3.0,
                y: 1.0,
                z: -4.0,
            },
        );
        let msg = ServerMessage::Init { players, id: 3 };
        let encoded = msg.to_json().unwrap();
        let decoded = ServerMessage::from_json(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_init_roster_keys_are_decimal_strings() {
        let mut players = HashMap::new();
        players.insert(
            42,
            Position {
                x: 1.0,
                y: 2.0,
                z: 3.0,
            },
        );
        let msg = ServerMessage::Init { players, id: 42 };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "init");
        assert_eq!(value["players"]["42"]["y"], 2.0);
    }

    #[test]
    fn test_decode_literal_frames() {
        // Frames exactly as the original protocol puts them on the wire.
        let init = r#"{"type":"init","players":{"1":{"x":0.0,"y":0.0,"z":0.0}},"id":2}"#;
        let decoded = ServerMessage::from_json(init).unwrap();
        assert!(matches!(decoded, ServerMessage::Init { id: 2, .. }));

        let new_player = r#"{"type":"new_player","id":2,"position":{"x":0.0,"y":0.0,"z":0.0}}"#;
        let decoded = ServerMessage::from_json(new_player).unwrap();
        assert!(matches!(decoded, ServerMessage::NewPlayer { id: 2, .. }));

        let update =
            r#"{"type":"update","id":1,"position":{"x":1.0,"y":0.0,"z":0.0,"rx":0.0,"ry":0.0}}"#;
        let decoded = ServerMessage::from_json(update).unwrap();
        assert!(matches!(decoded, ServerMessage::Update { id: 1, .. }));

        let remove = r#"{"type":"remove","id":2}"#;
        let decoded = ServerMessage::from_json(remove).unwrap();
        assert_eq!(decoded, ServerMessage::Remove { id: 2 });

        let mv = r#"{"type":"move","id":1,"position":{"x":1.0,"y":0.0,"z":0.0,"rx":0.0,"ry":0.0}}"#;
        let decoded = ClientMessage::from_json(mv).unwrap();
        assert!(matches!(decoded, ClientMessage::Move { id: 1, .. }));
    }

    #[test]
    fn test_unknown_type_is_an_error() {
        assert!(ServerMessage::from_json(r#"{"type":"teleport","id":1}"#).is_err());
        assert!(ClientMessage::from_json(r#"{"type":"update","id":1}"#).is_err());
        assert!(ClientMessage::from_json("not json").is_err());
    }

    #[test]
    fn test_transform_pose_conversion() {
        let t = Transform {
            position: [1.0, 2.0, 3.0],
            rotation: [0.5, -0.5],
        };
        let pose = Pose::from(t);
        assert_eq!(pose.rx, 0.5);
        assert_eq!(Transform::from(pose), t);

        let pos = Position::from(t);
        assert_eq!(pos.z, 3.0);
        // Rotation is not carried by a roster position.
        assert_eq!(Transform::from(pos).rotation, [0.0, 0.0]);
    }
}
