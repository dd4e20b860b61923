//! Presence Client Sync Agent
//!
//! Bridges the local simulation/render loop and the network. The agent owns
//! the remote-player mirror: an eventually-consistent copy of every other
//! session's transform, populated entirely from received messages. The local
//! player's transform is never received, only sent.
//!
//! The renderer is an external collaborator injected at construction (never
//! reached through a global), and the agent is pure: inbound messages are
//! delivered by draining [`transport::Connection::poll_message`] from the
//! tick, so handlers never run concurrently with the tick body.
//!
//! Presence sync is best-effort by design. While the connection is not open,
//! sends are silent no-ops and no messages arrive; the local loop continues
//! uninterrupted regardless of connectivity state.

#![deny(unsafe_code)]

pub mod transport;

use std::collections::HashMap;

use presence_wire::{PlayerId, Position, Pose, ServerMessage, Transform};
use tracing::{debug, warn};

use transport::{Connection, SendStatus};

// ============================================================================
// Renderer Collaborator
// ============================================================================

/// The rendering side of the bridge. Everything the agent needs from the
/// (out-of-scope) renderer: create, move, and release remote-player entities.
pub trait Renderer {
    type Handle;

    /// Instantiate a render entity for a newly seen remote player.
    fn create_remote_entity(&mut self, id: PlayerId, position: Position) -> Self::Handle;

    /// Mutate an entity's transform directly. No smoothing or interpolation
    /// happens at this layer (extension point for future work).
    fn update_entity_transform(
        &mut self,
        handle: &mut Self::Handle,
        position: [f64; 3],
        rotation: [f64; 2],
    );

    /// Release the entity for a departed player.
    fn destroy_entity(&mut self, id: PlayerId, handle: Self::Handle);
}

// ============================================================================
// Sync Agent
// ============================================================================

struct MirrorEntry<H> {
    handle: H,
    transform: Transform,
}

/// Client-side state reconciler: mirrors the server roster and drives the
/// renderer collaborator.
pub struct SyncAgent<R: Renderer> {
    renderer: R,
    own_id: Option<PlayerId>,
    mirror: HashMap<PlayerId, MirrorEntry<R::Handle>>,
}

impl<R: Renderer> SyncAgent<R> {
    pub fn new(renderer: R) -> Self {
        Self {
            renderer,
            own_id: None,
            mirror: HashMap::new(),
        }
    }

    /// Own identifier, known once `init` has been received.
    pub fn own_id(&self) -> Option<PlayerId> {
        self.own_id
    }

    /// Number of mirrored remote players.
    pub fn remote_count(&self) -> usize {
        self.mirror.len()
    }

    /// Last-known transform of a mirrored player.
    pub fn remote_transform(&self, id: PlayerId) -> Option<Transform> {
        self.mirror.get(&id).map(|entry| entry.transform)
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    /// Dispatch one inbound message. Call for every message drained from the
    /// transport each tick.
    pub fn handle_message(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::Init { players, id } => self.on_init(id, players),
            ServerMessage::NewPlayer { id, position } => self.on_new_player(id, position),
            ServerMessage::Update { id, position } => self.on_update(id, position),
            ServerMessage::Remove { id } => self.on_remove(id),
        }
    }

    /// Send the local transform upstream; called once per simulation tick.
    /// A not-yet-open or dropped transport, or a missing identity, skips the
    /// tick silently — this must never stall the render loop.
    pub fn send_local_transform(
        &self,
        connection: &Connection,
        position: [f64; 3],
        rotation: [f64; 2],
    ) -> SendStatus {
        let Some(id) = self.own_id else {
            return SendStatus::NotReady;
        };
        connection.send_transform(id, position, rotation)
    }

    fn on_init(&mut self, own_id: PlayerId, roster: HashMap<PlayerId, Position>) {
        self.own_id = Some(own_id);
        for (id, position) in roster {
            // A session must never mirror itself.
            if id == own_id {
                continue;
            }
            self.insert_remote(id, position);
        }
    }

    fn on_new_player(&mut self, id: PlayerId, position: Position) {
        if Some(id) == self.own_id {
            return;
        }
        self.insert_remote(id, position);
    }

    fn on_update(&mut self, id: PlayerId, pose: Pose) {
        // Defensive self-echo filter; the server already suppresses these.
        if Some(id) == self.own_id {
            return;
        }

        let transform = Transform::from(pose);
        match self.mirror.get_mut(&id) {
            Some(entry) => {
                entry.transform = transform;
                self.renderer.update_entity_transform(
                    &mut entry.handle,
                    transform.position,
                    transform.rotation,
                );
            }
            None => {
                // Update for an unknown player: self-heal rather than drop,
                // so a lost new_player cannot desync us permanently.
                warn!(id, "update for unknown player, creating mirror entry");
                let mut handle = self
                    .renderer
                    .create_remote_entity(id, Position::from(transform));
                self.renderer.update_entity_transform(
                    &mut handle,
                    transform.position,
                    transform.rotation,
                );
                self.mirror.insert(id, MirrorEntry { handle, transform });
            }
        }
    }

    fn on_remove(&mut self, id: PlayerId) {
        match self.mirror.remove(&id) {
            Some(entry) => self.renderer.destroy_entity(id, entry.handle),
            // Already gone; removal is idempotent.
            None => debug!(id, "remove for absent player ignored"),
        }
    }

    fn insert_remote(&mut self, id: PlayerId, position: Position) {
        let handle = self.renderer.create_remote_entity(id, position);
        let stale = self.mirror.insert(
            id,
            MirrorEntry {
                handle,
                transform: Transform::from(position),
            },
        );
        // A duplicate id means our previous entry went stale; release it
        // instead of leaking the render entity.
        if let Some(stale) = stale {
            warn!(id, "replacing stale mirror entry");
            self.renderer.destroy_entity(id, stale.handle);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Event {
        Created(PlayerId, u32),
        Updated(u32, [f64; 3], [f64; 2]),
        Destroyed(PlayerId, u32),
    }

    #[derive(Default)]
    struct RecordingRenderer {
        events: Vec<Event>,
        next_handle: u32,
    }

    impl Renderer for RecordingRenderer {
        type Handle = u32;

        fn create_remote_entity(&mut self, id: PlayerId, _position: Position) -> u32 {
            self.next_handle += 1;
            self.events.push(Event::Created(id, self.next_handle));
            self.next_handle
        }

        fn update_entity_transform(
            &mut self,
            handle: &mut u32,
            position: [f64; 3],
            rotation: [f64; 2],
        ) {
            self.events.push(Event::Updated(*handle, position, rotation));
        }

        fn destroy_entity(&mut self, id: PlayerId, handle: u32) {
            self.events.push(Event::Destroyed(id, handle));
        }
    }

    fn agent() -> SyncAgent<RecordingRenderer> {
        SyncAgent::new(RecordingRenderer::default())
    }

    fn position(x: f64) -> Position {
        Position {
            x,
            y: 0.0,
            z: 0.0,
        }
    }

    fn pose(x: f64, ry: f64) -> Pose {
        Pose {
            x,
            y: 0.0,
            z: 0.0,
            rx: 0.0,
            ry,
        }
    }

    fn init_msg(own_id: PlayerId, others: &[(PlayerId, f64)]) -> ServerMessage {
        let mut players = HashMap::new();
        players.insert(own_id, position(0.0));
        for &(id, x) in others {
            players.insert(id, position(x));
        }
        ServerMessage::Init {
            players,
            id: own_id,
        }
    }

    #[test]
    fn test_init_mirrors_everyone_but_self() {
        let mut agent = agent();
        agent.handle_message(init_msg(1, &[(2, 5.0), (3, -5.0)]));

        assert_eq!(agent.own_id(), Some(1));
        assert_eq!(agent.remote_count(), 2);
        assert!(agent.remote_transform(1).is_none());
        assert_eq!(agent.remote_transform(2).unwrap().position, [5.0, 0.0, 0.0]);

        let created: Vec<_> = agent
            .renderer()
            .events
            .iter()
            .filter(|e| matches!(e, Event::Created(..)))
            .collect();
        assert_eq!(created.len(), 2);
    }

    #[test]
    fn test_new_player_naming_self_is_ignored() {
        let mut agent = agent();
        agent.handle_message(init_msg(1, &[]));
        agent.handle_message(ServerMessage::NewPlayer {
            id: 1,
            position: position(9.0),
        });

        assert_eq!(agent.remote_count(), 0);
        assert!(agent.renderer().events.is_empty());
    }

    #[test]
    fn test_update_naming_self_is_ignored() {
        let mut agent = agent();
        agent.handle_message(init_msg(1, &[]));
        agent.handle_message(ServerMessage::Update {
            id: 1,
            position: pose(9.0, 0.0),
        });

        assert_eq!(agent.remote_count(), 0);
        assert!(agent.renderer().events.is_empty());
    }

    #[test]
    fn test_update_mutates_known_mirror_entry() {
        let mut agent = agent();
        agent.handle_message(init_msg(1, &[(2, 0.0)]));
        agent.handle_message(ServerMessage::Update {
            id: 2,
            position: pose(3.0, 0.5),
        });

        let t = agent.remote_transform(2).unwrap();
        assert_eq!(t.position, [3.0, 0.0, 0.0]);
        assert_eq!(t.rotation, [0.0, 0.5]);
        assert!(
            agent
                .renderer()
                .events
                .contains(&Event::Updated(1, [3.0, 0.0, 0.0], [0.0, 0.5]))
        );
    }

    #[test]
    fn test_update_for_unknown_player_self_heals() {
        let mut agent = agent();
        agent.handle_message(init_msg(1, &[]));
        agent.handle_message(ServerMessage::Update {
            id: 7,
            position: pose(2.0, 1.0),
        });

        assert_eq!(agent.remote_count(), 1);
        let t = agent.remote_transform(7).unwrap();
        assert_eq!(t.position, [2.0, 0.0, 0.0]);
        assert_eq!(t.rotation, [0.0, 1.0]);
        // The healed entry got a fresh entity and an immediate transform.
        assert_eq!(
            agent.renderer().events,
            vec![
                Event::Created(7, 1),
                Event::Updated(1, [2.0, 0.0, 0.0], [0.0, 1.0]),
            ]
        );
    }

    #[test]
    fn test_remove_destroys_entity_and_is_idempotent() {
        let mut agent = agent();
        agent.handle_message(init_msg(1, &[(2, 0.0)]));

        agent.handle_message(ServerMessage::Remove { id: 2 });
        assert_eq!(agent.remote_count(), 0);
        assert!(agent.renderer().events.contains(&Event::Destroyed(2, 1)));

        let events_after_first = agent.renderer().events.len();
        agent.handle_message(ServerMessage::Remove { id: 2 });
        agent.handle_message(ServerMessage::Remove { id: 2 });
        assert_eq!(agent.remote_count(), 0);
        assert_eq!(agent.renderer().events.len(), events_after_first);
    }

    #[test]
    fn test_no_dangling_mutation_after_remove() {
        let mut agent = agent();
        agent.handle_message(init_msg(1, &[(2, 0.0)]));
        agent.handle_message(ServerMessage::Remove { id: 2 });

        // A late update for the removed id recreates the mirror entry; it
        // must never touch the destroyed handle.
        agent.handle_message(ServerMessage::Update {
            id: 2,
            position: pose(4.0, 0.0),
        });

        let events = &agent.renderer().events;
        let recreated_at = events
            .iter()
            .position(|e| matches!(e, Event::Created(2, h) if *h == 2))
            .expect("entry recreated");
        assert!(
            events[recreated_at..]
                .iter()
                .all(|e| !matches!(e, Event::Updated(1, ..))),
            "stale handle mutated after destroy: {events:?}"
        );
    }

    #[test]
    fn test_duplicate_new_player_replaces_stale_entry() {
        let mut agent = agent();
        agent.handle_message(init_msg(1, &[(2, 0.0)]));
        agent.handle_message(ServerMessage::NewPlayer {
            id: 2,
            position: position(8.0),
        });

        assert_eq!(agent.remote_count(), 1);
        assert_eq!(agent.remote_transform(2).unwrap().position, [8.0, 0.0, 0.0]);
        // The stale entity (handle 1) was released, the new one (2) kept.
        assert!(agent.renderer().events.contains(&Event::Destroyed(2, 1)));
    }
}
