use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::debug;

use geoduel_core::{encode, ServerMsg};

pub type ConnId = u64;

/// Outbound frame queue for one connection. Unbounded: frames are small
/// and rooms hold two players; a dead receiver just drops sends.
pub type FrameSender = mpsc::UnboundedSender<Vec<u8>>;

struct Member {
    player_id: String,
    sender: FrameSender,
}

struct Room {
    members: HashMap<ConnId, Member>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    /// Same connection, same room: the join is idempotent.
    AlreadyInRoom,
}

/// Process-wide room membership. Purely in-memory and lost on restart —
/// the authoritative document is the durable record; these rooms only
/// exist to fan ephemeral frames out.
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
    room_by_conn: HashMap<ConnId, String>,
    next_conn_id: ConnId,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
            room_by_conn: HashMap::new(),
            next_conn_id: 1,
        }
    }

    pub fn alloc_conn_id(&mut self) -> ConnId {
        let id = self.next_conn_id;
        self.next_conn_id = self.next_conn_id.wrapping_add(1).max(1);
        id
    }

    pub fn room_of(&self, conn: ConnId) -> Option<&str> {
        self.room_by_conn.get(&conn).map(String::as_str)
    }

    /// Add a connection to a room, announcing it to the other members.
    /// Rooms spring into being on first join. A connection switching rooms
    /// leaves its old room first, with the usual announcement.
    pub fn join(
        &mut self,
        conn: ConnId,
        room_id: &str,
        player_id: &str,
        sender: FrameSender,
    ) -> JoinOutcome {
        if let Some(current) = self.room_by_conn.get(&conn) {
            if current == room_id {
                return JoinOutcome::AlreadyInRoom;
            }
            self.leave(conn);
        }

        let room = self.rooms.entry(room_id.to_string()).or_insert_with(|| Room {
            members: HashMap::new(),
        });
        let announce = ServerMsg::PresenceJoined {
            player_id: player_id.to_string(),
        };
        Self::broadcast(room, None, &announce);
        room.members.insert(
            conn,
            Member {
                player_id: player_id.to_string(),
                sender,
            },
        );
        self.room_by_conn.insert(conn, room_id.to_string());
        debug!(room = %room_id, player = %player_id, conn, "joined room");
        JoinOutcome::Joined
    }

    /// Remove a connection from its room, announcing the departure to the
    /// remaining members. Returns `None` on the second and later calls for
    /// the same connection, which is what makes the disconnect hook fire
    /// its announcement exactly once.
    pub fn leave(&mut self, conn: ConnId) -> Option<(String, String)> {
        let room_id = self.room_by_conn.remove(&conn)?;
        let room = self.rooms.get_mut(&room_id)?;
        let member = room.members.remove(&conn)?;
        let announce = ServerMsg::PresenceLeft {
            player_id: member.player_id.clone(),
        };
        Self::broadcast(room, None, &announce);
        if room.members.is_empty() {
            self.rooms.remove(&room_id);
        }
        debug!(room = %room_id, player = %member.player_id, conn, "left room");
        Some((room_id, member.player_id))
    }

    /// Fan an event out to every member of the sender's room except the
    /// sender. Best effort: closed receivers are skipped, nothing is
    /// queued for later.
    pub fn publish_from(&self, conn: ConnId, msg: &ServerMsg) -> bool {
        let Some(room_id) = self.room_by_conn.get(&conn) else {
            return false;
        };
        let Some(room) = self.rooms.get(room_id) else {
            return false;
        };
        Self::broadcast(room, Some(conn), msg);
        true
    }

    fn broadcast(room: &Room, except: Option<ConnId>, msg: &ServerMsg) {
        let Some(bytes) = encode(msg) else {
            return;
        };
        for (id, member) in &room.members {
            if Some(*id) == except {
                continue;
            }
            let _ = member.sender.send(bytes.clone());
        }
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use geoduel_core::decode;

    fn drain(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<ServerMsg> {
        let mut out = Vec::new();
        while let Ok(bytes) = rx.try_recv() {
            if let Some(msg) = decode::<ServerMsg>(&bytes) {
                out.push(msg);
            }
        }
        out
    }

    #[test]
    fn join_announces_to_existing_members_only() {
        let mut registry = RoomRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        let a = registry.alloc_conn_id();
        let b = registry.alloc_conn_id();
        assert_eq!(registry.join(a, "room", "player-a", tx_a), JoinOutcome::Joined);
        assert_eq!(registry.join(b, "room", "player-b", tx_b), JoinOutcome::Joined);

        assert_eq!(
            drain(&mut rx_a),
            vec![ServerMsg::PresenceJoined {
                player_id: "player-b".into()
            }]
        );
        // The joiner hears nothing about itself.
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn rejoining_the_same_room_is_a_no_op() {
        let mut registry = RoomRegistry::new();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        let a = registry.alloc_conn_id();
        let b = registry.alloc_conn_id();
        registry.join(b, "room", "player-b", tx_b.clone());
        registry.join(a, "room", "player-a", tx_a.clone());
        drain(&mut rx_b);

        assert_eq!(
            registry.join(a, "room", "player-a", tx_a),
            JoinOutcome::AlreadyInRoom
        );
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn leave_announces_exactly_once() {
        let mut registry = RoomRegistry::new();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        let a = registry.alloc_conn_id();
        let b = registry.alloc_conn_id();
        registry.join(a, "room", "player-a", tx_a);
        registry.join(b, "room", "player-b", tx_b);
        drain(&mut rx_b);

        let left = registry.leave(a);
        assert_eq!(left, Some(("room".to_string(), "player-a".to_string())));
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerMsg::PresenceLeft {
                player_id: "player-a".into()
            }]
        );

        // Abrupt loss paths can race the clean close; the second call
        // must not announce again.
        assert_eq!(registry.leave(a), None);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn publish_excludes_the_sender() {
        let mut registry = RoomRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        let a = registry.alloc_conn_id();
        let b = registry.alloc_conn_id();
        registry.join(a, "room", "player-a", tx_a);
        registry.join(b, "room", "player-b", tx_b);
        drain(&mut rx_a);
        drain(&mut rx_b);

        let sent = registry.publish_from(
            a,
            &ServerMsg::Guess {
                player_id: "player-a".into(),
                item: "france".into(),
            },
        );
        assert!(sent);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerMsg::Guess {
                player_id: "player-a".into(),
                item: "france".into()
            }]
        );
    }

    #[test]
    fn publish_without_a_room_reports_false() {
        let registry = RoomRegistry::new();
        assert!(!registry.publish_from(
            99,
            &ServerMsg::Guess {
                player_id: "player-a".into(),
                item: "france".into(),
            }
        ));
    }

    #[test]
    fn switching_rooms_leaves_the_old_one() {
        let mut registry = RoomRegistry::new();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        let a = registry.alloc_conn_id();
        let b = registry.alloc_conn_id();
        registry.join(a, "room-one", "player-a", tx_a.clone());
        registry.join(b, "room-one", "player-b", tx_b);
        drain(&mut rx_b);

        registry.join(a, "room-two", "player-a", tx_a);
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerMsg::PresenceLeft {
                player_id: "player-a".into()
            }]
        );
        assert_eq!(registry.room_of(a), Some("room-two"));
    }
}
