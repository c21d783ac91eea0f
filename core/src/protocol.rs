use rkyv::{Archive, Deserialize, Serialize};

/// Frames a client sends to the relay. The relay is a pure fan-out: it
/// never persists anything and never arbitrates game state — the
/// authoritative challenge document does that.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum ClientMsg {
    /// Attach this connection to the room for a match. Re-joining the same
    /// room on the same connection is a no-op.
    JoinRoom { room_id: String, player_id: String },
    /// A correct guess, forwarded to the other room members for immediate
    /// opponent feedback. The document write travels separately.
    Guess {
        room_id: String,
        player_id: String,
        item: String,
    },
    /// Advisory start announcement. Receivers still wait for the document's
    /// `started_at` before trusting the countdown.
    StartMatch {
        match_id: String,
        player1_id: String,
        player2_id: String,
    },
    Ping { nonce: Option<u64> },
}

/// Frames the relay sends to clients.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum ServerMsg {
    Welcome { room_id: String },
    PresenceJoined { player_id: String },
    PresenceLeft { player_id: String },
    Guess { player_id: String, item: String },
    MatchStarted {
        match_id: String,
        player1_id: String,
        player2_id: String,
    },
    Pong { nonce: Option<u64> },
    Error { code: String, message: String },
}
