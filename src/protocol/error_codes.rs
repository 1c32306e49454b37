//! Server error taxonomy.
//!
//! Every protocol-level failure maps onto one of these kinds; the kind
//! decides how the failure surfaces (closed socket, `ERROR:` reply, log
//! line) and whether any state changed.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerErrorCode {
    /// Accept/read/write failure; the session is closed without a reply.
    Connection,
    /// Bad credentials, bad JWT, expired session.
    Authentication,
    /// Too many connections or a full room.
    Capacity,
    /// Join/leave/start in the wrong state, or a non-host acting as host.
    RoomState,
    /// Not your turn, illegal placement, game not started.
    GameState,
    /// AFK unblock outside an active game.
    Afk,
    /// Query or connection failure in the gateway.
    Database,
    /// Unexpected internal error; the session is kept alive where possible.
    Internal,
}

impl ServerErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerErrorCode::Connection => "connection",
            ServerErrorCode::Authentication => "authentication",
            ServerErrorCode::Capacity => "capacity",
            ServerErrorCode::RoomState => "room_state",
            ServerErrorCode::GameState => "game_state",
            ServerErrorCode::Afk => "afk",
            ServerErrorCode::Database => "database",
            ServerErrorCode::Internal => "internal",
        }
    }

    /// Whether the failure terminates the connection. Only network-layer
    /// errors do; protocol-layer errors reply to the sender and keep the
    /// session alive.
    pub fn terminates_session(self) -> bool {
        matches!(self, ServerErrorCode::Connection)
    }
}

impl fmt::Display for ServerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connection_errors_terminate() {
        assert!(ServerErrorCode::Connection.terminates_session());
        for code in [
            ServerErrorCode::Authentication,
            ServerErrorCode::Capacity,
            ServerErrorCode::RoomState,
            ServerErrorCode::GameState,
            ServerErrorCode::Afk,
            ServerErrorCode::Database,
            ServerErrorCode::Internal,
        ] {
            assert!(!code.terminates_session(), "{code} must keep session");
        }
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&ServerErrorCode::RoomState).unwrap();
        assert_eq!(json, "\"room_state\"");
    }
}
