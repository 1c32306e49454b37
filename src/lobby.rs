//! Lobby coordinator.
//!
//! Tracks sessions currently in the lobby and fans out user-list, room-list,
//! and chat deltas. Broadcasts snapshot the member list under the lock and
//! send after releasing it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::protocol::messages;
use crate::protocol::RoomSummary;
use crate::session::{Session, SessionId};

#[derive(Default)]
pub struct LobbyCoordinator {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl LobbyCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session to the lobby and tell the existing members.
    pub async fn enter(&self, session: Arc<Session>) {
        let username = session.username().unwrap_or_default();
        let others: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write().await;
            let others = sessions.values().cloned().collect();
            sessions.insert(session.id(), session);
            others
        };
        let line = messages::lobby_user_joined(&username);
        for other in others {
            other.send(line.clone());
        }
        tracing::debug!(%username, "Entered lobby");
    }

    /// Remove a session from the lobby and tell the remaining members.
    pub async fn leave(&self, session_id: SessionId) {
        let (username, remaining) = {
            let mut sessions = self.sessions.write().await;
            let Some(removed) = sessions.remove(&session_id) else {
                return;
            };
            let remaining: Vec<Arc<Session>> = sessions.values().cloned().collect();
            (removed.username().unwrap_or_default(), remaining)
        };
        let line = messages::lobby_user_left(&username);
        for member in remaining {
            member.send(line.clone());
        }
        tracing::debug!(%username, "Left lobby");
    }

    pub async fn contains(&self, session_id: SessionId) -> bool {
        self.sessions.read().await.contains_key(&session_id)
    }

    pub async fn member_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sessions
            .read()
            .await
            .values()
            .filter_map(|session| session.username())
            .collect();
        names.sort();
        names
    }

    /// Push a fresh room list to every lobby member.
    pub async fn broadcast_room_list(&self, rooms: &[RoomSummary]) {
        self.broadcast(messages::room_list(rooms)).await;
    }

    /// Lobby chat: the sender receives the same broadcast as everyone else.
    pub async fn broadcast_chat(&self, username: &str, text: &str) {
        self.broadcast(messages::chat(username, text)).await;
    }

    pub async fn broadcast(&self, line: String) {
        let members: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        for member in members {
            member.send(line.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn client(user_id: i64, name: &str) -> (Arc<Session>, UnboundedReceiver<String>) {
        let (session, rx) = Session::new("127.0.0.1:40000".parse().unwrap());
        session.bind_user(user_id, name, "token");
        (session, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_enter_notifies_existing_members_only() {
        let lobby = LobbyCoordinator::new();
        let (alice, mut alice_rx) = client(1, "alice");
        let (bob, mut bob_rx) = client(2, "bob");

        lobby.enter(alice).await;
        lobby.enter(bob).await;

        assert_eq!(drain(&mut alice_rx), vec!["LOBBY_USER_JOINED:bob"]);
        assert!(drain(&mut bob_rx).is_empty());
        assert_eq!(lobby.member_count().await, 2);
    }

    #[tokio::test]
    async fn test_leave_notifies_remaining() {
        let lobby = LobbyCoordinator::new();
        let (alice, mut alice_rx) = client(1, "alice");
        let (bob, _bob_rx) = client(2, "bob");
        let bob_id = bob.id();

        lobby.enter(alice).await;
        lobby.enter(bob).await;
        drain(&mut alice_rx);

        lobby.leave(bob_id).await;
        assert_eq!(drain(&mut alice_rx), vec!["LOBBY_USER_LEFT:bob"]);
        assert_eq!(lobby.member_count().await, 1);

        // Leaving twice is harmless.
        lobby.leave(bob_id).await;
        assert!(drain(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn test_user_list_sorted() {
        let lobby = LobbyCoordinator::new();
        let (carol, _c) = client(3, "carol");
        let (alice, _a) = client(1, "alice");
        lobby.enter(carol).await;
        lobby.enter(alice).await;
        assert_eq!(lobby.usernames().await, vec!["alice", "carol"]);
    }

    #[tokio::test]
    async fn test_chat_includes_sender() {
        let lobby = LobbyCoordinator::new();
        let (alice, mut alice_rx) = client(1, "alice");
        let (bob, mut bob_rx) = client(2, "bob");
        lobby.enter(alice).await;
        lobby.enter(bob).await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        lobby.broadcast_chat("alice", "hi").await;
        assert_eq!(drain(&mut alice_rx), vec!["CHAT:alice:hi"]);
        assert_eq!(drain(&mut bob_rx), vec!["CHAT:alice:hi"]);
    }
}
