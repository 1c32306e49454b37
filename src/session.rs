//! Per-connection session object.
//!
//! A `Session` owns the connection's lifecycle state and its outgoing
//! message queue. The server's connection pump owns the socket itself: one
//! read loop extracting newline-delimited lines, and one writer task
//! draining the queue so at most one write is outstanding per session.
//! Identity fields live behind a short-critical-section std mutex that is
//! never held across an await.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type SessionId = Uuid;

/// Room id value meaning "not in any room".
pub const NO_ROOM: i32 = -1;

/// Connection lifecycle states. Handlers gate every operation on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, possibly authenticated, not yet in the lobby.
    Connected,
    InLobby,
    InRoom,
    InGame,
}

impl ConnectionState {
    pub fn can_enter_lobby(self) -> bool {
        self == ConnectionState::Connected
    }

    pub fn can_create_room(self) -> bool {
        self == ConnectionState::InLobby
    }

    pub fn can_join_room(self) -> bool {
        self == ConnectionState::InLobby
    }

    pub fn can_start_game(self) -> bool {
        self == ConnectionState::InRoom
    }

    pub fn can_make_game_move(self) -> bool {
        self == ConnectionState::InGame
    }

    pub fn is_in_room(self) -> bool {
        matches!(self, ConnectionState::InRoom | ConnectionState::InGame)
    }
}

#[derive(Debug)]
struct SessionState {
    user_id: Option<i64>,
    username: Option<String>,
    auth_token: Option<String>,
    connection_state: ConnectionState,
    room_id: i32,
}

pub struct Session {
    id: SessionId,
    remote_addr: SocketAddr,
    outbox: mpsc::UnboundedSender<String>,
    state: Mutex<SessionState>,
    last_activity: AtomicI64,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl Session {
    /// Create a session plus the receiver end of its write queue; the
    /// caller wires the receiver to the socket writer task.
    pub fn new(remote_addr: SocketAddr) -> (Arc<Session>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session {
            id: Uuid::new_v4(),
            remote_addr,
            outbox: tx,
            state: Mutex::new(SessionState {
                user_id: None,
                username: None,
                auth_token: None,
                connection_state: ConnectionState::Connected,
                room_id: NO_ROOM,
            }),
            last_activity: AtomicI64::new(Utc::now().timestamp()),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });
        (session, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Cancellation token shared with the connection pump.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Queue one line for delivery. Per-session ordering follows call
    /// order; sends to a closed session are dropped silently.
    pub fn send(&self, line: impl Into<String>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let _ = self.outbox.send(line.into());
    }

    /// Mark the session dead and wake the connection pump.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.cancel.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Activity tracking
    // -----------------------------------------------------------------------

    pub fn touch(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Release);
    }

    pub fn idle_secs(&self) -> i64 {
        (Utc::now().timestamp() - self.last_activity.load(Ordering::Acquire)).max(0)
    }

    // -----------------------------------------------------------------------
    // Identity / state accessors
    // -----------------------------------------------------------------------

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        // Poisoning can only come from a panic inside one of these short
        // accessors; the state itself stays consistent.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.lock_state().connection_state
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        self.lock_state().connection_state = state;
    }

    /// Bind an authenticated identity to this connection.
    pub fn bind_user(&self, user_id: i64, username: &str, auth_token: &str) {
        let mut state = self.lock_state();
        state.user_id = Some(user_id);
        state.username = Some(username.to_string());
        state.auth_token = Some(auth_token.to_string());
    }

    pub fn clear_user(&self) {
        let mut state = self.lock_state();
        state.user_id = None;
        state.username = None;
        state.auth_token = None;
        state.connection_state = ConnectionState::Connected;
        state.room_id = NO_ROOM;
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock_state().user_id.is_some()
    }

    pub fn user_id(&self) -> Option<i64> {
        self.lock_state().user_id
    }

    pub fn username(&self) -> Option<String> {
        self.lock_state().username.clone()
    }

    pub fn auth_token(&self) -> Option<String> {
        self.lock_state().auth_token.clone()
    }

    pub fn room_id(&self) -> i32 {
        self.lock_state().room_id
    }

    pub fn set_room_id(&self, room_id: i32) {
        self.lock_state().room_id = room_id;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
