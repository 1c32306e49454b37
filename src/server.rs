//! Top-level game server: wiring, the TCP accept loop, per-connection
//! read/write pumps, and the periodic maintenance sweeps.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::{Buf, BytesMut};
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::auth::{AuthenticationService, JwtVerifier};
use crate::config::Config;
use crate::db::{self, UserStore};
use crate::handler::MessageHandler;
use crate::lobby::LobbyCoordinator;
use crate::protocol::MAX_LINE_BYTES;
use crate::room::{RoomConfig, RoomManager};
use crate::session::{Session, SessionId};
use crate::version::VersionManager;

/// Shared server state: the composition root built at boot and injected
/// into every handler.
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn UserStore>,
    pub auth: Arc<AuthenticationService>,
    pub rooms: Arc<RoomManager>,
    pub lobby: Arc<LobbyCoordinator>,
    pub version: VersionManager,
    /// Every live TCP session, for the idle sweep and shutdown.
    pub sessions: DashMap<SessionId, Arc<Session>>,
}

pub struct GameServer {
    state: Arc<AppState>,
}

impl GameServer {
    /// Wire everything up. Fails fast when the database is unreachable or
    /// JWT auth is configured but the JWKS endpoint cannot be primed.
    pub async fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);

        let store = db::connect(&config.database)
            .await
            .context("database initialization failed")?;

        let jwt_verifier = if config.auth.jwt_enabled() {
            let verifier = Arc::new(JwtVerifier::new(&config.auth)?);
            verifier
                .initialize()
                .await
                .map_err(|err| anyhow::anyhow!("JWKS initialization failed: {err}"))?;
            verifier.start_background_refresh();
            Some(verifier)
        } else {
            tracing::info!("JWT login disabled (no JWKS_URL configured)");
            None
        };

        let auth = Arc::new(AuthenticationService::new(
            Arc::clone(&store),
            jwt_verifier,
            &config.auth,
        ));
        let rooms = Arc::new(RoomManager::new(
            RoomConfig {
                turn_time_limit: Duration::from_secs(config.server.turn_time_limit),
                afk_timeout_threshold: config.server.afk_timeout_threshold,
            },
            Arc::clone(&store),
        ));

        let state = Arc::new(AppState {
            version: VersionManager::new(config.version.clone()),
            config,
            store,
            auth,
            rooms,
            lobby: Arc::new(LobbyCoordinator::new()),
            sessions: DashMap::new(),
        });

        Ok(Self { state })
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Bind, start sweeps, and accept until ctrl-c.
    pub async fn run(&self) -> Result<()> {
        let port = self.state.config.server.port;
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("failed to bind port {port}"))?;
        tracing::info!(port, "Blokus server listening");

        let sweep_state = Arc::clone(&self.state);
        let sweeper = tokio::spawn(async move {
            cleanup_task(sweep_state).await;
        });

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let state = Arc::clone(&self.state);
                            if state.sessions.len() >= state.config.server.max_clients {
                                tracing::warn!(%addr, "Connection refused: server full");
                                tokio::spawn(refuse_connection(stream));
                                continue;
                            }
                            tokio::spawn(async move {
                                handle_connection(state, stream, addr).await;
                            });
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "Accept failed");
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        sweeper.abort();
        for entry in self.state.sessions.iter() {
            entry.value().send(crate::protocol::messages::system("server shutting down"));
            entry.value().close();
        }
        tracing::info!("Server stopped");
        Ok(())
    }
}

async fn refuse_connection(mut stream: TcpStream) {
    let _ = stream.write_all(b"ERROR:server full\n").await;
    let _ = stream.shutdown().await;
}

/// One connection: register the session, pump reads into the handler and
/// queued writes onto the socket, clean up exactly once at the end.
pub async fn handle_connection(
    state: Arc<AppState>,
    stream: TcpStream,
    addr: std::net::SocketAddr,
) {
    let (session, outbox) = Session::new(addr);
    state.sessions.insert(session.id(), Arc::clone(&session));
    tracing::info!(session_id = %session.id(), %addr, "Connection established");

    let handler = MessageHandler::new(Arc::clone(&state));
    let (read_half, write_half) = stream.into_split();

    let writer_session = Arc::clone(&session);
    let writer = tokio::spawn(async move {
        write_loop(write_half, outbox, &writer_session).await;
    });

    read_loop(read_half, &session, &handler).await;

    // Teardown: wake the writer, detach from lobby/rooms, drop registry
    // entry. Pending writes are discarded.
    session.close();
    handler.handle_disconnect(&session).await;
    state.sessions.remove(&session.id());
    let _ = writer.await;
    tracing::info!(session_id = %session.id(), %addr, "Connection closed");
}

async fn write_loop(
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
    mut outbox: mpsc::UnboundedReceiver<String>,
    session: &Arc<Session>,
) {
    let cancel = session.cancel_token();
    loop {
        // Biased toward the queue so lines enqueued before a close still
        // flush; a closed session enqueues nothing new.
        tokio::select! {
            biased;
            line = outbox.recv() => {
                let Some(mut line) = line else { break };
                line.push('\n');
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    session.close();
                    break;
                }
            }
            () = cancel.cancelled() => break,
        }
    }
    let _ = write_half.shutdown().await;
}

/// Accumulate bytes, hand each complete line to the handler. A line (or a
/// lineless buffer) over the cap disconnects the session.
async fn read_loop(
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    session: &Arc<Session>,
    handler: &MessageHandler,
) {
    let cancel = session.cancel_token();
    let mut buffer = BytesMut::with_capacity(4 * 1024);

    loop {
        tokio::select! {
            read = read_half.read_buf(&mut buffer) => {
                match read {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(err) => {
                        tracing::debug!(session_id = %session.id(), error = %err, "Read error");
                        break;
                    }
                }

                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    if pos + 1 > MAX_LINE_BYTES {
                        tracing::warn!(session_id = %session.id(), "Line over limit, disconnecting");
                        return;
                    }
                    let raw = buffer.split_to(pos + 1);
                    let line = String::from_utf8_lossy(&raw[..raw.len() - 1]).into_owned();
                    handler.handle_line(session, &line).await;
                    if session.is_closed() {
                        return;
                    }
                }
                // A partial line may never exceed the cap either.
                if buffer.remaining() > MAX_LINE_BYTES {
                    tracing::warn!(session_id = %session.id(), "Buffer over limit, disconnecting");
                    return;
                }
            }
            () = cancel.cancelled() => break,
        }
    }
}

/// Periodic maintenance: expired auth sessions, idle connections, and
/// empty or stale rooms.
async fn cleanup_task(state: Arc<AppState>) {
    let session_interval = Duration::from_secs(state.config.server.session_sweep_interval.max(1));
    let room_interval = Duration::from_secs(state.config.server.room_cleanup_interval.max(1));
    let idle_limit = state.config.server.session_idle_timeout as i64;
    let inactive_room = Duration::from_secs(state.config.server.inactive_room_timeout);

    let mut session_tick = tokio::time::interval(session_interval);
    let mut room_tick = tokio::time::interval(room_interval);
    session_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    room_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = session_tick.tick() => {
                state.auth.cleanup_expired_sessions().await;

                let mut idle = Vec::new();
                for entry in state.sessions.iter() {
                    if entry.value().idle_secs() > idle_limit {
                        idle.push(Arc::clone(entry.value()));
                    }
                }
                for session in idle {
                    tracing::info!(session_id = %session.id(), "Disconnecting idle session");
                    session.close();
                }
            }
            _ = room_tick.tick() => {
                state.rooms.cleanup_rooms(inactive_room).await;
            }
        }
    }
}
