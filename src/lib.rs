#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_excessive_bools,
    clippy::too_many_arguments,
    clippy::too_many_lines,
    clippy::similar_names
)]

//! # Blokus Server
//!
//! Authoritative TCP server for online multiplayer Blokus: a line-delimited
//! text protocol, local and OIDC/JWT authentication, lobby and room
//! management, a per-room turn state machine with AFK handling, and
//! Postgres-backed profiles and statistics.

/// Authentication: local credentials, guests, JWT/JWKS verification
pub mod auth;

/// Environment-driven server configuration
pub mod config;

/// Database gateway (Postgres via sqlx, in-memory for tests)
pub mod db;

/// Pure Blokus rule engine and per-game state
pub mod game;

/// Opcode dispatch bound to a session
pub mod handler;

/// Lobby membership and fan-out
pub mod lobby;

/// Structured logging configuration
pub mod logging;

/// Wire protocol: opcodes, reply builders, error taxonomy
pub mod protocol;

/// Game rooms and the room registry
pub mod room;

/// Per-connection session object
pub mod session;

/// Server orchestration: accept loop, pumps, sweeps
pub mod server;

/// Client version gate
pub mod version;
