//! Client opcode vocabulary and line parsing.
//!
//! One UTF-8 line per message, `:`-separated fields, first field(s) the
//! opcode. Empty optional fields appear as `::`. Chat is the one opcode
//! whose payload may itself contain `:`, so its tail is not split.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty message")]
    Empty,
    #[error("unknown opcode")]
    UnknownOpcode,
}

/// Every opcode a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Auth,
    Register,
    Guest,
    Jwt,
    Logout,
    SessionValidate,
    VersionCheck,
    Ping,
    LobbyEnter,
    LobbyLeave,
    LobbyList,
    RoomCreate,
    RoomJoin,
    RoomLeave,
    RoomList,
    RoomReady,
    RoomStart,
    RoomTransfer,
    GameMove,
    AfkUnblock,
    Chat,
    UserStats,
    SettingsGet,
    SettingsUpdate,
}

impl Opcode {
    fn from_token(token: &str) -> Option<Opcode> {
        match token {
            "auth" => Some(Opcode::Auth),
            "register" => Some(Opcode::Register),
            "guest" => Some(Opcode::Guest),
            "jwt" => Some(Opcode::Jwt),
            "logout" => Some(Opcode::Logout),
            "session:validate" => Some(Opcode::SessionValidate),
            "version:check" => Some(Opcode::VersionCheck),
            "ping" => Some(Opcode::Ping),
            "lobby:enter" => Some(Opcode::LobbyEnter),
            "lobby:leave" => Some(Opcode::LobbyLeave),
            "lobby:list" => Some(Opcode::LobbyList),
            "room:create" => Some(Opcode::RoomCreate),
            "room:join" => Some(Opcode::RoomJoin),
            "room:leave" => Some(Opcode::RoomLeave),
            "room:list" => Some(Opcode::RoomList),
            "room:ready" => Some(Opcode::RoomReady),
            "room:start" => Some(Opcode::RoomStart),
            "room:transfer" => Some(Opcode::RoomTransfer),
            "game:move" => Some(Opcode::GameMove),
            "afk:unblock" => Some(Opcode::AfkUnblock),
            "chat" => Some(Opcode::Chat),
            "user:stats" => Some(Opcode::UserStats),
            "settings:get" => Some(Opcode::SettingsGet),
            "settings:update" => Some(Opcode::SettingsUpdate),
            _ => None,
        }
    }

    /// Opcodes whose remaining payload is free text or JSON and must not
    /// be split on `:`.
    fn greedy_tail(self) -> bool {
        matches!(self, Opcode::Chat | Opcode::SettingsUpdate)
    }
}

/// A parsed client line: the opcode plus its raw parameter fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage<'a> {
    pub opcode: Opcode,
    pub params: Vec<&'a str>,
}

/// Split one wire line into opcode + parameters. Two-segment opcodes
/// (`room:create`, ...) are tried before single-segment ones so that
/// `room` is never mistaken for an opcode of its own.
pub fn parse_line(line: &str) -> Result<ParsedMessage<'_>, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut segments = line.splitn(3, ':');
    let first = segments.next().unwrap_or_default();
    let second = segments.next();

    let (opcode, tail) = if let Some(second) = second {
        let two = format!("{first}:{second}");
        if let Some(op) = Opcode::from_token(&two) {
            (op, segments.next())
        } else if let Some(op) = Opcode::from_token(first) {
            // Single-token opcode; everything after the first ':' is payload.
            (op, Some(&line[first.len() + 1..]))
        } else {
            return Err(ParseError::UnknownOpcode);
        }
    } else {
        (Opcode::from_token(first).ok_or(ParseError::UnknownOpcode)?, None)
    };

    let params = match tail {
        None => Vec::new(),
        Some(tail) if opcode.greedy_tail() => vec![tail],
        Some(tail) => tail.split(':').collect(),
    };

    Ok(ParsedMessage { opcode, params })
}
