//! Wire protocol: newline-delimited UTF-8 lines, `:`-separated fields.
//!
//! - [`opcodes`]: client opcode set and line parsing
//! - [`messages`]: server reply builders
//! - [`error_codes`]: failure taxonomy

pub mod error_codes;
pub mod messages;
pub mod opcodes;

pub use error_codes::ServerErrorCode;
pub use messages::{
    normalize_color_index, AfkNotice, GameResultBody, PlayerSummary, RoomInfoView, RoomSummary,
};
pub use opcodes::{parse_line, Opcode, ParseError, ParsedMessage};

/// Maximum accepted line length; longer input disconnects the session.
pub const MAX_LINE_BYTES: usize = 8 * 1024;
