//! Pure Blokus rule engine: the piece set, the board, placement legality,
//! and per-game turn/score state.

pub mod block;
pub mod board;
pub mod rules;
pub mod state;

pub use block::{footprint_at, oriented_cells, BlockType, Flip, Rotation};
pub use board::{Board, PlayerColor, BOARD_SIZE};
pub use rules::{apply, can_place, has_any_legal_move, is_game_over, score_of, BlockPlacement};
pub use state::{GameSnapshot, GameState, PlacementError, TurnAdvance};

/// Blocks each player starts with.
pub const BLOCKS_PER_PLAYER: usize = 21;

/// Seats per room.
pub const MAX_PLAYERS: usize = 4;
