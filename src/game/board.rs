//! The 20×20 Blokus board and player colors.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const BOARD_SIZE: usize = 20;

/// Seat colors in canonical turn order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PlayerColor {
    Blue,
    Yellow,
    Red,
    Green,
}

impl PlayerColor {
    /// Canonical turn order: Blue → Yellow → Red → Green.
    pub const ALL: [PlayerColor; 4] = [
        PlayerColor::Blue,
        PlayerColor::Yellow,
        PlayerColor::Red,
        PlayerColor::Green,
    ];

    /// Wire color index, 1..=4.
    pub fn index(self) -> i32 {
        match self {
            PlayerColor::Blue => 1,
            PlayerColor::Yellow => 2,
            PlayerColor::Red => 3,
            PlayerColor::Green => 4,
        }
    }

    pub fn from_index(index: i32) -> Option<PlayerColor> {
        match index {
            1 => Some(PlayerColor::Blue),
            2 => Some(PlayerColor::Yellow),
            3 => Some(PlayerColor::Red),
            4 => Some(PlayerColor::Green),
            _ => None,
        }
    }

    /// The corner this color's first block must cover.
    pub fn starting_corner(self) -> (i32, i32) {
        let last = (BOARD_SIZE - 1) as i32;
        match self {
            PlayerColor::Blue => (0, 0),
            PlayerColor::Yellow => (0, last),
            PlayerColor::Red => (last, 0),
            PlayerColor::Green => (last, last),
        }
    }
}

impl fmt::Display for PlayerColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlayerColor::Blue => "blue",
            PlayerColor::Yellow => "yellow",
            PlayerColor::Red => "red",
            PlayerColor::Green => "green",
        };
        f.write_str(name)
    }
}

/// Owner grid. `None` is an empty cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    cells: [[Option<PlayerColor>; BOARD_SIZE]; BOARD_SIZE],
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl Board {
    pub fn new() -> Self {
        Self {
            cells: [[None; BOARD_SIZE]; BOARD_SIZE],
        }
    }

    pub fn in_bounds(row: i32, col: i32) -> bool {
        (0..BOARD_SIZE as i32).contains(&row) && (0..BOARD_SIZE as i32).contains(&col)
    }

    /// Owner of a cell; out-of-bounds reads as empty.
    pub fn owner(&self, row: i32, col: i32) -> Option<PlayerColor> {
        if Self::in_bounds(row, col) {
            self.cells[row as usize][col as usize]
        } else {
            None
        }
    }

    pub fn is_empty(&self, row: i32, col: i32) -> bool {
        Self::in_bounds(row, col) && self.cells[row as usize][col as usize].is_none()
    }

    pub fn set_owner(&mut self, row: i32, col: i32, color: PlayerColor) {
        if Self::in_bounds(row, col) {
            self.cells[row as usize][col as usize] = Some(color);
        }
    }

    /// True if the given color owns any cell.
    pub fn has_any(&self, color: PlayerColor) -> bool {
        self.cells
            .iter()
            .any(|row| row.iter().any(|cell| *cell == Some(color)))
    }

    pub fn occupied_count(&self) -> usize {
        self.cells
            .iter()
            .map(|row| row.iter().filter(|cell| cell.is_some()).count())
            .sum()
    }

    /// Flat snapshot of owner indices (0 for empty), row-major. Used for
    /// state-update payloads.
    pub fn snapshot(&self) -> Vec<Vec<i32>> {
        self.cells
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| cell.map_or(0, PlayerColor::index))
                    .collect()
            })
            .collect()
    }
}
