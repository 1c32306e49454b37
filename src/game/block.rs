//! The canonical Blokus piece set and footprint derivation.
//!
//! Each player owns one copy of each of the 21 polyominoes. A piece is
//! described by its canonical cell offsets; the footprint of a concrete
//! placement is derived by applying the flip, then the rotation, then
//! normalizing back into the top-left quadrant and translating to the
//! anchor position.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Largest piece is a pentomino.
pub const MAX_BLOCK_CELLS: usize = 5;

/// Cell offsets for one oriented piece, relative to its placement anchor.
pub type Footprint = SmallVec<[(i32, i32); MAX_BLOCK_CELLS]>;

/// The 21 canonical Blokus block types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BlockType {
    Single,
    Domino,
    TrioLine,
    TrioAngle,
    TetroI,
    TetroO,
    TetroT,
    TetroL,
    TetroS,
    PentoF,
    PentoI,
    PentoL,
    PentoN,
    PentoP,
    PentoT,
    PentoU,
    PentoV,
    PentoW,
    PentoX,
    PentoY,
    PentoZ,
}

impl BlockType {
    /// Every block type, in wire-id order.
    pub const ALL: [BlockType; 21] = [
        BlockType::Single,
        BlockType::Domino,
        BlockType::TrioLine,
        BlockType::TrioAngle,
        BlockType::TetroI,
        BlockType::TetroO,
        BlockType::TetroT,
        BlockType::TetroL,
        BlockType::TetroS,
        BlockType::PentoF,
        BlockType::PentoI,
        BlockType::PentoL,
        BlockType::PentoN,
        BlockType::PentoP,
        BlockType::PentoT,
        BlockType::PentoU,
        BlockType::PentoV,
        BlockType::PentoW,
        BlockType::PentoX,
        BlockType::PentoY,
        BlockType::PentoZ,
    ];

    /// Wire identifier, 1..=21.
    pub fn id(self) -> u8 {
        // ALL is wire-id ordered, so position + 1 is the id.
        BlockType::ALL
            .iter()
            .position(|b| *b == self)
            .map(|i| i as u8 + 1)
            .unwrap_or(0)
    }

    pub fn from_id(id: u8) -> Option<BlockType> {
        if (1..=21).contains(&id) {
            Some(BlockType::ALL[id as usize - 1])
        } else {
            None
        }
    }

    /// Canonical (row, col) cell offsets, normalized to the top-left.
    pub fn cells(self) -> &'static [(i32, i32)] {
        match self {
            BlockType::Single => &[(0, 0)],
            BlockType::Domino => &[(0, 0), (0, 1)],
            BlockType::TrioLine => &[(0, 0), (0, 1), (0, 2)],
            BlockType::TrioAngle => &[(0, 0), (0, 1), (1, 0)],
            BlockType::TetroI => &[(0, 0), (0, 1), (0, 2), (0, 3)],
            BlockType::TetroO => &[(0, 0), (0, 1), (1, 0), (1, 1)],
            BlockType::TetroT => &[(0, 0), (0, 1), (0, 2), (1, 1)],
            BlockType::TetroL => &[(0, 0), (1, 0), (2, 0), (2, 1)],
            BlockType::TetroS => &[(0, 1), (0, 2), (1, 0), (1, 1)],
            BlockType::PentoF => &[(0, 1), (0, 2), (1, 0), (1, 1), (2, 1)],
            BlockType::PentoI => &[(0, 0), (0, 1), (0, 2), (0, 3), (0, 4)],
            BlockType::PentoL => &[(0, 0), (1, 0), (2, 0), (3, 0), (3, 1)],
            BlockType::PentoN => &[(0, 0), (1, 0), (1, 1), (2, 1), (3, 1)],
            BlockType::PentoP => &[(0, 0), (0, 1), (1, 0), (1, 1), (2, 0)],
            BlockType::PentoT => &[(0, 0), (0, 1), (0, 2), (1, 1), (2, 1)],
            BlockType::PentoU => &[(0, 0), (0, 2), (1, 0), (1, 1), (1, 2)],
            BlockType::PentoV => &[(0, 0), (1, 0), (2, 0), (2, 1), (2, 2)],
            BlockType::PentoW => &[(0, 0), (1, 0), (1, 1), (2, 1), (2, 2)],
            BlockType::PentoX => &[(0, 1), (1, 0), (1, 1), (1, 2), (2, 1)],
            BlockType::PentoY => &[(0, 1), (1, 0), (1, 1), (2, 1), (3, 1)],
            BlockType::PentoZ => &[(0, 0), (0, 1), (1, 1), (2, 1), (2, 2)],
        }
    }

    /// Cell count of the block; this is also its placement score.
    pub fn score(self) -> i32 {
        self.cells().len() as i32
    }
}

/// Allowed rotations, in degrees clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    R0,
    R90,
    R180,
    R270,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [Rotation::R0, Rotation::R90, Rotation::R180, Rotation::R270];

    pub fn from_degrees(deg: i32) -> Option<Rotation> {
        match deg {
            0 => Some(Rotation::R0),
            90 => Some(Rotation::R90),
            180 => Some(Rotation::R180),
            270 => Some(Rotation::R270),
            _ => None,
        }
    }

    pub fn degrees(self) -> i32 {
        match self {
            Rotation::R0 => 0,
            Rotation::R90 => 90,
            Rotation::R180 => 180,
            Rotation::R270 => 270,
        }
    }
}

/// Allowed flips. A horizontal flip combined with the four rotations covers
/// all eight dihedral orientations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flip {
    None,
    Horizontal,
}

impl Flip {
    pub const ALL: [Flip; 2] = [Flip::None, Flip::Horizontal];

    pub fn from_code(code: i32) -> Option<Flip> {
        match code {
            0 => Some(Flip::None),
            1 => Some(Flip::Horizontal),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Flip::None => 0,
            Flip::Horizontal => 1,
        }
    }
}

/// Derive the oriented footprint of a block: flip first, then rotate, then
/// normalize so the minimum row/col are zero.
pub fn oriented_cells(block: BlockType, rotation: Rotation, flip: Flip) -> Footprint {
    let mut cells: Footprint = block
        .cells()
        .iter()
        .map(|&(r, c)| {
            let c = match flip {
                Flip::None => c,
                Flip::Horizontal => -c,
            };
            match rotation {
                Rotation::R0 => (r, c),
                Rotation::R90 => (c, -r),
                Rotation::R180 => (-r, -c),
                Rotation::R270 => (-c, r),
            }
        })
        .collect();

    let min_r = cells.iter().map(|&(r, _)| r).min().unwrap_or(0);
    let min_c = cells.iter().map(|&(_, c)| c).min().unwrap_or(0);
    for cell in &mut cells {
        cell.0 -= min_r;
        cell.1 -= min_c;
    }
    cells.sort_unstable();
    cells
}

/// Absolute board cells covered by a placement anchored at (row, col).
pub fn footprint_at(
    block: BlockType,
    row: i32,
    col: i32,
    rotation: Rotation,
    flip: Flip,
) -> Footprint {
    oriented_cells(block, rotation, flip)
        .into_iter()
        .map(|(r, c)| (row + r, col + c))
        .collect()
}
