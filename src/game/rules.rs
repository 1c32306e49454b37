//! Placement legality, application, and game-over detection.
//!
//! All functions here are pure over a [`Board`] and never panic; malformed
//! placements (out of range rotation codes are rejected at the parse layer)
//! simply fail `can_place`.

use std::collections::BTreeSet;

use super::block::{footprint_at, BlockType, Flip, Rotation};
use super::board::{Board, PlayerColor, BOARD_SIZE};

/// One concrete move: a block in a specific orientation at a board anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPlacement {
    pub block: BlockType,
    pub row: i32,
    pub col: i32,
    pub rotation: Rotation,
    pub flip: Flip,
    pub player: PlayerColor,
}

const EDGE_OFFSETS: [(i32, i32); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
const CORNER_OFFSETS: [(i32, i32); 4] = [(-1, -1), (-1, 1), (1, -1), (1, 1)];

/// Blokus legality:
/// every footprint cell in bounds and empty; no footprint cell edge-adjacent
/// to the player's own cells; at least one footprint cell corner-adjacent to
/// the player's own cells, or, on the player's first move, covering the
/// player's starting corner.
pub fn can_place(board: &Board, placement: &BlockPlacement) -> bool {
    let cells = footprint_at(
        placement.block,
        placement.row,
        placement.col,
        placement.rotation,
        placement.flip,
    );

    for &(r, c) in &cells {
        if !Board::in_bounds(r, c) || !board.is_empty(r, c) {
            return false;
        }
    }

    for &(r, c) in &cells {
        for &(dr, dc) in &EDGE_OFFSETS {
            if board.owner(r + dr, c + dc) == Some(placement.player) {
                return false;
            }
        }
    }

    if board.has_any(placement.player) {
        cells.iter().any(|&(r, c)| {
            CORNER_OFFSETS
                .iter()
                .any(|&(dr, dc)| board.owner(r + dr, c + dc) == Some(placement.player))
        })
    } else {
        let corner = placement.player.starting_corner();
        cells.contains(&corner)
    }
}

/// Write the footprint to the board. Caller must have checked `can_place`.
pub fn apply(board: &mut Board, placement: &BlockPlacement) {
    let cells = footprint_at(
        placement.block,
        placement.row,
        placement.col,
        placement.rotation,
        placement.flip,
    );
    for (r, c) in cells {
        board.set_owner(r, c, placement.player);
    }
}

/// Placement score is the block's cell count.
pub fn score_of(block: BlockType) -> i32 {
    block.score()
}

/// True if any (type, rotation, flip, position) combination over the
/// player's remaining blocks passes `can_place`.
pub fn has_any_legal_move(
    board: &Board,
    player: PlayerColor,
    remaining: &BTreeSet<BlockType>,
) -> bool {
    for &block in remaining {
        for rotation in Rotation::ALL {
            for flip in Flip::ALL {
                for row in 0..BOARD_SIZE as i32 {
                    for col in 0..BOARD_SIZE as i32 {
                        let placement = BlockPlacement {
                            block,
                            row,
                            col,
                            rotation,
                            flip,
                            player,
                        };
                        if can_place(board, &placement) {
                            return true;
                        }
                    }
                }
            }
        }
    }
    false
}

/// The game is over when no seated player has a legal move left.
pub fn is_game_over(
    board: &Board,
    players: &[(PlayerColor, BTreeSet<BlockType>)],
) -> bool {
    players
        .iter()
        .all(|(color, remaining)| !has_any_legal_move(board, *color, remaining))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn full_set() -> BTreeSet<BlockType> {
        BlockType::ALL.iter().copied().collect()
    }

    fn placement(
        block: BlockType,
        row: i32,
        col: i32,
        rotation: Rotation,
        flip: Flip,
        player: PlayerColor,
    ) -> BlockPlacement {
        BlockPlacement {
            block,
            row,
            col,
            rotation,
            flip,
            player,
        }
    }

    #[test]
    fn test_first_move_must_cover_starting_corner() {
        let board = Board::new();
        let on_corner = placement(
            BlockType::Single,
            0,
            0,
            Rotation::R0,
            Flip::None,
            PlayerColor::Blue,
        );
        let off_corner = placement(
            BlockType::Single,
            5,
            5,
            Rotation::R0,
            Flip::None,
            PlayerColor::Blue,
        );
        assert!(can_place(&board, &on_corner));
        assert!(!can_place(&board, &off_corner));
    }

    #[test]
    fn test_first_move_any_footprint_cell_may_cover_corner() {
        let board = Board::new();
        // Yellow's corner is (0,19); anchor the trio so its last cell lands there.
        let pl = placement(
            BlockType::TrioLine,
            0,
            17,
            Rotation::R0,
            Flip::None,
            PlayerColor::Yellow,
        );
        assert!(can_place(&board, &pl));
    }

    #[test]
    fn test_occupied_cell_rejected() {
        let mut board = Board::new();
        board.set_owner(0, 0, PlayerColor::Yellow);
        let pl = placement(
            BlockType::Single,
            0,
            0,
            Rotation::R0,
            Flip::None,
            PlayerColor::Blue,
        );
        assert!(!can_place(&board, &pl));
    }

    #[test]
    fn test_edge_contact_with_own_color_rejected() {
        let mut board = Board::new();
        let first = placement(
            BlockType::Single,
            0,
            0,
            Rotation::R0,
            Flip::None,
            PlayerColor::Blue,
        );
        assert!(can_place(&board, &first));
        apply(&mut board, &first);

        // (0,1) shares an edge with (0,0).
        let touching = placement(
            BlockType::Single,
            0,
            1,
            Rotation::R0,
            Flip::None,
            PlayerColor::Blue,
        );
        assert!(!can_place(&board, &touching));

        // (1,1) touches only at the corner.
        let diagonal = placement(
            BlockType::Single,
            1,
            1,
            Rotation::R0,
            Flip::None,
            PlayerColor::Blue,
        );
        assert!(can_place(&board, &diagonal));
    }

    #[test]
    fn test_second_move_requires_corner_touch() {
        let mut board = Board::new();
        apply(
            &mut board,
            &placement(
                BlockType::Single,
                0,
                0,
                Rotation::R0,
                Flip::None,
                PlayerColor::Blue,
            ),
        );
        // Far away, no contact at all.
        let floating = placement(
            BlockType::Single,
            10,
            10,
            Rotation::R0,
            Flip::None,
            PlayerColor::Blue,
        );
        assert!(!can_place(&board, &floating));
    }

    #[test]
    fn test_edge_contact_with_other_color_allowed() {
        let mut board = Board::new();
        apply(
            &mut board,
            &placement(
                BlockType::Single,
                0,
                0,
                Rotation::R0,
                Flip::None,
                PlayerColor::Blue,
            ),
        );
        // Yellow's first move covering its own corner; blue at (0,0) is
        // irrelevant to yellow's edge rule.
        apply(
            &mut board,
            &placement(
                BlockType::Single,
                0,
                19,
                Rotation::R0,
                Flip::None,
                PlayerColor::Yellow,
            ),
        );
        // Blue expanding diagonally to (1,1), edge-adjacent to nothing blue.
        let pl = placement(
            BlockType::Domino,
            1,
            1,
            Rotation::R0,
            Flip::None,
            PlayerColor::Blue,
        );
        assert!(can_place(&board, &pl));
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let board = Board::new();
        let pl = placement(
            BlockType::PentoI,
            0,
            16,
            Rotation::R0,
            Flip::None,
            PlayerColor::Yellow,
        );
        // Cells run (0,16)..(0,20); the last is out of bounds.
        assert!(!can_place(&board, &pl));
    }

    #[test]
    fn test_apply_writes_footprint() {
        let mut board = Board::new();
        let pl = placement(
            BlockType::TrioAngle,
            0,
            0,
            Rotation::R0,
            Flip::None,
            PlayerColor::Blue,
        );
        apply(&mut board, &pl);
        assert_eq!(board.owner(0, 0), Some(PlayerColor::Blue));
        assert_eq!(board.owner(0, 1), Some(PlayerColor::Blue));
        assert_eq!(board.owner(1, 0), Some(PlayerColor::Blue));
        assert_eq!(board.occupied_count(), 3);
    }

    #[test]
    fn test_has_any_legal_move_on_empty_board() {
        let board = Board::new();
        for color in PlayerColor::ALL {
            assert!(has_any_legal_move(&board, color, &full_set()));
        }
        assert!(!has_any_legal_move(&board, PlayerColor::Blue, &BTreeSet::new()));
    }

    #[test]
    fn test_stuck_player_detected() {
        // Wall blue into its corner: blue owns (0,0), yellow owns the whole
        // diagonal neighborhood so nothing blue can ever touch a blue corner.
        let mut board = Board::new();
        board.set_owner(0, 0, PlayerColor::Blue);
        board.set_owner(1, 1, PlayerColor::Yellow);
        board.set_owner(0, 1, PlayerColor::Yellow);
        board.set_owner(1, 0, PlayerColor::Yellow);
        let mut remaining = full_set();
        remaining.remove(&BlockType::Single);
        assert!(!has_any_legal_move(&board, PlayerColor::Blue, &remaining));
    }

    #[test]
    fn test_game_over_requires_all_stuck() {
        let board = Board::new();
        let players = vec![
            (PlayerColor::Blue, full_set()),
            (PlayerColor::Yellow, full_set()),
        ];
        assert!(!is_game_over(&board, &players));

        let empty_handed = vec![
            (PlayerColor::Blue, BTreeSet::new()),
            (PlayerColor::Yellow, BTreeSet::new()),
        ];
        assert!(is_game_over(&board, &empty_handed));
    }

    #[test]
    fn test_can_place_is_repeatable_without_apply() {
        let board = Board::new();
        let pl = placement(
            BlockType::Single,
            0,
            0,
            Rotation::R0,
            Flip::None,
            PlayerColor::Blue,
        );
        assert!(can_place(&board, &pl));
        assert!(can_place(&board, &pl));
    }

    proptest! {
        /// A placement that passes `can_place` never overlaps existing
        /// cells, and applying it adds exactly the block's cell count.
        #[test]
        fn prop_apply_adds_block_size(
            block_id in 1u8..=21,
            row in 0i32..20,
            col in 0i32..20,
            rot in prop::sample::select(vec![0, 90, 180, 270]),
            flip in 0i32..=1,
        ) {
            let block = BlockType::from_id(block_id).unwrap();
            let placement = BlockPlacement {
                block,
                row,
                col,
                rotation: Rotation::from_degrees(rot).unwrap(),
                flip: Flip::from_code(flip).unwrap(),
                player: PlayerColor::Blue,
            };
            let mut board = Board::new();
            if can_place(&board, &placement) {
                let before = board.occupied_count();
                apply(&mut board, &placement);
                prop_assert_eq!(
                    board.occupied_count(),
                    before + block.cells().len()
                );
            }
        }

        /// Board cells only ever belong to colors that placed there.
        #[test]
        fn prop_owner_is_placing_player(
            block_id in 1u8..=21,
            rot in prop::sample::select(vec![0, 90, 180, 270]),
            flip in 0i32..=1,
        ) {
            let block = BlockType::from_id(block_id).unwrap();
            let placement = BlockPlacement {
                block,
                row: 0,
                col: 0,
                rotation: Rotation::from_degrees(rot).unwrap(),
                flip: Flip::from_code(flip).unwrap(),
                player: PlayerColor::Blue,
            };
            let mut board = Board::new();
            if can_place(&board, &placement) {
                apply(&mut board, &placement);
                for r in 0..20 {
                    for c in 0..20 {
                        let owner = board.owner(r, c);
                        prop_assert!(owner.is_none() || owner == Some(PlayerColor::Blue));
                    }
                }
            }
        }
    }
}
