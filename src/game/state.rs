//! Per-game state: turn sequencing, scores, and remaining blocks.
//!
//! The room owns one `GameState` per running game and serializes access to
//! it behind the room mutex; everything in here is synchronous and pure.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use thiserror::Error;

use super::block::BlockType;
use super::board::{Board, PlayerColor};
use super::rules::{self, BlockPlacement};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlacementError {
    #[error("not your turn")]
    NotYourTurn,
    #[error("invalid move")]
    IllegalMove,
    #[error("block already used")]
    BlockAlreadyUsed,
}

/// Outcome of advancing the turn pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnAdvance {
    /// Play continues with this color; lists any colors that were skipped
    /// because they had no legal move.
    Next {
        player: PlayerColor,
        skipped: Vec<PlayerColor>,
    },
    /// No seated player can take a turn; the game is over.
    NoOneCanMove,
}

#[derive(Debug, Clone)]
pub struct GameState {
    board: Board,
    turn_order: Vec<PlayerColor>,
    current: usize,
    turn_number: u32,
    scores: BTreeMap<PlayerColor, i32>,
    remaining: BTreeMap<PlayerColor, BTreeSet<BlockType>>,
}

impl GameState {
    /// Start a game over the seated colors. Turn order is the canonical
    /// sequence filtered to the seats actually taken.
    pub fn new(seated: &[PlayerColor]) -> Self {
        let turn_order: Vec<PlayerColor> = PlayerColor::ALL
            .iter()
            .copied()
            .filter(|c| seated.contains(c))
            .collect();
        let scores = turn_order.iter().map(|&c| (c, 0)).collect();
        let remaining = turn_order
            .iter()
            .map(|&c| (c, BlockType::ALL.iter().copied().collect()))
            .collect();
        Self {
            board: Board::new(),
            turn_order,
            current: 0,
            turn_number: 1,
            scores,
            remaining,
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn turn_order(&self) -> &[PlayerColor] {
        &self.turn_order
    }

    pub fn current_player(&self) -> Option<PlayerColor> {
        self.turn_order.get(self.current).copied()
    }

    pub fn turn_number(&self) -> u32 {
        self.turn_number
    }

    pub fn score(&self, color: PlayerColor) -> i32 {
        self.scores.get(&color).copied().unwrap_or(0)
    }

    pub fn remaining_count(&self, color: PlayerColor) -> usize {
        self.remaining.get(&color).map_or(0, BTreeSet::len)
    }

    pub fn remaining_blocks(&self, color: PlayerColor) -> BTreeSet<BlockType> {
        self.remaining.get(&color).cloned().unwrap_or_default()
    }

    /// Validate and apply a placement for the current player. Returns the
    /// score gained. Does not advance the turn; the room drives that so it
    /// can interleave broadcasts.
    pub fn place(&mut self, placement: &BlockPlacement) -> Result<i32, PlacementError> {
        if self.current_player() != Some(placement.player) {
            return Err(PlacementError::NotYourTurn);
        }
        let remaining = self
            .remaining
            .get(&placement.player)
            .ok_or(PlacementError::NotYourTurn)?;
        if !remaining.contains(&placement.block) {
            return Err(PlacementError::BlockAlreadyUsed);
        }
        if !rules::can_place(&self.board, placement) {
            return Err(PlacementError::IllegalMove);
        }

        rules::apply(&mut self.board, placement);
        let gained = rules::score_of(placement.block);
        *self.scores.entry(placement.player).or_insert(0) += gained;
        if let Some(remaining) = self.remaining.get_mut(&placement.player) {
            remaining.remove(&placement.block);
        }
        Ok(gained)
    }

    pub fn has_legal_move(&self, color: PlayerColor) -> bool {
        self.remaining
            .get(&color)
            .is_some_and(|remaining| rules::has_any_legal_move(&self.board, color, remaining))
    }

    /// Move the turn pointer to the next color that can act. `blocked`
    /// reports colors the room wants auto-skipped (AFK seats). Increments
    /// the turn number when play continues.
    pub fn advance_turn(&mut self, blocked: impl Fn(PlayerColor) -> bool) -> TurnAdvance {
        if self.turn_order.is_empty() {
            return TurnAdvance::NoOneCanMove;
        }

        let mut skipped = Vec::new();
        for step in 1..=self.turn_order.len() {
            let idx = (self.current + step) % self.turn_order.len();
            let candidate = self.turn_order[idx];
            if blocked(candidate) {
                continue;
            }
            if !self.has_legal_move(candidate) {
                skipped.push(candidate);
                continue;
            }
            self.current = idx;
            self.turn_number += 1;
            return TurnAdvance::Next {
                player: candidate,
                skipped,
            };
        }
        TurnAdvance::NoOneCanMove
    }

    /// True once no seated player has a legal move, or everyone is out of
    /// blocks.
    pub fn is_over(&self) -> bool {
        let players: Vec<_> = self
            .turn_order
            .iter()
            .map(|&c| (c, self.remaining_blocks(c)))
            .collect();
        players.iter().all(|(_, r)| r.is_empty()) || rules::is_game_over(&self.board, &players)
    }

    /// Final scores with end-of-game bonuses. The bonuses only appear in
    /// the result message; the running scores are left untouched.
    pub fn final_scores(&self) -> BTreeMap<PlayerColor, i32> {
        self.turn_order
            .iter()
            .map(|&color| {
                let base = self.score(color);
                let left = self.remaining_count(color) as i32;
                let bonus = if left == 0 {
                    15
                } else if left <= 3 {
                    5
                } else {
                    0
                };
                (color, base + bonus - left)
            })
            .collect()
    }

    /// Colors with the maximum final score; ties produce multiple winners.
    pub fn winners(&self) -> Vec<PlayerColor> {
        let finals = self.final_scores();
        let best = finals.values().copied().max().unwrap_or(0);
        finals
            .into_iter()
            .filter(|&(_, score)| score == best)
            .map(|(color, _)| color)
            .collect()
    }

    /// Serializable snapshot for `GAME_STATE_UPDATE` payloads.
    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            current_player: self.current_player().map_or(0, PlayerColor::index),
            turn_number: self.turn_number,
            board: self.board.snapshot(),
            scores: self
                .turn_order
                .iter()
                .map(|&c| (c.index().to_string(), self.score(c)))
                .collect(),
            remaining_blocks: self
                .turn_order
                .iter()
                .map(|&c| (c.index().to_string(), self.remaining_count(c) as i32))
                .collect(),
        }
    }
}

/// Wire shape of a game-state update.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub current_player: i32,
    pub turn_number: u32,
    pub board: Vec<Vec<i32>>,
    pub scores: BTreeMap<String, i32>,
    pub remaining_blocks: BTreeMap<String, i32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::block::{Flip, Rotation};

    fn two_player_game() -> GameState {
        GameState::new(&[PlayerColor::Blue, PlayerColor::Yellow])
    }

    fn mv(
        block: BlockType,
        row: i32,
        col: i32,
        player: PlayerColor,
    ) -> BlockPlacement {
        BlockPlacement {
            block,
            row,
            col,
            rotation: Rotation::R0,
            flip: Flip::None,
            player,
        }
    }

    #[test]
    fn test_turn_order_is_canonical_filtered() {
        let game = GameState::new(&[PlayerColor::Green, PlayerColor::Blue, PlayerColor::Red]);
        assert_eq!(
            game.turn_order(),
            &[PlayerColor::Blue, PlayerColor::Red, PlayerColor::Green]
        );
        assert_eq!(game.current_player(), Some(PlayerColor::Blue));
        assert_eq!(game.turn_number(), 1);
    }

    #[test]
    fn test_place_rejects_out_of_turn() {
        let mut game = two_player_game();
        let err = game
            .place(&mv(BlockType::Single, 0, 19, PlayerColor::Yellow))
            .unwrap_err();
        assert_eq!(err, PlacementError::NotYourTurn);
    }

    #[test]
    fn test_place_scores_and_consumes_block() {
        let mut game = two_player_game();
        let gained = game
            .place(&mv(BlockType::Single, 0, 0, PlayerColor::Blue))
            .unwrap();
        assert_eq!(gained, 1);
        assert_eq!(game.score(PlayerColor::Blue), 1);
        assert_eq!(game.remaining_count(PlayerColor::Blue), 20);

        // Same block again is refused even where it would otherwise fit.
        let err = game
            .place(&mv(BlockType::Single, 0, 0, PlayerColor::Blue))
            .unwrap_err();
        assert_ne!(err, PlacementError::NotYourTurn);
    }

    #[test]
    fn test_place_rejects_illegal() {
        let mut game = two_player_game();
        let err = game
            .place(&mv(BlockType::Single, 5, 5, PlayerColor::Blue))
            .unwrap_err();
        assert_eq!(err, PlacementError::IllegalMove);
    }

    #[test]
    fn test_advance_cycles_players() {
        let mut game = two_player_game();
        game.place(&mv(BlockType::Single, 0, 0, PlayerColor::Blue))
            .unwrap();
        match game.advance_turn(|_| false) {
            TurnAdvance::Next { player, skipped } => {
                assert_eq!(player, PlayerColor::Yellow);
                assert!(skipped.is_empty());
            }
            other => panic!("unexpected advance: {other:?}"),
        }
        assert_eq!(game.turn_number(), 2);
    }

    #[test]
    fn test_advance_skips_blocked_players() {
        let mut game =
            GameState::new(&[PlayerColor::Blue, PlayerColor::Yellow, PlayerColor::Red]);
        match game.advance_turn(|c| c == PlayerColor::Yellow) {
            TurnAdvance::Next { player, .. } => assert_eq!(player, PlayerColor::Red),
            other => panic!("unexpected advance: {other:?}"),
        }
    }

    #[test]
    fn test_advance_with_everyone_blocked_ends_game() {
        let mut game = two_player_game();
        assert_eq!(game.advance_turn(|_| true), TurnAdvance::NoOneCanMove);
    }

    #[test]
    fn test_final_scores_apply_bonuses() {
        let mut game = two_player_game();
        game.place(&mv(BlockType::Single, 0, 0, PlayerColor::Blue))
            .unwrap();
        let finals = game.final_scores();
        // Blue: 1 point, 20 blocks left, no bonus: 1 - 20.
        assert_eq!(finals[&PlayerColor::Blue], 1 - 20);
        // Yellow placed nothing: 0 - 21.
        assert_eq!(finals[&PlayerColor::Yellow], -21);
        assert_eq!(game.winners(), vec![PlayerColor::Blue]);
    }

    #[test]
    fn test_tied_winners() {
        let game = two_player_game();
        let winners = game.winners();
        assert_eq!(
            winners,
            vec![PlayerColor::Blue, PlayerColor::Yellow],
            "identical scores tie"
        );
    }

    #[test]
    fn test_snapshot_fields() {
        let mut game = two_player_game();
        game.place(&mv(BlockType::Single, 0, 0, PlayerColor::Blue))
            .unwrap();
        let snap = game.snapshot();
        assert_eq!(snap.current_player, 1);
        assert_eq!(snap.turn_number, 1);
        assert_eq!(snap.board[0][0], 1);
        assert_eq!(snap.scores["1"], 1);
        assert_eq!(snap.remaining_blocks["1"], 20);
        let json = serde_json::to_value(&snap).unwrap();
        assert!(json.get("currentPlayer").is_some());
        assert!(json.get("turnNumber").is_some());
    }

    #[test]
    fn test_not_over_at_start() {
        let game = two_player_game();
        assert!(!game.is_over());
    }
}
