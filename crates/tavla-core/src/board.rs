use std::ops::{Index, IndexMut};

use thiserror::Error;

use crate::types::Variant;

/// Bar index in a side's point array.
pub const BAR: usize = 24;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BoardError {
    #[error("more than {max} chequers for one player")]
    TooManyChequers { max: u8 },
    #[error("point {point} occupied by both players")]
    SharedPoint { point: usize },
    #[error("both players on the bar against closed boards")]
    BothClosedOut,
}

/// A backgammon position, always stored from the perspective of the player
/// on roll: `board[1]` is the player on roll, `board[0]` the opponent.
/// Each side's points run from its ace point (index 0) to the opponent's
/// ace point (index 23); index 24 is the bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Board {
    sides: [[u8; 25]; 2],
}

impl Index<usize> for Board {
    type Output = [u8; 25];

    fn index(&self, side: usize) -> &[u8; 25] {
        &self.sides[side]
    }
}

impl IndexMut<usize> for Board {
    fn index_mut(&mut self, side: usize) -> &mut [u8; 25] {
        &mut self.sides[side]
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::starting(Variant::Standard)
    }
}

impl Board {
    pub const fn empty() -> Self {
        Self {
            sides: [[0; 25]; 2],
        }
    }

    pub const fn from_sides(sides: [[u8; 25]; 2]) -> Self {
        Self { sides }
    }

    pub const fn sides(&self) -> &[[u8; 25]; 2] {
        &self.sides
    }

    /// The starting position of the given variant.
    pub fn starting(variant: Variant) -> Self {
        let mut board = Self::empty();

        if variant.is_hypergammon() {
            for i in 0..usize::from(variant.chequers()) {
                board.sides[0][23 - i] = 1;
                board.sides[1][23 - i] = 1;
            }
            return board;
        }

        let point_men = if variant == Variant::Nackgammon { 4 } else { 5 };
        for side in &mut board.sides {
            side[5] = point_men;
            side[12] = point_men;
            side[7] = 3;
            side[23] = 2;
            if variant == Variant::Nackgammon {
                side[22] = 2;
            }
        }
        board
    }

    /// The same position seen from the opponent's perspective.
    pub fn swapped(&self) -> Self {
        Self {
            sides: [self.sides[1], self.sides[0]],
        }
    }

    pub fn swap_sides(&mut self) {
        self.sides.swap(0, 1);
    }

    /// Pip counts as `(opponent, player on roll)`. Chequers on the bar
    /// count 25 pips.
    pub fn pip_count(&self) -> (u32, u32) {
        let mut pips = [0u32; 2];
        for side in 0..2 {
            for (i, &n) in self.sides[side].iter().enumerate() {
                pips[side] += u32::from(n) * (i as u32 + 1);
            }
        }
        (pips[0], pips[1])
    }

    /// Total chequers a side still has in play, bar included.
    pub fn chequers_on_board(&self, side: usize) -> u32 {
        self.sides[side].iter().map(|&n| u32::from(n)).sum()
    }

    /// Index of the side's rearmost chequer, or `None` if all are off.
    pub fn back_chequer(&self, side: usize) -> Option<usize> {
        (0..25).rev().find(|&i| self.sides[side][i] > 0)
    }

    /// Validates the position: at most `max` chequers per side, no point
    /// held by both players, and not both players stuck on the bar behind
    /// closed boards.
    pub fn check_position(&self, max: u8) -> Result<(), BoardError> {
        for side in 0..2 {
            if self.chequers_on_board(side) > u32::from(max) {
                return Err(BoardError::TooManyChequers { max });
            }
        }

        for i in 0..24 {
            if self.sides[0][i] > 0 && self.sides[1][23 - i] > 0 {
                return Err(BoardError::SharedPoint { point: i });
            }
        }

        for i in 0..6 {
            if self.sides[0][i] < 2 || self.sides[1][i] < 2 {
                return Ok(());
            }
        }
        if self.sides[0][BAR] == 0 || self.sides[1][BAR] == 0 {
            return Ok(());
        }
        Err(BoardError::BothClosedOut)
    }

    /// Repairs an arbitrary chequer layout into a legal one: drops chequers
    /// beyond the fifteenth and clears points held by both players in the
    /// second player's favour.
    pub fn closest_legal(&mut self) {
        for side in 0..2 {
            let mut left = 15u8;
            for point in self.sides[side].iter_mut() {
                if *point <= left {
                    left -= *point;
                } else {
                    *point = left;
                    left = 0;
                }
            }
        }

        for i in 0..24 {
            if self.sides[0][i] > 0 {
                self.sides[1][23 - i] = 0;
            }
        }
    }
}
