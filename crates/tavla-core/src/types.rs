use serde::{Deserialize, Serialize};

/// A match player. Boards are always stored from the perspective of the
/// player on roll, so most board-level code never needs this; it matters
/// for cube ownership, match scores and rollout bookkeeping.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Player {
    White = 0,
    Black = 1,
}

impl Player {
    pub const fn other(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::White),
            1 => Some(Self::Black),
            _ => None,
        }
    }
}

/// Game variant. The hypergammon variants play with 1-3 chequers per side
/// starting on the three rearmost points.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    Standard = 0,
    Nackgammon = 1,
    Hypergammon1 = 2,
    Hypergammon2 = 3,
    Hypergammon3 = 4,
}

impl Variant {
    /// Chequers per side for this variant.
    pub const fn chequers(self) -> u8 {
        match self {
            Self::Standard | Self::Nackgammon => 15,
            Self::Hypergammon1 => 1,
            Self::Hypergammon2 => 2,
            Self::Hypergammon3 => 3,
        }
    }

    pub const fn is_hypergammon(self) -> bool {
        matches!(self, Self::Hypergammon1 | Self::Hypergammon2 | Self::Hypergammon3)
    }
}

/// One roll of the dice. Order is irrelevant for play but preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dice(pub u8, pub u8);

impl Dice {
    pub const fn is_double(self) -> bool {
        self.0 == self.1
    }

    pub const fn pips(self) -> u32 {
        if self.is_double() {
            4 * self.0 as u32
        } else {
            (self.0 + self.1) as u32
        }
    }
}

/// The 21 distinct dice rolls with their weight out of 36.
pub const ALL_ROLLS: [(u8, u8, u8); 21] = [
    (1, 1, 1),
    (2, 1, 2),
    (2, 2, 1),
    (3, 1, 2),
    (3, 2, 2),
    (3, 3, 1),
    (4, 1, 2),
    (4, 2, 2),
    (4, 3, 2),
    (4, 4, 1),
    (5, 1, 2),
    (5, 2, 2),
    (5, 3, 2),
    (5, 4, 2),
    (5, 5, 1),
    (6, 1, 2),
    (6, 2, 2),
    (6, 3, 2),
    (6, 4, 2),
    (6, 5, 2),
    (6, 6, 1),
];

/// Indices into a cubeless evaluation vector.
pub const OUTPUT_WIN: usize = 0;
pub const OUTPUT_WINGAMMON: usize = 1;
pub const OUTPUT_WINBACKGAMMON: usize = 2;
pub const OUTPUT_LOSEGAMMON: usize = 3;
pub const OUTPUT_LOSEBACKGAMMON: usize = 4;
pub const NUM_OUTPUTS: usize = 5;

/// Extended vector used by rollouts and move lists: the five probabilities
/// plus cubeless and cubeful equity.
pub const OUTPUT_EQUITY: usize = 5;
pub const OUTPUT_CUBEFUL_EQUITY: usize = 6;
pub const NUM_ROLLOUT_OUTPUTS: usize = 7;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roll_weights_sum_to_36() {
        let total: u32 = ALL_ROLLS.iter().map(|&(_, _, w)| w as u32).sum();
        assert_eq!(total, 36);
    }

    #[test]
    fn double_pips() {
        assert_eq!(Dice(3, 3).pips(), 12);
        assert_eq!(Dice(6, 5).pips(), 11);
        assert!(!Dice(6, 5).is_double());
    }

    #[test]
    fn player_round_trip() {
        assert_eq!(Player::from_index(Player::Black.index()), Some(Player::Black));
        assert_eq!(Player::White.other(), Player::Black);
        assert_eq!(Player::from_index(2), None);
    }

    #[test]
    fn hypergammon_chequer_counts() {
        assert_eq!(Variant::Hypergammon3.chequers(), 3);
        assert_eq!(Variant::Nackgammon.chequers(), 15);
        assert!(Variant::Hypergammon1.is_hypergammon());
        assert!(!Variant::Standard.is_hypergammon());
    }
}
