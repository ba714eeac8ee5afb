//! Position classification: picks the evaluator responsible for a board.

use tavla_core::{Board, Variant};

use crate::bearoff::BearoffSet;

/// Position classes, ordered from simplest to hardest to evaluate.
/// Everything up to [`PositionClass::BearoffOneSidedWide`] admits a
/// closed-form (or tabulated) evaluation; the classes above require the
/// neural evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PositionClass {
    /// The game is already over.
    Over = 0,
    Hypergammon1,
    Hypergammon2,
    Hypergammon3,
    /// Covered by the standard two-sided cubeful table.
    BearoffTwoSided,
    /// Covered by a wider exact two-sided table.
    BearoffTwoSidedWide,
    /// Covered by the standard one-sided table.
    BearoffOneSided,
    /// Covered by a wider exact one-sided table.
    BearoffOneSidedWide,
    Race,
    Crashed,
    Contact,
}

impl PositionClass {
    /// Exact two-sided cubeful equities are available for this class.
    pub fn has_exact_cubeful(self) -> bool {
        matches!(
            self,
            Self::BearoffTwoSided
                | Self::BearoffTwoSidedWide
                | Self::Hypergammon1
                | Self::Hypergammon2
                | Self::Hypergammon3
        )
    }

    /// The class is evaluated by a neural network rather than a table.
    pub fn is_neural(self) -> bool {
        self >= Self::Race
    }
}

/// Classifies a board. Pure function of the board contents, the variant
/// and which bearoff tables are loaded.
pub fn classify(board: &Board, variant: Variant, bearoffs: &BearoffSet) -> PositionClass {
    let (n_opp_back, n_back) = match (board.back_chequer(0), board.back_chequer(1)) {
        (Some(o), Some(b)) => (o, b),
        _ => return PositionClass::Over,
    };

    // hypergammon variants always use their dedicated tables
    match variant {
        Variant::Hypergammon1 => return PositionClass::Hypergammon1,
        Variant::Hypergammon2 => return PositionClass::Hypergammon2,
        Variant::Hypergammon3 => return PositionClass::Hypergammon3,
        Variant::Standard | Variant::Nackgammon => {}
    }

    if n_back + n_opp_back > 22 {
        if crashed(board) {
            PositionClass::Crashed
        } else {
            PositionClass::Contact
        }
    } else {
        if let Some(db) = &bearoffs.two_sided {
            if db.is_bearoff(board) {
                return PositionClass::BearoffTwoSided;
            }
        }
        if let Some(db) = &bearoffs.two_sided_wide {
            if db.is_bearoff(board) {
                return PositionClass::BearoffTwoSidedWide;
            }
        }
        if bearoffs.one_sided.is_bearoff(board) {
            return PositionClass::BearoffOneSided;
        }
        if let Some(db) = &bearoffs.one_sided_wide {
            if db.is_bearoff(board) {
                return PositionClass::BearoffOneSidedWide;
            }
        }
        PositionClass::Race
    }
}

/// A contact position where one side is down to a handful of chequers, or
/// has most of its remaining men buried on the ace and deuce points. Such
/// positions get the dedicated crashed network.
fn crashed(board: &Board) -> bool {
    const N: i64 = 6;

    for side in 0..2 {
        let tot = i64::from(board.chequers_on_board(side));
        let ace = i64::from(board[side][0]);
        let deuce = i64::from(board[side][1]);

        if tot <= N {
            return true;
        }
        if ace > 1 {
            if tot <= N + ace {
                return true;
            }
            if deuce > 1 && 1 + tot - (ace + deuce) <= N {
                return true;
            }
        } else if tot <= N + deuce - 1 {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bearoff::BearoffDb;

    fn heuristic_set() -> BearoffSet {
        BearoffSet::heuristic_only()
    }

    #[test]
    fn starting_position_is_contact() {
        let set = heuristic_set();
        let board = Board::starting(Variant::Standard);
        assert_eq!(classify(&board, Variant::Standard, &set), PositionClass::Contact);
        assert_eq!(
            classify(&board, Variant::Nackgammon, &set),
            PositionClass::Contact
        );
    }

    #[test]
    fn empty_board_is_over() {
        let set = heuristic_set();
        let mut board = Board::empty();
        assert_eq!(classify(&board, Variant::Standard, &set), PositionClass::Over);

        // one side still playing is over too
        board[1][3] = 2;
        assert_eq!(classify(&board, Variant::Standard, &set), PositionClass::Over);
    }

    #[test]
    fn hypergammon_variant_forces_its_class() {
        let set = heuristic_set();
        let board = Board::starting(Variant::Hypergammon3);
        assert_eq!(
            classify(&board, Variant::Hypergammon3, &set),
            PositionClass::Hypergammon3
        );
        // the class holds even in pure-race shapes
        let mut race = Board::empty();
        race[0][2] = 1;
        race[1][3] = 1;
        assert_eq!(
            classify(&race, Variant::Hypergammon1, &set),
            PositionClass::Hypergammon1
        );
    }

    #[test]
    fn broken_contact_is_race_or_bearoff() {
        let set = heuristic_set();

        // both sides past each other, outside the home boards
        let mut board = Board::empty();
        board[0][10] = 15;
        board[1][10] = 15;
        assert_eq!(classify(&board, Variant::Standard, &set), PositionClass::Race);

        // all men home on both sides: one-sided table applies
        let mut board = Board::empty();
        board[0][5] = 15;
        board[1][5] = 15;
        assert_eq!(
            classify(&board, Variant::Standard, &set),
            PositionClass::BearoffOneSided
        );
    }

    #[test]
    fn two_sided_table_takes_precedence() {
        let mut set = heuristic_set();
        // a second heuristic table standing in for the two-sided one would
        // be wrong, so fake precedence with the one-sided table itself:
        // classify only consults is_bearoff()
        set.two_sided = Some(BearoffDb::heuristic());

        let mut board = Board::empty();
        board[0][5] = 15;
        board[1][5] = 15;
        assert_eq!(
            classify(&board, Variant::Standard, &set),
            PositionClass::BearoffTwoSided
        );
    }

    #[test]
    fn few_chequers_in_contact_is_crashed() {
        let set = heuristic_set();
        let mut board = Board::empty();
        board[1][23] = 2;
        board[1][3] = 3;
        board[0][5] = 5;
        board[0][12] = 5;
        board[0][18] = 5;
        // back chequers still engaged
        assert_eq!(classify(&board, Variant::Standard, &set), PositionClass::Crashed);
    }

    #[test]
    fn ace_point_stack_is_crashed() {
        let set = heuristic_set();
        let mut board = Board::empty();
        // side 0 buried on its ace point: tot 15 <= 6 + 10
        board[0][0] = 10;
        board[0][23] = 5;
        board[1][5] = 5;
        board[1][12] = 8;
        board[1][22] = 2;
        assert_eq!(classify(&board, Variant::Standard, &set), PositionClass::Crashed);
    }

    #[test]
    fn full_engagement_is_not_crashed() {
        let set = heuristic_set();
        let mut board = Board::starting(Variant::Standard);
        // still 15 chequers each, spread out
        board[1][23] = 2;
        assert_eq!(classify(&board, Variant::Standard, &set), PositionClass::Contact);
    }

    #[test]
    fn class_order_separates_exact_from_neural() {
        assert!(PositionClass::Over < PositionClass::BearoffTwoSided);
        assert!(PositionClass::BearoffOneSidedWide < PositionClass::Race);
        assert!(PositionClass::Race < PositionClass::Crashed);
        assert!(PositionClass::Crashed < PositionClass::Contact);

        assert!(PositionClass::BearoffTwoSided.has_exact_cubeful());
        assert!(PositionClass::Hypergammon2.has_exact_cubeful());
        assert!(!PositionClass::BearoffOneSided.has_exact_cubeful());
        assert!(PositionClass::Contact.is_neural());
        assert!(!PositionClass::BearoffOneSided.is_neural());
    }
}
