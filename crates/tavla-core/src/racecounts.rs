//! Over-the-board race formulas: Kleinman's winning-chance estimate and
//! the Keith and Thorp adjusted pip counts.

use crate::board::Board;

/// erf by the Abramowitz & Stegun 7.1.26 polynomial; the absolute error
/// stays below 1.5e-7, far inside what the Kleinman estimate needs.
fn erf(x: f32) -> f32 {
    const P: f32 = 0.327_591_1;
    const A1: f32 = 0.254_829_592;
    const A2: f32 = -0.284_496_736;
    const A3: f32 = 1.421_413_741;
    const A4: f32 = -1.453_152_027;
    const A5: f32 = 1.061_405_429;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + P * x);
    let poly = t * (A1 + t * (A2 + t * (A3 + t * (A4 + t * A5))));
    sign * (1.0 - poly * (-x * x).exp())
}

/// Kleinman's race estimate: the winning chance of the player on roll
/// from the two raw pip counts alone. Zero when the race is too short
/// for the model.
pub fn kleinman_count(pips_on_roll: u32, pips_not_on_roll: u32) -> f32 {
    let diff = pips_not_on_roll as f32 - pips_on_roll as f32;
    let sum = pips_not_on_roll + pips_on_roll;

    if sum > 4 {
        let k = (diff + 4.0) / (2.0 * ((sum - 4) as f32).sqrt());
        0.5 * (1.0 + erf(k))
    } else {
        0.0
    }
}

/// The Keith adjusted pip counts for both sides, indexed like the board
/// (`[1]` is the player on roll). Penalizes stacks on the low points and
/// gaps on the four through six points.
pub fn keith_count(board: &Board) -> [u32; 2] {
    let (pips_opp, pips_on_roll) = board.pip_count();
    let mut counts = [pips_opp, pips_on_roll];

    for (side, count) in counts.iter_mut().enumerate() {
        *count += (u32::from(board[side][0]).max(1) - 1) * 2;
        *count += u32::from(board[side][1]).max(1) - 1;
        *count += u32::from(board[side][2]).max(3) - 3;
        for x in 3..6 {
            if board[side][x] == 0 {
                *count += 1;
            }
        }
    }

    counts
}

/// Thorp counts for a race position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThorpCount {
    /// Adjusted count of the player on roll.
    pub leader: u32,
    /// Leader count inflated by 10% above 30.
    pub adjusted: f32,
    /// Adjusted count of the opponent.
    pub trailer: u32,
}

/// The Thorp adjusted pip counts: raw pips plus two per man left, plus
/// men on the ace point, minus covered home points.
pub fn thorp_count(board: &Board) -> ThorpCount {
    let (pips_opp, pips_on_roll) = board.pip_count();
    let pips = [pips_opp, pips_on_roll];

    let mut counts = [0u32; 2];
    for side in 0..2 {
        let men: u32 = board.chequers_on_board(side);
        let covered = board[side][..6].iter().filter(|&&n| n > 0).count() as u32;
        counts[side] = pips[side] + 2 * men + u32::from(board[side][0]) - covered;
    }

    let adjusted = if counts[1] > 30 {
        counts[1] as f32 * 1.1
    } else {
        counts[1] as f32
    };

    ThorpCount {
        leader: counts[1],
        adjusted,
        trailer: counts[0],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erf_matches_known_values() {
        assert!((erf(0.0)).abs() < 1e-6);
        assert!((erf(1.0) - 0.842_700_8).abs() < 1e-5);
        assert!((erf(-1.0) + 0.842_700_8).abs() < 1e-5);
        assert!((erf(3.0) - 0.999_977_9).abs() < 1e-5);
    }

    #[test]
    fn kleinman_even_race_is_a_small_favorite() {
        // equal pips: being on roll is worth something
        let p = kleinman_count(70, 70);
        assert!(p > 0.5 && p < 0.7);

        // a big lead is near-certain
        assert!(kleinman_count(30, 90) > 0.99);
        // and a big deficit near-hopeless
        assert!(kleinman_count(90, 30) < 0.01);
    }

    #[test]
    fn kleinman_short_race_is_zero() {
        assert_eq!(kleinman_count(1, 2), 0.0);
    }

    #[test]
    fn keith_penalizes_stacked_ace_point() {
        // a smooth home board: no adjustments at all
        let mut smooth = Board::empty();
        smooth[1][3] = 5;
        smooth[1][4] = 5;
        smooth[1][5] = 5;
        smooth[0][5] = 15;
        assert_eq!(keith_count(&smooth)[1], smooth.pip_count().1);

        // six on the ace and an empty four point
        let mut stacked = Board::empty();
        stacked[1][0] = 6;
        stacked[1][4] = 5;
        stacked[1][5] = 4;
        stacked[0][5] = 15;
        // 10 for the ace stack, 1 for the gap
        assert_eq!(keith_count(&stacked)[1], stacked.pip_count().1 + 11);

        // the opponent side gets its own adjustments: two gaps here
        assert_eq!(keith_count(&smooth)[0], smooth.pip_count().0 + 2);
    }

    #[test]
    fn thorp_counts_both_sides() {
        let mut board = Board::empty();
        board[1][0] = 2;
        board[1][2] = 3;
        board[0][1] = 4;
        board[0][3] = 2;

        let tc = thorp_count(&board);
        // pips 11 + 2*5 men + 2 on the ace - 2 covered points
        assert_eq!(tc.leader, 11 + 10 + 2 - 2);
        assert_eq!(tc.adjusted, tc.leader as f32);
        // pips 16 + 2*6 men + 0 on the ace - 2 covered points
        assert_eq!(tc.trailer, 16 + 12 - 2);
        assert_eq!(tc, thorp_count(&board));
    }

    #[test]
    fn thorp_adjusts_long_leader_counts() {
        let mut board = Board::empty();
        board[1][5] = 15;
        board[0][5] = 15;

        let tc = thorp_count(&board);
        assert!(tc.leader > 30);
        assert!((tc.adjusted - tc.leader as f32 * 1.1).abs() < 1e-4);
    }
}
