use std::cmp::Ordering;

use arrayvec::ArrayVec;

use crate::board::{Board, BAR};
use crate::position::PositionKey;
use crate::types::{Dice, NUM_ROLLOUT_OUTPUTS};

/// The `(from, to)` steps of a play being built up, one per die used.
type SubMoves = ArrayVec<(i8, i8), 4>;

/// One candidate chequer play: up to four `(from, to)` steps packed as in
/// the external move notation, `-1` terminated. `to == -1` bears the
/// chequer off.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Move {
    pub steps: [i8; 8],
    pub key: PositionKey,
    pub c_moves: u32,
    pub c_pips: u32,
    /// Primary ranking score (equity or mwc, set by the caller).
    pub score: f32,
    /// Tie-break score from the move-ordering pass.
    pub score2: f32,
    pub evals: [f32; NUM_ROLLOUT_OUTPUTS],
}

impl Move {
    fn new(steps: [i8; 8], key: PositionKey, c_moves: u32, c_pips: u32) -> Self {
        Self {
            steps,
            key,
            c_moves,
            c_pips,
            score: 0.0,
            score2: 0.0,
            evals: [0.0; NUM_ROLLOUT_OUTPUTS],
        }
    }

    /// Ordering used to rank scored moves, best first.
    pub fn cmp_by_score(&self, other: &Self) -> Ordering {
        match other.score.partial_cmp(&self.score) {
            Some(Ordering::Equal) | None => other
                .score2
                .partial_cmp(&self.score2)
                .unwrap_or(Ordering::Equal),
            Some(ord) => ord,
        }
    }
}

/// All distinct legal (or partial) plays for one roll.
#[derive(Debug, Clone, Default)]
pub struct MoveList {
    pub moves: Vec<Move>,
    pub c_max_moves: u32,
    pub c_max_pips: u32,
    pub i_move_best: usize,
    pub best_score: f32,
}

impl MoveList {
    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn sort_by_score(&mut self) {
        self.moves.sort_by(Move::cmp_by_score);
    }
}

/// Plays a single chequer step for the side on roll, sending a hit blot to
/// the opponent's bar. The caller guarantees the step is legal.
pub fn apply_sub_move(board: &mut Board, from: usize, pips: u8) {
    let dest = from as i32 - i32::from(pips);

    board[1][from] -= 1;
    if dest < 0 {
        return;
    }
    let dest = dest as usize;

    if board[0][23 - dest] != 0 {
        board[0][23 - dest] = 0;
        board[0][BAR] += 1;
    }
    board[1][dest] += 1;
}

/// Applies a complete move (as produced by [`generate_moves`]) to a board.
pub fn apply_move(board: &mut Board, steps: &[i8; 8]) {
    for pair in steps.chunks_exact(2) {
        if pair[0] < 0 {
            break;
        }
        board[1][pair[0] as usize] -= 1;
        if pair[1] >= 0 {
            let dest = pair[1] as usize;
            if board[0][23 - dest] != 0 {
                board[0][23 - dest] = 0;
                board[0][BAR] += 1;
            }
            board[1][dest] += 1;
        }
    }
}

fn legal_move(board: &Board, from: usize, pips: u8) -> bool {
    let dest = from as i32 - i32::from(pips);
    if dest >= 0 {
        return board[0][23 - dest as usize] < 2;
    }

    // bearing off: every chequer home, and either from the rearmost point
    // or with the exact pip count
    let Some(back) = board.back_chequer(1) else {
        return false;
    };
    back <= 5 && (from == back || dest == -1)
}

struct MoveGen<'a> {
    list: &'a mut MoveList,
    rolls: [u8; 4],
    partial: bool,
}

impl MoveGen<'_> {
    fn save(&mut self, c_pips: u32, subs: &SubMoves, board: &Board) {
        let c_moves = subs.len() as u32;
        if self.partial {
            // partial generation keeps every prefix
            self.list.c_max_moves = self.list.c_max_moves.max(c_moves);
            self.list.c_max_pips = self.list.c_max_pips.max(c_pips);
        } else {
            // a play is legal only if it uses as many chequers, and then as
            // many pips, as possible
            if c_moves < self.list.c_max_moves || c_pips < self.list.c_max_pips {
                return;
            }
            if c_moves > self.list.c_max_moves || c_pips > self.list.c_max_pips {
                self.list.moves.clear();
            }
            self.list.c_max_moves = c_moves;
            self.list.c_max_pips = c_pips;
        }

        let key = PositionKey::from_board(board);
        let mut steps = [-1i8; 8];
        for (i, &(from, to)) in subs.iter().enumerate() {
            steps[i * 2] = from;
            steps[i * 2 + 1] = to;
        }

        if let Some(existing) = self.list.moves.iter_mut().find(|m| m.key == key) {
            if c_moves > existing.c_moves || c_pips > existing.c_pips {
                existing.steps = steps;
                existing.c_moves = c_moves;
                existing.c_pips = c_pips;
            }
            return;
        }

        self.list.moves.push(Move::new(steps, key, c_moves, c_pips));
    }

    fn generate(&mut self, from_hint: usize, c_pips: u32, board: &Board, subs: &mut SubMoves) -> bool {
        let depth = subs.len();
        if depth > 3 || self.rolls[depth] == 0 {
            return true;
        }
        let pips = self.rolls[depth];

        if board[1][BAR] > 0 {
            // forced entry from the bar
            if board[0][usize::from(pips) - 1] >= 2 {
                return true;
            }

            let mut next = *board;
            apply_sub_move(&mut next, BAR, pips);

            subs.push((BAR as i8, BAR as i8 - pips as i8));
            if self.generate(23, c_pips + u32::from(pips), &next, subs) {
                self.save(c_pips + u32::from(pips), subs, &next);
            }
            subs.pop();
            return self.partial;
        }

        let mut used = false;
        for from in (0..=from_hint).rev() {
            if board[1][from] > 0 && legal_move(board, from, pips) {
                let mut next = *board;
                apply_sub_move(&mut next, from, pips);

                // doubles may not revisit higher points already passed over
                let hint = if self.rolls[0] == self.rolls[1] { from } else { 23 };
                subs.push((from as i8, from as i8 - pips as i8));
                if self.generate(hint, c_pips + u32::from(pips), &next, subs) {
                    self.save(c_pips + u32::from(pips), subs, &next);
                }
                subs.pop();
                used = true;
            }
        }
        !used || self.partial
    }
}

/// Fills `list` with the distinct plays of `dice` from `board`. With
/// `partial` set, incomplete prefixes are kept too (used by bearoff
/// heuristics and hint displays). Returns the number of moves found.
pub fn generate_moves(list: &mut MoveList, board: &Board, dice: Dice, partial: bool) -> usize {
    list.moves.clear();
    list.c_max_moves = 0;
    list.c_max_pips = 0;
    list.i_move_best = 0;

    let (d0, d1) = (dice.0, dice.1);
    let doubles = if d0 == d1 { d0 } else { 0 };

    {
        let mut gen = MoveGen {
            list: &mut *list,
            rolls: [d0, d1, doubles, doubles],
            partial,
        };
        gen.generate(23, 0, board, &mut SubMoves::new());
    }

    if d0 != d1 {
        let mut gen = MoveGen {
            list: &mut *list,
            rolls: [d1, d0, 0, 0],
            partial,
        };
        gen.generate(23, 0, board, &mut SubMoves::new());
    }

    list.len()
}
