//! Post-evaluation sanity clamps.
//!
//! Neural outputs can violate hard combinatorial facts (a gammon where the
//! opponent has already borne off, a loss in an unlosable race). This pass
//! corrects them with crossover counts and, in bearoff positions, the exact
//! distribution of rolls to get off.

use tavla_core::{
    position_bearoff, Board, NUM_OUTPUTS, OUTPUT_LOSEBACKGAMMON, OUTPUT_LOSEGAMMON, OUTPUT_WIN,
    OUTPUT_WINBACKGAMMON, OUTPUT_WINGAMMON,
};

use crate::bearoff::BearoffSet;
use crate::error::Result;

// outputs this small in contact positions are treated as noise
const NOISE_FLOOR: f32 = 1.0 / 10_000.0;

/// Largest number of rolls the side could need to bear off from the given
/// one-sided position, or -1 for the empty position.
fn max_turns(bearoffs: &BearoffSet, id: u32) -> Result<i32> {
    let dist = bearoffs.one_sided.dist(id)?;
    for i in (0..32).rev() {
        if dist.us_prob[i] != 0 {
            return Ok(i as i32);
        }
    }
    Ok(-1)
}

/// Clamps evaluation outputs to what is combinatorially possible on this
/// board, and forces certain wins, losses and gammons in broken contact.
pub fn sanity_check(board: &Board, output: &mut [f32], bearoffs: &BearoffSet) -> Result<()> {
    output[OUTPUT_WIN] = output[OUTPUT_WIN].clamp(0.0, 1.0);

    let mut chequers = [0i32; 2];
    let mut back = [0usize; 2];
    let mut crossovers = [0i32; 2];
    let mut gammon_crossovers = [1i32; 2];

    for j in 0..2 {
        // crossovers to bear off, quadrant by quadrant; the gammon count
        // starts from one since getting a single chequer off takes a
        // crossover of its own
        for (quadrant, range) in [(0usize, 0..6), (1, 6..12), (2, 12..18), (3, 18..24)] {
            let mut in_quadrant = 0i32;
            for i in range {
                if board[j][i] > 0 {
                    back[j] = i;
                    in_quadrant += i32::from(board[j][i]);
                }
            }
            chequers[j] += in_quadrant;
            crossovers[j] += (quadrant as i32 + 1) * in_quadrant;
            if quadrant > 0 {
                gammon_crossovers[j] += quadrant as i32 * in_quadrant;
            }
        }

        let bar = i32::from(board[j][24]);
        if bar > 0 {
            back[j] = 24;
            chequers[j] += bar;
            crossovers[j] += 5 * bar;
            gammon_crossovers[j] += 4 * bar;
        }
    }

    let contact = back[0] + back[1] >= 24;

    let mut turns = [0i32; 2];
    if !contact {
        let db = &bearoffs.one_sided;
        for i in 0..2 {
            turns[i] = if back[i] < db.points() {
                max_turns(
                    bearoffs,
                    position_bearoff(&board[i][..24], db.points(), db.chequers()),
                )?
            } else {
                crossovers[i] * 2
            };
        }
        if turns[1] == 0 {
            turns[1] = 1;
        }
    }

    if !contact && crossovers[0] > 4 * (turns[1] - 1) {
        // certain win
        output[OUTPUT_WIN] = 1.0;
    }

    if chequers[0] < 15 {
        // opponent has borne off; no gammons or backgammons possible
        output[OUTPUT_WINGAMMON] = 0.0;
        output[OUTPUT_WINBACKGAMMON] = 0.0;
    } else if !contact {
        if crossovers[1] > 8 * gammon_crossovers[0] {
            // gammon impossible
            output[OUTPUT_WINGAMMON] = 0.0;
        } else if gammon_crossovers[0] > 4 * (turns[1] - 1) {
            // certain gammon
            output[OUTPUT_WINGAMMON] = 1.0;
        }
        if back[0] < 18 {
            // backgammon impossible
            output[OUTPUT_WINBACKGAMMON] = 0.0;
        }
    }

    if !contact && crossovers[1] > 4 * turns[0] {
        // certain loss
        output[OUTPUT_WIN] = 0.0;
    }

    if chequers[1] < 15 {
        output[OUTPUT_LOSEGAMMON] = 0.0;
        output[OUTPUT_LOSEBACKGAMMON] = 0.0;
    } else if !contact {
        if crossovers[0] > 8 * gammon_crossovers[1] - 4 {
            output[OUTPUT_LOSEGAMMON] = 0.0;
        } else if gammon_crossovers[1] > 4 * turns[0] {
            output[OUTPUT_LOSEGAMMON] = 1.0;
        }
        if back[1] < 18 {
            output[OUTPUT_LOSEBACKGAMMON] = 0.0;
        }
    }

    // gammons cannot exceed wins, backgammons cannot exceed gammons
    if output[OUTPUT_WINGAMMON] > output[OUTPUT_WIN] {
        output[OUTPUT_WINGAMMON] = output[OUTPUT_WIN];
    }
    let lose = 1.0 - output[OUTPUT_WIN];
    if output[OUTPUT_LOSEGAMMON] > lose {
        output[OUTPUT_LOSEGAMMON] = lose;
    }
    if output[OUTPUT_WINBACKGAMMON] > output[OUTPUT_WINGAMMON] {
        output[OUTPUT_WINBACKGAMMON] = output[OUTPUT_WINGAMMON];
    }
    if output[OUTPUT_LOSEBACKGAMMON] > output[OUTPUT_LOSEGAMMON] {
        output[OUTPUT_LOSEBACKGAMMON] = output[OUTPUT_LOSEGAMMON];
    }

    if contact {
        for value in output.iter_mut().take(NUM_OUTPUTS).skip(OUTPUT_WINGAMMON) {
            if *value < NOISE_FLOOR {
                *value = 0.0;
            }
        }
    }

    Ok(())
}
