//! Hand-engineered network inputs: the shared per-point base encoding, the
//! contact/crashed half-input scalars (mostly after Berliner), and the race
//! encoding.

use std::sync::OnceLock;

use tavla_core::Board;

pub const MIN_PER_POINT: usize = 4;
pub const MORE_INPUTS: usize = 25;
pub const NUM_INPUTS: usize = (25 * MIN_PER_POINT + MORE_INPUTS) * 2;
pub const NUM_PRUNING_INPUTS: usize = 25 * MIN_PER_POINT * 2;
pub const HALF_RACE_INPUTS: usize = RI_NCROSS + 1;
pub const NUM_RACE_INPUTS: usize = HALF_RACE_INPUTS * 2;

// Race input layout: 23 points x 4, then 14 men-off slots, then crossovers.
pub const RI_OFF: usize = 92;
pub const RI_NCROSS: usize = 92 + 14;

// Half-input scalar indices, offset from each side's block.
pub const I_OFF1: usize = 0;
pub const I_OFF2: usize = 1;
pub const I_OFF3: usize = 2;
pub const I_BREAK_CONTACT: usize = 3;
pub const I_BACK_CHEQUER: usize = 4;
pub const I_BACK_ANCHOR: usize = 5;
pub const I_FORWARD_ANCHOR: usize = 6;
pub const I_PIPLOSS: usize = 7;
pub const I_P1: usize = 8;
pub const I_P2: usize = 9;
pub const I_BACKESCAPES: usize = 10;
pub const I_ACONTAIN: usize = 11;
pub const I_ACONTAIN2: usize = 12;
pub const I_CONTAIN: usize = 13;
pub const I_CONTAIN2: usize = 14;
pub const I_MOBILITY: usize = 15;
pub const I_MOMENT2: usize = 16;
pub const I_ENTER: usize = 17;
pub const I_ENTER2: usize = 18;
pub const I_TIMING: usize = 19;
pub const I_BACKBONE: usize = 20;
pub const I_BACKG: usize = 21;
pub const I_BACKG1: usize = 22;
pub const I_FREEPIP: usize = 23;
pub const I_BACKRESCAPES: usize = 24;

/// Per-point encoding: blot, made point, at least three, overflow beyond
/// three halved.
fn point_input(nc: u8) -> [f32; 4] {
    [
        if nc == 1 { 1.0 } else { 0.0 },
        if nc == 2 { 1.0 } else { 0.0 },
        if nc >= 3 { 1.0 } else { 0.0 },
        if nc > 3 { (nc - 3) as f32 / 2.0 } else { 0.0 },
    ]
}

/// Bar encoding is cumulative in the first three slots.
fn bar_input(nc: u8) -> [f32; 4] {
    [
        if nc >= 1 { 1.0 } else { 0.0 },
        if nc >= 2 { 1.0 } else { 0.0 },
        if nc >= 3 { 1.0 } else { 0.0 },
        if nc > 3 { (nc - 3) as f32 / 2.0 } else { 0.0 },
    ]
}

/// The 200 shared inputs: 4 per point and bar, opponent first. This is the
/// complete input vector of the pruning networks.
pub fn base_inputs(board: &Board, inputs: &mut [f32]) {
    for side in 0..2 {
        let af = &mut inputs[side * 25 * 4..(side + 1) * 25 * 4];
        for i in 0..24 {
            af[i * 4..i * 4 + 4].copy_from_slice(&point_input(board[side][i]));
        }
        af[96..100].copy_from_slice(&bar_input(board[side][24]));
    }
}

struct EscapeTables {
    plain: [u8; 0x1000],
    rescue: [u8; 0x1000],
}

fn escape_tables() -> &'static EscapeTables {
    static TABLES: OnceLock<Box<EscapeTables>> = OnceLock::new();
    TABLES.get_or_init(|| {
        let mut t = Box::new(EscapeTables {
            plain: [0; 0x1000],
            rescue: [0; 0x1000],
        });
        for i in 0..0x1000usize {
            let mut c = 0u8;
            for n0 in 0..=5usize {
                for n1 in 0..=n0 {
                    if i & (1 << (n0 + n1 + 1)) == 0 && !(i & (1 << n0) != 0 && i & (1 << n1) != 0)
                    {
                        c += if n0 == n1 { 1 } else { 2 };
                    }
                }
            }
            t.plain[i] = c;
        }

        t.rescue[0] = 0;
        for i in 1..0x1000usize {
            let low = i.trailing_zeros() as usize;
            let mut c = 0u8;
            for n0 in 0..=5usize {
                for n1 in 0..=n0 {
                    if n0 + n1 + 1 > low
                        && i & (1 << (n0 + n1 + 1)) == 0
                        && !(i & (1 << n0) != 0 && i & (1 << n1) != 0)
                    {
                        c += if n0 == n1 { 1 } else { 2 };
                    }
                }
            }
            t.rescue[i] = c;
        }
        t
    })
}

fn escape_mask(board: &[u8; 25], n: i32) -> usize {
    let mut af = 0usize;
    let m = n.min(12);
    for i in 0..m.max(0) {
        let idx = 24 + i - n;
        if board[idx as usize] > 1 {
            af |= 1 << i;
        }
    }
    af
}

/// Number of rolls (out of 36) that let a chequer `n` pips from the edge of
/// a blockade escape past it.
fn escapes(board: &[u8; 25], n: i32) -> u32 {
    u32::from(escape_tables().plain[escape_mask(board, n)])
}

/// As [`escapes`], but the escaping chequer may not land before the rear of
/// its own rearmost point (used for back-game rescue rolls).
fn escapes1(board: &[u8; 25], n: i32) -> u32 {
    u32::from(escape_tables().rescue[escape_mask(board, n)])
}

/// One way to hit: intermediate points that must be open, the number of
/// dice faces used and the pip distance covered.
struct Hit {
    /// All intermediate points required; when false, one of the two listed
    /// suffices.
    all: bool,
    intermediate: [i32; 3],
    faces: u32,
    pips: i32,
}

const fn hit(all: bool, intermediate: [i32; 3], faces: u32, pips: i32) -> Hit {
    Hit {
        all,
        intermediate,
        faces,
        pips,
    }
}

/// All 39 ways to hit, indexed by the tables below.
#[rustfmt::skip]
static HITS: [Hit; 39] = [
    hit(true,  [0, 0, 0],    1, 1),  /*  0: 1x hits 1 */
    hit(true,  [0, 0, 0],    1, 2),  /*  1: 2x hits 2 */
    hit(true,  [1, 0, 0],    2, 2),  /*  2: 11 hits 2 */
    hit(true,  [0, 0, 0],    1, 3),  /*  3: 3x hits 3 */
    hit(false, [1, 2, 0],    2, 3),  /*  4: 21 hits 3 */
    hit(true,  [1, 2, 0],    3, 3),  /*  5: 11 hits 3 */
    hit(true,  [0, 0, 0],    1, 4),  /*  6: 4x hits 4 */
    hit(false, [1, 3, 0],    2, 4),  /*  7: 31 hits 4 */
    hit(true,  [2, 0, 0],    2, 4),  /*  8: 22 hits 4 */
    hit(true,  [1, 2, 3],    4, 4),  /*  9: 11 hits 4 */
    hit(true,  [0, 0, 0],    1, 5),  /* 10: 5x hits 5 */
    hit(false, [1, 4, 0],    2, 5),  /* 11: 41 hits 5 */
    hit(false, [2, 3, 0],    2, 5),  /* 12: 32 hits 5 */
    hit(true,  [0, 0, 0],    1, 6),  /* 13: 6x hits 6 */
    hit(false, [1, 5, 0],    2, 6),  /* 14: 51 hits 6 */
    hit(false, [2, 4, 0],    2, 6),  /* 15: 42 hits 6 */
    hit(true,  [3, 0, 0],    2, 6),  /* 16: 33 hits 6 */
    hit(true,  [2, 4, 0],    3, 6),  /* 17: 22 hits 6 */
    hit(false, [1, 6, 0],    2, 7),  /* 18: 61 hits 7 */
    hit(false, [2, 5, 0],    2, 7),  /* 19: 52 hits 7 */
    hit(false, [3, 4, 0],    2, 7),  /* 20: 43 hits 7 */
    hit(false, [2, 6, 0],    2, 8),  /* 21: 62 hits 8 */
    hit(false, [3, 5, 0],    2, 8),  /* 22: 53 hits 8 */
    hit(true,  [4, 0, 0],    2, 8),  /* 23: 44 hits 8 */
    hit(true,  [2, 4, 6],    4, 8),  /* 24: 22 hits 8 */
    hit(false, [3, 6, 0],    2, 9),  /* 25: 63 hits 9 */
    hit(false, [4, 5, 0],    2, 9),  /* 26: 54 hits 9 */
    hit(true,  [3, 6, 0],    3, 9),  /* 27: 33 hits 9 */
    hit(false, [4, 6, 0],    2, 10), /* 28: 64 hits 10 */
    hit(true,  [5, 0, 0],    2, 10), /* 29: 55 hits 10 */
    hit(false, [5, 6, 0],    2, 11), /* 30: 65 hits 11 */
    hit(true,  [6, 0, 0],    2, 12), /* 31: 66 hits 12 */
    hit(true,  [4, 8, 0],    3, 12), /* 32: 44 hits 12 */
    hit(true,  [3, 6, 9],    4, 12), /* 33: 33 hits 12 */
    hit(true,  [5, 10, 0],   3, 15), /* 34: 55 hits 15 */
    hit(true,  [4, 8, 12],   4, 16), /* 35: 44 hits 16 */
    hit(true,  [6, 12, 0],   3, 18), /* 36: 66 hits 18 */
    hit(true,  [5, 10, 15],  4, 20), /* 37: 55 hits 20 */
    hit(true,  [6, 12, 18],  4, 24), /* 38: 66 hits 24 */
];

/// Ways to hit from a distance of n+1 pips, as indexes into [`HITS`].
#[rustfmt::skip]
static COMBINATIONS: [[i32; 5]; 24] = [
    [0, -1, -1, -1, -1],  /*  1 */
    [1, 2, -1, -1, -1],   /*  2 */
    [3, 4, 5, -1, -1],    /*  3 */
    [6, 7, 8, 9, -1],     /*  4 */
    [10, 11, 12, -1, -1], /*  5 */
    [13, 14, 15, 16, 17], /*  6 */
    [18, 19, 20, -1, -1], /*  7 */
    [21, 22, 23, 24, -1], /*  8 */
    [25, 26, 27, -1, -1], /*  9 */
    [28, 29, -1, -1, -1], /* 10 */
    [30, -1, -1, -1, -1], /* 11 */
    [31, 32, 33, -1, -1], /* 12 */
    [-1, -1, -1, -1, -1], /* 13 */
    [-1, -1, -1, -1, -1], /* 14 */
    [34, -1, -1, -1, -1], /* 15 */
    [35, -1, -1, -1, -1], /* 16 */
    [-1, -1, -1, -1, -1], /* 17 */
    [36, -1, -1, -1, -1], /* 18 */
    [-1, -1, -1, -1, -1], /* 19 */
    [37, -1, -1, -1, -1], /* 20 */
    [-1, -1, -1, -1, -1], /* 21 */
    [-1, -1, -1, -1, -1], /* 22 */
    [-1, -1, -1, -1, -1], /* 23 */
    [38, -1, -1, -1, -1], /* 24 */
];

/// Ways each of the 21 rolls hits, as indexes into [`HITS`]. The six
/// doubles come first.
#[rustfmt::skip]
static ROLL_HITS: [[i32; 4]; 21] = [
    [0, 2, 5, 9],    /* 11 */
    [1, 8, 17, 24],  /* 22 */
    [3, 16, 27, 33], /* 33 */
    [6, 23, 32, 35], /* 44 */
    [10, 29, 34, 37],/* 55 */
    [13, 31, 36, 38],/* 66 */
    [0, 1, 4, -1],   /* 21 */
    [0, 3, 7, -1],   /* 31 */
    [1, 3, 12, -1],  /* 32 */
    [0, 6, 11, -1],  /* 41 */
    [1, 6, 15, -1],  /* 42 */
    [3, 6, 20, -1],  /* 43 */
    [0, 10, 14, -1], /* 51 */
    [1, 10, 19, -1], /* 52 */
    [3, 10, 22, -1], /* 53 */
    [6, 10, 26, -1], /* 54 */
    [0, 13, 18, -1], /* 61 */
    [1, 13, 21, -1], /* 62 */
    [3, 13, 25, -1], /* 63 */
    [6, 13, 28, -1], /* 64 */
    [10, 13, 30, -1],/* 65 */
];

fn msb32(n: u32) -> i32 {
    31 - n.leading_zeros() as i32
}

/// The 25 positional scalars for one side of a contact position. `board`
/// is the side being described, `board_opp` its opponent; both from their
/// own perspective.
#[allow(clippy::needless_range_loop)]
fn half_inputs(board: &[u8; 25], board_opp: &[u8; 25], af: &mut [f32]) {
    let bd = |i: i32| -> i32 { i32::from(board[i as usize]) };
    let opp = |i: i32| -> i32 { i32::from(board_opp[i as usize]) };

    let mut opp_back = -1i32;
    for i in (0..25).rev() {
        if board_opp[i] > 0 {
            opp_back = i as i32;
            break;
        }
    }
    let opp_back = 23 - opp_back;

    let mut n = 0i32;
    for i in (opp_back + 1).max(0)..25 {
        if bd(i) > 0 {
            n += (i + 1 - opp_back) * bd(i);
        }
    }
    af[I_BREAK_CONTACT] = n as f32 / (15.0 + 152.0);

    let mut p = 0i32;
    for i in 0..opp_back.max(0) {
        p += (i + 1) * bd(i);
    }
    af[I_FREEPIP] = p as f32 / 100.0;

    {
        let mut t = 0i32;
        let mut no = 0i32;
        let m = opp_back.max(11);

        t += 24 * bd(24);
        no += bd(24);

        let mut i = 23i32;
        while i > m {
            if bd(i) != 0 && bd(i) != 2 {
                let k = if bd(i) > 2 { bd(i) - 2 } else { 1 };
                no += k;
                t += i * k;
            }
            i -= 1;
        }
        while i >= 6 {
            let k = bd(i);
            no += k;
            t += i * k;
            i -= 1;
        }
        for i in (0..=5i32).rev() {
            if bd(i) > 2 {
                t += i * (bd(i) - 2);
                no += bd(i) - 2;
            } else if bd(i) < 2 {
                let k = 2 - bd(i);
                if no >= k {
                    t -= i * k;
                    no -= k;
                }
            }
        }
        af[I_TIMING] = t.max(0) as f32 / 100.0;
    }

    // back chequer and anchors
    let back = (0..25).rev().find(|&i| board[i] > 0).map_or(-1, |i| i as i32);
    af[I_BACK_CHEQUER] = back as f32 / 24.0;

    let mut anchor = -1i32;
    {
        let mut i = if back == 24 { 23 } else { back };
        while i >= 0 {
            if bd(i) >= 2 {
                anchor = i;
                break;
            }
            i -= 1;
        }
    }
    af[I_BACK_ANCHOR] = anchor as f32 / 24.0;

    let mut fwd = 0i32;
    for j in 18..=anchor {
        if bd(j) >= 2 {
            fwd = 24 - j;
            break;
        }
    }
    if fwd == 0 {
        for j in (12..=17i32).rev() {
            if bd(j) >= 2 {
                fwd = 24 - j;
                break;
            }
        }
    }
    af[I_FORWARD_ANCHOR] = if fwd == 0 { 2.0 } else { fwd as f32 / 6.0 };

    // piploss: for every opposing blot we would hit, record the rolls that
    // reach it and the pips it would lose
    let n_board = (0..6).filter(|&i| board[i] > 0).count();
    let mut a_hit = [0u32; 39];

    let top = if n_board > 2 { 23 } else { 21 };
    for i in (0..=top).rev() {
        if opp(i) != 1 {
            continue;
        }
        for j in 24 - i..25 {
            if bd(j) == 0 || (j < 6 && bd(j) == 2) {
                continue;
            }
            'combo: for &c in &COMBINATIONS[(j - 24 + i) as usize] {
                if c < 0 {
                    break;
                }
                let pi = &HITS[c as usize];
                if pi.all {
                    if pi.faces > 1 {
                        for &inter in pi.intermediate.iter().take_while(|&&x| x > 0) {
                            if opp(i - inter) > 1 {
                                continue 'combo;
                            }
                        }
                    }
                } else if opp(i - pi.intermediate[0]) > 1 && opp(i - pi.intermediate[1]) > 1 {
                    continue 'combo;
                }
                a_hit[c as usize] |= 1u32 << j;
            }
        }
    }

    #[derive(Clone, Copy, Default)]
    struct RollStat {
        chequers: i32,
        pips: i32,
    }
    let mut a_roll = [RollStat::default(); 21];

    if board[24] == 0 {
        for i in 0..21 {
            let mut n = -1i32; // hitter used
            for j in 0..4 {
                let r = ROLL_HITS[i][j];
                if r < 0 {
                    break;
                }
                let mask = a_hit[r as usize];
                if mask == 0 {
                    continue;
                }
                let pi = &HITS[r as usize];

                if pi.faces == 1 {
                    // direct shot from the most advanced hitter
                    let k = msb32(mask);
                    if n != k || bd(k) > 1 {
                        a_roll[i].chequers += 1;
                    }
                    n = k;
                    a_roll[i].pips = a_roll[i].pips.max(k - pi.pips + 1);
                    // doubles can hit direct from several points at once
                    if ROLL_HITS[i][3] >= 0 && mask & !(1u32 << k) != 0 {
                        a_roll[i].chequers += 1;
                    }
                } else {
                    if a_roll[i].chequers == 0 {
                        a_roll[i].chequers = 1;
                    }
                    let k = msb32(mask);
                    a_roll[i].pips = a_roll[i].pips.max(k - pi.pips + 1);
                    for &inter in pi.intermediate.iter().take_while(|&&x| x > 0) {
                        if opp(23 - k + inter) == 1 {
                            a_roll[i].chequers += 1;
                            break;
                        }
                    }
                }
            }
        }
    } else if board[24] == 1 {
        for i in 0..21 {
            let mut n = false; // free to use either die to enter
            for j in 0..4 {
                let r = ROLL_HITS[i][j];
                if r < 0 {
                    break;
                }
                let mask = a_hit[r as usize];
                if mask == 0 {
                    continue;
                }
                let pi = &HITS[r as usize];

                if pi.faces == 1 {
                    let mut k = msb32(mask);
                    while k > 0 {
                        if mask & (1u32 << k) != 0 {
                            // hitting anywhere but from the bar commits the
                            // other die to entering
                            if n && k != 24 {
                                break;
                            }
                            if k != 24 {
                                let npip = HITS[ROLL_HITS[i][1 - j] as usize].pips;
                                if opp(npip - 1) > 1 {
                                    break;
                                }
                                n = true;
                            }
                            a_roll[i].chequers += 1;
                            a_roll[i].pips = a_roll[i].pips.max(k - pi.pips + 1);
                        }
                        k -= 1;
                    }
                } else {
                    // indirect shots count from the bar only
                    if mask & (1u32 << 24) == 0 {
                        continue;
                    }
                    if a_roll[i].chequers == 0 {
                        a_roll[i].chequers = 1;
                    }
                    a_roll[i].pips = a_roll[i].pips.max(25 - pi.pips);
                    for &inter in pi.intermediate.iter().take_while(|&&x| x > 0) {
                        if opp(inter + 1) == 1 {
                            a_roll[i].chequers += 1;
                            break;
                        }
                    }
                }
            }
        }
    } else {
        // two or more on the bar: only direct shots from the bar count
        for i in 0..21 {
            for j in 0..2 {
                let r = ROLL_HITS[i][j];
                if a_hit[r as usize] & (1u32 << 24) == 0 {
                    continue;
                }
                let pi = &HITS[r as usize];
                if pi.faces != 1 {
                    continue;
                }
                a_roll[i].chequers += 1;
                a_roll[i].pips = a_roll[i].pips.max(25 - pi.pips);
            }
        }
    }

    {
        let mut np = 0i32;
        let mut n1 = 0i32;
        let mut n2 = 0i32;
        for i in 0..21 {
            let w = if ROLL_HITS[i][3] > 0 { 1 } else { 2 };
            np += a_roll[i].pips * w;
            if a_roll[i].chequers > 0 {
                n1 += w;
                if a_roll[i].chequers > 1 {
                    n2 += w;
                }
            }
        }
        af[I_PIPLOSS] = np as f32 / (12.0 * 36.0);
        af[I_P1] = n1 as f32 / 36.0;
        af[I_P2] = n2 as f32 / 36.0;
    }

    af[I_BACKESCAPES] = escapes(board, 23 - opp_back) as f32 / 36.0;
    af[I_BACKRESCAPES] = escapes1(board, 23 - opp_back) as f32 / 36.0;

    let mut n = 36u32;
    let mut i = 15i32;
    while i < 24 - opp_back {
        n = n.min(escapes(board, i));
        i += 1;
    }
    af[I_ACONTAIN] = (36 - n) as f32 / 36.0;
    af[I_ACONTAIN2] = af[I_ACONTAIN] * af[I_ACONTAIN];

    if opp_back < 0 {
        // opponent on the bar: containment past point 24 is meaningless
        i = 15;
        n = 36;
    }
    while i < 24 {
        n = n.min(escapes(board, i));
        i += 1;
    }
    af[I_CONTAIN] = (36 - n) as f32 / 36.0;
    af[I_CONTAIN2] = af[I_CONTAIN] * af[I_CONTAIN];

    let mut n = 0i32;
    for i in 6..25 {
        if bd(i) > 0 {
            n += (i - 5) * bd(i) * escapes(board_opp, i) as i32;
        }
    }
    af[I_MOBILITY] = n as f32 / 3600.0;

    // second moment of the chequers beyond the (rounded-up) mean
    let mut j = 0i32;
    let mut n = 0i32;
    for i in 0..25 {
        let ni = bd(i);
        if ni > 0 {
            j += ni;
            n += i * ni;
        }
    }
    if j > 0 {
        n = (n + j - 1) / j;
    }
    let mut j = 0i32;
    let mut k = 0i32;
    for i in n + 1..25 {
        let ni = bd(i);
        if ni > 0 {
            j += ni;
            k += ni * (i - n) * (i - n);
        }
    }
    if j > 0 {
        k = (k + j - 1) / j;
    }
    af[I_MOMENT2] = k as f32 / 400.0;

    if board[24] > 0 {
        let mut loss = 0i32;
        let two = board[24] > 1;
        for i in 0..6i32 {
            if opp(i) > 1 {
                // any double loses
                loss += 4 * (i + 1);
                for j in i + 1..6 {
                    if opp(j) > 1 {
                        loss += 2 * (i + j + 2);
                    } else if two {
                        loss += 2 * (i + 1);
                    }
                }
            } else if two {
                for j in i + 1..6 {
                    if opp(j) > 1 {
                        loss += 2 * (j + 1);
                    }
                }
            }
        }
        af[I_ENTER] = loss as f32 / (36.0 * (49.0 / 6.0));
    } else {
        af[I_ENTER] = 0.0;
    }

    let n = (0..6).filter(|&i| board_opp[i] > 1).count() as i32;
    af[I_ENTER2] = (36 - (n - 6) * (n - 6)) as f32 / 36.0;

    {
        let mut pa = -1i32;
        let mut w = 0i32;
        let mut tot = 0i32;
        for np in (1..=23i32).rev() {
            if bd(np) >= 2 {
                if pa == -1 {
                    pa = np;
                    continue;
                }
                let d = pa - np;
                let c = if d <= 6 {
                    11
                } else if d <= 11 {
                    13 - d
                } else {
                    0
                };
                w += c * bd(pa);
                tot += bd(pa);
            }
        }
        af[I_BACKBONE] = if tot > 0 {
            1.0 - w as f32 / (tot as f32 * 11.0)
        } else {
            0.0
        };
    }

    {
        let n_anchors = (18..24).filter(|&i| board[i] > 1).count();
        af[I_BACKG] = 0.0;
        af[I_BACKG1] = 0.0;
        if n_anchors > 0 {
            let tot: i32 = (18..25).map(|i| i32::from(board[i])).sum();
            if n_anchors > 1 {
                af[I_BACKG] = (tot - 3) as f32 / 4.0;
            } else {
                af[I_BACKG1] = tot as f32 / 8.0;
            }
        }
    }
}

fn men_off_all(board: &[u8; 25], af: &mut [f32]) {
    let men_off = 15 - board.iter().map(|&n| i32::from(n)).sum::<i32>();

    if men_off <= 5 {
        af[0] = if men_off > 0 { men_off as f32 / 5.0 } else { 0.0 };
        af[1] = 0.0;
        af[2] = 0.0;
    } else if men_off <= 10 {
        af[0] = 1.0;
        af[1] = (men_off - 5) as f32 / 5.0;
        af[2] = 0.0;
    } else {
        af[0] = 1.0;
        af[1] = 1.0;
        af[2] = (men_off - 10) as f32 / 5.0;
    }
}

fn men_off_non_crashed(board: &[u8; 25], af: &mut [f32]) {
    let men_off = 15 - board.iter().map(|&n| i32::from(n)).sum::<i32>();

    if men_off <= 2 {
        af[0] = if men_off > 0 { men_off as f32 / 3.0 } else { 0.0 };
        af[1] = 0.0;
        af[2] = 0.0;
    } else if men_off <= 5 {
        af[0] = 1.0;
        af[1] = (men_off - 3) as f32 / 3.0;
        af[2] = 0.0;
    } else {
        af[0] = 1.0;
        af[1] = 1.0;
        af[2] = (men_off - 6) as f32 / 3.0;
    }
}

/// Inputs of the contact network.
pub fn contact_inputs(board: &Board, inputs: &mut [f32]) {
    base_inputs(board, inputs);

    let (b0, b1) = inputs[MIN_PER_POINT * 25 * 2..].split_at_mut(MORE_INPUTS);

    // the nets were trained with the men-off sides switched; the quirk is
    // baked into the weights and must stay
    men_off_non_crashed(&board[0], &mut b0[I_OFF1..]);
    half_inputs(&board[1], &board[0], b0);

    men_off_non_crashed(&board[1], &mut b1[I_OFF1..]);
    half_inputs(&board[0], &board[1], b1);
}

/// Inputs of the crashed network.
pub fn crashed_inputs(board: &Board, inputs: &mut [f32]) {
    base_inputs(board, inputs);

    let (b0, b1) = inputs[MIN_PER_POINT * 25 * 2..].split_at_mut(MORE_INPUTS);

    men_off_all(&board[1], &mut b0[I_OFF1..]);
    half_inputs(&board[1], &board[0], b0);

    men_off_all(&board[0], &mut b1[I_OFF1..]);
    half_inputs(&board[0], &board[1], b1);
}

/// Inputs of the race network. The bar and 24 point are empty by
/// definition of a race.
pub fn race_inputs(board: &Board, inputs: &mut [f32]) {
    for side in 0..2 {
        let b = &board[side];
        let af = &mut inputs[side * HALF_RACE_INPUTS..(side + 1) * HALF_RACE_INPUTS];

        debug_assert!(b[23] == 0 && b[24] == 0);

        let mut men_off = 15i32;
        for i in 0..23 {
            let nc = b[i];
            men_off -= i32::from(nc);
            af[i * 4..i * 4 + 4].copy_from_slice(&point_input(nc));
        }

        for k in 0..14 {
            af[RI_OFF + k] = if men_off == k as i32 + 1 { 1.0 } else { 0.0 };
        }

        let mut n_cross = 0u32;
        for k in 1..4 {
            for i in 6 * k..6 * k + 6 {
                n_cross += u32::from(b[i]) * k as u32;
            }
        }
        af[RI_NCROSS] = n_cross as f32 / 10.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tavla_core::Variant;

    #[test]
    fn base_inputs_starting_position() {
        let board = Board::starting(Variant::Standard);
        let mut inputs = [0.0f32; NUM_PRUNING_INPUTS];
        base_inputs(&board, &mut inputs);

        // side 1's block starts at 100; point 5 holds five chequers
        assert_eq!(inputs[100 + 5 * 4 + 2], 1.0);
        assert_eq!(inputs[100 + 5 * 4 + 3], 1.0);
        // point 23 holds two
        assert_eq!(inputs[100 + 23 * 4 + 1], 1.0);
        assert_eq!(inputs[100 + 23 * 4 + 0], 0.0);
        // bar empty
        assert_eq!(&inputs[100 + 96..100 + 100], &[0.0; 4]);
    }

    #[test]
    fn bar_encoding_is_cumulative() {
        let mut board = Board::starting(Variant::Standard);
        board[1][24] = 3;
        let mut inputs = [0.0f32; NUM_PRUNING_INPUTS];
        base_inputs(&board, &mut inputs);
        assert_eq!(&inputs[100 + 96..100 + 100], &[1.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn escape_tables_bounds() {
        let t = escape_tables();
        assert_eq!(t.plain[0], 36);
        assert_eq!(t.rescue[0], 0);
        // a full 12-point prime lets nothing escape
        assert_eq!(t.plain[0xfff], 0);
        assert!(t.plain.iter().all(|&c| c <= 36));
        assert!(t
            .plain
            .iter()
            .zip(t.rescue.iter())
            .all(|(&a, &b)| b <= a));
    }

    #[test]
    fn contact_inputs_starting_position() {
        let board = Board::starting(Variant::Standard);
        let mut inputs = [0.0f32; NUM_INPUTS];
        contact_inputs(&board, &mut inputs);

        let b1 = &inputs[MIN_PER_POINT * 25 * 2..];
        // nothing borne off yet
        assert_eq!(b1[I_OFF1], 0.0);
        // full engagement at the start: 167 pips of contact
        assert!((b1[I_BREAK_CONTACT] - 1.0).abs() < 1e-6);
        assert_eq!(b1[I_BACK_CHEQUER], 23.0 / 24.0);
        assert_eq!(b1[I_BACK_ANCHOR], 23.0 / 24.0);
        // no free pips behind the opponent's rearmost chequer
        assert_eq!(b1[I_FREEPIP], 0.0);
        // symmetric position: both half-input blocks agree
        let b0 = &inputs[MIN_PER_POINT * 25 * 2 + MORE_INPUTS..];
        for i in 0..MORE_INPUTS {
            assert!(
                (b1[i] - b0[i]).abs() < 1e-6,
                "half input {i} not symmetric"
            );
        }
    }

    #[test]
    fn race_inputs_crossovers_and_men_off() {
        let mut board = Board::empty();
        board[1][2] = 3; // home
        board[1][8] = 2; // 1 crossover each
        board[1][20] = 1; // 3 crossovers
        board[0][3] = 5;
        let mut inputs = [0.0f32; NUM_RACE_INPUTS];
        race_inputs(&board, &mut inputs);

        let b1 = &inputs[HALF_RACE_INPUTS..];
        assert!((b1[RI_NCROSS] - (2.0 + 3.0) / 10.0).abs() < 1e-6);
        // 15 - 6 = 9 men off
        assert_eq!(b1[RI_OFF + 8], 1.0);
        assert!((0..14).filter(|&k| b1[RI_OFF + k] == 1.0).count() == 1);

        let b0 = &inputs[..HALF_RACE_INPUTS];
        assert_eq!(b0[RI_OFF + 9], 1.0); // 10 off
    }

    #[test]
    fn enter_inputs_respond_to_closed_points() {
        let mut board = Board::starting(Variant::Standard);
        board[1][24] = 1;
        board[1][12] = 4;
        let mut inputs = [0.0f32; NUM_INPUTS];
        contact_inputs(&board, &mut inputs);
        let b1 = &inputs[MIN_PER_POINT * 25 * 2..];
        // opponent holds one home-board point (their 6 point)
        assert!((b1[I_ENTER2] - (36.0 - 25.0) / 36.0).abs() < 1e-6);
        assert!(b1[I_ENTER] > 0.0);
    }
}
