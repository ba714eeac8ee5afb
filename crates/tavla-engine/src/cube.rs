//! Doubling cube state and the cubeless to cubeful equity transforms.
//!
//! Cubeful equities come from Janowski's model: the dead-cube equity and a
//! fully live piecewise-linear equity are blended by a cube efficiency `x`
//! that depends on the position class. Match play works in match winning
//! chance (mwc) throughout and converts at the edges.

use tavla_core::{
    Board, Variant, NUM_ROLLOUT_OUTPUTS, OUTPUT_CUBEFUL_EQUITY, OUTPUT_LOSEBACKGAMMON,
    OUTPUT_LOSEGAMMON, OUTPUT_WIN, OUTPUT_WINBACKGAMMON, OUTPUT_WINGAMMON,
};

use crate::classify::PositionClass;
use crate::error::{EngineError, Result};
use crate::met::{me_index as mi, MatchEquityTable, MAX_CUBE_LEVEL, MAX_SCORE};

/// Slots of the four-equity array used by the cube decision functions.
pub const OUTPUT_OPTIMAL: usize = 0;
pub const OUTPUT_NODOUBLE: usize = 1;
pub const OUTPUT_TAKE: usize = 2;
pub const OUTPUT_DROP: usize = 3;
pub const NUM_CUBEFUL_OUTPUTS: usize = 4;

// cube efficiencies per position class
const TS_CUBE_X: f32 = 0.6; // match play only
const OS_CUBE_X: f32 = 0.6;
const RACE_FACTOR_X: f32 = 0.00125;
const RACE_COEFFICIENT_X: f32 = 0.55;
const RACE_MAX_X: f32 = 0.7;
const RACE_MIN_X: f32 = 0.6;
const CRASHED_X: f32 = 0.68;
const CONTACT_X: f32 = 0.68;
const HYPER_X: f32 = 0.60;

/// Everything the equity calculations need to know about the cube and the
/// score. `owner` is `-1` for a centered cube, otherwise the player index.
/// `on_roll` is the player the evaluation outputs are for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubeInfo {
    pub cube: u32,
    pub owner: i8,
    pub on_roll: usize,
    pub match_to: i32,
    pub score: [i32; 2],
    pub crawford: bool,
    pub jacoby: bool,
    pub beavers: bool,
    pub variant: Variant,
    /// Gammon and backgammon values: money play stores
    /// `[gammon, backgammon, _, _]`, match play
    /// `[gammon p0, gammon p1, backgammon p0, backgammon p1]`.
    pub gammon_price: [f32; 4],
}

impl CubeInfo {
    /// Cube state for a money session.
    pub fn money(
        cube: u32,
        owner: i8,
        on_roll: usize,
        jacoby: bool,
        beavers: bool,
        variant: Variant,
    ) -> Result<Self> {
        if cube < 1 || !(-1..=1).contains(&owner) || on_roll > 1 {
            return Err(EngineError::InvalidCube(format!(
                "cube {cube}, owner {owner}, on roll {on_roll}"
            )));
        }

        // under the Jacoby rule gammons are worthless until the cube turns
        let price = if jacoby && owner == -1 { 0.0 } else { 1.0 };

        Ok(Self {
            cube,
            owner,
            on_roll,
            match_to: 0,
            score: [0, 0],
            crawford: false,
            jacoby,
            beavers,
            variant,
            gammon_price: [price; 4],
        })
    }

    /// Cube state inside a match; gammon prices are read off the match
    /// equity table for the current score and cube.
    #[allow(clippy::too_many_arguments)]
    pub fn match_play(
        cube: u32,
        owner: i8,
        on_roll: usize,
        match_to: i32,
        score: [i32; 2],
        crawford: bool,
        variant: Variant,
        met: &MatchEquityTable,
    ) -> Result<Self> {
        if cube < 1
            || !(-1..=1).contains(&owner)
            || on_roll > 1
            || !(1..=MAX_SCORE as i32).contains(&match_to)
            || score[0] >= match_to
            || score[1] >= match_to
        {
            return Err(EngineError::InvalidCube(format!(
                "cube {cube}, owner {owner}, score {score:?} in {match_to}-point match"
            )));
        }

        let away0 = (match_to - score[0]) as usize;
        let away1 = (match_to - score[1]) as usize;

        let gammon_price = if (away0 == 1 || away1 == 1) && !crawford {
            if away0 == 1 {
                met.gammon_price_post_crawford(cube, away1, 0)
            } else {
                met.gammon_price_post_crawford(cube, away0, 1)
            }
        } else {
            met.gammon_price(cube, away0, away1)
        };

        Ok(Self {
            cube,
            owner,
            on_roll,
            match_to,
            score,
            crawford,
            jacoby: false,
            beavers: false,
            variant,
            gammon_price,
        })
    }

    pub fn is_match(&self) -> bool {
        self.match_to > 0
    }

    /// Whether the player on roll may double at all: the cube must be
    /// centered or owned, the game live, and not Crawford or a free-drop
    /// post-Crawford game for the leader.
    pub fn cube_available(&self) -> bool {
        if !self.is_match() {
            return self.owner == -1 || self.owner == self.on_roll as i8;
        }

        let post_crawford = !self.crawford
            && (self.score[0] == self.match_to - 1 || self.score[1] == self.match_to - 1);

        !self.crawford
            && self.score[self.on_roll] + (self.cube as i32) < self.match_to
            && !(post_crawford && self.score[self.on_roll] == self.match_to - 1)
            && (self.owner == -1 || self.owner == self.on_roll as i8)
    }

    /// Equity (money) or mwc (match) the player on roll gets when the
    /// opponent passes a double.
    pub fn double_pass_equity(&self, met: &MatchEquityTable) -> f32 {
        if !self.is_match() {
            // equities are normed to a 1-cube
            1.0
        } else {
            met.get_me(
                self.score[0],
                self.score[1],
                self.match_to,
                self.on_roll,
                self.cube as i32,
                self.on_roll,
                self.crawford,
            )
        }
    }
}

/// Every cube action the decision functions can recommend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CubeDecision {
    DoubleTake,
    DoublePass,
    NoDoubleTake,
    TooGoodTake,
    TooGoodPass,
    DoubleBeaver,
    NoDoubleBeaver,
    RedoubleTake,
    RedoublePass,
    NoRedoubleTake,
    TooGoodReTake,
    TooGoodRePass,
    NoRedoubleBeaver,
    /// Cube is dead (match play only).
    NoDoubleDeadCube,
    /// Cube is dead (match play only).
    NoRedoubleDeadCube,
    /// Cube not available.
    NotAvailable,
    OptionalDoubleTake,
    OptionalRedoubleTake,
    OptionalDoubleBeaver,
    OptionalDoublePass,
    OptionalRedoublePass,
}

/// Cubeless equity weighted with the current gammon values. For match play
/// this is the mwc-linearized equity, not money equity.
pub fn utility(ar: &[f32], ci: &CubeInfo) -> f32 {
    if !ci.is_match() {
        // same gammon price for both players in a money game
        ar[OUTPUT_WIN] * 2.0 - 1.0
            + (ar[OUTPUT_WINGAMMON] - ar[OUTPUT_LOSEGAMMON]) * ci.gammon_price[0]
            + (ar[OUTPUT_WINBACKGAMMON] - ar[OUTPUT_LOSEBACKGAMMON]) * ci.gammon_price[1]
    } else {
        ar[OUTPUT_WIN] * 2.0 - 1.0 + ar[OUTPUT_WINGAMMON] * ci.gammon_price[ci.on_roll]
            - ar[OUTPUT_LOSEGAMMON] * ci.gammon_price[1 - ci.on_roll]
            + ar[OUTPUT_WINBACKGAMMON] * ci.gammon_price[2 + ci.on_roll]
            - ar[OUTPUT_LOSEBACKGAMMON] * ci.gammon_price[3 - ci.on_roll]
    }
}

/// Like [`utility`], but money play gets true money equity with full
/// gammon and backgammon values regardless of the Jacoby rule.
pub fn utility_me(ar: &[f32], ci: &CubeInfo) -> f32 {
    if !ci.is_match() {
        ar[OUTPUT_WIN] * 2.0 - 1.0 + (ar[OUTPUT_WINGAMMON] - ar[OUTPUT_LOSEGAMMON])
            + (ar[OUTPUT_WINBACKGAMMON] - ar[OUTPUT_LOSEBACKGAMMON])
    } else {
        utility(ar, ci)
    }
}

fn mwc_win_lose(ci: &CubeInfo, met: &MatchEquityTable) -> (f32, f32) {
    let win = met.get_me(
        ci.score[0],
        ci.score[1],
        ci.match_to,
        ci.on_roll,
        ci.cube as i32,
        ci.on_roll,
        ci.crawford,
    );
    let lose = met.get_me(
        ci.score[0],
        ci.score[1],
        ci.match_to,
        ci.on_roll,
        ci.cube as i32,
        1 - ci.on_roll,
        ci.crawford,
    );
    (win, lose)
}

/// Converts mwc to normalized equity by linear interpolation between
/// losing and winning a single game at the current cube.
pub fn mwc2eq(mwc: f32, ci: &CubeInfo, met: &MatchEquityTable) -> f32 {
    let (win, lose) = mwc_win_lose(ci, met);
    (2.0 * mwc - (win + lose)) / (win - lose)
}

/// Inverse of [`mwc2eq`].
pub fn eq2mwc(eq: f32, ci: &CubeInfo, met: &MatchEquityTable) -> f32 {
    let (win, lose) = mwc_win_lose(ci, met);
    0.5 * (eq * (win - lose) + (win + lose))
}

/// Standard-error variant of [`mwc2eq`]: scales without recentering.
pub fn se_mwc2eq(se_mwc: f32, ci: &CubeInfo, met: &MatchEquityTable) -> f32 {
    let (win, lose) = mwc_win_lose(ci, met);
    2.0 / (win - lose) * se_mwc
}

/// Standard-error variant of [`eq2mwc`].
pub fn se_eq2mwc(se_eq: f32, ci: &CubeInfo, met: &MatchEquityTable) -> f32 {
    let (win, lose) = mwc_win_lose(ci, met);
    0.5 * se_eq * (win - lose)
}

fn is_optional(r1: f32, r2: f32) -> bool {
    (r1 - r2).abs() <= 1.0e-5
}

fn win_gammon(ar: &[f32]) -> bool {
    ar[OUTPUT_WINGAMMON] > 0.0
}

/// Picks the optimal cube action given the no-double, double/take and
/// double/pass equities, and writes the optimal equity into
/// `ar[OUTPUT_OPTIMAL]`. Match equities must already be normalized.
pub fn best_cube_decision(
    ar: &mut [f32; NUM_CUBEFUL_OUTPUTS],
    outputs: &[[f32; NUM_ROLLOUT_OUTPUTS]; 2],
    ci: &CubeInfo,
) -> CubeDecision {
    if !ci.cube_available() {
        ar[OUTPUT_OPTIMAL] = ar[OUTPUT_NODOUBLE];

        // match play distinguishes a dead cube from an unavailable one
        return if ci.is_match() && (ci.owner < 0 || ci.owner == ci.on_roll as i8) {
            if ci.owner == -1 {
                CubeDecision::NoDoubleDeadCube
            } else {
                CubeDecision::NoRedoubleDeadCube
            }
        } else {
            CubeDecision::NotAvailable
        };
    }

    let centered = ci.owner == -1;

    if ar[OUTPUT_TAKE] >= ar[OUTPUT_NODOUBLE] && ar[OUTPUT_DROP] >= ar[OUTPUT_NODOUBLE] {
        // we have a double
        if ar[OUTPUT_DROP] > ar[OUTPUT_TAKE] {
            // DP > DT >= ND: double, take
            let optional = is_optional(ar[OUTPUT_TAKE], ar[OUTPUT_NODOUBLE]);

            ar[OUTPUT_OPTIMAL] = ar[OUTPUT_TAKE];

            if !ci.is_match()
                && (-2.0..=0.0).contains(&ar[OUTPUT_TAKE])
                && ci.beavers
            {
                if ar[OUTPUT_TAKE] * 2.0 < ar[OUTPUT_NODOUBLE] {
                    // not a double if the opponent can beaver
                    CubeDecision::NoDoubleBeaver
                } else if optional {
                    // beaver (Jacoby paradox)
                    CubeDecision::OptionalDoubleBeaver
                } else {
                    CubeDecision::DoubleBeaver
                }
            } else if optional {
                if centered {
                    CubeDecision::OptionalDoubleTake
                } else {
                    CubeDecision::OptionalRedoubleTake
                }
            } else if centered {
                CubeDecision::DoubleTake
            } else {
                CubeDecision::RedoubleTake
            }
        } else {
            // DT >= DP >= ND: double, pass. The double is optional only if
            // the no-double and drop equities tie, a gammon is still
            // possible, and gammons count (match play, turned cube, or no
            // Jacoby rule).
            ar[OUTPUT_OPTIMAL] = ar[OUTPUT_DROP];

            if is_optional(ar[OUTPUT_NODOUBLE], ar[OUTPUT_DROP])
                && win_gammon(&outputs[0])
                && (ci.is_match() || ci.owner != -1 || !ci.jacoby)
            {
                if centered {
                    CubeDecision::OptionalDoublePass
                } else {
                    CubeDecision::OptionalRedoublePass
                }
            } else if centered {
                CubeDecision::DoublePass
            } else {
                CubeDecision::RedoublePass
            }
        }
    } else {
        // no double: ND > DT or ND > DP
        ar[OUTPUT_OPTIMAL] = ar[OUTPUT_NODOUBLE];

        if ar[OUTPUT_NODOUBLE] > ar[OUTPUT_TAKE] {
            if ar[OUTPUT_TAKE] > ar[OUTPUT_DROP] {
                // ND > DT > DP: too good, pass. Don't play on for a gammon
                // if none is possible.
                if win_gammon(&outputs[0]) {
                    if centered {
                        CubeDecision::TooGoodPass
                    } else {
                        CubeDecision::TooGoodRePass
                    }
                } else if centered {
                    CubeDecision::DoublePass
                } else {
                    CubeDecision::RedoublePass
                }
            } else if ar[OUTPUT_NODOUBLE] > ar[OUTPUT_DROP] {
                // ND > DP > DT: too good, take
                if win_gammon(&outputs[0]) {
                    if centered {
                        CubeDecision::TooGoodTake
                    } else {
                        CubeDecision::TooGoodReTake
                    }
                } else if centered {
                    CubeDecision::NoDoubleTake
                } else {
                    CubeDecision::NoRedoubleTake
                }
            } else {
                // DP > ND > DT: no double, take or beaver
                if (-2.0..=0.0).contains(&ar[OUTPUT_TAKE]) && !ci.is_match() && ci.beavers {
                    if centered {
                        CubeDecision::NoDoubleBeaver
                    } else {
                        CubeDecision::NoRedoubleBeaver
                    }
                } else if centered {
                    CubeDecision::NoDoubleTake
                } else {
                    CubeDecision::NoRedoubleTake
                }
            }
        } else {
            // DT >= ND > DP: too good, pass
            if win_gammon(&outputs[0]) {
                if centered {
                    CubeDecision::TooGoodPass
                } else {
                    CubeDecision::TooGoodRePass
                }
            } else if centered {
                CubeDecision::DoublePass
            } else {
                CubeDecision::RedoublePass
            }
        }
    }
}

/// Fills the equity array from a pair of cubeful evaluations (no double /
/// double) and classifies the cube action. Match mwc's are converted to
/// normalized equities first.
pub fn find_cube_decision(
    ar: &mut [f32; NUM_CUBEFUL_OUTPUTS],
    outputs: &[[f32; NUM_ROLLOUT_OUTPUTS]; 2],
    ci: &CubeInfo,
    met: &MatchEquityTable,
) -> CubeDecision {
    ar[OUTPUT_DROP] = ci.double_pass_equity(met);
    ar[OUTPUT_NODOUBLE] = outputs[0][OUTPUT_CUBEFUL_EQUITY];
    ar[OUTPUT_TAKE] = outputs[1][OUTPUT_CUBEFUL_EQUITY];

    if ci.is_match() {
        for i in 1..NUM_CUBEFUL_OUTPUTS {
            ar[i] = mwc2eq(ar[i], ci, met);
        }
    }

    best_cube_decision(ar, outputs, ci)
}

fn do_cubeful(ci: &CubeInfo) -> bool {
    if ci.score[0] + ci.cube as i32 >= ci.match_to && ci.score[1] + ci.cube as i32 >= ci.match_to {
        // cube is dead
        return false;
    }
    if ci.score[0] == ci.match_to - 2 && ci.score[1] == ci.match_to - 2 {
        return false;
    }
    if ci.crawford {
        return false;
    }
    true
}

/// Gammon and backgammon fractions of the wins (`[0]`) and the losses
/// (`[1]`) of the player the outputs belong to.
fn ratios(ar: &[f32]) -> ([f32; 2], [f32; 2]) {
    let mut g = [0f32; 2];
    let mut bg = [0f32; 2];

    if ar[OUTPUT_WIN] > 0.0 {
        g[0] = (ar[OUTPUT_WINGAMMON] - ar[OUTPUT_WINBACKGAMMON]) / ar[OUTPUT_WIN];
        bg[0] = ar[OUTPUT_WINBACKGAMMON] / ar[OUTPUT_WIN];
    }
    if ar[OUTPUT_WIN] < 1.0 {
        g[1] = (ar[OUTPUT_LOSEGAMMON] - ar[OUTPUT_LOSEBACKGAMMON]) / (1.0 - ar[OUTPUT_WIN]);
        bg[1] = ar[OUTPUT_LOSEBACKGAMMON] / (1.0 - ar[OUTPUT_WIN]);
    }
    (g, bg)
}

fn cube_prime(i: i32, j: i32, cube_value: i32) -> i32 {
    if i < 2 * cube_value && j >= 2 * cube_value {
        // automatic redouble
        2 * cube_value
    } else {
        cube_value
    }
}

/// Live-cube cash points for both players, needed for the piecewise mwc
/// interpolation in the match-play cubeful transform. Accounts for the
/// cascade of future (re)doubles by working down from the largest cube
/// that is still alive at this score.
pub fn cash_points(ar: &[f32], ci: &CubeInfo, met: &MatchEquityTable) -> [f32; 2] {
    let i = ci.match_to - ci.score[0] - 1;
    let j = ci.match_to - ci.score[1] - 1;
    let cube = ci.cube as i32;

    // gammon ratios per player; the outputs are for the player on roll
    let (g_roll, bg_roll) = ratios(ar);
    let (mut ar_g, mut ar_bg) = ([0f32; 2], [0f32; 2]);
    let roll = ci.on_roll;
    ar_g[roll] = g_roll[0];
    ar_bg[roll] = bg_roll[0];
    ar_g[1 - roll] = g_roll[1];
    ar_bg[1 - roll] = bg_roll[1];

    // largest cube value either player could still give
    let mut n_dead = cube;
    let mut n_max = 0usize;
    while i >= 2 * n_dead && j >= 2 * n_dead && n_max + 1 < MAX_CUBE_LEVEL {
        n_max += 1;
        n_dead *= 2;
    }

    let mut live = [[0f32; MAX_CUBE_LEVEL]; 2];
    let mut cube_value = n_dead;
    let mut n = n_max;

    loop {
        let results = met.me_multiple(
            ci.score[0],
            ci.score[1],
            ci.match_to,
            cube_value,
            cube_prime(i, j, cube_value),
            cube_prime(j, i, cube_value),
            ci.crawford,
        );

        for k in 0..2 {
            let o = 1 - k;
            // the top cube is dead even when the level cap, not the
            // score, ended the cascade
            if i < 2 * cube_value || j < 2 * cube_value || n == n_max {
                // the doubled cube is going to be dead
                let (dtl, dtlg, dtlb, dtw, dtwg, dtwb) = if k == 0 {
                    (mi::DTLP0, mi::DTLGP0, mi::DTLBP0, mi::DTWP0, mi::DTWGP0, mi::DTWBP0)
                } else {
                    (mi::DTLP1, mi::DTLGP1, mi::DTLBP1, mi::DTWP1, mi::DTWGP1, mi::DTWBP1)
                };

                let r_dtl = (1.0 - ar_g[o] - ar_bg[o]) * results[k][dtl]
                    + ar_g[o] * results[k][dtlg]
                    + ar_bg[o] * results[k][dtlb];
                let r_dp = results[k][mi::DP];
                let r_dtw = (1.0 - ar_g[k] - ar_bg[k]) * results[k][dtw]
                    + ar_g[k] * results[k][dtwg]
                    + ar_bg[k] * results[k][dtwb];

                live[k][n] = (r_dtl - r_dp) / (r_dtl - r_dtw);
            } else {
                // doubled cube stays alive: redouble/pass bounds the window
                let r_rdp = results[k][mi::DTL];
                let r_dp = results[k][mi::DP];
                let r_dtw = (1.0 - ar_g[k] - ar_bg[k]) * results[k][mi::DTW]
                    + ar_g[k] * results[k][mi::DTWG]
                    + ar_bg[k] * results[k][mi::DTWB];

                live[k][n] = 1.0 - live[o][n + 1] * (r_dp - r_dtw) / (r_rdp - r_dtw);
            }
        }

        if cube_value == cube {
            break;
        }
        cube_value >>= 1;
        n -= 1;
    }

    [live[0][0], live[1][0]]
}

/// Exact money cubeful equity from a two-sided bearoff record
/// `[cubeless, owned, centered, opponent-owned]`.
pub fn cf_money(equities: &[f32; 4], ci: &CubeInfo) -> f32 {
    if ci.owner == -1 {
        equities[2]
    } else if ci.owner == ci.on_roll as i8 {
        equities[1]
    } else {
        equities[3]
    }
}

/// Exact money cubeful equity from a hypergammon record, which stores the
/// centered-Jacoby equity separately.
pub fn cf_hyper(equities: &[f32; 4], ci: &CubeInfo) -> f32 {
    if ci.owner == -1 {
        if ci.jacoby {
            equities[2]
        } else {
            equities[1]
        }
    } else if ci.owner == ci.on_roll as i8 {
        equities[0]
    } else {
        equities[3]
    }
}

/// Money-game cubeless to cubeful equity via Janowski's interpolation with
/// cube efficiency `cube_x`.
pub fn cl2cf_money(ar: &[f32], ci: &CubeInfo, cube_x: f32) -> f32 {
    const EPSILON: f32 = 0.0000001;
    const OM_EPSILON: f32 = 0.9999999;

    // average win and loss sizes W and L
    if ar[OUTPUT_WIN] <= EPSILON || ar[OUTPUT_WIN] >= OM_EPSILON {
        // basically a dead cube
        return utility(ar, ci);
    }

    let w = 1.0 + (ar[OUTPUT_WINGAMMON] + ar[OUTPUT_WINBACKGAMMON]) / ar[OUTPUT_WIN];
    let l = 1.0 + (ar[OUTPUT_LOSEGAMMON] + ar[OUTPUT_LOSEBACKGAMMON]) / (1.0 - ar[OUTPUT_WIN]);

    let eq_dead = utility(ar, ci);
    let eq_live = money_live(w, l, ar[OUTPUT_WIN], ci);

    eq_dead * (1.0 - cube_x) + eq_live * cube_x
}

/// Fully live money equity at winning chance `p`, by linear interpolation
/// between the take and cash points.
fn money_live(w: f32, l: f32, p: f32, ci: &CubeInfo) -> f32 {
    if ci.owner == -1 {
        // centered cube
        let tp = (l - 0.5) / (w + l + 0.5);
        let cp = (l + 1.0) / (w + l + 0.5);

        if p < tp {
            if ci.jacoby {
                -1.0
            } else {
                -l + (-1.0 + l) * p / tp
            }
        } else if p < cp {
            -1.0 + 2.0 * (p - tp) / (cp - tp)
        } else if ci.jacoby {
            1.0
        } else {
            1.0 + (w - 1.0) * (p - cp) / (1.0 - cp)
        }
    } else if ci.owner == ci.on_roll as i8 {
        // owned cube: no take point below the cash point
        let cp = (l + 1.0) / (w + l + 0.5);

        if p < cp {
            -l + (1.0 + l) * p / cp
        } else {
            1.0 + (w - 1.0) * (p - cp) / (1.0 - cp)
        }
    } else {
        // unavailable cube
        let tp = (l - 0.5) / (w + l + 0.5);

        if p < tp {
            -l + (-1.0 + l) * p / tp
        } else {
            -1.0 + (w + 1.0) * (p - tp) / (1.0 - tp)
        }
    }
}

/// Match-play cubeless to cubeful conversion; the result is mwc for the
/// player on roll.
pub fn cl2cf_match(ar: &[f32], ci: &CubeInfo, cube_x: f32, met: &MatchEquityTable) -> f32 {
    if !do_cubeful(ci) {
        return eq2mwc(utility(ar, ci), ci, met);
    }

    if ci.owner == -1 {
        cl2cf_match_centered(ar, ci, cube_x, met)
    } else if ci.owner == ci.on_roll as i8 {
        cl2cf_match_owned(ar, ci, cube_x, met)
    } else {
        cl2cf_match_unavailable(ar, ci, cube_x, met)
    }
}

fn cl2cf_match_centered(ar: &[f32], ci: &CubeInfo, cube_x: f32, met: &MatchEquityTable) -> f32 {
    let (g, bg) = ratios(ar);

    let mwc_dead = eq2mwc(utility(ar, ci), ci, met);
    let cp = cash_points(ar, ci, met);

    let results = met.me_multiple(
        ci.score[0],
        ci.score[1],
        ci.match_to,
        ci.cube as i32,
        -1,
        -1,
        ci.crawford,
    );
    let res = &results[ci.on_roll];

    let mwc_cash = res[mi::NDW];
    let mwc_opp_cash = res[mi::NDL];

    let opp_tg = 1.0 - cp[1 - ci.on_roll];
    let tg = cp[ci.on_roll];

    let mwc_live = if ar[OUTPUT_WIN] <= opp_tg {
        // opponent is too good to double
        let mwc_lose =
            (1.0 - g[1] - bg[1]) * res[mi::NDL] + g[1] * res[mi::NDLG] + bg[1] * res[mi::NDLB];

        if opp_tg > 0.0 {
            mwc_lose + (mwc_opp_cash - mwc_lose) * ar[OUTPUT_WIN] / opp_tg
        } else {
            mwc_lose
        }
    } else if ar[OUTPUT_WIN] < tg {
        // inside the doubling window
        mwc_opp_cash + (mwc_cash - mwc_opp_cash) * (ar[OUTPUT_WIN] - opp_tg) / (tg - opp_tg)
    } else {
        // too good to double: from cashing to winning outright
        let mwc_win =
            (1.0 - g[0] - bg[0]) * res[mi::NDW] + g[0] * res[mi::NDWG] + bg[0] * res[mi::NDWB];

        if tg < 1.0 {
            mwc_cash + (mwc_win - mwc_cash) * (ar[OUTPUT_WIN] - tg) / (1.0 - tg)
        } else {
            mwc_win
        }
    };

    mwc_dead * (1.0 - cube_x) + mwc_live * cube_x
}

fn cl2cf_match_owned(ar: &[f32], ci: &CubeInfo, cube_x: f32, met: &MatchEquityTable) -> f32 {
    let (g, bg) = ratios(ar);

    let mwc_dead = eq2mwc(utility(ar, ci), ci, met);
    let cp = cash_points(ar, ci, met);

    let results = met.me_multiple(
        ci.score[0],
        ci.score[1],
        ci.match_to,
        ci.cube as i32,
        -1,
        -1,
        ci.crawford,
    );
    let res = &results[ci.on_roll];

    let mwc_cash = res[mi::NDW];
    let tg = cp[ci.on_roll];

    let mwc_live = if ar[OUTPUT_WIN] <= tg {
        // from losing outright to cashing at the doubling point
        let mwc_lose =
            (1.0 - g[1] - bg[1]) * res[mi::NDL] + g[1] * res[mi::NDLG] + bg[1] * res[mi::NDLB];

        if tg > 0.0 {
            mwc_lose + (mwc_cash - mwc_lose) * ar[OUTPUT_WIN] / tg
        } else {
            mwc_lose
        }
    } else {
        // too good to double
        let mwc_win =
            (1.0 - g[0] - bg[0]) * res[mi::NDW] + g[0] * res[mi::NDWG] + bg[0] * res[mi::NDWB];

        if tg < 1.0 {
            mwc_cash + (mwc_win - mwc_cash) * (ar[OUTPUT_WIN] - tg) / (1.0 - tg)
        } else {
            mwc_win
        }
    };

    mwc_dead * (1.0 - cube_x) + mwc_live * cube_x
}

fn cl2cf_match_unavailable(ar: &[f32], ci: &CubeInfo, cube_x: f32, met: &MatchEquityTable) -> f32 {
    let (g, bg) = ratios(ar);

    let mwc_dead = eq2mwc(utility(ar, ci), ci, met);
    let cp = cash_points(ar, ci, met);

    let results = met.me_multiple(
        ci.score[0],
        ci.score[1],
        ci.match_to,
        ci.cube as i32,
        -1,
        -1,
        ci.crawford,
    );
    let res = &results[ci.on_roll];

    let mwc_opp_cash = res[mi::NDL];
    let opp_tg = 1.0 - cp[1 - ci.on_roll];

    let mwc_live = if ar[OUTPUT_WIN] <= opp_tg {
        // opponent is too good to double
        let mwc_lose =
            (1.0 - g[1] - bg[1]) * res[mi::NDL] + g[1] * res[mi::NDLG] + bg[1] * res[mi::NDLB];

        if opp_tg > 0.0 {
            mwc_lose + (mwc_opp_cash - mwc_lose) * ar[OUTPUT_WIN] / opp_tg
        } else {
            mwc_lose
        }
    } else {
        // from the opponent cashing to winning outright
        let mwc_win =
            (1.0 - g[0] - bg[0]) * res[mi::NDW] + g[0] * res[mi::NDWG] + bg[0] * res[mi::NDWB];

        mwc_opp_cash + (mwc_win - mwc_opp_cash) * (ar[OUTPUT_WIN] - opp_tg) / (1.0 - opp_tg)
    };

    mwc_dead * (1.0 - cube_x) + mwc_live * cube_x
}

/// Cube efficiency for Janowski's formula, by position class. Races scale
/// with the pip count of the player on roll; contact positions use a flat
/// semi-empirical value.
pub fn eval_efficiency(board: &Board, class: PositionClass, is_match: bool) -> f32 {
    match class {
        PositionClass::Over => 0.0,

        PositionClass::Hypergammon1 | PositionClass::Hypergammon2 | PositionClass::Hypergammon3 => {
            HYPER_X
        }

        PositionClass::BearoffOneSided | PositionClass::BearoffOneSidedWide => OS_CUBE_X,

        PositionClass::Race => {
            let (_, pips) = board.pip_count();
            (pips as f32 * RACE_FACTOR_X + RACE_COEFFICIENT_X).clamp(RACE_MIN_X, RACE_MAX_X)
        }

        PositionClass::Contact => CONTACT_X,
        PositionClass::Crashed => CRASHED_X,

        PositionClass::BearoffTwoSided | PositionClass::BearoffTwoSidedWide => {
            if is_match {
                TS_CUBE_X
            } else {
                OS_CUBE_X
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tavla_core::NUM_OUTPUTS;

    fn met() -> MatchEquityTable {
        MatchEquityTable::default()
    }

    fn rollout_outputs(ar: [f32; NUM_OUTPUTS], cubeful: [f32; 2]) -> [[f32; NUM_ROLLOUT_OUTPUTS]; 2] {
        let mut out = [[0f32; NUM_ROLLOUT_OUTPUTS]; 2];
        for side in 0..2 {
            out[side][..NUM_OUTPUTS].copy_from_slice(&ar);
            out[side][OUTPUT_CUBEFUL_EQUITY] = cubeful[side];
        }
        out
    }

    #[test]
    fn money_cube_validates_inputs() {
        assert!(CubeInfo::money(0, -1, 0, false, false, Variant::Standard).is_err());
        assert!(CubeInfo::money(1, 2, 0, false, false, Variant::Standard).is_err());
        assert!(CubeInfo::money(1, -1, 2, false, false, Variant::Standard).is_err());
        assert!(CubeInfo::money(2, 1, 1, true, true, Variant::Standard).is_ok());
    }

    #[test]
    fn jacoby_kills_centered_gammon_prices() {
        let ci = CubeInfo::money(1, -1, 0, true, false, Variant::Standard).unwrap();
        assert_eq!(ci.gammon_price, [0.0; 4]);

        // a turned cube restores them
        let ci = CubeInfo::money(2, 0, 0, true, false, Variant::Standard).unwrap();
        assert_eq!(ci.gammon_price, [1.0; 4]);

        let ci = CubeInfo::money(1, -1, 0, false, false, Variant::Standard).unwrap();
        assert_eq!(ci.gammon_price, [1.0; 4]);
    }

    #[test]
    fn match_cube_validates_score() {
        let t = met();
        assert!(
            CubeInfo::match_play(1, -1, 0, 7, [7, 0], false, Variant::Standard, &t).is_err()
        );
        assert!(CubeInfo::match_play(1, -1, 0, 0, [0, 0], false, Variant::Standard, &t).is_err());
        assert!(CubeInfo::match_play(1, -1, 0, 7, [5, 3], false, Variant::Standard, &t).is_ok());

        // the equity tables stop at 64-point matches
        assert!(CubeInfo::match_play(1, -1, 0, 64, [0, 0], false, Variant::Standard, &t).is_ok());
        assert!(CubeInfo::match_play(1, -1, 0, 65, [0, 0], false, Variant::Standard, &t).is_err());
    }

    #[test]
    fn cash_points_survive_a_capped_cube_cascade() {
        let t = met();
        let base =
            CubeInfo::match_play(1, -1, 0, 64, [0, 0], false, Variant::Standard, &t).unwrap();
        // a hand-built score so long that the doubling cascade hits the
        // precomputed cube levels before the match length does
        let ci = CubeInfo {
            match_to: 129,
            ..base
        };

        let ar = [0.5f32, 0.15, 0.05, 0.15, 0.05];
        let points = cash_points(&ar, &ci, &t);
        assert!(points.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn match_gammon_prices_follow_the_table() {
        let t = met();
        let ci = CubeInfo::match_play(2, 0, 0, 9, [2, 4], false, Variant::Standard, &t).unwrap();
        assert_eq!(ci.gammon_price, t.gammon_price(2, 7, 5));

        // leader at 1-away, not Crawford: post-Crawford prices
        let ci = CubeInfo::match_play(1, -1, 0, 7, [6, 3], false, Variant::Standard, &t).unwrap();
        assert_eq!(ci.gammon_price, t.gammon_price_post_crawford(1, 4, 0));
    }

    #[test]
    fn utility_money_pure_win() {
        let ci = CubeInfo::money(1, -1, 0, false, false, Variant::Standard).unwrap();
        assert!((utility(&[1.0, 0.0, 0.0, 0.0, 0.0], &ci) - 1.0).abs() < 1e-6);
        assert!((utility(&[0.0, 0.0, 0.0, 0.0, 0.0], &ci) + 1.0).abs() < 1e-6);
        // a certain gammon is worth two points
        assert!((utility(&[1.0, 1.0, 0.0, 0.0, 0.0], &ci) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn utility_me_ignores_jacoby() {
        let ci = CubeInfo::money(1, -1, 0, true, false, Variant::Standard).unwrap();
        let ar = [0.6, 0.2, 0.0, 0.1, 0.0];
        assert!((utility(&ar, &ci) - 0.2).abs() < 1e-6);
        assert!((utility_me(&ar, &ci) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn mwc_eq_roundtrip() {
        let t = met();
        let ci = CubeInfo::match_play(1, -1, 0, 7, [2, 4], false, Variant::Standard, &t).unwrap();
        for &eq in &[-1.0f32, -0.25, 0.0, 0.5, 1.0] {
            let mwc = eq2mwc(eq, &ci, &t);
            assert!((mwc2eq(mwc, &ci, &t) - eq).abs() < 1e-5);
        }
        // zero equity maps to the current mwc midpoint
        let mid = eq2mwc(0.0, &ci, &t);
        assert!((0.0..=1.0).contains(&mid));
    }

    #[test]
    fn cube_availability() {
        let t = met();

        // money: centered or owned
        let ci = CubeInfo::money(1, -1, 0, false, false, Variant::Standard).unwrap();
        assert!(ci.cube_available());
        let ci = CubeInfo::money(2, 1, 0, false, false, Variant::Standard).unwrap();
        assert!(!ci.cube_available());

        // Crawford game: never
        let ci = CubeInfo::match_play(1, -1, 0, 7, [6, 3], true, Variant::Standard, &t).unwrap();
        assert!(!ci.cube_available());

        // dead cube: doubling cannot gain anything
        let ci = CubeInfo::match_play(4, 0, 0, 7, [4, 0], false, Variant::Standard, &t).unwrap();
        assert!(!ci.cube_available());

        // post-Crawford leader at 1-away has a free drop, not a double
        let ci = CubeInfo::match_play(1, -1, 0, 7, [6, 3], false, Variant::Standard, &t).unwrap();
        assert!(!ci.cube_available());
        // while the trailer may double immediately
        let ci = CubeInfo::match_play(1, -1, 1, 7, [6, 3], false, Variant::Standard, &t).unwrap();
        assert!(ci.cube_available());
    }

    #[test]
    fn double_pass_equity_money_is_one() {
        let t = met();
        let ci = CubeInfo::money(1, -1, 0, false, false, Variant::Standard).unwrap();
        assert_eq!(ci.double_pass_equity(&t), 1.0);

        let ci = CubeInfo::match_play(1, -1, 0, 7, [2, 4], false, Variant::Standard, &t).unwrap();
        let dp = ci.double_pass_equity(&t);
        assert!((mwc2eq(dp, &ci, &t) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cube_decisions_money() {
        let ci = CubeInfo::money(1, -1, 0, false, false, Variant::Standard).unwrap();
        let outputs = rollout_outputs([0.75, 0.1, 0.0, 0.05, 0.0], [0.0, 0.0]);

        // DP > DT >= ND: double, take
        let mut ar = [0.0, 0.5, 0.6, 1.0];
        assert_eq!(
            best_cube_decision(&mut ar, &outputs, &ci),
            CubeDecision::DoubleTake
        );
        assert_eq!(ar[OUTPUT_OPTIMAL], ar[OUTPUT_TAKE]);

        // DT >= DP >= ND: double, pass
        let mut ar = [0.0, 0.8, 1.2, 1.0];
        assert_eq!(
            best_cube_decision(&mut ar, &outputs, &ci),
            CubeDecision::DoublePass
        );
        assert_eq!(ar[OUTPUT_OPTIMAL], ar[OUTPUT_DROP]);

        // ND > DT, DT > DP: too good with gammons coming
        let mut ar = [0.0, 1.2, 1.1, 1.0];
        assert_eq!(
            best_cube_decision(&mut ar, &outputs, &ci),
            CubeDecision::TooGoodPass
        );

        // DP > ND > DT: no double
        let mut ar = [0.0, 0.5, 0.3, 1.0];
        assert_eq!(
            best_cube_decision(&mut ar, &outputs, &ci),
            CubeDecision::NoDoubleTake
        );

        // redouble variants when the cube is owned
        let ci = CubeInfo::money(2, 0, 0, false, false, Variant::Standard).unwrap();
        let mut ar = [0.0, 0.5, 0.6, 1.0];
        assert_eq!(
            best_cube_decision(&mut ar, &outputs, &ci),
            CubeDecision::RedoubleTake
        );
    }

    #[test]
    fn cube_decisions_beavers() {
        let ci = CubeInfo::money(1, -1, 0, false, true, Variant::Standard).unwrap();
        let outputs = rollout_outputs([0.4, 0.05, 0.0, 0.1, 0.0], [0.0, 0.0]);

        // doubling into a beaver loses: 2 * DT < ND
        let mut ar = [0.0, -0.5, -0.4, 1.0];
        assert_eq!(
            best_cube_decision(&mut ar, &outputs, &ci),
            CubeDecision::NoDoubleBeaver
        );

        // Jacoby paradox: the double is correct even though the opponent
        // beavers
        let mut ar = [0.0, -0.9, -0.4, 1.0];
        assert_eq!(
            best_cube_decision(&mut ar, &outputs, &ci),
            CubeDecision::DoubleBeaver
        );
    }

    #[test]
    fn cube_decisions_dead_and_unavailable() {
        let t = met();

        // Crawford, centered: dead cube
        let ci = CubeInfo::match_play(1, -1, 0, 7, [6, 3], true, Variant::Standard, &t).unwrap();
        let outputs = rollout_outputs([0.6, 0.1, 0.0, 0.05, 0.0], [0.0, 0.0]);
        let mut ar = [0.0, 0.2, 0.3, 1.0];
        assert_eq!(
            best_cube_decision(&mut ar, &outputs, &ci),
            CubeDecision::NoDoubleDeadCube
        );
        assert_eq!(ar[OUTPUT_OPTIMAL], ar[OUTPUT_NODOUBLE]);

        // opponent owns the cube
        let ci = CubeInfo::match_play(2, 1, 0, 7, [2, 3], false, Variant::Standard, &t).unwrap();
        let mut ar = [0.0, 0.2, 0.3, 1.0];
        assert_eq!(
            best_cube_decision(&mut ar, &outputs, &ci),
            CubeDecision::NotAvailable
        );
    }

    #[test]
    fn optional_double_needs_gammons() {
        let ci = CubeInfo::money(1, -1, 0, false, false, Variant::Standard).unwrap();

        // ND and DP tie exactly; gammons still possible
        let outputs = rollout_outputs([0.8, 0.3, 0.0, 0.02, 0.0], [0.0, 0.0]);
        let mut ar = [0.0, 1.0, 1.5, 1.0];
        assert_eq!(
            best_cube_decision(&mut ar, &outputs, &ci),
            CubeDecision::OptionalDoublePass
        );

        // no gammons: plain double/pass
        let outputs = rollout_outputs([0.8, 0.0, 0.0, 0.02, 0.0], [0.0, 0.0]);
        let mut ar = [0.0, 1.0, 1.5, 1.0];
        assert_eq!(
            best_cube_decision(&mut ar, &outputs, &ci),
            CubeDecision::DoublePass
        );
    }

    #[test]
    fn find_cube_decision_converts_match_mwc() {
        let t = met();
        let ci = CubeInfo::match_play(1, -1, 0, 7, [2, 2], false, Variant::Standard, &t).unwrap();

        // no-double mwc slightly better than double/take: no double
        let nd = eq2mwc(0.4, &ci, &t);
        let dt = eq2mwc(0.3, &ci, &t);
        let outputs = rollout_outputs([0.65, 0.1, 0.0, 0.05, 0.0], [nd, dt]);

        let mut ar = [0f32; NUM_CUBEFUL_OUTPUTS];
        let decision = find_cube_decision(&mut ar, &outputs, &ci, &t);
        assert_eq!(decision, CubeDecision::NoDoubleTake);
        assert!((ar[OUTPUT_NODOUBLE] - 0.4).abs() < 1e-4);
        assert!((ar[OUTPUT_TAKE] - 0.3).abs() < 1e-4);
        assert!((ar[OUTPUT_DROP] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn money_live_interpolation_endpoints() {
        let ci = CubeInfo::money(1, -1, 0, false, false, Variant::Standard).unwrap();
        // plain race: W = L = 1
        assert!((money_live(1.0, 1.0, 0.0, &ci) + 1.0).abs() < 1e-6);
        assert!((money_live(1.0, 1.0, 1.0, &ci) - 1.0).abs() < 1e-6);
        // cash point of a gammonless centered game is 0.8
        assert!((money_live(1.0, 1.0, 0.8, &ci) - 1.0).abs() < 1e-6);
        // take point is 0.2
        assert!((money_live(1.0, 1.0, 0.2, &ci) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cl2cf_money_blends_dead_and_live() {
        let ci = CubeInfo::money(1, -1, 0, false, false, Variant::Standard).unwrap();
        let ar = [0.6f32, 0.15, 0.01, 0.1, 0.005];

        // with zero efficiency the cube adds nothing
        let dead = cl2cf_money(&ar, &ci, 0.0);
        assert!((dead - utility(&ar, &ci)).abs() < 1e-6);

        // cube access is worth something for the favourite
        let cubeful = cl2cf_money(&ar, &ci, 0.68);
        assert!(cubeful > dead);

        // decided games fall back to the dead-cube equity
        let won = [1.0f32, 0.0, 0.0, 0.0, 0.0];
        assert!((cl2cf_money(&won, &ci, 0.68) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cl2cf_match_crawford_is_cubeless() {
        let t = met();
        let ci = CubeInfo::match_play(1, -1, 0, 7, [6, 3], true, Variant::Standard, &t).unwrap();
        let ar = [0.55f32, 0.1, 0.0, 0.08, 0.0];
        let mwc = cl2cf_match(&ar, &ci, 0.68, &t);
        assert!((mwc - eq2mwc(utility(&ar, &ci), &ci, &t)).abs() < 1e-6);
    }

    #[test]
    fn cl2cf_match_stays_a_probability() {
        let t = met();
        for &(owner, on_roll) in &[(-1i8, 0usize), (0, 0), (1, 0), (-1, 1), (0, 1)] {
            let ci =
                CubeInfo::match_play(1, owner, on_roll, 9, [2, 4], false, Variant::Standard, &t)
                    .unwrap();
            for &win in &[0.2f32, 0.5, 0.8] {
                let ar = [win, win * 0.2, 0.0, (1.0 - win) * 0.2, 0.0];
                let mwc = cl2cf_match(&ar, &ci, 0.68, &t);
                assert!(
                    (0.0..=1.0).contains(&mwc),
                    "owner {owner} on_roll {on_roll} win {win}: mwc {mwc}"
                );
            }
        }
    }

    #[test]
    fn cash_points_are_inside_the_unit_interval() {
        let t = met();
        let ci = CubeInfo::match_play(1, -1, 0, 9, [2, 2], false, Variant::Standard, &t).unwrap();
        let ar = [0.5f32, 0.12, 0.0, 0.12, 0.0];
        let cp = cash_points(&ar, &ci, &t);

        for (k, &p) in cp.iter().enumerate() {
            assert!((0.0..=1.0).contains(&p), "cash point {k} = {p}");
        }
        // symmetric score and distribution: both cash points agree
        assert!((cp[0] - cp[1]).abs() < 1e-4);
        // doubling well before certainty
        assert!(cp[0] > 0.5 && cp[0] < 1.0);
    }

    #[test]
    fn efficiency_by_class() {
        let board = Board::starting(Variant::Standard);
        assert_eq!(eval_efficiency(&board, PositionClass::Over, false), 0.0);
        assert_eq!(
            eval_efficiency(&board, PositionClass::Contact, false),
            CONTACT_X
        );
        assert_eq!(
            eval_efficiency(&board, PositionClass::Crashed, false),
            CRASHED_X
        );
        assert_eq!(
            eval_efficiency(&board, PositionClass::Hypergammon2, false),
            HYPER_X
        );
        assert_eq!(
            eval_efficiency(&board, PositionClass::BearoffTwoSided, true),
            TS_CUBE_X
        );

        // long race: efficiency grows with pips but stays clamped
        let mut long_race = Board::empty();
        long_race[1][23] = 15;
        long_race[0][23] = 15;
        let eff = eval_efficiency(&long_race, PositionClass::Race, false);
        assert!((RACE_MIN_X..=RACE_MAX_X).contains(&eff));

        let mut short_race = Board::empty();
        short_race[1][0] = 2;
        short_race[0][0] = 2;
        assert_eq!(
            eval_efficiency(&short_race, PositionClass::Race, false),
            RACE_MIN_X
        );
    }
}
