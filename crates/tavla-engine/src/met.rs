//! Match equity tables, computed at startup with Thornberg's match equity
//! calculator recursion, plus the gammon prices derived from them.
//!
//! All tables are stored for player 0; entries for player 1 follow from
//! `1 - E`. Away distances index from zero, so `met[i][j]` is the match
//! winning chance of player 0 at `i+1`-away, `j+1`-away.

/// Largest match length the tables cover.
pub const MAX_SCORE: usize = 64;

/// Cube levels with precomputed gammon prices (cube 1 through 64).
pub const MAX_CUBE_LEVEL: usize = 7;

/// Parameters of the generated table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetParams {
    /// Fraction of won or lost games that are gammons.
    pub gammon_rate: f32,
    /// Single-game winning chance of the nominal favourite.
    pub win_rate: f32,
    /// Post-Crawford free-drop vigorish at 1-away, 2-away.
    pub free_drop_2away: f32,
    /// Post-Crawford free-drop vigorish at 1-away, 4-away.
    pub free_drop_4away: f32,
}

impl Default for MetParams {
    fn default() -> Self {
        Self {
            gammon_rate: 0.26,
            win_rate: 0.5,
            free_drop_2away: 0.015,
            free_drop_4away: 0.004,
        }
    }
}

/// Pre- and post-Crawford match equities plus the gammon prices at every
/// score and cube level.
pub struct MatchEquityTable {
    met: Vec<[f32; MAX_SCORE]>,
    met_post_crawford: [[f32; MAX_SCORE]; 2],
    /// `[cube level][away0 - 1][away1 - 1]` -> four gammon prices.
    gammon_prices: Vec<[f32; 4]>,
    /// `[cube level][trailer away - 1][leader]` -> four gammon prices.
    gammon_prices_post_crawford: Vec<[f32; 4]>,
}

impl Default for MatchEquityTable {
    fn default() -> Self {
        Self::from_params(&MetParams::default())
    }
}

impl MatchEquityTable {
    pub fn from_params(params: &MetParams) -> Self {
        let gr = f64::from(params.gammon_rate);
        let wr = f64::from(params.win_rate);

        let pc = mec_post_crawford(
            gr,
            wr,
            f64::from(params.free_drop_2away),
            f64::from(params.free_drop_4away),
        );

        let mut met_post_crawford = [[0f32; MAX_SCORE]; 2];
        for i in 0..MAX_SCORE {
            // both players get the same post-Crawford equities: the table
            // is generated from symmetric game parameters
            met_post_crawford[0][i] = pc[i] as f32;
            met_post_crawford[1][i] = pc[i] as f32;
        }

        let met = mec_pre_crawford(gr, wr, &pc);

        let mut table = Self {
            met,
            met_post_crawford,
            gammon_prices: Vec::new(),
            gammon_prices_post_crawford: Vec::new(),
        };
        table.calc_gammon_prices();
        table
    }

    /// Match winning chance for `player` if `who_wins` wins `points`
    /// points from the given score.
    pub fn get_me(
        &self,
        score0: i32,
        score1: i32,
        match_to: i32,
        player: usize,
        points: i32,
        who_wins: usize,
        crawford: bool,
    ) -> f32 {
        let n0 = match_to - (score0 + if who_wins == 0 { points } else { 0 }) - 1;
        let n1 = match_to - (score1 + if who_wins == 1 { points } else { 0 }) - 1;

        if n0 < 0 {
            // player 0 has won the match
            return if player == 1 { 0.0 } else { 1.0 };
        }
        if n1 < 0 {
            return if player == 1 { 1.0 } else { 0.0 };
        }

        let n0 = (n0 as usize).min(MAX_SCORE - 1);
        let n1 = (n1 as usize).min(MAX_SCORE - 1);

        if crawford || match_to - score0 == 1 || match_to - score1 == 1 {
            // the next game is post-Crawford
            if n0 == 0 {
                if player == 1 {
                    self.met_post_crawford[1][n1]
                } else {
                    1.0 - self.met_post_crawford[1][n1]
                }
            } else if player == 1 {
                1.0 - self.met_post_crawford[0][n0]
            } else {
                self.met_post_crawford[0][n0]
            }
        } else if player == 1 {
            1.0 - self.met[n0][n1]
        } else {
            self.met[n0][n1]
        }
    }

    /// Match winning chance for `player` at the given score, before the
    /// game in progress is decided.
    pub fn get_me_at_score(
        &self,
        score0: i32,
        score1: i32,
        match_to: i32,
        player: usize,
        crawford: bool,
    ) -> f32 {
        let n0 = match_to - score0 - 1;
        let n1 = match_to - score1 - 1;

        if n0 < 0 {
            return if player == 1 { 0.0 } else { 1.0 };
        }
        if n1 < 0 {
            return if player == 1 { 1.0 } else { 0.0 };
        }

        let n0 = (n0 as usize).min(MAX_SCORE - 1);
        let n1 = (n1 as usize).min(MAX_SCORE - 1);

        if !crawford && (match_to - score0 == 1 || match_to - score1 == 1) {
            // this game is already post-Crawford
            if n0 == 0 {
                if player == 1 {
                    self.met_post_crawford[1][n1]
                } else {
                    1.0 - self.met_post_crawford[1][n1]
                }
            } else if player == 1 {
                1.0 - self.met_post_crawford[0][n0]
            } else {
                self.met_post_crawford[0][n0]
            }
        } else if player == 1 {
            1.0 - self.met[n0][n1]
        } else {
            self.met[n0][n1]
        }
    }

    /// Gammon prices at `away0`-away, `away1`-away with the given cube.
    pub fn gammon_price(&self, cube: u32, away0: usize, away1: usize) -> [f32; 4] {
        let level = log_cube(cube);
        let a0 = (away0 - 1).min(MAX_SCORE - 1);
        let a1 = (away1 - 1).min(MAX_SCORE - 1);
        self.gammon_prices[(level * MAX_SCORE + a0) * MAX_SCORE + a1]
    }

    /// Post-Crawford gammon prices; `leader` is the player at 1-away and
    /// `away` the trailer's distance.
    pub fn gammon_price_post_crawford(&self, cube: u32, away: usize, leader: usize) -> [f32; 4] {
        let level = log_cube(cube);
        let a = (away - 1).min(MAX_SCORE - 1);
        self.gammon_prices_post_crawford[(level * MAX_SCORE + a) * 2 + leader]
    }

    /// Gammon and backgammon prices for both players at one score/cube,
    /// from the match equity swings of the six outcomes.
    fn price_at(&self, score0: i32, score1: i32, cube: i32, crawford: bool) -> [f32; 4] {
        const EPSILON: f32 = 1.0e-7;
        let match_to = MAX_SCORE as i32;

        let me = |points: i32, who_wins: usize| {
            self.get_me(score0, score1, match_to, 0, points, who_wins, crawford)
        };

        let r_win = me(cube, 0);
        let r_win_gammon = me(2 * cube, 0);
        let r_win_bg = me(3 * cube, 0);
        let r_lose = me(cube, 1);
        let r_lose_gammon = me(2 * cube, 1);
        let r_lose_bg = me(3 * cube, 1);

        let r_center = (r_win + r_lose) / 2.0;

        let mut price = [0f32; 4];
        if (r_win - r_center).abs() > EPSILON {
            price[0] = (r_win_gammon - r_center) / (r_win - r_center) - 1.0;
            price[1] = (r_center - r_lose_gammon) / (r_win - r_center) - 1.0;
            price[2] = (r_win_bg - r_center) / (r_win - r_center) - (price[0] + 1.0);
            price[3] = (r_center - r_lose_bg) / (r_win - r_center) - (price[1] + 1.0);
        }

        // a dead cube can produce tiny negative prices
        for p in &mut price {
            if *p < 0.0 {
                *p = 0.0;
            }
        }
        price
    }

    fn calc_gammon_prices(&mut self) {
        let score = |away: usize| (MAX_SCORE - away) as i32 - 1;

        self.gammon_prices = Vec::with_capacity(MAX_CUBE_LEVEL * MAX_SCORE * MAX_SCORE);
        for level in 0..MAX_CUBE_LEVEL {
            let cube = 1i32 << level;
            for j in 0..MAX_SCORE {
                for k in 0..MAX_SCORE {
                    self.gammon_prices
                        .push(self.price_at(score(j), score(k), cube, false));
                }
            }
        }

        self.gammon_prices_post_crawford = Vec::with_capacity(MAX_CUBE_LEVEL * MAX_SCORE * 2);
        for level in 0..MAX_CUBE_LEVEL {
            let cube = 1i32 << level;
            for j in 0..MAX_SCORE {
                // player 0 at 1-away, then player 1 at 1-away
                self.gammon_prices_post_crawford
                    .push(self.price_at(MAX_SCORE as i32 - 1, score(j), cube, false));
                self.gammon_prices_post_crawford
                    .push(self.price_at(score(j), MAX_SCORE as i32 - 1, cube, false));
            }
        }
    }
}

/// Indices into the per-player arrays returned by
/// [`MatchEquityTable::me_multiple`]. The first ten slots cover double/pass
/// and the win/loss outcomes at the given cube; the next two blocks of ten
/// repeat the outcome entries for the two alternative cube values.
pub mod me_index {
    pub const DP: usize = 0;
    pub const NDW: usize = 0;
    pub const DTW: usize = 1;
    pub const NDWG: usize = 1;
    pub const NDWB: usize = 2;
    pub const DTWG: usize = 3;
    pub const DTWB: usize = 4;
    pub const NDL: usize = 5;
    pub const DTL: usize = 6;
    pub const NDLG: usize = 6;
    pub const NDLB: usize = 7;
    pub const DTLG: usize = 8;
    pub const DTLB: usize = 9;

    pub const DPP0: usize = 10;
    pub const DTWP0: usize = 11;
    pub const NDWBP0: usize = 12;
    pub const DTWGP0: usize = 13;
    pub const DTWBP0: usize = 14;
    pub const NDLP0: usize = 15;
    pub const DTLP0: usize = 16;
    pub const NDLBP0: usize = 17;
    pub const DTLGP0: usize = 18;
    pub const DTLBP0: usize = 19;

    pub const DPP1: usize = 20;
    pub const DTWP1: usize = 21;
    pub const NDWBP1: usize = 22;
    pub const DTWGP1: usize = 23;
    pub const DTWBP1: usize = 24;
    pub const NDLP1: usize = 25;
    pub const DTLP1: usize = 26;
    pub const NDLBP1: usize = 27;
    pub const DTLGP1: usize = 28;
    pub const DTLBP1: usize = 29;
}

/// Number of entries filled per player by [`MatchEquityTable::me_multiple`].
pub const ME_MULTIPLE_LEN: usize = 30;

impl MatchEquityTable {
    /// Match winning chances for both players over all single-game results
    /// (win or lose a normal, doubled, gammon or backgammon game) from one
    /// score. When `cube_prime0 >= 0` a second block is filled with both
    /// sides playing at that cube value, and likewise `cube_prime1` a
    /// third. Batching the lookups keeps the cube-decision code from
    /// recomputing away distances thirty times over.
    ///
    /// Both returned arrays list the player's winning results first and the
    /// losses second.
    pub fn me_multiple(
        &self,
        score0: i32,
        score1: i32,
        match_to: i32,
        cube: i32,
        cube_prime0: i32,
        cube_prime1: i32,
        crawford: bool,
    ) -> [[f32; ME_MULTIPLE_LEN]; 2] {
        const MULT: [i32; 5] = [1, 2, 3, 4, 6];
        const BLOCK: usize = me_index::NDL;

        let max_res = if cube_prime0 < 0 {
            10
        } else if cube_prime1 < 0 {
            20
        } else {
            ME_MULTIPLE_LEN
        };

        let away0 = match_to - score0 - 1;
        let away1 = match_to - score1 - 1;
        let crawf = crawford || match_to - score0 == 1 || match_to - score1 == 1;

        let mut scores = [[0i32; ME_MULTIPLE_LEN]; 2];
        let mut n = 0;
        for &cv in &[cube, cube_prime0, cube_prime1][..max_res / 10] {
            // player 0 wins normal, doubled, gammon, backgammon
            for m in MULT {
                scores[0][n] = away0 - m * cv;
                scores[1][n] = away1;
                n += 1;
            }
            // player 1 wins the same set
            for m in MULT {
                scores[0][n] = away0;
                scores[1][n] = away1 - m * cv;
                n += 1;
            }
        }

        let mut results = [[0f32; ME_MULTIPLE_LEN]; 2];
        for i in 0..max_res {
            let s0 = scores[0][i];
            let s1 = scores[1][i];

            let p0 = if s0 < 0 {
                1.0
            } else if s1 < 0 {
                0.0
            } else {
                // away distances past the table edge clamp like get_me
                let n0 = (s0 as usize).min(MAX_SCORE - 1);
                let n1 = (s1 as usize).min(MAX_SCORE - 1);
                if crawf {
                    if n0 == 0 {
                        1.0 - self.met_post_crawford[1][n1]
                    } else {
                        self.met_post_crawford[0][n0]
                    }
                } else {
                    self.met[n0][n1]
                }
            };

            results[0][i] = p0;
            results[1][i] = 1.0 - p0;
        }

        // player 1's results come out with the losses first; swap each
        // block into the same win-then-loss order player 0 uses
        for block in 0..max_res / 10 {
            let base = block * 10;
            for i in 0..BLOCK {
                results[1].swap(base + i, base + BLOCK + i);
            }
        }

        results
    }
}

/// log2 of a cube value, clamped to the precomputed levels.
pub fn log_cube(cube: u32) -> usize {
    (31 - cube.max(1).leading_zeros() as usize).min(MAX_CUBE_LEVEL - 1)
}

fn sq(x: i32) -> usize {
    x.max(0) as usize
}

/// Post-Crawford equities for the trailer: E[i][1] indexed by away - 1.
fn mec_post_crawford(gr: f64, wpf: f64, fd2: f64, fd4: f64) -> [f64; MAX_SCORE] {
    let ml = MAX_SCORE;
    let mut e = new_chart(ml);

    post_crawford(gr, wpf, ml, &mut e, fd2, fd4);

    let mut out = [0f64; MAX_SCORE];
    for (i, o) in out.iter_mut().enumerate() {
        *o = e[i + 1][1];
    }
    out
}

/// Full pre-Crawford table from the post-Crawford column.
fn mec_pre_crawford(gr: f64, wpf: f64, pc: &[f64; MAX_SCORE]) -> Vec<[f32; MAX_SCORE]> {
    let ml = MAX_SCORE;
    let mut e = new_chart(ml);

    for i in 0..ml {
        e[i + 1][1] = pc[i];
        e[1][i + 1] = 1.0 - pc[i];
    }

    crawford(gr, wpf, ml, &mut e);
    pre_crawford(gr, wpf, ml, &mut e);

    let mut met = vec![[0f32; MAX_SCORE]; MAX_SCORE];
    for i in 0..ml {
        for j in 0..ml {
            met[i][j] = e[i + 1][j + 1] as f32;
        }
    }
    met
}

/// Equity chart E[p][o]: equity for the favourite at p-away, o-away,
/// bordered with the decided-match rows.
fn new_chart(ml: usize) -> Vec<Vec<f64>> {
    let mut e = vec![vec![0f64; ml + 1]; ml + 1];
    for i in 1..=ml {
        e[0][i] = 1.0;
        e[i][0] = 0.0;
    }
    e
}

fn post_crawford(gr: f64, wpf: f64, ml: usize, e: &mut [Vec<f64>], fd2: f64, fd4: f64) {
    e[1][1] = wpf;

    for i in 2..=ml {
        if i % 2 == 0 {
            // free drop condition exists
            e[1][i] = e[1][i - 1];
            e[i][1] = e[i - 1][1];
            if i == 2 {
                e[1][i] += fd2;
                e[i][1] -= fd2;
            } else if i == 4 {
                e[1][i] += fd4;
                e[i][1] += fd4;
            }
        } else {
            let ia = i as i32;
            e[1][i] = e[0][i] * wpf
                + e[1][sq(ia - 2)] * (1.0 - wpf) * (1.0 - gr)
                + e[1][sq(ia - 4)] * (1.0 - wpf) * gr;

            e[i][1] = e[i][0] * (1.0 - wpf)
                + e[sq(ia - 2)][1] * wpf * (1.0 - gr)
                + e[sq(ia - 4)][1] * wpf * gr;
        }
    }
}

/// Crawford-game equities, overwriting the post-Crawford column backwards
/// so that each entry is computed before it is clobbered.
fn crawford(gr: f64, wpf: f64, ml: usize, e: &mut [Vec<f64>]) {
    for i in (2..=ml).rev() {
        e[1][i] = e[0][i] * wpf
            + e[1][i - 1] * (1.0 - wpf) * (1.0 - gr)
            + e[1][i - 2] * (1.0 - wpf) * gr;

        e[i][1] = e[i][0] * (1.0 - wpf)
            + e[i - 1][1] * wpf * (1.0 - gr)
            + e[i - 2][1] * wpf * gr;
    }
}

fn pre_crawford(gr: f64, wpf: f64, ml: usize, e: &mut [Vec<f64>]) {
    for i in 2..=ml {
        for j in i..=ml {
            let dpf = dpt(i as i32, j as i32, 2, gr, wpf, e);
            let mut dpu = dpt(j as i32, i as i32, 2, gr, 1.0 - wpf, e);

            dpu.e = 1.0 - dpu.e;
            dpu.w = 1.0 - dpu.w;

            e[i][j] = dpu.e + (dpf.e - dpu.e) * (wpf - dpu.w) / (dpf.w - dpu.w);

            if i != j {
                let dpf = dpt(j as i32, i as i32, 2, gr, wpf, e);
                let mut dpu = dpt(i as i32, j as i32, 2, gr, 1.0 - wpf, e);

                dpu.e = 1.0 - dpu.e;
                dpu.w = 1.0 - dpu.w;

                e[j][i] = dpu.e + (dpf.e - dpu.e) * (wpf - dpu.w) / (dpf.w - dpu.w);
            }
        }
    }
}

#[derive(Clone, Copy)]
struct DoublePoint {
    /// Equity at the double point.
    e: f64,
    /// Winning percentage at the double point.
    w: f64,
}

/// The point at which `p` doubles `o` to `c`: where `o` does equally well
/// passing as taking. Returned in `p`'s terms.
fn dpt(p: i32, o: i32, c: i32, gr: f64, wpp: f64, e: &[Vec<f64>]) -> DoublePoint {
    if p <= c / 2 {
        // a single win already wins the match for p
        return DoublePoint { e: 1.0, w: 1.0 };
    }

    // where o would recube p to 2c
    let dpo = dpt(o, p, 2 * c, gr, 1.0 - wpp, e);

    // o's equity if p wins every game from here on the c-cube
    let e0;
    let edp;
    if wpp > 0.5 {
        // o is not the game favourite: o's equity at o-away, x-away
        // is 1 - E[x][o]
        e0 = (1.0 - e[sq(p - c)][o as usize]) * (1.0 - gr)
            + (1.0 - e[sq(p - 2 * c)][o as usize]) * gr;
        edp = 1.0 - e[sq(p - c / 2)][o as usize];
    } else {
        e0 = e[o as usize][sq(p - c)] * (1.0 - gr) + e[o as usize][sq(p - 2 * c)] * gr;
        edp = e[o as usize][sq(p - c / 2)];
    }

    // the winning percentage on the line from (0, e0) to (dpo.w, dpo.e)
    // where o's equity equals passing the double
    let wdp = (edp - e0) * dpo.w / (dpo.e - e0);

    DoublePoint {
        e: 1.0 - edp,
        w: 1.0 - wdp,
    }
}
