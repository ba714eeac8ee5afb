//! Position evaluation: per-class leaf evaluators, N-ply lookahead over
//! the 21 distinct rolls, move scoring with pruning networks, and cubeful
//! equities.
//!
//! An [`EngineContext`] owns everything an evaluation needs: the networks,
//! the bearoff databases, the match equity table and the caches. Contexts
//! are not shared between threads; [`EngineContext::fork`] hands each
//! worker its own caches over the same read-only tables.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as MemoryOrdering};
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use tavla_core::{
    generate_moves, position_bearoff, Board, Dice, Move, MoveList, PositionKey, Variant,
    ALL_ROLLS, NUM_OUTPUTS, NUM_ROLLOUT_OUTPUTS, OUTPUT_CUBEFUL_EQUITY, OUTPUT_EQUITY,
    OUTPUT_LOSEBACKGAMMON, OUTPUT_LOSEGAMMON, OUTPUT_WIN, OUTPUT_WINBACKGAMMON, OUTPUT_WINGAMMON,
};

use crate::bearoff::{BearoffDb, BearoffSet};
use crate::cache::{CacheKey, EvalCache, CACHE_OUTPUTS, CACHE_SIZE_DEFAULT};
use crate::classify::{classify, PositionClass};
use crate::cube::{self, CubeInfo};
use crate::error::{EngineError, Result};
use crate::inputs::{
    base_inputs, contact_inputs, crashed_inputs, race_inputs, NUM_INPUTS, NUM_PRUNING_INPUTS,
    NUM_RACE_INPUTS,
};
use crate::met::{log_cube, MatchEquityTable};
use crate::neural::NetScratch;
use crate::sanity::sanity_check;
use crate::weights::Weights;

/// Candidate moves the pruning networks hand over for full evaluation.
pub const PRUNE_MOVES: usize = 10;

/// Default size of the pruning-network cache.
const PRUNE_CACHE_SIZE: u32 = 1 << 16;

/// How an evaluation is performed: search depth, cube treatment, pruning
/// and the noise model for weakened play.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Compute cubeful equities.
    pub cubeful: bool,
    /// Lookahead depth; 0 is a static evaluation.
    pub plies: u32,
    /// Use the small pruning networks to preselect candidate moves.
    pub use_prune: bool,
    /// Derive noise from a board digest instead of the RNG.
    pub deterministic: bool,
    /// Noise standard deviation; 0 disables noise.
    pub noise: f32,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            cubeful: false,
            plies: 0,
            use_prune: false,
            deterministic: true,
            noise: 0.0,
        }
    }
}

impl EvalConfig {
    /// A noise-free lookahead configuration with pruning enabled.
    pub fn plied(plies: u32) -> Self {
        Self {
            plies,
            use_prune: true,
            ..Self::default()
        }
    }

    /// Precision ordering: `Greater` means `self` is the stronger
    /// setting. Deeper beats shallower, cubeful beats cubeless, quieter
    /// beats noisier; an analysis stored under a lesser configuration is
    /// worth redoing under a greater one.
    pub fn precision_cmp(&self, other: &Self) -> Ordering {
        let by_plies = self.plies.cmp(&other.plies);
        if by_plies != Ordering::Equal {
            return by_plies;
        }

        let by_cubeful = self.cubeful.cmp(&other.cubeful);
        if by_cubeful != Ordering::Equal {
            return by_cubeful;
        }

        // less noise is more precise
        if self.noise > other.noise {
            return Ordering::Less;
        } else if self.noise < other.noise {
            return Ordering::Greater;
        }
        if self.noise > 0.0 {
            let by_deterministic = self.deterministic.cmp(&other.deterministic);
            if by_deterministic != Ordering::Equal {
                return by_deterministic;
            }
        }

        if self.plies > 0 {
            // the pruning nets trade a little accuracy for speed
            let by_prune = other.use_prune.cmp(&self.use_prune);
            if by_prune != Ordering::Equal {
                return by_prune;
            }
        }

        Ordering::Equal
    }
}

/// One tier of the move filter: always keep `accept` moves, plus up to
/// `extra` more if they are within `threshold` of the best. A negative
/// `accept` skips scoring at that ply entirely.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveFilter {
    pub accept: i32,
    pub extra: u32,
    pub threshold: f32,
}

/// Filters for 1..4-ply searches; row `n - 1` drives an `n`-ply search,
/// entry `[i]` applies after scoring at ply `i`.
pub const MAX_FILTER_PLIES: usize = 4;

pub type MoveFilterTable = [[MoveFilter; MAX_FILTER_PLIES]; MAX_FILTER_PLIES];

const fn mf(accept: i32, extra: u32, threshold: f32) -> MoveFilter {
    MoveFilter {
        accept,
        extra,
        threshold,
    }
}

const NULL_FILTER: MoveFilter = mf(0, 0, 0.0);
const SKIP_FILTER: MoveFilter = mf(-1, 0, 0.0);

/// The "normal" filter tier: up to eight candidates within 0.16 at the
/// first lookahead ply, narrowed to two within 0.04 at the third; even
/// intermediate plies are skipped.
pub const NORMAL_FILTERS: MoveFilterTable = [
    [mf(0, 8, 0.16), NULL_FILTER, NULL_FILTER, NULL_FILTER],
    [mf(0, 8, 0.16), SKIP_FILTER, NULL_FILTER, NULL_FILTER],
    [mf(0, 8, 0.16), SKIP_FILTER, mf(0, 2, 0.04), NULL_FILTER],
    [mf(0, 8, 0.16), SKIP_FILTER, mf(0, 2, 0.04), SKIP_FILTER],
];

/// Flips the five cubeless outputs to the other player's view.
pub fn invert_evaluation(ar: &mut [f32]) {
    ar[OUTPUT_WIN] = 1.0 - ar[OUTPUT_WIN];
    ar.swap(OUTPUT_WINGAMMON, OUTPUT_LOSEGAMMON);
    ar.swap(OUTPUT_WINBACKGAMMON, OUTPUT_LOSEBACKGAMMON);
}

/// Flips a full rollout-output array, equities included. Match cubeful
/// equities are mwc and flip around 1, money equities around 0.
pub fn invert_evaluation_r(ar: &mut [f32; NUM_ROLLOUT_OUTPUTS], ci: &CubeInfo) {
    invert_evaluation(ar);

    ar[OUTPUT_EQUITY] = -ar[OUTPUT_EQUITY];
    ar[OUTPUT_CUBEFUL_EQUITY] = if ci.is_match() {
        1.0 - ar[OUTPUT_CUBEFUL_EQUITY]
    } else {
        -ar[OUTPUT_CUBEFUL_EQUITY]
    };
}

/// Cache context word for a cubeless or cubeful evaluation.
fn eval_key(config: &EvalConfig, n_plies: u32, ci: &CubeInfo, cubeful_equity: bool) -> u32 {
    fn owner_rel(ci: &CubeInfo) -> u32 {
        if ci.owner < 0 {
            2
        } else {
            u32::from(ci.owner == ci.on_roll as i8)
        }
    }

    let mut key = n_plies | (u32::from(config.cubeful) << 4) | ((ci.on_roll as u32) << 5);

    if n_plies > 0 {
        key ^= u32::from(config.use_prune) << 6;
    }

    if n_plies > 0 || cubeful_equity {
        if ci.is_match() {
            // away scores, cube level and ownership all change the result
            key ^= (((ci.match_to - ci.score[ci.on_roll] - 1) as u32) << 7)
                ^ (((ci.match_to - ci.score[1 - ci.on_roll] - 1) as u32) << 13)
                ^ ((log_cube(ci.cube) as u32) << 19)
                ^ (owner_rel(ci) << 23)
                ^ (u32::from(ci.crawford) << 25);
        } else if config.cubeful || cubeful_equity {
            key ^= (owner_rel(ci) << 23)
                ^ (u32::from(ci.jacoby) << 26)
                ^ (u32::from(ci.beavers) << 27);
        }

        if cubeful_equity {
            key ^= 0x6a47b47e;
        }
    }

    key
}

/// Index of a position in a two-sided (or hypergammon) table.
fn two_sided_index(db: &BearoffDb, board: &Board) -> u32 {
    let n_us = position_bearoff(&board[1][..], db.points(), db.chequers());
    let n_them = position_bearoff(&board[0][..], db.points(), db.chequers());
    n_us * db.positions() + n_them
}

/// Outputs for a game that is already decided.
fn eval_over(board: &Board, output: &mut [f32; NUM_OUTPUTS], variant: Variant) {
    let full = u32::from(variant.chequers());
    output.fill(0.0);

    if board.chequers_on_board(0) == 0 {
        // opponent is off; the player on roll has lost
        if board.chequers_on_board(1) == full {
            output[OUTPUT_LOSEGAMMON] = 1.0;
            if board[1][18..25].iter().any(|&n| n > 0) {
                output[OUTPUT_LOSEBACKGAMMON] = 1.0;
            }
        }
    } else if board.chequers_on_board(1) == 0 {
        output[OUTPUT_WIN] = 1.0;
        if board.chequers_on_board(0) == full {
            output[OUTPUT_WINGAMMON] = 1.0;
            if board[0][18..25].iter().any(|&n| n > 0) {
                output[OUTPUT_WINBACKGAMMON] = 1.0;
            }
        }
    }
}

/// MurmurHash3 32-bit over a byte buffer.
fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    let mut hash = seed;
    let mut chunks = data.chunks_exact(4);

    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(0xcc9e2d51);
        k = k.rotate_left(15).wrapping_mul(0x1b873593);
        hash ^= k;
        hash = hash.rotate_left(13).wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    let mut k = 0u32;
    for (i, &b) in chunks.remainder().iter().enumerate() {
        k |= u32::from(b) << (8 * i);
    }
    if k != 0 {
        k = k.wrapping_mul(0xcc9e2d51);
        k = k.rotate_left(15).wrapping_mul(0x1b873593);
        hash ^= k;
    }

    hash ^= data.len() as u32;
    hash ^= hash >> 16;
    hash = hash.wrapping_mul(0x85ebca6b);
    hash ^= hash >> 13;
    hash = hash.wrapping_mul(0xc2b2ae35);
    hash ^= hash >> 16;
    hash
}

/// 16-byte digest of the board buffer for deterministic noise.
fn digest16(data: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for seed in 0..4u32 {
        out[4 * seed as usize..4 * seed as usize + 4]
            .copy_from_slice(&murmur3_32(data, seed).to_le_bytes());
    }
    out
}

/// The evaluation engine: networks, bearoff databases, match equity table,
/// caches and per-network incremental state.
pub struct EngineContext {
    nets: Arc<Weights>,
    bearoffs: Arc<BearoffSet>,
    met: Arc<MatchEquityTable>,
    /// Move filters used by plied searches.
    pub filters: MoveFilterTable,
    cache: EvalCache,
    prune_cache: EvalCache,
    scratch: [NetScratch; 3],
    prune_scratch: [NetScratch; 3],
    hidden: Vec<f32>,
    noise_rng: ChaCha8Rng,
    interrupt: Arc<AtomicBool>,
}

impl EngineContext {
    pub fn new(nets: Weights, bearoffs: BearoffSet, met: MatchEquityTable) -> Self {
        Self::with_cache_size(nets, bearoffs, met, 1 << CACHE_SIZE_DEFAULT)
    }

    pub fn with_cache_size(
        nets: Weights,
        bearoffs: BearoffSet,
        met: MatchEquityTable,
        cache_size: u32,
    ) -> Self {
        Self {
            nets: Arc::new(nets),
            bearoffs: Arc::new(bearoffs),
            met: Arc::new(met),
            filters: NORMAL_FILTERS,
            cache: EvalCache::new(cache_size),
            prune_cache: EvalCache::new(PRUNE_CACHE_SIZE),
            scratch: Default::default(),
            prune_scratch: Default::default(),
            hidden: Vec::new(),
            noise_rng: ChaCha8Rng::from_entropy(),
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A context over the same read-only tables with its own caches and
    /// incremental state, for use on another thread. The interrupt flag
    /// stays shared.
    pub fn fork(&self) -> Self {
        Self {
            nets: Arc::clone(&self.nets),
            bearoffs: Arc::clone(&self.bearoffs),
            met: Arc::clone(&self.met),
            filters: self.filters,
            cache: EvalCache::new(self.cache.size()),
            prune_cache: EvalCache::new(PRUNE_CACHE_SIZE),
            scratch: Default::default(),
            prune_scratch: Default::default(),
            hidden: Vec::new(),
            noise_rng: ChaCha8Rng::from_entropy(),
            interrupt: Arc::clone(&self.interrupt),
        }
    }

    pub fn met(&self) -> &MatchEquityTable {
        &self.met
    }

    pub fn bearoffs(&self) -> &BearoffSet {
        &self.bearoffs
    }

    pub fn nets(&self) -> &Weights {
        &self.nets
    }

    /// Shared flag that aborts any running evaluation with
    /// [`EngineError::Interrupted`] when set.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    pub fn flush_caches(&mut self) {
        self.cache.flush();
        self.prune_cache.flush();
    }

    /// (lookups, hits) of the main evaluation cache.
    pub fn cache_stats(&self) -> (u64, u64) {
        self.cache.stats()
    }

    fn check_interrupt(&self) -> Result<()> {
        if self.interrupt.load(MemoryOrdering::Relaxed) {
            Err(EngineError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Runs one of the six networks, consulting the per-network
    /// incremental state. `kind` is 0 race, 1 crashed, 2 contact.
    fn net_eval(&mut self, kind: usize, prune: bool, input: &mut [f32], output: &mut [f32]) {
        let nets = Arc::clone(&self.nets);
        let net = match (prune, kind) {
            (false, 0) => &nets.race,
            (false, 1) => &nets.crashed,
            (false, _) => &nets.contact,
            (true, 0) => &nets.prune_race,
            (true, 1) => &nets.prune_crashed,
            (true, _) => &nets.prune_contact,
        };
        self.hidden.resize(net.c_hidden, 0.0);
        let scratch = if prune {
            &mut self.prune_scratch[kind]
        } else {
            &mut self.scratch[kind]
        };
        net.evaluate_incremental(input, &mut self.hidden, output, scratch);
    }

    /// Backgammon probability for `side` in a race where it may still win
    /// one: the opponent bears in while `side` has men in the far quadrant.
    /// Computed from the bearoff tables over a reduced board where the
    /// opponent's far-quadrant men race from the ace point.
    fn race_bg_prob(&mut self, board: &Board, side: usize) -> Result<f32> {
        let tot_men_home: i32 = board[side][..6].iter().map(|&n| i32::from(n)).sum();
        let mut tot_pips_op = 0i32;
        for i in 18..=22 {
            tot_pips_op += i32::from(board[1 - side][i]) * (i as i32 - 17);
        }

        // not enough time left for the backgammon to be live
        if (tot_men_home + 3) / 4 - i32::from(side == 1) > (tot_pips_op + 2) / 3 {
            return Ok(0.0);
        }

        let mut dummy = Board::empty();
        dummy[side] = board[side];
        for i in 0..6 {
            dummy[1 - side][i] = board[1 - side][18 + i];
        }

        let mut p = [0f32; NUM_OUTPUTS];
        let one_sided_only = position_bearoff(&dummy[0][..], 6, 15) > 923
            || position_bearoff(&dummy[1][..], 6, 15) > 923;

        match (&self.bearoffs.two_sided, one_sided_only) {
            (Some(db), false) => db.eval(&dummy, &mut p)?,
            _ => self.bearoffs.one_sided.eval(&dummy, &mut p)?,
        }

        Ok(if side == 1 { p[OUTPUT_WIN] } else { 1.0 - p[OUTPUT_WIN] })
    }

    /// Overrides the network's backgammon outputs in races where one side
    /// still has all its men and the exact probability is computable.
    fn eval_race_bg(&mut self, board: &Board, output: &mut [f32]) -> Result<()> {
        let men = |side: usize| -> u32 { board[side][..24].iter().map(|&n| u32::from(n)).sum() };

        let gammon_possible = men(0) == 15;
        let opp_gammon_possible = men(1) == 15;

        let bg_possible =
            gammon_possible && board[0][18..24].iter().any(|&n| n > 0);
        let opp_bg_possible =
            opp_gammon_possible && board[1][18..24].iter().any(|&n| n > 0);

        if !bg_possible && !opp_bg_possible {
            return Ok(());
        }

        let side = usize::from(bg_possible);
        let pr = self.race_bg_prob(board, side)?;

        if pr > 0.0 {
            if side == 1 {
                output[OUTPUT_WINBACKGAMMON] = pr;
                if output[OUTPUT_WINGAMMON] < pr {
                    output[OUTPUT_WINGAMMON] = pr;
                }
            } else {
                output[OUTPUT_LOSEBACKGAMMON] = pr;
                if output[OUTPUT_LOSEGAMMON] < pr {
                    output[OUTPUT_LOSEGAMMON] = pr;
                }
            }
        } else if side == 1 {
            output[OUTPUT_WINBACKGAMMON] = 0.0;
        } else {
            output[OUTPUT_LOSEBACKGAMMON] = 0.0;
        }

        Ok(())
    }

    /// Static evaluation dispatched on the position class.
    pub fn evaluate_class(
        &mut self,
        board: &Board,
        output: &mut [f32; NUM_OUTPUTS],
        class: PositionClass,
        variant: Variant,
    ) -> Result<()> {
        match class {
            PositionClass::Over => {
                eval_over(board, output, variant);
                Ok(())
            }

            PositionClass::Hypergammon1
            | PositionClass::Hypergammon2
            | PositionClass::Hypergammon3 => {
                let k = class as usize - PositionClass::Hypergammon1 as usize;
                let db = self.bearoffs.hypergammon[k].as_ref().ok_or_else(|| {
                    EngineError::BearoffFormat("hypergammon database not loaded".into())
                })?;
                db.eval(board, output)
            }

            PositionClass::BearoffTwoSided => match &self.bearoffs.two_sided {
                Some(db) => db.eval(board, output),
                None => Err(EngineError::BearoffFormat(
                    "two-sided database not loaded".into(),
                )),
            },
            PositionClass::BearoffTwoSidedWide => match &self.bearoffs.two_sided_wide {
                Some(db) => db.eval(board, output),
                None => Err(EngineError::BearoffFormat(
                    "wide two-sided database not loaded".into(),
                )),
            },
            PositionClass::BearoffOneSided => self.bearoffs.one_sided.eval(board, output),
            PositionClass::BearoffOneSidedWide => match &self.bearoffs.one_sided_wide {
                Some(db) => db.eval(board, output),
                None => Err(EngineError::BearoffFormat(
                    "wide one-sided database not loaded".into(),
                )),
            },

            PositionClass::Race => {
                let mut input = [0f32; NUM_RACE_INPUTS];
                race_inputs(board, &mut input);
                self.net_eval(0, false, &mut input, output);
                // exact backgammon probabilities override the net
                self.eval_race_bg(board, output)
            }
            PositionClass::Crashed => {
                let mut input = [0f32; NUM_INPUTS];
                crashed_inputs(board, &mut input);
                self.net_eval(1, false, &mut input, output);
                Ok(())
            }
            PositionClass::Contact => {
                let mut input = [0f32; NUM_INPUTS];
                contact_inputs(board, &mut input);
                self.net_eval(2, false, &mut input, output);
                Ok(())
            }
        }
    }

    /// Noise for one output. Deterministic mode digests the board so the
    /// same position always gets the same error; otherwise Box-Muller.
    /// Gammon and backgammon outputs get proportionally smaller errors.
    fn noise(&mut self, config: &EvalConfig, board: &Board, i_output: usize) -> f32 {
        let mut r;

        if config.deterministic {
            let mut bytes = [0u8; 50];
            for i in 0..25 {
                bytes[i << 1] = board[0][i];
                bytes[(i << 1) + 1] = board[1][i];
            }
            bytes[0] = bytes[0].wrapping_add(i_output as u8);

            // the sum of the digest bytes is normal-ish by the central
            // limit theorem; center and scale to a unit deviate
            let sum: i32 = digest16(&bytes).iter().map(|&b| i32::from(b)).sum();
            r = (sum as f32 - 2040.0) / 295.6;
        } else {
            // Box-Muller on a point in the unit circle
            loop {
                let x: f32 = self.noise_rng.gen_range(-1.0f32..1.0);
                let y: f32 = self.noise_rng.gen_range(-1.0f32..1.0);
                let d = x * x + y * y;
                if d > 0.0 && d <= 1.0 {
                    r = y * (-2.0 * d.ln() / d).sqrt();
                    break;
                }
            }
        }

        r *= config.noise;

        if i_output == OUTPUT_WINGAMMON || i_output == OUTPUT_LOSEGAMMON {
            r *= 0.25;
        } else if i_output == OUTPUT_WINBACKGAMMON || i_output == OUTPUT_LOSEBACKGAMMON {
            r *= 0.01;
        }
        r
    }

    /// Cubeless evaluation at the depth given in `config`.
    pub fn evaluate_position(
        &mut self,
        board: &Board,
        output: &mut [f32; NUM_OUTPUTS],
        ci: &CubeInfo,
        config: &EvalConfig,
    ) -> Result<()> {
        let class = classify(board, ci.variant, &self.bearoffs);
        self.evaluate_cached(board, output, ci, config, config.plies, class)
    }

    fn evaluate_cached(
        &mut self,
        board: &Board,
        output: &mut [f32; NUM_OUTPUTS],
        ci: &CubeInfo,
        config: &EvalConfig,
        n_plies: u32,
        class: PositionClass,
    ) -> Result<()> {
        if config.noise != 0.0 {
            // noisy evaluations cannot be cached
            return self.evaluate_full(board, output, ci, config, n_plies, class);
        }

        let key = CacheKey {
            position: PositionKey::from_board(board),
            context: eval_key(config, n_plies, ci, false),
        };

        match self.cache.lookup(&key) {
            Ok(values) => {
                output.copy_from_slice(&values[..NUM_OUTPUTS]);
                Ok(())
            }
            Err(bucket) => {
                self.evaluate_full(board, output, ci, config, n_plies, class)?;
                let mut values = [0f32; CACHE_OUTPUTS];
                values[..NUM_OUTPUTS].copy_from_slice(output);
                self.cache.insert(&key, bucket, values);
                Ok(())
            }
        }
    }

    fn evaluate_full(
        &mut self,
        board: &Board,
        output: &mut [f32; NUM_OUTPUTS],
        ci: &CubeInfo,
        config: &EvalConfig,
        n_plies: u32,
        class: PositionClass,
    ) -> Result<()> {
        if class > PositionClass::BearoffTwoSidedWide && n_plies > 0 {
            // internal node: average the best replies over the 21 rolls
            let use_prune =
                config.use_prune && config.noise == 0.0 && ci.variant == Variant::Standard;

            output.fill(0.0);
            let mut opp = *ci;
            opp.on_roll = 1 - ci.on_roll;

            for &(d0, d1, w) in &ALL_ROLLS {
                self.check_interrupt()?;

                let mut board_new = *board;
                if use_prune {
                    self.find_best_move_in_eval(Dice(d0, d1), board, &mut board_new, ci, config)?;
                } else {
                    self.find_best_move_plied(&mut board_new, Dice(d0, d1), ci, config, 0)?;
                }
                board_new.swap_sides();

                let pc = classify(&board_new, opp.variant, &self.bearoffs);
                let mut roll_output = [0f32; NUM_OUTPUTS];
                self.evaluate_cached(&board_new, &mut roll_output, &opp, config, n_plies - 1, pc)?;

                for (sum, value) in output.iter_mut().zip(&roll_output) {
                    *sum += f32::from(w) * value;
                }
            }

            for value in output.iter_mut() {
                *value /= 36.0;
            }
            invert_evaluation(output);
        } else {
            self.evaluate_class(board, output, class, ci.variant)?;

            if config.noise > 0.0 && class != PositionClass::Over {
                for i in 0..NUM_OUTPUTS {
                    output[i] += self.noise(config, board, i);
                }
            }

            if class.is_neural() || config.noise > 0.0 {
                sanity_check(board, output, &self.bearoffs)?;
            }
        }

        Ok(())
    }

    /// Picks the best reply to a roll during lookahead by preselecting
    /// candidates with the pruning networks, then fully scoring the
    /// survivors. `board_out` must start as a copy of `board`; it holds
    /// the position after the chosen move on return.
    fn find_best_move_in_eval(
        &mut self,
        dice: Dice,
        board: &Board,
        board_out: &mut Board,
        ci: &CubeInfo,
        config: &EvalConfig,
    ) -> Result<()> {
        let mut ml = MoveList::default();
        generate_moves(&mut ml, board, dice, false);

        if ml.is_empty() {
            return Ok(());
        }
        if ml.len() == 1 {
            // forced
            *board_out = ml.moves[0].key.to_board();
            return Ok(());
        }
        if ml.len() <= PRUNE_MOVES {
            self.score_moves(&mut ml, ci, config, 0)?;
            *board_out = ml.moves[ml.i_move_best].key.to_board();
            return Ok(());
        }

        let mut opp = *ci;
        opp.on_roll = 1 - ci.on_roll;

        // indices of the kept candidates; slot 0 tracks the worst of them
        let mut best = [0usize; PRUNE_MOVES];
        let mut eval_class = PositionClass::Over;
        let mut completed = true;

        for scratch in &mut self.prune_scratch {
            scratch.arm();
        }

        for idx in 0..ml.len() {
            *board_out = ml.moves[idx].key.to_board_swapped();

            let pc = classify(board_out, Variant::Standard, &self.bearoffs);
            if idx == 0 {
                if pc < PositionClass::Race {
                    // contact can follow a race roll; fall back to full scoring
                    completed = false;
                    break;
                }
                eval_class = pc;
            } else if pc != eval_class {
                completed = false;
                break;
            }

            let key = CacheKey {
                position: ml.moves[idx].key,
                context: 0,
            };
            let mut outputs = [0f32; NUM_OUTPUTS];
            match self.prune_cache.lookup(&key) {
                Ok(values) => outputs.copy_from_slice(&values[..NUM_OUTPUTS]),
                Err(bucket) => {
                    let mut input = [0f32; NUM_PRUNING_INPUTS];
                    base_inputs(board_out, &mut input);

                    let kind = pc as usize - PositionClass::Race as usize;
                    self.net_eval(kind, true, &mut input, &mut outputs);

                    if pc == PositionClass::Race {
                        self.eval_race_bg(board_out, &mut outputs)?;
                    }
                    sanity_check(board_out, &mut outputs, &self.bearoffs)?;

                    let mut values = [0f32; CACHE_OUTPUTS];
                    values[..NUM_OUTPUTS].copy_from_slice(&outputs);
                    self.prune_cache.insert(&key, bucket, values);
                }
            }

            // utility from the opponent's view; lower is better for us
            ml.moves[idx].score = cube::utility_me(&outputs, &opp);

            if idx < PRUNE_MOVES {
                best[idx] = idx;
                if ml.moves[idx].score > ml.moves[best[0]].score {
                    best[idx] = best[0];
                    best[0] = idx;
                }
            } else if ml.moves[idx].score < ml.moves[best[0]].score {
                best[0] = idx;
                let mut m = 0;
                for k in 1..PRUNE_MOVES {
                    if ml.moves[best[k]].score > ml.moves[best[m]].score {
                        m = k;
                    }
                }
                best[0] = best[m];
                best[m] = idx;
            }
        }

        for scratch in &mut self.prune_scratch {
            scratch.disarm();
        }

        if completed {
            self.score_moves_pruned(&mut ml, ci, config, &best)?;
        } else {
            self.score_moves(&mut ml, ci, config, 0)?;
        }

        *board_out = ml.moves[ml.i_move_best].key.to_board();
        Ok(())
    }

    /// Scores one candidate move at the given depth: evaluate the
    /// resulting position from the opponent's side, flip back, and store
    /// the equities on the move.
    pub fn score_move(
        &mut self,
        m: &mut Move,
        ci: &CubeInfo,
        config: &EvalConfig,
        n_plies: u32,
    ) -> Result<()> {
        let board = m.key.to_board_swapped();

        let mut opp = *ci;
        opp.on_roll = 1 - ci.on_roll;

        let mut evals = [0f32; NUM_ROLLOUT_OUTPUTS];
        self.general_evaluation_plied(&mut evals, &board, &opp, config, n_plies)?;
        invert_evaluation_r(&mut evals, &opp);

        if ci.is_match() {
            evals[OUTPUT_CUBEFUL_EQUITY] =
                cube::mwc2eq(evals[OUTPUT_CUBEFUL_EQUITY], ci, &self.met);
        }

        m.evals = evals;
        m.score = if config.cubeful {
            evals[OUTPUT_CUBEFUL_EQUITY]
        } else {
            evals[OUTPUT_EQUITY]
        };
        m.score2 = evals[OUTPUT_EQUITY];
        Ok(())
    }

    fn score_moves(
        &mut self,
        ml: &mut MoveList,
        ci: &CubeInfo,
        config: &EvalConfig,
        n_plies: u32,
    ) -> Result<()> {
        let count = ml.len();
        self.score_moves_n(ml, count, ci, config, n_plies)
    }

    /// Scores the first `count` moves of the list and tracks the best.
    fn score_moves_n(
        &mut self,
        ml: &mut MoveList,
        count: usize,
        ci: &CubeInfo,
        config: &EvalConfig,
        n_plies: u32,
    ) -> Result<()> {
        ml.best_score = -99999.9;

        if n_plies == 0 {
            // successive 0-ply inputs differ little; evaluate incrementally
            for scratch in &mut self.scratch {
                scratch.arm();
            }
        }

        let mut result = Ok(());
        for i in 0..count {
            let mut m = ml.moves[i];
            if let Err(e) = self.score_move(&mut m, ci, config, n_plies) {
                result = Err(e);
                break;
            }
            ml.moves[i] = m;

            if m.score > ml.best_score
                || (m.score == ml.best_score && m.score2 > ml.moves[ml.i_move_best].score2)
            {
                ml.i_move_best = i;
                ml.best_score = m.score;
            }
        }

        if n_plies == 0 {
            for scratch in &mut self.scratch {
                scratch.disarm();
            }
        }

        result
    }

    fn score_moves_pruned(
        &mut self,
        ml: &mut MoveList,
        ci: &CubeInfo,
        config: &EvalConfig,
        indices: &[usize; PRUNE_MOVES],
    ) -> Result<()> {
        ml.best_score = -99999.9;

        for scratch in &mut self.scratch {
            scratch.arm();
        }

        let mut result = Ok(());
        for &i in indices {
            let mut m = ml.moves[i];
            if let Err(e) = self.score_move(&mut m, ci, config, 0) {
                result = Err(e);
                break;
            }
            ml.moves[i] = m;

            if m.score > ml.best_score
                || (m.score == ml.best_score && m.score2 > ml.moves[ml.i_move_best].score2)
            {
                ml.i_move_best = i;
                ml.best_score = m.score;
            }
        }

        for scratch in &mut self.scratch {
            scratch.disarm();
        }

        result
    }

    fn find_best_move_plied(
        &mut self,
        board: &mut Board,
        dice: Dice,
        ci: &CubeInfo,
        config: &EvalConfig,
        n_plies: u32,
    ) -> Result<()> {
        let mut cfg = *config;
        cfg.plies = n_plies;

        let mut ml = MoveList::default();
        self.find_n_save_best_moves(&mut ml, dice, board, ci, &cfg)?;
        if !ml.is_empty() {
            *board = ml.moves[ml.i_move_best].key.to_board();
        }
        Ok(())
    }

    /// Finds and applies the best move for a roll at the configured depth.
    /// Returns the chosen move, or `None` when the roll cannot be played.
    pub fn find_best_move(
        &mut self,
        board: &mut Board,
        dice: Dice,
        ci: &CubeInfo,
        config: &EvalConfig,
    ) -> Result<Option<Move>> {
        let mut ml = MoveList::default();
        self.find_n_save_best_moves(&mut ml, dice, board, ci, config)?;
        if ml.is_empty() {
            return Ok(None);
        }
        let best = ml.moves[ml.i_move_best];
        *board = best.key.to_board();
        Ok(Some(best))
    }

    /// The plied move search: scores candidates ply by ply, narrowing the
    /// field with the move filters between plies. On return the surviving
    /// candidates lead the list, sorted, scored at full depth; discarded
    /// moves follow with their shallow scores.
    pub fn find_n_save_best_moves(
        &mut self,
        ml: &mut MoveList,
        dice: Dice,
        board: &Board,
        ci: &CubeInfo,
        config: &EvalConfig,
    ) -> Result<()> {
        generate_moves(ml, board, dice, false);
        if ml.is_empty() {
            return Ok(());
        }

        let tier = if config.plies >= 1 && config.plies <= MAX_FILTER_PLIES as u32 {
            self.filters[config.plies as usize - 1]
        } else {
            self.filters[MAX_FILTER_PLIES - 1]
        };

        let mut live = ml.len();
        let mut single_survivor = false;

        for i_ply in 0..config.plies {
            let filter = if (i_ply as usize) < MAX_FILTER_PLIES {
                tier[i_ply as usize]
            } else {
                NULL_FILTER
            };
            if filter.accept < 0 {
                continue;
            }

            self.score_moves_n(ml, live, ci, config, i_ply)?;
            ml.moves[..live].sort_by(Move::cmp_by_score);
            ml.i_move_best = 0;

            let scored = live;
            live = (filter.accept as usize).min(scored);
            let limit = scored.min(live + filter.extra as usize);
            while live < limit && ml.moves[live].score >= ml.moves[0].score - filter.threshold {
                live += 1;
            }

            if live == 1 && filter.accept != 1 {
                single_survivor = true;
                break;
            }
        }

        if !single_survivor {
            self.score_moves_n(ml, live, ci, config, config.plies)?;
            ml.moves[..live].sort_by(Move::cmp_by_score);
            ml.i_move_best = 0;
        }

        ml.best_score = ml.moves[ml.i_move_best].score;
        Ok(())
    }

    /// Full evaluation of a position into the seven rollout outputs, at
    /// the depth in `config`.
    pub fn general_evaluation(
        &mut self,
        evals: &mut [f32; NUM_ROLLOUT_OUTPUTS],
        board: &Board,
        ci: &CubeInfo,
        config: &EvalConfig,
    ) -> Result<()> {
        self.general_evaluation_plied(evals, board, ci, config, config.plies)
    }

    fn general_evaluation_plied(
        &mut self,
        evals: &mut [f32; NUM_ROLLOUT_OUTPUTS],
        board: &Board,
        ci: &CubeInfo,
        config: &EvalConfig,
        n_plies: u32,
    ) -> Result<()> {
        let mut output = [0f32; NUM_OUTPUTS];

        if config.cubeful {
            let mut cubeful = [0f32; 1];
            let cube_pos = [Some(*ci)];
            self.evaluate_cubeful(
                board,
                &mut output,
                &mut cubeful,
                &cube_pos,
                ci,
                config,
                n_plies,
                false,
            )?;
            evals[..NUM_OUTPUTS].copy_from_slice(&output);
            evals[OUTPUT_EQUITY] = cube::utility_me(&output, ci);
            evals[OUTPUT_CUBEFUL_EQUITY] = cubeful[0];
        } else {
            let class = classify(board, ci.variant, &self.bearoffs);
            self.evaluate_cached(board, &mut output, ci, config, n_plies, class)?;
            evals[..NUM_OUTPUTS].copy_from_slice(&output);
            evals[OUTPUT_EQUITY] = cube::utility_me(&output, ci);
            evals[OUTPUT_CUBEFUL_EQUITY] = 0.0;
        }

        Ok(())
    }

    /// Evaluates the no-double and double branches of a cube decision.
    /// `outputs[0]` holds the cubeless chances and equities for "no
    /// double", `outputs[1]` for "double, take"; feed them to
    /// [`cube::find_cube_decision`].
    pub fn general_cube_decision(
        &mut self,
        outputs: &mut [[f32; NUM_ROLLOUT_OUTPUTS]; 2],
        board: &Board,
        ci: &CubeInfo,
        config: &EvalConfig,
    ) -> Result<()> {
        let mut doubled = *ci;
        doubled.owner = (1 - ci.on_roll) as i8;
        doubled.cube = ci.cube * 2;

        let aci = [*ci, doubled];
        let cube_pos = [Some(*ci), Some(doubled)];

        let mut output = [0f32; NUM_OUTPUTS];
        let mut cubeful = [0f32; 2];
        self.evaluate_cubeful(
            board,
            &mut output,
            &mut cubeful,
            &cube_pos,
            ci,
            config,
            config.plies,
            true,
        )?;

        if !ci.is_match() {
            // double/take equities are normalized to the doubled stake
            cubeful[1] *= 2.0;
        }

        for (i, out) in outputs.iter_mut().enumerate() {
            out[..NUM_OUTPUTS].copy_from_slice(&output);
            out[OUTPUT_EQUITY] = cube::utility_me(&output, &aci[i]);
            out[OUTPUT_CUBEFUL_EQUITY] = cubeful[i];
        }

        Ok(())
    }

    /// Cache wrapper around the cubeful evaluation: one entry per live
    /// cube position, with the cubeful equity stored in the sixth slot.
    #[allow(clippy::too_many_arguments)]
    fn evaluate_cubeful(
        &mut self,
        board: &Board,
        output: &mut [f32; NUM_OUTPUTS],
        cubeful: &mut [f32],
        cube_pos: &[Option<CubeInfo>],
        ci_move: &CubeInfo,
        config: &EvalConfig,
        n_plies: u32,
        top: bool,
    ) -> Result<()> {
        if config.noise != 0.0 {
            return self
                .evaluate_cubeful_full(board, output, cubeful, cube_pos, ci_move, config, n_plies, top);
        }

        let position = PositionKey::from_board(board);

        let mut all_hits = !top;
        if all_hits {
            for (ici, entry) in cube_pos.iter().enumerate() {
                let Some(ci) = entry else { continue };
                let key = CacheKey {
                    position,
                    context: eval_key(config, n_plies, ci, true),
                };
                match self.cache.lookup(&key) {
                    Ok(values) => {
                        output.copy_from_slice(&values[..NUM_OUTPUTS]);
                        cubeful[ici] = values[NUM_OUTPUTS];
                    }
                    Err(_) => {
                        all_hits = false;
                        break;
                    }
                }
            }
        }

        if !all_hits {
            self.evaluate_cubeful_full(
                board, output, cubeful, cube_pos, ci_move, config, n_plies, top,
            )?;

            if !top {
                for (ici, entry) in cube_pos.iter().enumerate() {
                    let Some(ci) = entry else { continue };
                    let key = CacheKey {
                        position,
                        context: eval_key(config, n_plies, ci, true),
                    };
                    if let Err(bucket) = self.cache.lookup(&key) {
                        let mut values = [0f32; CACHE_OUTPUTS];
                        values[..NUM_OUTPUTS].copy_from_slice(output);
                        values[NUM_OUTPUTS] = cubeful[ici];
                        self.cache.insert(&key, bucket, values);
                    }
                }
            }
        }

        Ok(())
    }

    /// The cubeful recursion. At internal nodes every live cube position
    /// spawns a no-double and a double successor; at leaves the cubeless
    /// outputs are transformed to cubeful equities, exactly where a
    /// two-sided table covers the position and by Janowski's formulae
    /// elsewhere.
    #[allow(clippy::too_many_arguments)]
    fn evaluate_cubeful_full(
        &mut self,
        board: &Board,
        output: &mut [f32; NUM_OUTPUTS],
        cubeful: &mut [f32],
        cube_pos: &[Option<CubeInfo>],
        ci_move: &CubeInfo,
        config: &EvalConfig,
        n_plies: u32,
        top: bool,
    ) -> Result<()> {
        let cci = cube_pos.len();
        let class = classify(board, ci_move.variant, &self.bearoffs);

        let exact_money_leaf =
            class <= PositionClass::BearoffTwoSidedWide && !ci_move.is_match();

        if class != PositionClass::Over && n_plies > 0 && !exact_money_leaf {
            let use_prune =
                config.use_prune && config.noise == 0.0 && ci_move.variant == Variant::Standard;

            output.fill(0.0);
            let mut arcf = vec![0f32; 2 * cci];
            let mut arcf_roll = vec![0f32; 2 * cci];

            // next-level cube positions, from the opponent's seat
            let mut aci = self.make_cube_positions(cube_pos, top, true)?;

            let mut opp = *ci_move;
            opp.on_roll = 1 - ci_move.on_roll;

            for &(d0, d1, w) in &ALL_ROLLS {
                self.check_interrupt()?;

                let mut board_new = *board;
                if use_prune {
                    self.find_best_move_in_eval(
                        Dice(d0, d1),
                        board,
                        &mut board_new,
                        ci_move,
                        config,
                    )?;
                } else {
                    self.find_best_move_plied(&mut board_new, Dice(d0, d1), ci_move, config, 0)?;
                }
                board_new.swap_sides();

                let mut roll_output = [0f32; NUM_OUTPUTS];
                self.evaluate_cubeful(
                    &board_new,
                    &mut roll_output,
                    &mut arcf_roll,
                    &aci,
                    &opp,
                    config,
                    n_plies - 1,
                    false,
                )?;

                let w = f32::from(w);
                for (sum, value) in output.iter_mut().zip(&roll_output) {
                    *sum += w * value;
                }
                for (sum, value) in arcf.iter_mut().zip(&arcf_roll) {
                    *sum += w * value;
                }
            }

            for value in output.iter_mut() {
                *value /= 36.0;
            }
            invert_evaluation(output);

            for value in arcf.iter_mut() {
                *value = if ci_move.is_match() {
                    1.0 - *value / 36.0
                } else {
                    -*value / 36.0
                };
            }

            // the successors were built from the opponent's seat; flip back
            for entry in aci.iter_mut().flatten() {
                entry.on_roll = 1 - entry.on_roll;
            }

            get_ecf3(cubeful, &arcf, &aci, &self.met);
        } else {
            // leaf node
            let mut equities = [0f32; 4];

            match class {
                PositionClass::Hypergammon1
                | PositionClass::Hypergammon2
                | PositionClass::Hypergammon3 => {
                    let k = class as usize - PositionClass::Hypergammon1 as usize;
                    let db = self.bearoffs.hypergammon[k].as_ref().ok_or_else(|| {
                        EngineError::BearoffFormat("hypergammon database not loaded".into())
                    })?;
                    let (out, eq) = db.hyper(two_sided_index(db, board))?;
                    *output = out;
                    equities = eq;
                }

                PositionClass::BearoffTwoSided | PositionClass::BearoffTwoSidedWide => {
                    let db = if class == PositionClass::BearoffTwoSided {
                        &self.bearoffs.two_sided
                    } else {
                        &self.bearoffs.two_sided_wide
                    };
                    let db = db.as_ref().ok_or_else(|| {
                        EngineError::BearoffFormat("two-sided database not loaded".into())
                    })?;
                    equities = db.cubeful_equities(two_sided_index(db, board))?;
                    output.fill(0.0);
                    output[OUTPUT_WIN] = (equities[0] + 1.0) / 2.0;
                }

                _ => {
                    // 0-ply cubeless evaluation, then noise and clamps
                    let basic = EvalConfig::default();
                    self.evaluate_cached(board, output, ci_move, &basic, 0, class)?;

                    if config.noise > 0.0 && class != PositionClass::Over {
                        for i in 0..NUM_OUTPUTS {
                            output[i] += self.noise(config, board, i);
                        }
                    }
                    if class.is_neural() || config.noise > 0.0 {
                        sanity_check(board, output, &self.bearoffs)?;
                    }
                }
            }

            let cube_x = cube::eval_efficiency(board, class, ci_move.is_match());
            let aci = self.make_cube_positions(cube_pos, top, false)?;
            let mut arcf = vec![0f32; 2 * cci];

            for (ici, entry) in aci.iter().enumerate() {
                let Some(ci) = entry else { continue };

                if !ci.is_match() {
                    arcf[ici] = match class {
                        PositionClass::Hypergammon1
                        | PositionClass::Hypergammon2
                        | PositionClass::Hypergammon3 => cube::cf_hyper(&equities, ci),
                        PositionClass::BearoffTwoSided | PositionClass::BearoffTwoSidedWide => {
                            cube::cf_money(&equities, ci)
                        }
                        _ => cube::cl2cf_money(output, ci, cube_x),
                    };
                } else {
                    arcf[ici] = match class {
                        PositionClass::Hypergammon1
                        | PositionClass::Hypergammon2
                        | PositionClass::Hypergammon3 => {
                            // guess the efficiency from the exact money equities
                            let money =
                                CubeInfo::money(1, ci.owner, ci.on_roll, false, false, ci.variant)?;
                            let r_cl = cube::utility(output, &money);
                            let r_cf = cube::cl2cf_money(output, &money, 1.0);
                            let r_cf_money = cube::cf_hyper(&equities, &money);

                            let mut x = 1.0;
                            if (r_cl - r_cf).abs() > 0.0001 {
                                x = (r_cf_money - r_cl) / (r_cf - r_cl);
                            }
                            cube::cl2cf_match(output, ci, x, &self.met)
                        }
                        PositionClass::BearoffTwoSided | PositionClass::BearoffTwoSidedWide => {
                            let money =
                                CubeInfo::money(1, ci.owner, ci.on_roll, false, false, ci.variant)?;
                            let r_cl = equities[0];
                            let r_cf = cube::cl2cf_money(output, &money, 1.0);
                            let r_cf_money = cube::cf_money(&equities, &money);

                            let x = if (r_cl - r_cf).abs() > 0.0001 {
                                // the solved efficiency can still run wild
                                ((r_cf_money - r_cl) / (r_cf - r_cl)).clamp(0.0, cube_x)
                            } else {
                                cube_x
                            };
                            cube::cl2cf_match(output, ci, x, &self.met)
                        }
                        _ => cube::cl2cf_match(output, ci, cube_x, &self.met),
                    };
                }
            }

            get_ecf3(cubeful, &arcf, &aci, &self.met);
        }

        Ok(())
    }

    /// Expands each live cube position into its no-double and double
    /// successors. The double slot stays empty when the player on roll
    /// cannot double. `invert` flips the seat for the next recursion
    /// level.
    fn make_cube_positions(
        &self,
        cube_pos: &[Option<CubeInfo>],
        top: bool,
        invert: bool,
    ) -> Result<Vec<Option<CubeInfo>>> {
        let mut aci = Vec::with_capacity(2 * cube_pos.len());

        for entry in cube_pos {
            match entry {
                Some(ci) => {
                    let on_roll = if invert { 1 - ci.on_roll } else { ci.on_roll };
                    aci.push(Some(self.rebuild(ci, ci.cube, ci.owner, on_roll)?));

                    if !top && ci.cube_available() {
                        aci.push(Some(self.rebuild(
                            ci,
                            2 * ci.cube,
                            (1 - ci.on_roll) as i8,
                            on_roll,
                        )?));
                    } else {
                        aci.push(None);
                    }
                }
                None => {
                    aci.push(None);
                    aci.push(None);
                }
            }
        }

        Ok(aci)
    }

    /// A cube state derived from an existing one, with the gammon prices
    /// recomputed for the new cube value.
    fn rebuild(&self, ci: &CubeInfo, cube: u32, owner: i8, on_roll: usize) -> Result<CubeInfo> {
        if ci.is_match() {
            CubeInfo::match_play(
                cube,
                owner,
                on_roll,
                ci.match_to,
                ci.score,
                ci.crawford,
                ci.variant,
                &self.met,
            )
        } else {
            CubeInfo::money(cube, owner, on_roll, ci.jacoby, ci.beavers, ci.variant)
        }
    }
}

/// Picks the optimal of "no double" and "double" for each original cube
/// position from the equities of its two successors.
fn get_ecf3(
    cubeful: &mut [f32],
    arcf: &[f32],
    aci: &[Option<CubeInfo>],
    met: &MatchEquityTable,
) {
    for (ici, out) in cubeful.iter_mut().enumerate() {
        let i = 2 * ici;
        *out = match (&aci[i], &aci[i + 1]) {
            (Some(nd), Some(_)) => {
                let r_nd = arcf[i];
                let r_dt = if nd.is_match() {
                    arcf[i + 1]
                } else {
                    2.0 * arcf[i + 1]
                };
                let r_dp = nd.double_pass_equity(met);

                if r_dt >= r_nd && r_dp >= r_nd {
                    // double; opponent picks the cheaper of take and pass
                    if r_dt >= r_dp {
                        r_dp
                    } else {
                        r_dt
                    }
                } else {
                    r_nd
                }
            }
            _ => arcf[i],
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::met::MetParams;

    fn context() -> EngineContext {
        EngineContext::with_cache_size(
            Weights::zeroed(),
            BearoffSet::heuristic_only(),
            MatchEquityTable::from_params(&MetParams::default()),
            1 << 12,
        )
    }

    fn money_cube() -> CubeInfo {
        CubeInfo::money(1, -1, 1, false, false, Variant::Standard).unwrap()
    }

    #[test]
    fn over_positions_grade_win_gammon_backgammon() {
        let mut ctx = context();
        let ci = money_cube();
        let config = EvalConfig::default();
        let mut out = [0f32; NUM_OUTPUTS];

        // plain win: opponent has borne some off
        let mut board = Board::empty();
        board[0][5] = 3;
        ctx.evaluate_position(&board, &mut out, &ci, &config).unwrap();
        assert_eq!(out, [1.0, 0.0, 0.0, 0.0, 0.0]);

        // gammon: all fifteen still on
        let mut board = Board::empty();
        board[0][5] = 15;
        ctx.evaluate_position(&board, &mut out, &ci, &config).unwrap();
        assert_eq!(out[OUTPUT_WINGAMMON], 1.0);
        assert_eq!(out[OUTPUT_WINBACKGAMMON], 0.0);

        // backgammon: and a man in the player's home board
        let mut board = Board::empty();
        board[0][5] = 14;
        board[0][20] = 1;
        ctx.evaluate_position(&board, &mut out, &ci, &config).unwrap();
        assert_eq!(out[OUTPUT_WINBACKGAMMON], 1.0);

        // a loss seen from the other side
        let mut board = Board::empty();
        board[1][5] = 15;
        ctx.evaluate_position(&board, &mut out, &ci, &config).unwrap();
        assert_eq!(out[OUTPUT_WIN], 0.0);
        assert_eq!(out[OUTPUT_LOSEGAMMON], 1.0);
    }

    #[test]
    fn bearoff_leaf_is_exact() {
        let mut ctx = context();
        let ci = money_cube();
        let config = EvalConfig::default();

        // one chequer on the ace against four far from home: always off
        // first, and the opponent cannot be gammoned
        let mut board = Board::empty();
        board[1][0] = 1;
        board[0][5] = 4;

        let mut out = [0f32; NUM_OUTPUTS];
        ctx.evaluate_position(&board, &mut out, &ci, &config).unwrap();
        // accumulated from the roll distribution, so only f32-exact
        assert!((out[OUTPUT_WIN] - 1.0).abs() < 1e-6);
        assert_eq!(out[OUTPUT_WINGAMMON], 0.0);
    }

    #[test]
    fn evaluation_is_deterministic_and_cached() {
        let mut ctx = context();
        let ci = money_cube();
        let config = EvalConfig::plied(1);
        let board = Board::starting(Variant::Standard);

        let mut first = [0f32; NUM_OUTPUTS];
        ctx.evaluate_position(&board, &mut first, &ci, &config).unwrap();
        let mut second = [0f32; NUM_OUTPUTS];
        ctx.evaluate_position(&board, &mut second, &ci, &config).unwrap();

        assert_eq!(first, second);
        let (lookups, hits) = ctx.cache_stats();
        assert!(lookups > 0);
        assert!(hits > 0);
    }

    #[test]
    fn eval_key_separates_contexts() {
        let ci = money_cube();
        let mut match_ci = ci;
        match_ci.match_to = 7;
        match_ci.score = [2, 3];

        let base = EvalConfig::default();
        let mut cubeful = base;
        cubeful.cubeful = true;

        // depth, cube treatment and seat all partition the cache
        assert_ne!(eval_key(&base, 0, &ci, false), eval_key(&base, 1, &ci, false));
        assert_ne!(eval_key(&base, 0, &ci, false), eval_key(&cubeful, 0, &ci, false));

        let mut flipped = ci;
        flipped.on_roll = 0;
        assert_ne!(eval_key(&base, 0, &ci, false), eval_key(&base, 0, &flipped, false));

        // cubeful-equity entries never collide with cubeless ones
        assert_ne!(
            eval_key(&base, 1, &match_ci, false),
            eval_key(&base, 1, &match_ci, true)
        );
    }

    #[test]
    fn deterministic_noise_is_reproducible_and_scaled() {
        let mut ctx = context();
        let board = Board::starting(Variant::Standard);
        let config = EvalConfig {
            noise: 0.2,
            deterministic: true,
            ..EvalConfig::default()
        };

        let a = ctx.noise(&config, &board, OUTPUT_WIN);
        let b = ctx.noise(&config, &board, OUTPUT_WIN);
        assert_eq!(a, b);

        // different outputs perturb differently
        let g = ctx.noise(&config, &board, OUTPUT_WINGAMMON);
        assert_ne!(a, g);

        // backgammon noise is two orders of magnitude smaller
        let bg = ctx.noise(&config, &board, OUTPUT_WINBACKGAMMON);
        assert!(bg.abs() <= 0.01 * 0.2 * 7.0);
    }

    #[test]
    fn forced_move_is_found_without_scoring() {
        let mut ctx = context();
        let ci = money_cube();
        let config = EvalConfig::default();

        // one man on the bar; entry with die d is barred by the
        // opponent's own d-point
        let mut board = Board::empty();
        board[1][24] = 1;
        board[1][5] = 5;
        for i in 0..6 {
            board[0][i] = 2;
        }
        board[0][3] = 0; // only the 4 enters
        board[0][7] = 2; // and the entered man is stuck
        board[0][22] = 2; // as are the men on the six point

        let mut played = board;
        let m = ctx
            .find_best_move(&mut played, Dice(4, 4), &ci, &config)
            .unwrap();
        assert!(m.is_some());
        assert_ne!(played, board);
    }

    #[test]
    fn dancing_roll_returns_no_move() {
        let mut ctx = context();
        let ci = money_cube();
        let config = EvalConfig::default();

        // a closed board keeps both men dancing on the bar
        let mut board = Board::empty();
        board[1][24] = 2;
        board[1][10] = 13;
        for i in 0..6 {
            board[0][i] = 2;
        }
        board[0][12] = 3;

        let mut played = board;
        let m = ctx
            .find_best_move(&mut played, Dice(3, 1), &ci, &config)
            .unwrap();
        assert!(m.is_none());
        assert_eq!(played, board);
    }

    #[test]
    fn interrupt_aborts_lookahead() {
        let mut ctx = context();
        let ci = money_cube();
        let config = EvalConfig::plied(1);
        let board = Board::starting(Variant::Standard);

        ctx.interrupt_flag().store(true, MemoryOrdering::Relaxed);

        let mut out = [0f32; NUM_OUTPUTS];
        let err = ctx.evaluate_position(&board, &mut out, &ci, &config);
        assert!(matches!(err, Err(EngineError::Interrupted)));

        ctx.interrupt_flag().store(false, MemoryOrdering::Relaxed);
        assert!(ctx.evaluate_position(&board, &mut out, &ci, &config).is_ok());
    }

    #[test]
    fn one_ply_outputs_stay_probabilities() {
        let mut ctx = context();
        let ci = money_cube();
        let config = EvalConfig::plied(1);

        // a race so the pruning path gets exercised too
        let mut board = Board::empty();
        board[1][3] = 8;
        board[1][4] = 7;
        board[0][2] = 8;
        board[0][5] = 7;

        let mut out = [0f32; NUM_OUTPUTS];
        ctx.evaluate_position(&board, &mut out, &ci, &config).unwrap();
        for &p in &out {
            // the 21-roll average leaves f32 dust around hard zeros
            assert!((-1e-6..=1.0 + 1e-6).contains(&p), "output {p} out of range");
        }
        assert!(out[OUTPUT_WINGAMMON] <= out[OUTPUT_WIN]);
    }

    #[test]
    fn general_evaluation_fills_equities() {
        let mut ctx = context();
        let ci = money_cube();
        let board = Board::starting(Variant::Standard);

        let mut evals = [0f32; NUM_ROLLOUT_OUTPUTS];
        ctx.general_evaluation(&mut evals, &board, &ci, &EvalConfig::default())
            .unwrap();
        assert_eq!(evals[OUTPUT_CUBEFUL_EQUITY], 0.0);
        assert!((-3.0..=3.0).contains(&evals[OUTPUT_EQUITY]));

        // a last-roll bearoff: cubeless and cubeful equities are both 1
        let mut board = Board::empty();
        board[1][0] = 1;
        board[0][5] = 4;
        let cubeful = EvalConfig {
            cubeful: true,
            ..EvalConfig::default()
        };
        ctx.general_evaluation(&mut evals, &board, &ci, &cubeful)
            .unwrap();
        assert!(evals[OUTPUT_CUBEFUL_EQUITY] > 0.9);
        assert!((evals[OUTPUT_EQUITY] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn cube_decision_yields_both_branches() {
        let mut ctx = context();
        let ci = money_cube();
        let board = Board::starting(Variant::Standard);

        let mut outputs = [[0f32; NUM_ROLLOUT_OUTPUTS]; 2];
        ctx.general_cube_decision(&mut outputs, &board, &ci, &EvalConfig::default())
            .unwrap();

        // cubeless chances agree between the branches
        assert_eq!(outputs[0][..NUM_OUTPUTS], outputs[1][..NUM_OUTPUTS]);

        let mut ar = [0f32; cube::NUM_CUBEFUL_OUTPUTS];
        let decision = cube::find_cube_decision(&mut ar, &outputs, &ci, ctx.met());
        // with symmetric chances doubling cannot be right
        assert!(matches!(
            decision,
            cube::CubeDecision::NoDoubleTake | cube::CubeDecision::NoDoubleBeaver
        ));
    }

    #[test]
    fn race_backgammon_override_zeroes_impossible_backgammons() {
        let mut ctx = context();

        // pure race, both sides have borne men off: no backgammons at all
        let mut board = Board::empty();
        board[1][2] = 5;
        board[0][3] = 5;
        let mut out = [0.5f32, 0.2, 0.1, 0.2, 0.1];
        ctx.eval_race_bg(&board, &mut out).unwrap();
        // neither side has 15 men: the override leaves the outputs alone
        assert_eq!(out[OUTPUT_WINBACKGAMMON], 0.1);

        // all fifteen for the opponent but none behind: backgammon zeroed
        let mut board = Board::empty();
        board[1][2] = 5;
        board[0][3] = 10;
        board[0][10] = 5;
        let mut out = [0.9f32, 0.5, 0.2, 0.0, 0.0];
        ctx.eval_race_bg(&board, &mut out).unwrap();
        assert_eq!(out[OUTPUT_WINBACKGAMMON], 0.2, "no men in the far quadrant");

        let mut board = Board::empty();
        board[1][2] = 5;
        board[0][3] = 14;
        board[0][20] = 1;
        let mut out = [0.9f32, 0.5, 0.2, 0.0, 0.0];
        ctx.eval_race_bg(&board, &mut out).unwrap();
        // the override recomputed the backgammon probability exactly
        assert!(out[OUTPUT_WINBACKGAMMON] >= 0.0);
        assert!(out[OUTPUT_WINGAMMON] >= out[OUTPUT_WINBACKGAMMON]);
    }

    #[test]
    fn filters_skip_negative_accept_plies() {
        let table = NORMAL_FILTERS;
        assert_eq!(table[1][1].accept, -1);
        assert_eq!(table[3][3].accept, -1);
        assert_eq!(table[2][2].extra, 2);
    }

    #[test]
    fn precision_ordering_ranks_configurations() {
        let base = EvalConfig::default();

        assert_eq!(base.precision_cmp(&base), Ordering::Equal);
        assert_eq!(EvalConfig::plied(2).precision_cmp(&base), Ordering::Greater);

        let cubeful = EvalConfig {
            cubeful: true,
            ..base
        };
        assert_eq!(cubeful.precision_cmp(&base), Ordering::Greater);

        let noisy = EvalConfig {
            noise: 0.05,
            ..base
        };
        assert_eq!(noisy.precision_cmp(&base), Ordering::Less);

        // at depth, skipping the pruning nets is the stronger setting
        let unpruned = EvalConfig {
            use_prune: false,
            ..EvalConfig::plied(2)
        };
        assert_eq!(unpruned.precision_cmp(&EvalConfig::plied(2)), Ordering::Greater);
    }
}
