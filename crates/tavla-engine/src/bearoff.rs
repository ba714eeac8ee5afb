//! Bearoff databases: exact one-sided roll distributions, two-sided
//! (optionally cubeful) equities, hypergammon tables, and the generated
//! heuristic fallback table.
//!
//! File-backed databases are memory-mapped and validated against their
//! 40-byte ASCII header on open. A read that falls outside the mapped
//! region is served as zeroes with a warning: bearoff data is an accuracy
//! enhancement, not a correctness requirement.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use tavla_core::{
    bearoff_positions, position_bearoff, position_from_bearoff, Board, NUM_OUTPUTS,
    OUTPUT_LOSEBACKGAMMON, OUTPUT_LOSEGAMMON, OUTPUT_WIN, OUTPUT_WINBACKGAMMON, OUTPUT_WINGAMMON,
};

use crate::error::{EngineError, Result};

/// The generated heuristic table covers the full home board.
pub const HEURISTIC_POINTS: usize = 6;
pub const HEURISTIC_CHEQUERS: usize = 15;

const HEADER_LEN: usize = 40;
const MAGIC: &[u8] = b"gnubg";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BearoffType {
    OneSided,
    TwoSided,
    Hypergammon,
}

enum BearoffData {
    Mapped(Mmap),
    Memory(Vec<u8>),
}

impl BearoffData {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Mapped(map) => map,
            Self::Memory(vec) => vec,
        }
    }
}

/// One opened bearoff database.
pub struct BearoffDb {
    bt: BearoffType,
    n_points: usize,
    n_chequers: usize,
    /// Two-sided tables: four equities per position instead of one.
    cubeful: bool,
    /// One-sided tables: gammon distributions stored alongside.
    gammon: bool,
    compressed: bool,
    /// One-sided distributions stored as fitted normal parameters.
    normal: bool,
    heuristic: bool,
    name: String,
    data: BearoffData,
}

/// One-sided roll distribution for a single position, both as raw
/// 16-bit fixed-point values and as floats, with mean/stddev summaries
/// for the bearoff and first-chequer-off distributions.
#[derive(Debug, Clone)]
pub struct BearoffDist {
    pub prob: [f32; 32],
    pub gammon_prob: [f32; 32],
    pub us_prob: [u16; 32],
    pub us_gammon_prob: [u16; 32],
    pub rolls: [f32; 4],
}

/// Effective pip counts for both sides of a bearoff position, indexed
/// like the board (`[1]` is the player on roll).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectivePipCount {
    /// Average rolls to bear off, scaled to pips.
    pub epc: [f32; 2],
    /// How many pips the position squanders over a perfect distribution.
    pub wastage: [f32; 2],
    /// Average rolls to bear off.
    pub mu: [f32; 2],
    /// Standard deviation of the rolls to bear off.
    pub sigma: [f32; 2],
}

impl BearoffDb {
    /// Opens and memory-maps a database file, validating its header.
    pub fn open(path: &Path) -> Result<Self> {
        let name = path.display().to_string();
        let file = File::open(path)?;
        // read-only map of an immutable database file
        let map = unsafe { Mmap::map(&file)? };

        let db = Self::from_header(BearoffData::Mapped(map), name)?;
        log::info!(
            "loaded {:?} bearoff database {} ({} points, {} chequers)",
            db.bt,
            db.name,
            db.n_points,
            db.n_chequers
        );
        Ok(db)
    }

    fn from_header(data: BearoffData, name: String) -> Result<Self> {
        // the header is consulted again after `data` moves into the struct
        let header: [u8; HEADER_LEN] = data
            .bytes()
            .get(..HEADER_LEN)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| EngineError::BearoffFormat(format!("{name}: missing header")))?;

        if &header[..MAGIC.len()] != MAGIC {
            return Err(EngineError::BearoffFormat(format!("{name}: bad magic")));
        }

        let bt = match &header[6..8] {
            b"TS" => BearoffType::TwoSided,
            b"OS" => BearoffType::OneSided,
            tag if tag[0] == b'H' => BearoffType::Hypergammon,
            tag => {
                return Err(EngineError::BearoffFormat(format!(
                    "{name}: unknown table type {:?}",
                    String::from_utf8_lossy(tag)
                )))
            }
        };

        let (n_points, n_chequers) = if bt == BearoffType::Hypergammon {
            (25, ascii_int(&header[7..]))
        } else {
            (ascii_int(&header[9..]), ascii_int(&header[12..]))
        };

        if bt != BearoffType::Hypergammon && !(1..24).contains(&n_points) {
            return Err(EngineError::BearoffFormat(format!(
                "{name}: illegal number of points {n_points}"
            )));
        }
        if !(1..=15).contains(&n_chequers) {
            return Err(EngineError::BearoffFormat(format!(
                "{name}: illegal number of chequers {n_chequers}"
            )));
        }

        let mut db = Self {
            bt,
            n_points,
            n_chequers,
            cubeful: false,
            gammon: false,
            compressed: false,
            normal: false,
            heuristic: false,
            name,
            data,
        };

        match bt {
            BearoffType::TwoSided => db.cubeful = ascii_int(&header[15..]) != 0,
            BearoffType::OneSided => {
                db.gammon = ascii_int(&header[15..]) != 0;
                db.compressed = ascii_int(&header[17..]) != 0;
                db.normal = ascii_int(&header[19..]) != 0;
            }
            BearoffType::Hypergammon => {}
        }

        let positions = db.positions() as usize;
        let minimum = HEADER_LEN
            + match bt {
                BearoffType::TwoSided => 2 * positions * positions * db.equity_stride(),
                BearoffType::Hypergammon => 28 * positions * positions,
                BearoffType::OneSided => {
                    if db.normal {
                        16 * positions
                    } else if db.compressed {
                        db.index_entry_size() * positions
                    } else {
                        64 * positions * if db.gammon { 2 } else { 1 }
                    }
                }
            };
        if db.data.bytes().len() < minimum {
            return Err(EngineError::BearoffFormat(format!(
                "{}: truncated ({} bytes, need at least {minimum})",
                db.name,
                db.data.bytes().len()
            )));
        }

        Ok(db)
    }

    /// Builds the in-memory heuristic one-sided table: exact distributions
    /// under a greedy bear-off policy, bootstrapped position by position.
    pub fn heuristic() -> Self {
        let positions = bearoff_positions(HEURISTIC_POINTS, HEURISTIC_CHEQUERS) as usize;
        let mut data = vec![0u8; HEADER_LEN + positions * 64];
        data[..MAGIC.len()].copy_from_slice(MAGIC);
        data[5..20].copy_from_slice(b"-OS-06-15-0-0-0");

        {
            let table = &mut data[HEADER_LEN..];
            // position 0: all chequers already off, in zero rolls
            table[0] = 0xff;
            table[1] = 0xff;
            for id in 1..positions as u32 {
                generate_bearoff(table, id);
            }
        }

        Self {
            bt: BearoffType::OneSided,
            n_points: HEURISTIC_POINTS,
            n_chequers: HEURISTIC_CHEQUERS,
            cubeful: false,
            gammon: false,
            compressed: false,
            normal: false,
            heuristic: true,
            name: "heuristic".into(),
            data: BearoffData::Memory(data),
        }
    }

    pub fn table_type(&self) -> BearoffType {
        self.bt
    }

    pub fn points(&self) -> usize {
        self.n_points
    }

    pub fn chequers(&self) -> usize {
        self.n_chequers
    }

    pub fn is_cubeful(&self) -> bool {
        self.cubeful
    }

    pub fn is_heuristic(&self) -> bool {
        self.heuristic
    }

    /// One-sided position count, `C(points + chequers, points)`.
    pub fn positions(&self) -> u32 {
        bearoff_positions(self.n_points, self.n_chequers)
    }

    fn equity_stride(&self) -> usize {
        if self.cubeful {
            4
        } else {
            1
        }
    }

    fn index_entry_size(&self) -> usize {
        if self.gammon {
            8
        } else {
            6
        }
    }

    fn read(&self, offset: usize, buf: &mut [u8]) {
        match self.data.bytes().get(offset..offset + buf.len()) {
            Some(src) => buf.copy_from_slice(src),
            None => {
                log::warn!(
                    "bearoff database {}: read of {} bytes at {offset} out of range, zero-filling",
                    self.name,
                    buf.len()
                );
                buf.fill(0);
            }
        }
    }

    /// Whether this table covers the position. Requires both sides still
    /// in play and, for non-hypergammon tables, no remaining contact.
    pub fn is_bearoff(&self, board: &Board) -> bool {
        let (n_opp_back, n_back) = match (board.back_chequer(0), board.back_chequer(1)) {
            (Some(o), Some(b)) => (o, b),
            _ => return false,
        };

        if n_back + n_opp_back > 22 && self.bt != BearoffType::Hypergammon {
            return false;
        }

        let n: u32 = board[1][..=n_back].iter().map(|&c| u32::from(c)).sum();
        let n_opp: u32 = board[0][..=n_opp_back].iter().map(|&c| u32::from(c)).sum();

        n <= self.n_chequers as u32
            && n_opp <= self.n_chequers as u32
            && n_back < self.n_points
            && n_opp_back < self.n_points
    }

    /// Evaluates a position covered by this table into the five cubeless
    /// outputs, dispatching on the table type.
    pub fn eval(&self, board: &Board, output: &mut [f32; NUM_OUTPUTS]) -> Result<()> {
        match self.bt {
            BearoffType::TwoSided => {
                self.eval_two_sided(board, output);
                Ok(())
            }
            BearoffType::OneSided => self.eval_one_sided(board, output),
            BearoffType::Hypergammon => self.eval_hypergammon(board, output),
        }
    }

    fn two_sided_index(&self, board: &Board) -> u32 {
        let n_us = position_bearoff(&board[1], self.n_points, self.n_chequers);
        let n_them = position_bearoff(&board[0], self.n_points, self.n_chequers);
        n_us * self.positions() + n_them
    }

    fn eval_two_sided(&self, board: &Board, output: &mut [f32; NUM_OUTPUTS]) {
        let ar = self.two_sided(self.two_sided_index(board));
        output.fill(0.0);
        output[OUTPUT_WIN] = ar[0] / 2.0 + 0.5;
    }

    /// Reads the raw equities for a two-sided position index. Cubeless
    /// tables fill only the first entry; cubeful tables return
    /// (cubeless, owned, centered, opponent-owned) equities.
    pub fn two_sided(&self, i_pos: u32) -> [f32; 4] {
        let k = self.equity_stride();
        let mut ac = [0u8; 8];
        self.read(HEADER_LEN + 2 * i_pos as usize * k, &mut ac[..2 * k]);

        let mut ar = [0f32; 4];
        for (i, out) in ar.iter_mut().take(k).enumerate() {
            let us = u16::from_le_bytes([ac[2 * i], ac[2 * i + 1]]);
            *out = f32::from(us) / 32767.5 - 1.0;
        }
        ar
    }

    /// Cubeful equities (owned, centered, centered-Jacoby, opponent-owned
    /// as stored) for a two-sided position index.
    pub fn cubeful_equities(&self, i_pos: u32) -> Result<[f32; 4]> {
        if !self.cubeful {
            return Err(EngineError::BearoffFormat(format!(
                "{}: cubeful equities requested from a cubeless table",
                self.name
            )));
        }
        Ok(self.two_sided(i_pos))
    }

    fn eval_one_sided(&self, board: &Board, output: &mut [f32; NUM_OUTPUTS]) -> Result<()> {
        let an = [
            position_bearoff(&board[0], self.n_points, self.n_chequers),
            position_bearoff(&board[1], self.n_points, self.n_chequers),
        ];
        let dists = [self.dist(an[0])?, self.dist(an[1])?];

        // win: I am out in i rolls, the opponent in j >= i
        let mut win = 0.0f32;
        for i in 0..32 {
            for j in i..32 {
                win += dists[1].prob[i] * dists[0].prob[j];
            }
        }

        output.fill(0.0);
        output[OUTPUT_WIN] = win;

        let on = [board.chequers_on_board(0), board.chequers_on_board(1)];
        if on[0] == 15 || on[1] == 15 {
            if self.gammon {
                // my gammon: I am out in i rolls, the opponent has not
                // borne off a chequer in fewer than i rolls
                let mut r = 0.0f32;
                for i in 0..32 {
                    for j in i..32 {
                        r += dists[1].prob[i] * dists[0].gammon_prob[j];
                    }
                }
                output[OUTPUT_WINGAMMON] = r;

                let mut r = 0.0f32;
                for i in 0..32 {
                    for j in i + 1..32 {
                        r += dists[0].prob[i] * dists[1].gammon_prob[j];
                    }
                }
                output[OUTPUT_LOSEGAMMON] = r;
            } else {
                let (lose_g, win_g) = self.approximate_gammons(board, an[0], an[1])?;
                output[OUTPUT_WINGAMMON] = win_g;
                output[OUTPUT_LOSEGAMMON] = lose_g;
            }
        }

        // backgammons are impossible once both sides are in bearoff
        output[OUTPUT_WINBACKGAMMON] = 0.0;
        output[OUTPUT_LOSEBACKGAMMON] = 0.0;
        Ok(())
    }

    /// Gammon estimate for tables without gammon distributions: combines
    /// the bearoff distribution of the side racing for the gammon with the
    /// probability that the full side gets its first chequer off within
    /// one, two or three rolls.
    fn approximate_gammons(&self, board: &Board, bp0: u32, bp1: u32) -> Result<(f32, f32)> {
        let mut g0 = 0.0f32;
        let mut g1 = 0.0f32;

        if board.chequers_on_board(0) == 15 {
            let make = first_off_make(&home_points(board, 0));
            let prob = self.dist(bp1)?.us_prob;

            g1 = (f64::from(prob[1]) / 65535.0
                + (1.0 - make[0]) * f64::from(prob[2]) / 65535.0
                + (1.0 - make[1]) * f64::from(prob[3]) / 65535.0
                + (1.0 - make[2]) * f64::from(prob[4]) / 65535.0) as f32;
        }

        if board.chequers_on_board(1) == 15 {
            let make = first_off_make(&home_points(board, 1));
            let prob = self.dist(bp0)?.us_prob;

            g0 = ((f64::from(prob[1]) / 65535.0) * (1.0 - make[0])
                + (f64::from(prob[2]) / 65535.0) * (1.0 - make[1])
                + (f64::from(prob[3]) / 65535.0) * (1.0 - make[2])) as f32;
        }

        Ok((g0, g1))
    }

    fn eval_hypergammon(&self, board: &Board, output: &mut [f32; NUM_OUTPUTS]) -> Result<()> {
        let (outputs, _) = self.hyper(self.two_sided_index(board))?;
        *output = outputs;
        Ok(())
    }

    /// Raw hypergammon record: five outputs plus the four cube equities
    /// (cubeless, owned, centered, opponent-owned), scaled to [-3, +3].
    pub fn hyper(&self, i_pos: u32) -> Result<([f32; NUM_OUTPUTS], [f32; 4])> {
        if self.bt != BearoffType::Hypergammon {
            return Err(EngineError::BearoffFormat(format!(
                "{}: hypergammon record requested from a {:?} table",
                self.name, self.bt
            )));
        }

        let mut ac = [0u8; 28];
        self.read(HEADER_LEN + 28 * i_pos as usize, &mut ac);

        let triple = |o: usize| {
            u32::from(ac[o]) | (u32::from(ac[o + 1]) << 8) | (u32::from(ac[o + 2]) << 16)
        };

        let mut outputs = [0f32; NUM_OUTPUTS];
        for (i, out) in outputs.iter_mut().enumerate() {
            *out = triple(3 * i) as f32 / 16777215.0;
        }

        let mut equities = [0f32; 4];
        for (i, eq) in equities.iter_mut().enumerate() {
            *eq = (triple(15 + 3 * i) as f32 / 16777215.0 - 0.5) * 6.0;
        }

        Ok((outputs, equities))
    }

    /// Effective pip counts of both sides, from the one-sided roll
    /// distributions: one average roll moves 49/6 pips, so the EPC is the
    /// expected rolls to bear off times that, and the wastage is whatever
    /// it exceeds the raw pip count by.
    pub fn effective_pip_count(&self, board: &Board) -> Result<EffectivePipCount> {
        // expected pips of a single roll
        const X: f32 = 49.0 / 6.0;

        let pips = board.pip_count();
        let pips = [pips.0 as f32, pips.1 as f32];

        let mut out = EffectivePipCount {
            epc: [0.0; 2],
            wastage: [0.0; 2],
            mu: [0.0; 2],
            sigma: [0.0; 2],
        };

        for side in 0..2 {
            let n = position_bearoff(&board[side][..], self.n_points, self.n_chequers);
            let dist = self.dist(n)?;
            out.mu[side] = dist.rolls[0];
            out.sigma[side] = dist.rolls[1];
            out.epc[side] = X * dist.rolls[0];
            out.wastage[side] = out.epc[side] - pips[side];
        }

        Ok(out)
    }

    /// Roll distribution of a one-sided position.
    pub fn dist(&self, pos_id: u32) -> Result<BearoffDist> {
        if self.bt != BearoffType::OneSided {
            return Err(EngineError::BearoffFormat(format!(
                "{}: distribution requested from a two-sided table",
                self.name
            )));
        }
        if self.normal {
            Ok(self.dist_normal(pos_id))
        } else {
            let aus = if self.compressed {
                self.dist_compressed(pos_id)?
            } else {
                self.dist_uncompressed(pos_id)
            };
            Ok(assemble_dist(&aus))
        }
    }

    fn dist_uncompressed(&self, pos_id: u32) -> [u16; 64] {
        let offset = HEADER_LEN + 64 * pos_id as usize * if self.gammon { 2 } else { 1 };
        let mut ac = [0u8; 128];
        let len = if self.gammon { 128 } else { 64 };
        self.read(offset, &mut ac[..len]);

        let mut aus = [0u16; 64];
        copy_shorts(&mut aus, &ac, 32, 0, 32, 0);
        aus
    }

    fn dist_compressed(&self, pos_id: u32) -> Result<[u16; 64]> {
        let entry_size = self.index_entry_size();
        let positions = self.positions() as usize;

        let mut entry = [0u8; 8];
        self.read(HEADER_LEN + pos_id as usize * entry_size, &mut entry[..entry_size]);

        let offset = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]) as usize;
        let nz = usize::from(entry[4]);
        let ioff = usize::from(entry[5]);
        let (nzg, ioffg) = if self.gammon {
            (usize::from(entry[6]), usize::from(entry[7]))
        } else {
            (0, 0)
        };

        if offset > 64 * positions || nz > 32 || ioff > 32 || nzg > 32 || ioffg > 32 {
            return Err(EngineError::BearoffFormat(format!(
                "{}: corrupt index entry for position {pos_id} \
                 (offset {offset}, dist {nz}+{ioff}, gammon {nzg}+{ioffg})",
                self.name
            )));
        }

        let payload = HEADER_LEN + positions * entry_size + 2 * offset;
        let mut ac = [0u8; 128];
        self.read(payload, &mut ac[..2 * (nz + nzg)]);

        let mut aus = [0u16; 64];
        copy_shorts(&mut aus, &ac, nz, ioff, nzg, ioffg);
        Ok(aus)
    }

    fn dist_normal(&self, pos_id: u32) -> BearoffDist {
        let mut ac = [0u8; 16];
        self.read(HEADER_LEN + pos_id as usize * 16, &mut ac);

        let mut params = [0f32; 4];
        for (i, p) in params.iter_mut().enumerate() {
            *p = f32::from_le_bytes([ac[4 * i], ac[4 * i + 1], ac[4 * i + 2], ac[4 * i + 3]]);
        }

        let mut dist = BearoffDist {
            prob: [0.0; 32],
            gammon_prob: [0.0; 32],
            us_prob: [0; 32],
            us_gammon_prob: [0; 32],
            rolls: params,
        };
        for i in 0..32 {
            let r = fnd(i as f32, params[0], params[1]);
            dist.prob[i] = r;
            dist.us_prob[i] = (r * 65535.0) as u16;

            let r = fnd(i as f32, params[2], params[3]);
            dist.gammon_prob[i] = r;
            dist.us_gammon_prob[i] = (r * 65535.0) as u16;
        }
        dist
    }
}

/// Normal density, degenerating to a Dirac delta for vanishing sigma.
pub fn fnd(x: f32, mu: f32, sigma: f32) -> f32 {
    const EPSILON: f32 = 1.0e-7;

    if sigma <= EPSILON {
        if (mu - x).abs() < EPSILON {
            1.0
        } else {
            0.0
        }
    } else {
        let xm = (x - mu) / sigma;
        (-xm * xm / 2.0).exp() / (sigma * (2.0 * std::f32::consts::PI).sqrt())
    }
}

/// Mean and standard deviation of a roll distribution.
pub fn average_rolls(prob: &[f32; 32]) -> [f32; 2] {
    let mut sx = 0.0f32;
    let mut sx2 = 0.0f32;
    for (i, &p) in prob.iter().enumerate().skip(1) {
        let ip = i as f32 * p;
        sx += ip;
        sx2 += i as f32 * ip;
    }
    [sx, (sx2 - sx * sx).sqrt()]
}

fn assemble_dist(aus: &[u16; 64]) -> BearoffDist {
    let mut dist = BearoffDist {
        prob: [0.0; 32],
        gammon_prob: [0.0; 32],
        us_prob: [0; 32],
        us_gammon_prob: [0; 32],
        rolls: [0.0; 4],
    };
    for i in 0..32 {
        dist.us_prob[i] = aus[i];
        dist.us_gammon_prob[i] = aus[32 + i];
        dist.prob[i] = f32::from(aus[i]) / 65535.0;
        dist.gammon_prob[i] = f32::from(aus[32 + i]) / 65535.0;
    }
    let ar = average_rolls(&dist.prob);
    dist.rolls[0] = ar[0];
    dist.rolls[1] = ar[1];
    let ar = average_rolls(&dist.gammon_prob);
    dist.rolls[2] = ar[0];
    dist.rolls[3] = ar[1];
    dist
}

fn copy_shorts(aus: &mut [u16; 64], ac: &[u8], nz: usize, ioff: usize, nzg: usize, ioffg: usize) {
    let mut i = 0;
    for j in 0..nz {
        aus[ioff + j] = u16::from_le_bytes([ac[i], ac[i + 1]]);
        i += 2;
    }
    for j in 0..nzg {
        aus[32 + ioffg + j] = u16::from_le_bytes([ac[i], ac[i + 1]]);
        i += 2;
    }
}

fn ascii_int(bytes: &[u8]) -> usize {
    let mut n = 0usize;
    for &b in bytes {
        if b.is_ascii_digit() {
            n = n * 10 + usize::from(b - b'0');
        } else {
            break;
        }
    }
    n
}

fn home_points(board: &Board, side: usize) -> [u8; 6] {
    let mut points = [0u8; 6];
    points.copy_from_slice(&board[side][..6]);
    points
}

/// Greedy single-roll bearoff policy over a home board. Mutates the board
/// in place and returns the resulting position index.
fn heuristic_bearoff(board: &mut [u8; 6], roll: (u8, u8)) -> u32 {
    let (d0, d1) = roll;
    debug_assert!(d0 >= d1);

    let (dice, c) = if d0 == d1 {
        ([d0; 4], 4)
    } else {
        ([d0, d1, 0, 0], 2)
    };

    for i in 0..c {
        let mut n_max = 5;
        while n_max > 0 && board[n_max] == 0 {
            n_max -= 1;
        }
        if board[n_max] == 0 {
            break;
        }

        let d = usize::from(dice[i]);

        let n = if board[d - 1] > 0 {
            // bear off exactly
            d - 1
        } else if d - 1 > n_max {
            // bear off the highest chequer
            n_max
        } else {
            let mut pick = None;

            // a chequer we can bear off with the remaining dice
            let mut n_total = d - 1;
            for &later in &dice[i + 1..c] {
                n_total += usize::from(later);
                if n_total < 6 && board[n_total] > 0 {
                    pick = Some(n_total);
                    break;
                }
            }

            if pick.is_none() {
                // clear a doubled point onto an empty one
                for s in d..=n_max {
                    if board[s] >= 2
                        && board[s - d] == 0
                        && pick.map_or(true, |b: usize| board[s] > board[b])
                    {
                        pick = Some(s);
                    }
                }
            }

            match pick {
                Some(n) => n,
                None => {
                    // the most populated point, breaking ties by the
                    // least populated destination
                    let mut n = d;
                    for s in d + 1..=n_max {
                        if board[s] > board[n]
                            || (board[s] == board[n] && board[s - d] < board[n - d])
                        {
                            n = s;
                        }
                    }
                    n
                }
            }
        };

        board[n] -= 1;
        if n >= d {
            board[n - d] += 1;
        }
    }

    position_bearoff(board, HEURISTIC_POINTS, HEURISTIC_CHEQUERS)
}

/// Fills one heuristic-table entry from the already-generated entries of
/// the positions the greedy policy moves to.
fn generate_bearoff(table: &mut [u8], n_id: u32) {
    let mut a_prob = [0u32; 32];

    for d0 in 1..=6u8 {
        for d1 in 1..=d0 {
            let mut points = [0u8; 6];
            position_from_bearoff(&mut points, n_id, HEURISTIC_POINTS, HEURISTIC_CHEQUERS);
            let i_best = heuristic_bearoff(&mut points, (d0, d1)) as usize;
            debug_assert!((i_best as u32) < n_id);

            let weight = if d0 == d1 { 1 } else { 2 };
            for i in 0..31 {
                let e = (i_best << 6) | (i << 1);
                let us = u32::from(table[e]) | (u32::from(table[e | 1]) << 8);
                a_prob[i + 1] += us * weight;
            }
        }
    }

    for (i, &sum) in a_prob.iter().enumerate() {
        let us = ((sum + 18) / 36) as u16;
        let e = ((n_id as usize) << 6) | (i << 1);
        table[e] = (us & 0xff) as u8;
        table[e | 1] = (us >> 8) as u8;
    }
}

/// Cumulative probability that a full 15-chequer home board bears off its
/// first chequer within one, two and three rolls, under the greedy policy.
fn first_off_make(points: &[u8; 6]) -> [f64; 3] {
    [
        first_off_within(*points, 1),
        first_off_within(*points, 2),
        first_off_within(*points, 3),
    ]
}

fn first_off_within(points: [u8; 6], rolls: u32) -> f64 {
    if rolls == 0 {
        return 0.0;
    }
    let total: u32 = points.iter().map(|&n| u32::from(n)).sum();
    if total == 0 {
        return 1.0;
    }

    let mut p = 0.0f64;
    for d0 in 1..=6u8 {
        for d1 in 1..=d0 {
            let weight = if d0 == d1 { 1.0 } else { 2.0 } / 36.0;
            let mut b = points;
            heuristic_bearoff(&mut b, (d0, d1));
            let left: u32 = b.iter().map(|&n| u32::from(n)).sum();
            if left < total {
                p += weight;
            } else {
                p += weight * first_off_within(b, rolls - 1);
            }
        }
    }
    p
}

/// The bearoff databases an engine context carries: the mandatory
/// one-sided home-board table (exact or heuristic), an optional two-sided
/// table, optional wider exact tables, and the hypergammon tables.
pub struct BearoffSet {
    /// One-sided 6-point table, `None` never: at minimum the heuristic.
    pub one_sided: BearoffDb,
    /// Two-sided 6-point cubeful table.
    pub two_sided: Option<BearoffDb>,
    /// Wider exact one-sided table (more points than the home board).
    pub one_sided_wide: Option<BearoffDb>,
    /// Wider exact two-sided table.
    pub two_sided_wide: Option<BearoffDb>,
    /// Hypergammon tables for 1-3 chequers.
    pub hypergammon: [Option<BearoffDb>; 3],
}

impl BearoffSet {
    /// A set backed only by the generated heuristic table.
    pub fn heuristic_only() -> Self {
        Self {
            one_sided: BearoffDb::heuristic(),
            two_sided: None,
            one_sided_wide: None,
            two_sided_wide: None,
            hypergammon: [None, None, None],
        }
    }
}
