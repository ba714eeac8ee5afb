use thiserror::Error;

use crate::board::{Board, BoardError};

/// External position IDs are always 14 characters.
pub const POSITION_ID_LEN: usize = 14;

const BASE64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PositionError {
    #[error("position id must be {POSITION_ID_LEN} characters")]
    BadLength,
    #[error("position id contains an invalid character")]
    BadCharacter,
    #[error("decoded position is illegal: {0}")]
    Illegal(#[from] BoardError),
}

/// Packed position key: four bits per point per side. Words 0-2 hold the
/// on-roll side's 24 points, words 3-5 the opponent's, word 6 both bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PositionKey(pub [u32; 7]);

impl PositionKey {
    pub fn from_board(board: &Board) -> Self {
        let mut data = [0u32; 7];
        for i in 0..3 {
            let j = i * 8;
            for k in 0..8 {
                data[i] |= u32::from(board[1][j + k]) << (4 * k);
                data[i + 3] |= u32::from(board[0][j + k]) << (4 * k);
            }
        }
        data[6] = u32::from(board[0][24]) | (u32::from(board[1][24]) << 4);
        Self(data)
    }

    pub fn to_board(&self) -> Board {
        let mut board = Board::empty();
        for i in 0..3 {
            let j = i * 8;
            for k in 0..8 {
                board[1][j + k] = ((self.0[i] >> (4 * k)) & 0x0f) as u8;
                board[0][j + k] = ((self.0[i + 3] >> (4 * k)) & 0x0f) as u8;
            }
        }
        board[0][24] = (self.0[6] & 0x0f) as u8;
        board[1][24] = ((self.0[6] >> 4) & 0x0f) as u8;
        board
    }

    /// Decodes straight into the opponent's perspective, saving a swap.
    pub fn to_board_swapped(&self) -> Board {
        let mut board = Board::empty();
        for i in 0..3 {
            let j = i * 8;
            for k in 0..8 {
                board[0][j + k] = ((self.0[i] >> (4 * k)) & 0x0f) as u8;
                board[1][j + k] = ((self.0[i + 3] >> (4 * k)) & 0x0f) as u8;
            }
        }
        board[1][24] = (self.0[6] & 0x0f) as u8;
        board[0][24] = ((self.0[6] >> 4) & 0x0f) as u8;
        board
    }
}

/// Legacy 10-byte run-length key: for each of the 50 points (both sides,
/// bars last) write one 1-bit per chequer followed by a 0-bit separator.
/// This is the key the external base-64 position ID encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RunLengthKey(pub [u8; 10]);

impl RunLengthKey {
    pub fn from_board(board: &Board) -> Self {
        let mut key = [0u8; 10];
        let mut bit = 0usize;
        for side in 0..2 {
            for &nc in board[side].iter() {
                if nc > 0 {
                    add_bits(&mut key, bit, nc);
                    bit += usize::from(nc) + 1;
                } else {
                    bit += 1;
                }
            }
        }
        Self(key)
    }

    pub fn to_board(&self) -> Board {
        let mut board = Board::empty();
        let mut side = 0usize;
        let mut point = 0usize;
        for &byte in &self.0 {
            let mut cur = byte;
            for _ in 0..8 {
                if cur & 1 != 0 {
                    if side >= 2 || point >= 25 {
                        return board;
                    }
                    board[side][point] += 1;
                } else {
                    point += 1;
                    if point == 25 {
                        side += 1;
                        point = 0;
                    }
                }
                cur >>= 1;
            }
        }
        board
    }
}

fn add_bits(key: &mut [u8; 10], bit_pos: usize, n_bits: u8) {
    let k = bit_pos >> 3;
    let r = bit_pos & 7;
    let b = ((1u32 << n_bits) - 1) << r;

    key[k] |= b as u8;
    if k < 8 {
        key[k + 1] |= (b >> 8) as u8;
        key[k + 2] |= (b >> 16) as u8;
    } else if k == 8 {
        key[k + 1] |= (b >> 8) as u8;
    }
}

/// 14-character base-64 position ID of a board.
pub fn position_id(board: &Board) -> String {
    let key = RunLengthKey::from_board(board);
    let mut out = String::with_capacity(POSITION_ID_LEN);
    let bytes = &key.0;

    for chunk in bytes[..9].chunks_exact(3) {
        out.push(BASE64_ALPHABET[usize::from(chunk[0] >> 2)] as char);
        out.push(BASE64_ALPHABET[usize::from(((chunk[0] & 0x03) << 4) | (chunk[1] >> 4))] as char);
        out.push(BASE64_ALPHABET[usize::from(((chunk[1] & 0x0f) << 2) | (chunk[2] >> 6))] as char);
        out.push(BASE64_ALPHABET[usize::from(chunk[2] & 0x3f)] as char);
    }
    out.push(BASE64_ALPHABET[usize::from(bytes[9] >> 2)] as char);
    out.push(BASE64_ALPHABET[usize::from((bytes[9] & 0x03) << 4)] as char);
    out
}

/// Decodes a position ID, validating chequer counts and point conflicts.
pub fn board_from_position_id(id: &str) -> Result<Board, PositionError> {
    let id = id.as_bytes();
    if id.len() != POSITION_ID_LEN {
        return Err(PositionError::BadLength);
    }

    let mut sextets = [0u8; POSITION_ID_LEN];
    for (out, &ch) in sextets.iter_mut().zip(id) {
        *out = base64_value(ch).ok_or(PositionError::BadCharacter)?;
    }

    let mut key = [0u8; 10];
    for i in 0..3 {
        let s = &sextets[i * 4..];
        key[i * 3] = (s[0] << 2) | (s[1] >> 4);
        key[i * 3 + 1] = (s[1] << 4) | (s[2] >> 2);
        key[i * 3 + 2] = (s[2] << 6) | s[3];
    }
    key[9] = (sextets[12] << 2) | (sextets[13] >> 4);

    let board = RunLengthKey(key).to_board();
    board.check_position(15)?;
    Ok(board)
}

fn base64_value(ch: u8) -> Option<u8> {
    match ch {
        b'A'..=b'Z' => Some(ch - b'A'),
        b'a'..=b'z' => Some(ch - b'a' + 26),
        b'0'..=b'9' => Some(ch - b'0' + 52),
        b'+' => Some(62),
        b'/' => Some(63),
        _ => None,
    }
}

const MAX_N: usize = 40;
const MAX_R: usize = 25;

/// Binomial coefficients C(n, r) for 1 <= n <= 40, 1 <= r <= 25, built as
/// a Pascal triangle. u64 entries: C(40, 20) overflows 32 bits.
fn combination_table() -> &'static [[u64; MAX_R]; MAX_N] {
    use std::sync::OnceLock;
    static TABLE: OnceLock<[[u64; MAX_R]; MAX_N]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut t = [[0u64; MAX_R]; MAX_N];
        for (i, row) in t.iter_mut().enumerate() {
            row[0] = i as u64 + 1;
        }
        for i in 1..MAX_N {
            for j in 1..MAX_R {
                t[i][j] = t[i - 1][j - 1] + t[i - 1][j];
            }
        }
        t
    })
}

/// C(n, r) with the conventional zero cases.
pub fn combination(n: usize, r: usize) -> u64 {
    debug_assert!(n <= MAX_N && r <= MAX_R);
    if r == 0 || n == 0 || r > n {
        if r == 0 { 1 } else { 0 }
    } else {
        combination_table()[n - 1][r - 1]
    }
}

fn position_f(f_bits: u32, n: usize, r: usize) -> u32 {
    if n == r {
        return 0;
    }
    if f_bits & (1 << (n - 1)) != 0 {
        combination(n - 1, r) as u32 + position_f(f_bits, n - 1, r - 1)
    } else {
        position_f(f_bits, n - 1, r)
    }
}

/// Index of a one-sided bearoff position: `points` counts from the low
/// points of a side's array.
pub fn position_bearoff(points: &[u8], n_points: usize, n_chequers: usize) -> u32 {
    let mut j = n_points - 1;
    for &n in &points[..n_points] {
        j += usize::from(n);
    }

    let mut f_bits = 1u32 << j;
    for &n in &points[..n_points - 1] {
        j -= usize::from(n) + 1;
        f_bits |= 1 << j;
    }

    position_f(f_bits, n_chequers + n_points, n_points)
}

fn position_inv(id: u32, n: usize, r: usize) -> u32 {
    if r == 0 {
        return 0;
    }
    if n == r {
        return (1 << n) - 1;
    }
    let nc = combination(n - 1, r) as u32;
    if id >= nc {
        (1 << (n - 1)) | position_inv(id - nc, n - 1, r - 1)
    } else {
        position_inv(id, n - 1, r)
    }
}

/// Inverse of [`position_bearoff`].
pub fn position_from_bearoff(points: &mut [u8], id: u32, n_points: usize, n_chequers: usize) {
    let f_bits = position_inv(id, n_chequers + n_points, n_points);

    points[..n_points].fill(0);

    let mut j = n_points - 1;
    for i in 0..n_chequers + n_points {
        if f_bits & (1 << i) != 0 {
            if j == 0 {
                break;
            }
            j -= 1;
        } else {
            points[j] += 1;
        }
    }
}

/// Number of distinct one-sided bearoff positions.
pub fn bearoff_positions(n_points: usize, n_chequers: usize) -> u32 {
    combination(n_points + n_chequers, n_points) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Variant;

    #[test]
    fn key_round_trip() {
        let board = Board::starting(Variant::Standard);
        let key = PositionKey::from_board(&board);
        assert_eq!(key.to_board(), board);
        assert_eq!(key.to_board_swapped(), board.swapped());
    }

    #[test]
    fn key_round_trip_with_bar() {
        let mut board = Board::starting(Variant::Standard);
        board[1][23] = 1;
        board[1][24] = 1;
        board[0][24] = 2;
        board[0][5] = 3;
        let key = PositionKey::from_board(&board);
        assert_eq!(key.to_board(), board);
    }

    #[test]
    fn starting_position_id() {
        // The well-known ID of the standard starting position.
        let board = Board::starting(Variant::Standard);
        assert_eq!(position_id(&board), "4HPwATDgc/ABMA");
    }

    #[test]
    fn position_id_round_trip() {
        let mut board = Board::starting(Variant::Nackgammon);
        board[1][24] = 1;
        board[1][23] = 1;
        board[1][22] = 1;
        board[1][5] = 3;
        let id = position_id(&board);
        let decoded = board_from_position_id(&id).unwrap();
        assert_eq!(decoded, board);
    }

    #[test]
    fn position_id_rejects_garbage() {
        assert_eq!(
            board_from_position_id("too-short"),
            Err(PositionError::BadLength)
        );
        assert_eq!(
            board_from_position_id("4HPwATDgc/AB M"),
            Err(PositionError::BadCharacter)
        );
    }

    #[test]
    fn combination_values() {
        assert_eq!(combination(6, 3), 20);
        assert_eq!(combination(21, 6), 54264);
        assert_eq!(combination(10, 0), 1);
        assert_eq!(combination(3, 5), 0);
    }

    #[test]
    fn bearoff_index_round_trip() {
        let n_points = 6;
        let n_chequers = 15;
        let positions = bearoff_positions(n_points, n_chequers);
        assert_eq!(positions, 54264);

        for id in [0u32, 1, 17, 1000, positions - 1] {
            let mut points = [0u8; 6];
            position_from_bearoff(&mut points, id, n_points, n_chequers);
            assert!(points.iter().map(|&n| u32::from(n)).sum::<u32>() <= 15);
            assert_eq!(position_bearoff(&points, n_points, n_chequers), id);
        }
    }

    #[test]
    fn bearoff_index_exhaustive_small() {
        // All (2 points, 3 chequers) positions map to distinct indexes.
        let mut seen = [false; 10];
        for a in 0..=3u8 {
            for b in 0..=(3 - a) {
                let idx = position_bearoff(&[a, b], 2, 3) as usize;
                assert!(!seen[idx]);
                seen[idx] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }
}
