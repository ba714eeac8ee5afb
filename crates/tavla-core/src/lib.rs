pub mod board;
pub mod movegen;
pub mod position;
pub mod racecounts;
pub mod types;

pub use board::{Board, BoardError, BAR};
pub use movegen::{apply_move, apply_sub_move, generate_moves, Move, MoveList};
pub use position::{
    bearoff_positions, board_from_position_id, combination, position_bearoff,
    position_from_bearoff, position_id, PositionError, PositionKey, RunLengthKey,
    POSITION_ID_LEN,
};
pub use racecounts::{keith_count, kleinman_count, thorp_count, ThorpCount};
pub use types::{
    Dice, Player, Variant, ALL_ROLLS, NUM_OUTPUTS, NUM_ROLLOUT_OUTPUTS, OUTPUT_CUBEFUL_EQUITY,
    OUTPUT_EQUITY, OUTPUT_LOSEBACKGAMMON, OUTPUT_LOSEGAMMON, OUTPUT_WIN, OUTPUT_WINBACKGAMMON,
    OUTPUT_WINGAMMON,
};
