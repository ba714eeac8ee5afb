use tavla_core::{
    bearoff_positions, board_from_position_id, generate_moves, keith_count, kleinman_count,
    position_bearoff, position_from_bearoff, position_id, thorp_count, Board, Dice, MoveList,
    Variant, ALL_ROLLS,
};

#[test]
fn opening_successors_round_trip_through_position_ids() {
    let start = Board::starting(Variant::Standard);
    let (_, start_pips) = start.pip_count();

    for &(d0, d1, _) in &ALL_ROLLS {
        let mut list = MoveList::default();
        let n = generate_moves(&mut list, &start, Dice(d0, d1), false);
        assert!(n > 0, "roll {}{} has no plays from the start", d0, d1);

        for mv in &list.moves {
            let after = mv.key.to_board();
            // no blots are reachable on the first roll, so every pip the
            // play consumed comes straight off the mover's count
            assert_eq!(after.pip_count().1, start_pips - mv.c_pips);

            let id = position_id(&after);
            let decoded = board_from_position_id(&id).unwrap();
            assert_eq!(decoded, after, "id {} decoded to a different board", id);
        }
    }
}

#[test]
fn starting_positions_are_symmetric_per_variant() {
    for variant in [Variant::Standard, Variant::Nackgammon, Variant::Hypergammon3] {
        let board = Board::starting(variant);
        let (opp, on_roll) = board.pip_count();
        assert_eq!(opp, on_roll);
        assert_eq!(
            board.chequers_on_board(0),
            u32::from(variant.chequers())
        );
    }
    assert_eq!(Board::starting(Variant::Standard).pip_count().1, 167);
    assert_eq!(Board::starting(Variant::Hypergammon3).pip_count().1, 69);
}

#[test]
fn bearoff_indexing_round_trips() {
    assert_eq!(bearoff_positions(6, 15), 54264);

    let mut points = [0u8; 6];
    for id in [0u32, 1, 17, 4095, 54263] {
        position_from_bearoff(&mut points, id, 6, 15);
        assert!(points.iter().map(|&n| u32::from(n)).sum::<u32>() <= 15);
        assert_eq!(position_bearoff(&points, 6, 15), id);
    }
}

#[test]
fn race_counts_agree_on_the_starting_position() {
    let board = Board::starting(Variant::Standard);
    let (opp_pips, pips) = board.pip_count();

    // being on roll in a dead-even race is worth a few percent
    let p = kleinman_count(pips, opp_pips);
    assert!(p > 0.5 && p < 0.7);

    // both adjusted counts only ever add to the raw pips
    let keith = keith_count(&board);
    assert!(keith[1] >= pips && keith[0] >= opp_pips);
    let thorp = thorp_count(&board);
    assert!(thorp.leader >= pips && thorp.trailer >= opp_pips);
    assert!(thorp.adjusted >= thorp.leader as f32);
}
