use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tavla_core::{generate_moves, Board, Dice, MoveList, Variant, ALL_ROLLS};

fn bench_generate_moves(c: &mut Criterion) {
    let board = Board::starting(Variant::Standard);

    c.bench_function("generate_moves opening 3-1", |b| {
        let mut list = MoveList::default();
        b.iter(|| generate_moves(&mut list, black_box(&board), Dice(3, 1), false));
    });

    c.bench_function("generate_moves opening 6-6", |b| {
        let mut list = MoveList::default();
        b.iter(|| generate_moves(&mut list, black_box(&board), Dice(6, 6), false));
    });

    c.bench_function("generate_moves all rolls", |b| {
        let mut list = MoveList::default();
        b.iter(|| {
            for &(d0, d1, _) in &ALL_ROLLS {
                generate_moves(&mut list, black_box(&board), Dice(d0, d1), false);
            }
        });
    });
}

criterion_group!(benches, bench_generate_moves);
criterion_main!(benches);
