use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mend_check::{BlockKind, BlockMap};
use mend_types::BlockNumber;

fn classify_sweep(c: &mut Criterion) {
    const BLOCKS: u64 = 1 << 20;

    c.bench_function("classify_1m_blocks", |b| {
        b.iter(|| {
            let mut map = BlockMap::new(BlockNumber(0), BlockNumber(BLOCKS - 1)).unwrap();
            for addr in 0..BLOCKS {
                let kind = match addr % 7 {
                    0 => BlockKind::Inode,
                    1 | 2 => BlockKind::Data,
                    3 => BlockKind::DirLeaf,
                    4 => BlockKind::Indirect,
                    _ => BlockKind::Free,
                };
                map.set(BlockNumber(addr), kind).unwrap();
            }
            black_box(map.count_of(BlockKind::Data))
        });
    });

    c.bench_function("dump_1m_blocks", |b| {
        let mut map = BlockMap::new(BlockNumber(0), BlockNumber(BLOCKS - 1)).unwrap();
        map.finalize_free();
        b.iter(|| black_box(map.dump().count()));
    });
}

criterion_group!(benches, classify_sweep);
criterion_main!(benches);
