use criterion::{criterion_group, criterion_main, Criterion};

use st_slice_tree::SliceTree;

const FILE_SIZE: u64 = 64 * 1024 * 1024;
const WRITE_SIZE: u64 = 128 * 1024;

fn sequential_writes(c: &mut Criterion) {
    c.bench_function("insert_sequential", |b| {
        b.iter(|| {
            let mut tree = SliceTree::new();
            let mut id = 0;
            let mut pos = 0;
            while pos + WRITE_SIZE <= FILE_SIZE {
                id += 1;
                tree.insert(pos, id, WRITE_SIZE, 0, WRITE_SIZE);
                pos += WRITE_SIZE;
            }
            tree
        });
    });
}

fn overlapping_writes(c: &mut Criterion) {
    c.bench_function("insert_overlapping", |b| {
        b.iter(|| {
            let mut tree = SliceTree::new();
            let mut id = 0;
            // Every write half-overlaps its predecessor, so each insert
            // exercises the cut path.
            let mut pos = 0;
            while pos + WRITE_SIZE <= FILE_SIZE {
                id += 1;
                tree.insert(pos, id, WRITE_SIZE, 0, WRITE_SIZE);
                pos += WRITE_SIZE / 2;
            }
            tree
        });
    });
}

fn build_canonical_list(c: &mut Criterion) {
    let mut tree = SliceTree::new();
    let mut id = 0;
    let mut pos = 0;
    while pos + WRITE_SIZE <= FILE_SIZE {
        id += 1;
        tree.insert(pos, id, WRITE_SIZE, 0, WRITE_SIZE);
        pos += WRITE_SIZE;
    }

    c.bench_function("build", |b| b.iter(|| tree.build("chunks/1")));
}

criterion_group!(
    benches,
    sequential_writes,
    overlapping_writes,
    build_canonical_list
);
criterion_main!(benches);
