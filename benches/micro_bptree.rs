//! Micro benchmarks for the page-resident B+ tree.
#![forbid(unsafe_code)]
#![allow(missing_docs)]

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rtgraph_store::{BPTree, BPTreeOptions, NativeU64, PageStorage, StorageOptions};

const INSERT_COUNT: u64 = 32_768;
const LOOKUP_SAMPLES: usize = 4_096;
const SCAN_WIDTH: u64 = 512;
const PAGE_SIZE: u32 = 4096;

fn micro_bptree(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/bptree");
    group.sample_size(30);

    group.throughput(Throughput::Elements(INSERT_COUNT));
    group.bench_function("sequential_insert", |b| {
        b.iter_batched(
            FreshTree::new,
            |mut tree| {
                tree.insert_sequence(0, INSERT_COUNT);
                black_box(tree.tree.root_page(&tree.storage).expect("root"));
            },
            BatchSize::SmallInput,
        );
    });

    let mut random_keys: Vec<u64> = (0..INSERT_COUNT).collect();
    random_keys.shuffle(&mut ChaCha8Rng::seed_from_u64(0xBEEF_F00D));
    group.throughput(Throughput::Elements(INSERT_COUNT));
    group.bench_function("random_insert", |b| {
        b.iter_batched(
            FreshTree::new,
            |mut tree| {
                tree.insert_keys(&random_keys);
                black_box(tree.tree.root_page(&tree.storage).expect("root"));
            },
            BatchSize::SmallInput,
        );
    });

    group.throughput(Throughput::Elements(INSERT_COUNT));
    group.bench_function("delete_random", |b| {
        b.iter_batched(
            || {
                let mut tree = FreshTree::new();
                tree.insert_sequence(0, INSERT_COUNT);
                tree
            },
            |mut tree| {
                tree.delete_keys(&random_keys);
                black_box(tree.tree.root_page(&tree.storage).expect("root"));
            },
            BatchSize::SmallInput,
        );
    });

    let mut lookup_harness = LoadedTree::new(INSERT_COUNT);
    group.throughput(Throughput::Elements(LOOKUP_SAMPLES as u64));
    group.bench_function(BenchmarkId::new("point_lookup", LOOKUP_SAMPLES), |b| {
        b.iter(|| lookup_harness.point_lookup(LOOKUP_SAMPLES));
    });

    group.throughput(Throughput::Elements(SCAN_WIDTH));
    group.bench_function(BenchmarkId::new("cursor_scan", SCAN_WIDTH), |b| {
        b.iter(|| lookup_harness.cursor_scan(SCAN_WIDTH));
    });

    group.finish();
}

struct FreshTree {
    storage: PageStorage,
    tree: BPTree<NativeU64>,
}

impl FreshTree {
    fn new() -> Self {
        let mut storage =
            PageStorage::in_memory(&StorageOptions::with_page_size(PAGE_SIZE)).expect("storage");
        let tree = BPTree::open(&mut storage, "bench", BPTreeOptions::new(8, 8), NativeU64)
            .expect("tree");
        Self { storage, tree }
    }

    fn insert_sequence(&mut self, start: u64, count: u64) {
        for key in start..(start + count) {
            let bytes = key.to_ne_bytes();
            self.tree
                .insert(&mut self.storage, &bytes, &bytes)
                .expect("insert");
        }
    }

    fn insert_keys(&mut self, keys: &[u64]) {
        for key in keys {
            let bytes = key.to_ne_bytes();
            self.tree
                .insert(&mut self.storage, &bytes, &bytes)
                .expect("insert");
        }
    }

    fn delete_keys(&mut self, keys: &[u64]) {
        for key in keys {
            self.tree
                .remove(&mut self.storage, &key.to_ne_bytes())
                .expect("remove");
        }
    }
}

struct LoadedTree {
    fresh: FreshTree,
    max_key: u64,
    rng: ChaCha8Rng,
}

impl LoadedTree {
    fn new(count: u64) -> Self {
        let mut fresh = FreshTree::new();
        fresh.insert_sequence(0, count);
        Self {
            fresh,
            max_key: count,
            rng: ChaCha8Rng::seed_from_u64(0xFEED_FACE),
        }
    }

    fn point_lookup(&mut self, samples: usize) {
        let FreshTree { storage, tree } = &self.fresh;
        for _ in 0..samples {
            let key = self.rng.gen_range(0..self.max_key);
            let hit = tree.find(storage, &key.to_ne_bytes()).expect("find");
            black_box(tree.read_value(storage, &hit).expect("read"));
        }
    }

    fn cursor_scan(&mut self, width: u64) {
        let FreshTree { storage, tree } = &self.fresh;
        for _ in 0..16 {
            let start = self.rng.gen_range(0..(self.max_key - width));
            let (_, mut iter) = tree
                .find_nearest(storage, &start.to_ne_bytes())
                .expect("find_nearest");
            for _ in 0..width {
                if !iter.is_positioned() {
                    break;
                }
                black_box(tree.read_key(storage, &iter).expect("read"));
                iter = tree.next(storage, iter).expect("next");
            }
        }
    }
}

criterion_group!(benches, micro_bptree);
criterion_main!(benches);
