#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Once;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rtgraph_store::{
    BPTree, BPTreeOptions, NativeU32, NativeU64, PageStorage, Result, StorageOptions,
};
use tempfile::tempdir;

const STEPS: usize = 4_000;
const SEED: u64 = 0x0b7e_e5ed;
const UNIQUE_KEYS: u64 = 700;
const DUP_KEYS: u32 = 40;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

/// Two trees sharing one storage: a keyed map and a multimap.
struct Pair {
    unique: BPTree<NativeU64>,
    dups: BPTree<NativeU32>,
}

#[derive(Default)]
struct Model {
    unique: BTreeMap<u64, u64>,
    dups: BTreeMap<u32, Vec<u32>>,
}

fn open_pair(storage: &mut PageStorage) -> Result<Pair> {
    Ok(Pair {
        unique: BPTree::open(storage, "uniq", BPTreeOptions::new(8, 8), NativeU64)?,
        dups: BPTree::open(storage, "dups", BPTreeOptions::new(4, 4), NativeU32)?,
    })
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    u64::from_ne_bytes(raw)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    u32::from_ne_bytes(raw)
}

fn step(
    rng: &mut ChaCha8Rng,
    storage: &mut PageStorage,
    trees: &mut Pair,
    model: &mut Model,
) -> Result<()> {
    if rng.gen_bool(0.5) {
        let key = rng.gen_range(0..UNIQUE_KEYS);
        let value: u64 = rng.gen();
        if rng.gen_bool(0.6) {
            let hit = trees.unique.find(storage, &key.to_ne_bytes())?;
            if hit.is_positioned() {
                assert!(trees.unique.write_value(storage, &hit, &value.to_ne_bytes())?);
            } else {
                trees.unique.insert(storage, &key.to_ne_bytes(), &value.to_ne_bytes())?;
            }
            model.unique.insert(key, value);
        } else {
            let removed = trees.unique.remove(storage, &key.to_ne_bytes())?;
            assert_eq!(removed, model.unique.remove(&key).is_some());
        }
    } else {
        let key = rng.gen_range(0..DUP_KEYS);
        if rng.gen_bool(0.6) {
            let value: u32 = rng.gen();
            trees.dups.insert(storage, &key.to_ne_bytes(), &value.to_ne_bytes())?;
            model.dups.entry(key).or_default().push(value);
        } else {
            let removed = trees.dups.remove(storage, &key.to_ne_bytes())?;
            let expected = match model.dups.get_mut(&key) {
                Some(values) => {
                    values.pop();
                    if values.is_empty() {
                        model.dups.remove(&key);
                    }
                    true
                }
                None => false,
            };
            assert_eq!(removed, expected);
        }
    }
    Ok(())
}

fn check(storage: &PageStorage, trees: &Pair, model: &Model) -> Result<()> {
    trees.unique.verify(storage)?;
    trees.dups.verify(storage)?;

    let mut unique = Vec::new();
    trees.unique.foreach(storage, |k, v| {
        unique.push((read_u64(k), read_u64(v)));
        ControlFlow::Continue(())
    })?;
    let expected: Vec<(u64, u64)> = model.unique.iter().map(|(k, v)| (*k, *v)).collect();
    assert_eq!(unique, expected);

    let mut dups = Vec::new();
    trees.dups.foreach(storage, |k, v| {
        dups.push((read_u32(k), read_u32(v)));
        ControlFlow::Continue(())
    })?;
    let expected: Vec<(u32, u32)> = model
        .dups
        .iter()
        .flat_map(|(k, values)| values.iter().map(move |v| (*k, *v)))
        .collect();
    assert_eq!(dups, expected);

    for (key, values) in &model.dups {
        let hit = trees.dups.find(storage, &key.to_ne_bytes())?;
        let last = trees.dups.read_value(storage, &hit)?.map(read_u32);
        assert_eq!(last, values.last().copied());
    }
    Ok(())
}

#[test]
fn two_trees_random_workload_in_memory() -> Result<()> {
    init_tracing();
    let mut storage = PageStorage::in_memory(&StorageOptions::with_page_size(256))?;
    let mut trees = open_pair(&mut storage)?;
    let mut model = Model::default();
    let mut rng = ChaCha8Rng::seed_from_u64(SEED);

    for i in 0..STEPS {
        step(&mut rng, &mut storage, &mut trees, &mut model)?;
        if i % 500 == 499 {
            check(&storage, &trees, &model)?;
        }
    }
    check(&storage, &trees, &model)?;

    let stats = trees.unique.stats().snapshot();
    assert!(stats.leaf_splits > 0);
    assert!(stats.leaf_merges + stats.leaf_borrows > 0);
    trees.unique.stats().emit_tracing(trees.unique.name());

    let Pair { unique, dups } = trees;
    unique.destroy(&mut storage)?;
    dups.destroy(&mut storage)?;
    // The header page and one page of spilled tree atoms stay allocated.
    assert_eq!(storage.free_page_count()?, storage.num_pages() - 2);

    let reopened = open_pair(&mut storage)?;
    assert!(reopened.unique.is_empty(&storage)?);
    assert!(reopened.dups.is_empty(&storage)?);
    Ok(())
}

#[test]
fn random_workload_survives_remapping() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("stress.db");
    let options = StorageOptions::with_page_size(256);
    let mut model = Model::default();
    let mut rng = ChaCha8Rng::seed_from_u64(SEED ^ 0xffff);

    for round in 0..3 {
        let mut storage = PageStorage::open_mapped(&path, &options)?;
        let mut trees = open_pair(&mut storage)?;
        if round > 0 {
            check(&storage, &trees, &model)?;
        }
        for _ in 0..STEPS / 2 {
            step(&mut rng, &mut storage, &mut trees, &mut model)?;
        }
        check(&storage, &trees, &model)?;
        storage.close()?;
    }
    Ok(())
}
