#![allow(missing_docs)]

use std::collections::HashSet;
use std::sync::Once;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rtgraph_store::{
    BPTree, BPTreeOptions, BackendKind, NativeI32, PageAddr, PageAtom, PageStorage, Result,
    StorageOptions, StoreError,
};

const SEED: u64 = 0x5eed_0064;

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

fn i32_at(bytes: Option<&[u8]>) -> Option<i32> {
    bytes.map(|b| {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(b);
        i32::from_ne_bytes(raw)
    })
}

#[test]
fn mixed_alloc_free_on_small_pages() -> Result<()> {
    init_tracing();
    let mut storage = PageStorage::in_memory(&StorageOptions::with_page_size(64))?;
    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let mut live: Vec<PageAddr> = Vec::new();
    let mut pages = storage.num_pages();

    for _ in 0..1_000 {
        if live.is_empty() || rng.gen_bool(0.55) {
            let addr = storage.alloc()?;
            assert!(!addr.is_null());
            assert_eq!(addr.0 % 64, 0);
            assert!(addr <= storage.page_addr_max());
            assert!(storage.lookup(addr)?.iter().all(|b| *b == 0));
            storage.lookup_mut(addr)?.fill(0xA5);
            live.push(addr);
        } else {
            let victim = live.swap_remove(rng.gen_range(0..live.len()));
            storage.free(victim)?;
        }
        assert!(storage.num_pages() >= pages);
        pages = storage.num_pages();
    }

    let distinct: HashSet<PageAddr> = live.iter().copied().collect();
    assert_eq!(distinct.len(), live.len());
    assert_eq!(
        storage.free_page_count()? + live.len() as u64 + 1,
        storage.num_pages()
    );
    Ok(())
}

#[test]
fn small_tree_round_trip_through_public_api() -> Result<()> {
    init_tracing();
    let mut storage = PageStorage::in_memory(&StorageOptions::with_page_size(256))?;
    let mut tree = BPTree::open(&mut storage, "t", BPTreeOptions::new(4, 4), NativeI32)?;

    for key in [1i32, 2, 3] {
        tree.insert(&mut storage, &key.to_ne_bytes(), &(key * 10).to_ne_bytes())?;
    }
    let hit = tree.find(&storage, &2i32.to_ne_bytes())?;
    assert!(hit.is_positioned());
    assert_eq!(i32_at(tree.read_value(&storage, &hit)?), Some(20));

    assert!(tree.remove(&mut storage, &2i32.to_ne_bytes())?);
    assert!(!tree.find(&storage, &2i32.to_ne_bytes())?.is_positioned());

    let mut keys = Vec::new();
    let mut it = tree.first(&storage)?;
    while it.is_positioned() {
        keys.push(i32_at(tree.read_key(&storage, &it)?).expect("valid iterator"));
        it = tree.next(&storage, it)?;
    }
    assert_eq!(keys, vec![1, 3]);
    tree.verify(&storage)?;
    Ok(())
}

#[test]
fn atoms_spill_onto_linked_pages() -> Result<()> {
    init_tracing();
    let mut storage = PageStorage::in_memory(&StorageOptions::with_page_size(64))?;
    let root = storage.global_atoms();

    let mut atoms = Vec::new();
    for i in 0..20u64 {
        let atom = PageAtom::new(&mut storage, root, &format!("atom-{i:02}"), 8)?;
        atom.value_mut(&mut storage)?.copy_from_slice(&i.to_ne_bytes());
        atoms.push(atom);
    }
    assert!(storage.num_pages() > 1);

    for (i, atom) in atoms.iter().enumerate() {
        let found = PageAtom::find(&storage, root, &format!("atom-{i:02}"))?
            .expect("atom is live");
        assert_eq!(found, *atom);
        assert_eq!(found.value(&storage)?, &(i as u64).to_ne_bytes());
    }

    atoms[3].delete(&mut storage)?;
    assert!(PageAtom::find(&storage, root, "atom-03")?.is_none());
    assert_eq!(PageAtom::iter(&storage, root)?.len(), 19);

    let reused = PageAtom::new(&mut storage, root, "atom-xx", 8)?;
    assert_eq!(reused.key(&storage)?, "atom-xx");
    assert_eq!(PageAtom::iter(&storage, root)?.len(), 20);
    Ok(())
}

#[test]
fn storage_built_from_toml_config() -> Result<()> {
    init_tracing();
    let options = StorageOptions::from_toml_str(
        r#"
        [storage]
        page_size = 128
        grow_margin = 1.0
        initial_pages = 4
        "#,
    )?;
    let mut storage = PageStorage::in_memory(&options)?;
    assert_eq!(storage.backend_kind(), BackendKind::InMemory);
    assert_eq!(storage.page_size(), 128);
    assert_eq!(storage.num_pages(), 4);
    assert_eq!(storage.free_page_count()?, 3);

    for _ in 0..3 {
        storage.alloc()?;
    }
    storage.alloc()?;
    // (4 + 1) * 2 = 10 pages
    assert_eq!(storage.num_pages(), 10);

    let err = StorageOptions::from_toml_str("[storage]\npage_size = 100").unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));
    Ok(())
}
