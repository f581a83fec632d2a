#![allow(missing_docs)]

use std::fs;
use std::path::Path;
use std::sync::Once;

use rtgraph_store::{
    BPTree, BPTreeOptions, BackendKind, NativeU64, PageAtom, PageStorage, Result, StorageOptions,
    StoreError,
};
use tempfile::tempdir;

const KEYS: u64 = 600;

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

fn options() -> StorageOptions {
    StorageOptions::with_page_size(512)
}

fn open_tree(storage: &mut PageStorage) -> Result<BPTree<NativeU64>> {
    BPTree::open(storage, "ids", BPTreeOptions::new(8, 8), NativeU64)
}

fn u64_at(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    u64::from_ne_bytes(raw)
}

fn create_file(path: &Path) -> Result<()> {
    let mut storage = PageStorage::open_mapped(path, &options())?;
    let mut tree = open_tree(&mut storage)?;
    tree.insert(&mut storage, &7u64.to_ne_bytes(), &70u64.to_ne_bytes())?;
    storage.close()
}

fn patch_file(path: &Path, offset: usize, bytes: &[u8]) -> Result<()> {
    let mut raw = fs::read(path)?;
    raw[offset..offset + bytes.len()].copy_from_slice(bytes);
    fs::write(path, raw)?;
    Ok(())
}

#[test]
fn tree_survives_close_and_reopen() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("tree.db");

    {
        let mut storage = PageStorage::open_mapped(&path, &options())?;
        assert_eq!(storage.backend_kind(), BackendKind::MemoryMapped);
        let mut tree = open_tree(&mut storage)?;
        for i in 0..KEYS {
            let key = (i * 7919) % KEYS;
            tree.insert(&mut storage, &key.to_ne_bytes(), &(key * 2).to_ne_bytes())?;
        }
        for key in (0..KEYS).step_by(3) {
            assert!(tree.remove(&mut storage, &key.to_ne_bytes())?);
        }
        tree.verify(&storage)?;
        storage.close()?;
    }

    let mut storage = PageStorage::open_mapped(&path, &options())?;
    let tree = open_tree(&mut storage)?;
    tree.verify(&storage)?;
    let expected: Vec<u64> = (0..KEYS).filter(|k| k % 3 != 0).collect();
    assert_eq!(tree.len(&storage)?, expected.len());

    let mut seen = Vec::new();
    let mut it = tree.first(&storage)?;
    while it.is_positioned() {
        let key = u64_at(tree.read_key(&storage, &it)?.expect("valid iterator"));
        let value = u64_at(tree.read_value(&storage, &it)?.expect("valid iterator"));
        assert_eq!(value, key * 2);
        seen.push(key);
        it = tree.next(&storage, it)?;
    }
    assert_eq!(seen, expected);
    Ok(())
}

#[test]
fn free_list_and_atoms_persist() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("atoms.db");

    let freed = {
        let mut storage = PageStorage::open_mapped(&path, &options())?;
        let root = storage.global_atoms();
        let atom = PageAtom::new(&mut storage, root, "checkpoint", 8)?;
        atom.value_mut(&mut storage)?.copy_from_slice(&42u64.to_ne_bytes());
        let page = storage.alloc()?;
        storage.free(page)?;
        storage.sync()?;
        storage.close()?;
        page
    };

    let mut storage = PageStorage::open_mapped(&path, &options())?;
    let root = storage.global_atoms();
    let atom = PageAtom::find(&storage, root, "checkpoint")?.expect("atom persisted");
    assert_eq!(u64_at(atom.value(&storage)?), 42);
    assert_eq!(storage.free_head(), freed);
    assert_eq!(storage.alloc()?, freed);
    Ok(())
}

#[test]
fn corrupt_magic_is_rejected_and_file_can_be_recreated() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("magic.db");
    create_file(&path)?;
    patch_file(&path, 0, b"XTGraph")?;

    let err = PageStorage::open_mapped(&path, &options()).unwrap_err();
    assert!(matches!(err, StoreError::BadMagic));

    fs::remove_file(&path)?;
    let mut storage = PageStorage::open_mapped(&path, &options())?;
    let tree = open_tree(&mut storage)?;
    assert!(tree.is_empty(&storage)?);
    Ok(())
}

#[test]
fn foreign_arch_fingerprint_is_rejected() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("arch.db");
    create_file(&path)?;
    patch_file(&path, 32, &[0xFF; 4])?;

    let err = PageStorage::open_mapped(&path, &options()).unwrap_err();
    match err {
        StoreError::ArchMismatch { found, .. } => assert_eq!(found, [0xFF; 4]),
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[test]
fn page_size_must_match_file() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("size.db");
    create_file(&path)?;

    let err = PageStorage::open_mapped(&path, &StorageOptions::with_page_size(1024)).unwrap_err();
    match err {
        StoreError::PageSizeMismatch { expected, found } => {
            assert_eq!(expected, 1024);
            assert_eq!(found, 512);
        }
        other => panic!("unexpected error: {other}"),
    }

    let mut storage = PageStorage::open_mapped(&path, &options())?;
    let tree = open_tree(&mut storage)?;
    let hit = tree.find(&storage, &7u64.to_ne_bytes())?;
    assert_eq!(tree.read_value(&storage, &hit)?.map(u64_at), Some(70));
    Ok(())
}
