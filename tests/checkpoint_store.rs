// tests/checkpoint_store.rs

mod common;
use crate::common::init_tracing;

use std::sync::Arc;

use flowdag::checkpoint::{CheckpointStore, FileCheckpointStore, ManifestEntry};
use flowdag::fs::mock::MockFileSystem;
use flowdag::fs::{FileSystem, RealFileSystem};
use flowdag::provider::{DataRef, DataValue};
use flowdag::types::{BlockId, DataId, DataKey, VersionId};

fn data_ref(data: u64, version: u32, name: &str) -> DataRef {
    DataRef::new(
        VersionId::new(DataId(data), version),
        DataKey::Object(name.to_string()),
    )
}

fn digest(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

#[test]
fn saved_versions_are_listed_in_the_manifest() -> anyhow::Result<()> {
    init_tracing();
    let fs = MockFileSystem::new();
    let store = FileCheckpointStore::new(Arc::new(fs.clone()), "ckpt");

    let first = store.save(
        BlockId(0),
        &data_ref(1, 1, "a"),
        &DataValue::Object(b"alpha".to_vec()),
    )?;
    store.save(
        BlockId(1),
        &data_ref(2, 3, "b"),
        &DataValue::Object(b"beta".to_vec()),
    )?;
    assert_eq!(first, digest(b"alpha"));

    let entries = store.load_manifest()?;
    assert_eq!(
        entries,
        vec![
            ManifestEntry {
                block: 0,
                rename: "d1v1".to_string(),
                digest: digest(b"alpha"),
            },
            ManifestEntry {
                block: 1,
                rename: "d2v3".to_string(),
                digest: digest(b"beta"),
            },
        ]
    );

    let path = store.version_path(BlockId(1), "d2v3");
    assert_eq!(fs.read(&path)?, b"beta".to_vec());
    Ok(())
}

#[test]
fn verify_detects_tampered_contents() -> anyhow::Result<()> {
    init_tracing();
    let fs = MockFileSystem::new();
    let store = FileCheckpointStore::new(Arc::new(fs.clone()), "ckpt");
    store.save(
        BlockId(0),
        &data_ref(0, 1, "a"),
        &DataValue::Object(b"payload".to_vec()),
    )?;

    let entry = store.load_manifest()?.remove(0);
    assert!(store.verify(&entry)?);

    fs.add_file(store.version_path(BlockId(0), "d0v1"), b"corrupted".to_vec());
    assert!(!store.verify(&entry)?);
    Ok(())
}

#[test]
fn file_values_are_copied_into_the_store() -> anyhow::Result<()> {
    init_tracing();
    let fs = MockFileSystem::new();
    fs.add_file("work/out.bin", b"from file".to_vec());
    let store = FileCheckpointStore::new(Arc::new(fs.clone()), "ckpt");

    let key = DataRef::new(VersionId::new(DataId(4), 2), DataKey::File("out.bin".into()));
    store.save(BlockId(2), &key, &DataValue::File("work/out.bin".into()))?;

    let stored = fs.read(&store.version_path(BlockId(2), "d4v2"))?;
    assert_eq!(stored, b"from file".to_vec());
    Ok(())
}

#[test]
fn missing_manifest_means_nothing_was_saved() -> anyhow::Result<()> {
    let store = FileCheckpointStore::new(Arc::new(MockFileSystem::new()), "ckpt");
    assert!(store.load_manifest()?.is_empty());
    Ok(())
}

#[test]
fn malformed_manifest_is_an_error() {
    let fs = MockFileSystem::new();
    fs.add_file("ckpt/manifest", b"0 d0v1\n".to_vec());
    let store = FileCheckpointStore::new(Arc::new(fs), "ckpt");

    let err = store.load_manifest().unwrap_err();
    assert!(err.to_string().contains("line 1"), "{err:#}");
}

#[test]
fn manifest_survives_a_restart_on_disk() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);

    {
        let store = FileCheckpointStore::new(Arc::clone(&fs), dir.path());
        store.save(
            BlockId(0),
            &data_ref(0, 1, "a"),
            &DataValue::Object(b"one".to_vec()),
        )?;
        store.save(
            BlockId(0),
            &data_ref(1, 1, "b"),
            &DataValue::Object(b"two".to_vec()),
        )?;
    }

    let reopened = FileCheckpointStore::new(fs, dir.path());
    let entries = reopened.load_manifest()?;
    assert_eq!(entries.len(), 2);
    for entry in &entries {
        assert!(reopened.verify(entry)?, "{entry:?}");
    }
    assert!(dir.path().join("block-0").join("d1v1").exists());
    Ok(())
}
