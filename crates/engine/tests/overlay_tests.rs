//! Overlay store persistence tests
//!
//! Round-trips the file backend, and exercises the degraded paths: missing
//! relations, undecodable payloads, and failing writes.

use engine::{FileBackend, MemoryBackend, OverlayStore};
use model::{DeviceKey, StoreError};
use std::sync::Arc;

fn key(n: u16) -> DeviceKey {
    DeviceKey::new(n, n, Some(u32::from(n)))
}

#[test]
fn test_relations_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let backend = || Arc::new(FileBackend::new(dir.path()));

    {
        let store = OverlayStore::open(backend());
        store.rename(key(1), "Desk Disk").unwrap();
        store.camouflage(key(2)).unwrap();
        store.inherit(key(3), key(4)).unwrap();
        store.remember(key(1), "Raw Disk Name").unwrap();
        store.record_event(key(1), false).unwrap();
        store.record_event(key(1), true).unwrap();
    }

    let store = OverlayStore::open(backend());
    assert_eq!(store.renamed().len(), 1);
    assert_eq!(store.renamed()[0].name, "Desk Disk");
    assert_eq!(store.camouflaged().len(), 1);
    assert_eq!(store.inherits_from(key(3)), Some(key(4)));
    assert_eq!(store.stored().len(), 1);

    let log = store.connection_log();
    assert_eq!(log.len(), 2);
    assert!(!log[0].disconnect);
    assert!(log[1].disconnect);
}

#[test]
fn test_missing_relations_start_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = OverlayStore::open(Arc::new(FileBackend::new(dir.path())));

    assert!(store.renamed().is_empty());
    assert!(store.camouflaged().is_empty());
    assert!(store.heritage().is_empty());
    assert!(store.stored().is_empty());
    assert!(store.connection_log().is_empty());
}

#[test]
fn test_undecodable_relation_falls_back_to_empty() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = OverlayStore::open(Arc::new(FileBackend::new(dir.path())));
        store.rename(key(1), "Desk Disk").unwrap();
    }

    // Corrupt the persisted relation
    std::fs::write(dir.path().join("renamed.bin"), b"\xff\xfe\xfdgarbage").unwrap();

    let store = OverlayStore::open(Arc::new(FileBackend::new(dir.path())));
    assert!(store.renamed().is_empty());

    // The store remains usable and the next write repairs the relation
    store.rename(key(1), "Desk Disk").unwrap();
    let reopened = OverlayStore::open(Arc::new(FileBackend::new(dir.path())));
    assert_eq!(reopened.renamed().len(), 1);
}

#[test]
fn test_corrupted_relation_does_not_affect_others() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = OverlayStore::open(Arc::new(FileBackend::new(dir.path())));
        store.rename(key(1), "Desk Disk").unwrap();
        store.camouflage(key(2)).unwrap();
    }

    std::fs::write(dir.path().join("renamed.bin"), b"garbage").unwrap();

    let store = OverlayStore::open(Arc::new(FileBackend::new(dir.path())));
    assert!(store.renamed().is_empty());
    assert_eq!(store.camouflaged().len(), 1);
}

#[test]
fn test_write_failure_reported_but_memory_updated() {
    let backend = Arc::new(MemoryBackend::new());
    let store = OverlayStore::open(backend.clone());

    backend.fail_writes(true);
    let err = store.camouflage(key(7)).unwrap_err();
    assert!(matches!(err, StoreError::Persist { .. }));
    assert_eq!(store.camouflaged().len(), 1);

    // Heritage invariant rejection is not a persistence error and leaves
    // nothing behind even while writes fail
    let err = store.inherit(key(1), key(1)).unwrap_err();
    assert!(matches!(err, StoreError::InvalidRelation(_)));
    assert!(store.heritage().is_empty());
}

#[test]
fn test_log_retention_across_reopen() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = OverlayStore::open(Arc::new(FileBackend::new(dir.path())));
        for n in 0..50u16 {
            store.record_event(key(n), false).unwrap();
        }
        store.keep_only(10).unwrap();
    }

    let store = OverlayStore::open(Arc::new(FileBackend::new(dir.path())));
    let log = store.connection_log();
    assert_eq!(log.len(), 10);
    let devices: Vec<u16> = log.iter().map(|e| e.device.vendor_id).collect();
    assert_eq!(devices, (40..50).collect::<Vec<u16>>());
}
