//! Tests for DataStore
//!
//! These tests verify:
//! - Dedup and reference accounting through store/release
//! - Lazy materialization
//! - Substore identity, naming and isolation
//! - Layout and reference-table corruption handling
//! - Batched operations
//! - Collision detection on the dedup path

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use dedupstore::{Config, ContentKey, DataStore, StoreError, SyncStrategy};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_store() -> (TempDir, Arc<DataStore>) {
    let temp_dir = TempDir::new().unwrap();
    let store = DataStore::from_root(temp_dir.path(), "test").unwrap();
    (temp_dir, store)
}

fn blob_count(store: &DataStore) -> usize {
    fs::read_dir(store.file_path().join("data")).unwrap().count()
}

fn blob_path(store: &DataStore, key: ContentKey) -> PathBuf {
    store.file_path().join("data").join(format!("{}.dat", key))
}

/// Unpack a `BatchInterrupted` error into (applied keys, cause)
fn interrupted(err: StoreError) -> (Vec<ContentKey>, StoreError) {
    match err {
        StoreError::BatchInterrupted { applied, source } => (applied, *source),
        other => panic!("expected BatchInterrupted, got {:?}", other),
    }
}

// =============================================================================
// Store / Retrieve Tests
// =============================================================================

#[test]
fn test_store_and_retrieve() {
    let (_temp, store) = setup_temp_store();

    let key = store.store(b"hello world").unwrap();

    assert_eq!(key, ContentKey::of(b"hello world"));
    assert_eq!(store.retrieve(key).unwrap(), b"hello world");
}

#[test]
fn test_store_empty_payload() {
    let (_temp, store) = setup_temp_store();

    let key = store.store(b"").unwrap();

    assert!(store.key_exists(key));
    assert_eq!(store.retrieve(key).unwrap(), Vec::<u8>::new());
}

#[test]
fn test_store_twice_dedups() {
    let (_temp, store) = setup_temp_store();

    let k1 = store.store(b"uwu").unwrap();
    let k2 = store.store(b"uwu").unwrap();

    assert_eq!(k1, k2);
    assert_eq!(blob_count(&store), 1);
}

#[test]
fn test_distinct_payloads_get_distinct_blobs() {
    let (_temp, store) = setup_temp_store();

    let k1 = store.store(b"first").unwrap();
    let k2 = store.store(b"second").unwrap();

    assert_ne!(k1, k2);
    assert_eq!(blob_count(&store), 2);
    assert_eq!(store.keys().unwrap().len(), 2);
}

#[test]
fn test_retrieve_missing_is_not_found() {
    let (_temp, store) = setup_temp_store();

    let err = store.retrieve(ContentKey::from(1u32)).unwrap_err();

    assert!(matches!(err, StoreError::NotFound { .. }));
    assert!(err.is_recoverable());
}

// =============================================================================
// Reference Accounting Tests
// =============================================================================

#[test]
fn test_reference_accounting() {
    let (_temp, store) = setup_temp_store();

    let key = store.store(b"shared").unwrap();
    assert_eq!(store.get_key_references(key, true).unwrap(), 1);

    store.store(b"shared").unwrap();
    assert_eq!(store.get_key_references(key, true).unwrap(), 2);

    assert!(!store.release(key).unwrap());
    assert_eq!(store.get_key_references(key, true).unwrap(), 1);
    assert!(store.key_exists(key));

    assert!(store.release(key).unwrap());
    assert_eq!(store.get_key_references(key, true).unwrap(), 0);
    assert!(!store.key_exists(key));
}

#[test]
fn test_references_without_existence_check_assume_one() {
    let (_temp, store) = setup_temp_store();

    let never_stored = ContentKey::from(77u32);

    assert_eq!(store.get_key_references(never_stored, false).unwrap(), 1);
    assert_eq!(store.get_key_references(never_stored, true).unwrap(), 0);
}

#[test]
fn test_release_never_stored_is_noop() {
    let (_temp, store) = setup_temp_store();

    assert!(!store.release(ContentKey::from(5u32)).unwrap());
    assert!(!store.is_materialized());
    assert!(!store.file_path().exists());
}

#[test]
fn test_store_after_reclaim_writes_again() {
    let (_temp, store) = setup_temp_store();
    let key = store.store(b"again").unwrap();
    store.release(key).unwrap();

    store.store(b"again").unwrap();

    assert_eq!(store.retrieve(key).unwrap(), b"again");
    assert_eq!(store.get_key_references(key, true).unwrap(), 1);
}

#[test]
fn test_counts_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let key = {
        let store = DataStore::from_root(temp_dir.path(), "test").unwrap();
        let key = store.store(b"durable").unwrap();
        store.store(b"durable").unwrap();
        store.store(b"durable").unwrap();
        key
    };

    let store = DataStore::from_root(temp_dir.path(), "test").unwrap();

    assert_eq!(store.get_key_references(key, true).unwrap(), 3);
    assert_eq!(store.retrieve(key).unwrap(), b"durable");
}

#[test]
fn test_reference_file_only_holds_counts_above_one() {
    let (_temp, store) = setup_temp_store();
    let single = store.store(b"single").unwrap();
    let double = store.store(b"double").unwrap();
    store.store(b"double").unwrap();

    let raw: serde_json::Value =
        serde_json::from_slice(&fs::read(store.file_path().join("references.json")).unwrap()).unwrap();

    let entries = raw.as_object().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[&double.to_string()], 2);
    assert!(!entries.contains_key(&single.to_string()));
}

// =============================================================================
// Materialization Tests
// =============================================================================

#[test]
fn test_lazy_materialization() {
    let (temp, store) = setup_temp_store();
    let path = temp.path().join("test");

    let _ = store.get_key_references(ContentKey::from(1u32), true).unwrap();
    let _ = store.retrieve(ContentKey::from(1u32));
    assert!(!path.exists());
    assert!(!store.is_materialized());

    store.store(b"first").unwrap();

    assert!(path.join("data").is_dir());
    assert!(path.join("references.json").is_file());
    assert!(store.is_materialized());
}

#[test]
fn test_store_path_is_file_is_corrupt_layout() {
    let (temp, store) = setup_temp_store();
    fs::write(temp.path().join("test"), b"not a directory").unwrap();

    let err = store.store(b"x").unwrap_err();

    assert!(matches!(err, StoreError::CorruptLayout { .. }));
    assert!(!err.is_recoverable());
}

#[test]
fn test_data_path_is_file_is_corrupt_layout() {
    let (temp, store) = setup_temp_store();
    fs::create_dir(temp.path().join("test")).unwrap();
    fs::write(temp.path().join("test").join("data"), b"not a directory").unwrap();

    let err = store.store(b"x").unwrap_err();

    assert!(matches!(err, StoreError::CorruptLayout { .. }));
}

#[test]
fn test_corrupt_reference_table_names_store() {
    let temp_dir = TempDir::new().unwrap();
    {
        let root = DataStore::from_root(temp_dir.path(), "main").unwrap();
        root.get_substore("pfps").unwrap().store(b"avatar").unwrap();
    }
    let refs = temp_dir.path().join("main").join("pfps").join("references.json");
    fs::write(&refs, br#"{"avatar": 2}"#).unwrap();

    let root = DataStore::from_root(temp_dir.path(), "main").unwrap();
    let pfps = root.get_substore("pfps").unwrap();
    let err = pfps.get_key_references(ContentKey::of(b"avatar"), false).unwrap_err();

    match err {
        StoreError::CorruptReferenceTable { store, .. } => assert_eq!(store, "main.pfps"),
        other => panic!("expected CorruptReferenceTable, got {:?}", other),
    }
    assert_eq!(fs::read(&refs).unwrap(), br#"{"avatar": 2}"#);
}

// =============================================================================
// Namespace Tests
// =============================================================================

#[test]
fn test_substore_identity() {
    let (_temp, root) = setup_temp_store();

    let a = root.get_substore("x").unwrap();
    let b = root.get_substore("x").unwrap();

    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn test_substore_shares_reference_table() {
    let (_temp, root) = setup_temp_store();

    let key = root.get_substore("x").unwrap().store(b"shared").unwrap();
    root.get_substore("x").unwrap().store(b"shared").unwrap();

    assert_eq!(root.get_substore("x").unwrap().get_key_references(key, true).unwrap(), 2);
}

#[test]
fn test_qualified_names() {
    let temp_dir = TempDir::new().unwrap();
    let root = DataStore::from_root(temp_dir.path(), "main").unwrap();

    let pfps = root.get_substore("pfps").unwrap();
    let large = pfps.get_substore("large").unwrap();

    assert_eq!(root.get_qualified_name(), "main");
    assert_eq!(pfps.get_qualified_name(), "main.pfps");
    assert_eq!(large.get_qualified_name(), "main.pfps.large");
    assert_eq!(large.name(), "large");
    assert_eq!(large.file_path(), temp_dir.path().join("main").join("pfps").join("large"));
}

#[test]
fn test_parent_links() {
    let (_temp, root) = setup_temp_store();
    let child = root.get_substore("child").unwrap();

    assert!(root.parent().is_none());
    assert!(Arc::ptr_eq(&child.parent().unwrap(), &root));

    drop(root);
    assert!(child.parent().is_none());
    assert_eq!(child.get_qualified_name(), "test.child");
}

#[test]
fn test_cached_substores() {
    let (_temp, root) = setup_temp_store();
    root.get_substore("b").unwrap();
    root.get_substore("a").unwrap();
    root.get_substore("b").unwrap();

    assert_eq!(root.cached_substores(), vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn test_substore_isolation() {
    let (temp, root) = setup_temp_store();
    let sub = root.get_substore("sub").unwrap();

    let key = sub.store(b"bleb").unwrap();

    assert!(!temp.path().join("test").join("data").exists());
    assert!(temp.path().join("test").join("sub").join("data").join(format!("{}.dat", key)).is_file());
    assert!(!root.key_exists(key));
    assert!(!root.is_materialized());
}

#[test]
fn test_invalid_names_rejected() {
    let temp_dir = TempDir::new().unwrap();

    for name in ["", "data", "references.json", "a.b", "../escape"] {
        assert!(matches!(
            DataStore::from_root(temp_dir.path(), name),
            Err(StoreError::InvalidName { .. })
        ));
    }

    let root = DataStore::from_root(temp_dir.path(), "main").unwrap();
    assert!(matches!(root.get_substore("data"), Err(StoreError::InvalidName { .. })));
    assert!(matches!(root.get_substore("nested/dir"), Err(StoreError::InvalidName { .. })));
    assert!(root.cached_substores().is_empty());
}

// =============================================================================
// Config Tests
// =============================================================================

#[test]
fn test_custom_extension_inherited_by_substores() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .blob_extension("bin")
        .sync_strategy(SyncStrategy::OsBuffered)
        .build();
    let root = DataStore::from_root_with_config(temp_dir.path(), "main", config).unwrap();
    let sub = root.get_substore("sub").unwrap();

    let key = sub.store(b"payload").unwrap();

    assert_eq!(sub.config().blob_extension, "bin");
    assert!(sub.file_path().join("data").join(format!("{}.bin", key)).is_file());
}

#[test]
fn test_invalid_config_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().blob_extension("tar.gz").build();

    let result = DataStore::from_root_with_config(temp_dir.path(), "main", config);

    assert!(matches!(result, Err(StoreError::Config(_))));
}

// =============================================================================
// Collision Tests
// =============================================================================

/// Plant different bytes under the key of `payload`, as a CRC-32 collision
/// would
fn plant_collision(store: &DataStore, payload: &[u8]) -> ContentKey {
    let key = store.store(b"materialize").unwrap();
    store.release(key).unwrap();

    let colliding = ContentKey::of(payload);
    fs::write(store.file_path().join("data").join(format!("{}.dat", colliding)), b"other content").unwrap();
    colliding
}

#[test]
fn test_collision_rejected() {
    let (_temp, store) = setup_temp_store();
    let key = plant_collision(&store, b"real content");

    let err = store.store(b"real content").unwrap_err();

    assert!(matches!(err, StoreError::KeyCollision { .. }));
    assert_eq!(store.get_key_references(key, true).unwrap(), 1);
    assert_eq!(store.retrieve(key).unwrap(), b"other content");
}

#[test]
fn test_collision_detection_disabled_dedups_blindly() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().detect_collisions(false).build();
    let store = DataStore::from_root_with_config(temp_dir.path(), "test", config).unwrap();
    let key = plant_collision(&store, b"real content");

    assert_eq!(store.store(b"real content").unwrap(), key);
    assert_eq!(store.get_key_references(key, true).unwrap(), 2);
}

// =============================================================================
// Batch Tests
// =============================================================================

#[test]
fn test_store_many_and_release_many() {
    let (_temp, store) = setup_temp_store();

    let payloads: [&[u8]; 4] = [b"a", b"b", b"a", b"a"];
    let keys = store.store_many(payloads).unwrap();

    assert_eq!(keys.len(), 4);
    assert_eq!(keys[0], keys[2]);
    assert_eq!(store.get_key_references(keys[0], true).unwrap(), 3);
    assert_eq!(blob_count(&store), 2);

    let reclaimed = store.release_many(keys.clone()).unwrap();

    assert_eq!(reclaimed, 2);
    assert!(store.keys().unwrap().is_empty());
}

#[test]
fn test_store_many_persists_once_complete() {
    let temp_dir = TempDir::new().unwrap();
    let key = {
        let store = DataStore::from_root(temp_dir.path(), "test").unwrap();
        store.store_many(vec![b"x".to_vec(); 5]).unwrap()[0]
    };

    let reopened = DataStore::from_root(temp_dir.path(), "test").unwrap();

    assert_eq!(reopened.get_key_references(key, true).unwrap(), 5);
}

#[test]
fn test_flush_without_table_is_noop() {
    let (_temp, store) = setup_temp_store();

    store.flush().unwrap();

    assert!(!store.file_path().exists());
}

#[test]
fn test_store_many_reports_applied_prefix() {
    let (temp, store) = setup_temp_store();
    let colliding = plant_collision(&store, b"collides");
    let a = ContentKey::of(b"a");
    let b = ContentKey::of(b"b");

    let payloads: [&[u8]; 4] = [b"a", b"a", b"collides", b"b"];
    let (applied, source) = interrupted(store.store_many(payloads).unwrap_err());

    assert!(matches!(source, StoreError::KeyCollision { .. }));
    assert_eq!(applied, vec![a, a]);
    assert!(!store.key_exists(b));
    assert_eq!(store.get_key_references(colliding, true).unwrap(), 1);

    // The applied prefix is on disk
    let reopened = DataStore::from_root(temp.path(), "test").unwrap();
    assert_eq!(reopened.get_key_references(a, true).unwrap(), 2);

    // Releasing exactly what was applied reclaims the blob
    assert_eq!(store.release_many(applied).unwrap(), 1);
    assert!(!store.key_exists(a));
}

#[test]
fn test_release_many_reports_applied_prefix() {
    let (_temp, store) = setup_temp_store();
    let a = store.store(b"a").unwrap();
    let b = store.store(b"b").unwrap();
    // A directory where a blob should be cannot be deleted as a file
    let stuck = ContentKey::of(b"stuck");
    fs::create_dir(blob_path(&store, stuck)).unwrap();
    fs::write(blob_path(&store, stuck).join("inner"), b"x").unwrap();

    let (applied, source) = interrupted(store.release_many([a, stuck, b]).unwrap_err());

    assert_eq!(applied, vec![a]);
    assert!(matches!(source, StoreError::Io { .. }));
    assert!(!store.key_exists(a));
    assert!(store.key_exists(b));
}

// =============================================================================
// Failed Write Tests
// =============================================================================

#[test]
fn test_failed_save_does_not_add_reference() {
    let (temp, store) = setup_temp_store();
    let key = store.store(b"x").unwrap();
    let blocker = temp.path().join("test").join("references.json.tmp");
    fs::create_dir(&blocker).unwrap();

    let err = store.store(b"x").unwrap_err();

    assert!(matches!(err, StoreError::Io { .. }));

    fs::remove_dir(&blocker).unwrap();
    assert_eq!(store.get_key_references(key, true).unwrap(), 1);
    assert!(store.release(key).unwrap());
    assert!(!store.key_exists(key));
}

#[test]
fn test_failed_save_does_not_drop_reference() {
    let (temp, store) = setup_temp_store();
    let key = store.store(b"x").unwrap();
    store.store(b"x").unwrap();
    let blocker = temp.path().join("test").join("references.json.tmp");
    fs::create_dir(&blocker).unwrap();

    assert!(store.release(key).is_err());

    fs::remove_dir(&blocker).unwrap();
    assert_eq!(store.get_key_references(key, true).unwrap(), 2);
    assert!(!store.release(key).unwrap());
    assert!(store.release(key).unwrap());
}

#[cfg(unix)]
#[test]
fn test_name_taken_after_existence_check_is_write_conflict() {
    let (_temp, store) = setup_temp_store();
    store.store(b"materialize").unwrap();
    let key = ContentKey::of(b"payload");
    let path = blob_path(&store, key);
    // A dangling link passes the existence check but still occupies the name
    std::os::unix::fs::symlink(store.file_path().join("missing"), &path).unwrap();

    let err = store.store(b"payload").unwrap_err();

    assert!(matches!(err, StoreError::WriteConflict { .. }));
    assert!(!store.key_exists(key));
    assert_eq!(store.get_key_references(key, true).unwrap(), 0);
    assert!(fs::symlink_metadata(&path).unwrap().file_type().is_symlink());
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_threads_sharing_one_instance() {
    let (_temp, store) = setup_temp_store();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..10 {
                    store.store(b"contended").unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let key = ContentKey::of(b"contended");
    assert_eq!(store.get_key_references(key, true).unwrap(), 80);
    assert_eq!(blob_count(&store), 1);
}
