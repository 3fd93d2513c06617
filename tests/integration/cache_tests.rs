use filetime::FileTime;
use sagecache::cache::{CacheState, MetadataCache, WriteOutcome};
use serde_json::{json, Value};
use std::fs;
use tempfile::tempdir;

fn mtime(path: &std::path::Path) -> FileTime {
    FileTime::from_last_modification_time(&fs::metadata(path).unwrap())
}

#[test]
fn test_add_entry_scenario() {
    let dir = tempdir().unwrap();
    let mut cache = MetadataCache::new(dir.path());
    cache.load();

    cache.add_entry("/models/a.safetensors", "H").unwrap();

    let record = cache.by_path("/models/a.safetensors");
    assert_eq!(
        serde_json::to_value(&record).unwrap(),
        json!({
            "hash": "H",
            "lastUsed": "",
            "civitai": false,
            "filePath": "/models/a.safetensors"
        })
    );

    // Persisted as well, in canonical form
    let text = fs::read_to_string(cache.layout().info_file()).unwrap();
    assert!(text.starts_with("{\n    \"H\":{\n        \"civitai\":false,"));
    let hashes: Value =
        serde_json::from_slice(&fs::read(cache.layout().hash_file()).unwrap()).unwrap();
    assert_eq!(hashes, json!({"/models/a.safetensors": "H"}));
}

#[test]
fn test_repeated_saves_only_touch_changed_document() {
    let dir = tempdir().unwrap();
    let mut cache = MetadataCache::new(dir.path());
    cache.load();
    cache.add_entry("/models/a.safetensors", "H").unwrap();
    cache.add_entry("/models/b.safetensors", "H").unwrap();

    let info_file = cache.layout().info_file();
    let hash_file = cache.layout().hash_file();
    let old = FileTime::from_unix_time(1_000_000_000, 0);
    filetime::set_file_mtime(&info_file, old).unwrap();
    filetime::set_file_mtime(&hash_file, old).unwrap();
    // The cache must see our own mtime change as an external edit and
    // re-read; content is identical so nothing is rewritten.
    cache.load();

    for call in 1..=10 {
        if call == 4 {
            // Hash shared with a.safetensors, so the info document stays as is.
            cache.remove_entry("/models/b.safetensors");
        }
        let outcome = cache.save();
        assert_eq!(outcome.infos, WriteOutcome::Unchanged, "call {call}");
        let expected = if call == 4 {
            WriteOutcome::Written
        } else {
            WriteOutcome::Unchanged
        };
        assert_eq!(outcome.hashes, expected, "call {call}");
    }

    assert_eq!(mtime(&info_file), old);
    assert_ne!(mtime(&hash_file), old);
    assert_eq!(cache.state(), CacheState::Loaded);
}

#[test]
fn test_external_change_is_reloaded() {
    let dir = tempdir().unwrap();
    let mut cache = MetadataCache::new(dir.path());
    cache.add_entry("/models/a.safetensors", "H").unwrap();

    // Another process rewrites the hash document.
    let hash_file = cache.layout().hash_file();
    fs::write(&hash_file, r#"{"/models/other.ckpt": "X"}"#).unwrap();
    filetime::set_file_mtime(&hash_file, FileTime::from_unix_time(2_000_000_000, 0)).unwrap();

    cache.load();
    assert_eq!(cache.hash_for_path("/models/other.ckpt"), Some("X"));
    assert!(cache.hash_for_path("/models/a.safetensors").is_none());
}

#[test]
fn test_unchanged_mtime_skips_reload() {
    let dir = tempdir().unwrap();
    let mut cache = MetadataCache::new(dir.path());
    cache.add_entry("/models/a.safetensors", "H").unwrap();

    let hash_file = cache.layout().hash_file();
    let before = mtime(&hash_file);
    fs::write(&hash_file, r#"{"/models/other.ckpt": "X"}"#).unwrap();
    filetime::set_file_mtime(&hash_file, before).unwrap();

    cache.load();
    assert_eq!(cache.hash_for_path("/models/a.safetensors"), Some("H"));
}

#[test]
fn test_state_transitions() {
    let dir = tempdir().unwrap();
    let mut cache = MetadataCache::new(dir.path());
    assert_eq!(cache.state(), CacheState::Uninitialized);

    cache.load();
    assert_eq!(cache.state(), CacheState::Loaded);

    cache.add_entry("/models/a.safetensors", "H").unwrap();
    assert_eq!(cache.state(), CacheState::Loaded);

    assert!(cache.update_last_used_by_path("/models/a.safetensors"));
    assert_eq!(cache.state(), CacheState::Dirty);
    assert!(cache.save().writes() > 0);
    assert_eq!(cache.state(), CacheState::Loaded);
}

#[test]
fn test_reference_counted_removal() {
    let dir = tempdir().unwrap();
    let mut cache = MetadataCache::new(dir.path());
    cache.add_entry("/models/a.safetensors", "H").unwrap();
    cache.add_entry("/models/copy.safetensors", "H").unwrap();

    assert_eq!(cache.remove_entry("/models/a.safetensors").as_deref(), Some("H"));
    assert!(!cache.by_hash("H").is_empty());

    cache.remove_entry("/models/copy.safetensors");
    assert!(cache.by_hash("H").is_empty());
    cache.save();

    let mut reopened = MetadataCache::new(dir.path());
    reopened.load();
    assert!(reopened.hashes().is_empty());
    assert!(reopened.infos().is_empty());
}

#[test]
fn test_save_failure_keeps_memory() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("cache");
    let mut cache = MetadataCache::new(&root);
    cache.add_entry("/models/a.safetensors", "H").unwrap();

    // Replace the hash document with a directory so the rename fails.
    let hash_file = cache.layout().hash_file();
    fs::remove_file(&hash_file).unwrap();
    fs::create_dir(&hash_file).unwrap();

    cache.add_or_update_entry("/models/b.safetensors", cache.by_hash("H")).unwrap();
    let outcome = cache.save();
    assert_eq!(outcome.hashes, WriteOutcome::Failed);
    assert!(outcome.failed());
    assert_eq!(cache.hash_for_path("/models/b.safetensors"), Some("H"));
    assert_eq!(cache.state(), CacheState::Dirty);
}

#[test]
fn test_add_entry_on_unloaded_cache_keeps_existing_entries() {
    let dir = tempdir().unwrap();
    {
        let mut cache = MetadataCache::new(dir.path());
        cache.load();
        cache.add_entry("/models/a.safetensors", "H").unwrap();
    }

    let mut cache = MetadataCache::new(dir.path());
    cache.add_entry("/models/b.safetensors", "X").unwrap();
    assert_eq!(cache.hash_for_path("/models/a.safetensors"), Some("H"));

    let hashes: Value =
        serde_json::from_slice(&fs::read(cache.layout().hash_file()).unwrap()).unwrap();
    assert_eq!(
        hashes,
        json!({"/models/a.safetensors": "H", "/models/b.safetensors": "X"})
    );

    let mut reopened = MetadataCache::new(dir.path());
    reopened.load();
    assert_eq!(reopened.hash_for_path("/models/a.safetensors"), Some("H"));
    assert_eq!(reopened.by_hash("H").hash(), Some("H"));
}

#[test]
fn test_save_on_unloaded_cache_leaves_documents_alone() {
    let dir = tempdir().unwrap();
    {
        let mut cache = MetadataCache::new(dir.path());
        cache.add_entry("/models/a.safetensors", "H").unwrap();
    }
    let before = fs::read(dir.path().join("sage_cache_hash.json")).unwrap();

    let mut cache = MetadataCache::new(dir.path());
    let outcome = cache.save();
    assert_eq!(outcome.hashes, WriteOutcome::Unchanged);
    assert_eq!(outcome.infos, WriteOutcome::Unchanged);
    assert_eq!(fs::read(dir.path().join("sage_cache_hash.json")).unwrap(), before);
}

#[test]
fn test_remove_entry_on_unloaded_cache_respects_shared_hash() {
    let dir = tempdir().unwrap();
    {
        let mut cache = MetadataCache::new(dir.path());
        cache.add_entry("/models/a.safetensors", "H").unwrap();
        cache.add_entry("/models/b.safetensors", "H").unwrap();
    }

    let mut cache = MetadataCache::new(dir.path());
    assert_eq!(cache.remove_entry("/models/a.safetensors").as_deref(), Some("H"));
    assert!(!cache.save().failed());

    let mut reopened = MetadataCache::new(dir.path());
    reopened.load();
    assert_eq!(reopened.hash_for_path("/models/b.safetensors"), Some("H"));
    assert!(!reopened.by_hash("H").is_empty());
}
