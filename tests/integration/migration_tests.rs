use sagecache::cache::{CacheState, MetadataCache};
use serde_json::json;
use std::fs;
use tempfile::tempdir;

fn write_legacy(dir: &std::path::Path, value: serde_json::Value) {
    fs::create_dir_all(dir).unwrap();
    fs::write(
        dir.join("sage_cache.json"),
        serde_json::to_vec_pretty(&value).unwrap(),
    )
    .unwrap();
}

#[test]
fn test_legacy_migration_prefers_confirmed_entry() {
    let dir = tempdir().unwrap();
    // The confirmed entry sorts first by path, so path order alone would lose it.
    write_legacy(
        dir.path(),
        json!({
            "/models/a.safetensors": {
                "hash": "H",
                "civitai": "True",
                "modelId": 4201,
                "lastUsed": "2024-01-02 03:04:05.000006"
            },
            "/models/b.safetensors": {
                "hash": "H",
                "civitai": "False",
                "lastUsed": ""
            }
        }),
    );

    let mut cache = MetadataCache::new(dir.path());
    cache.load();

    let record = cache.by_hash("H");
    assert!(record.is_registry_confirmed());
    assert_eq!(record.model_id().as_deref(), Some("4201"));
    assert_eq!(record.file_path(), Some("/models/a.safetensors"));
    assert_eq!(cache.hash_for_path("/models/b.safetensors"), Some("H"));
    assert_eq!(cache.state(), CacheState::Loaded);

    // Naive legacy timestamps are read as UTC.
    let last_used = cache.get_last_used_by_path("/models/b.safetensors").unwrap();
    assert_eq!(last_used.to_rfc3339(), "2024-01-02T03:04:05.000006+00:00");
}

#[test]
fn test_migration_writes_two_documents_and_keeps_legacy() {
    let dir = tempdir().unwrap();
    let legacy = json!({
        "/models/a.safetensors": {"hash": "H", "civitai": false},
        "/models/broken.safetensors": {"civitai": true},
        "/models/odd.safetensors": "not an object"
    });
    write_legacy(dir.path(), legacy.clone());

    let mut cache = MetadataCache::new(dir.path());
    cache.load();

    assert!(cache.layout().hash_file().exists());
    assert!(cache.layout().info_file().exists());
    assert_eq!(cache.hashes().len(), 1);

    let left: serde_json::Value =
        serde_json::from_slice(&fs::read(cache.layout().legacy_file()).unwrap()).unwrap();
    assert_eq!(left, legacy);

    // Second process reads the new documents, not the legacy one.
    fs::write(cache.layout().legacy_file(), "{}").unwrap();
    let mut reopened = MetadataCache::new(dir.path());
    reopened.load();
    assert_eq!(reopened.hash_for_path("/models/a.safetensors"), Some("H"));
    assert_eq!(
        reopened.by_hash("H").file_path(),
        Some("/models/a.safetensors")
    );
}

#[test]
fn test_corrupt_legacy_document_is_quarantined() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("sage_cache.json"), b"{ truncated").unwrap();

    let mut cache = MetadataCache::new(dir.path());
    cache.load();

    assert!(cache.hashes().is_empty());
    let quarantined: Vec<_> = fs::read_dir(cache.layout().backup_dir())
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with("sage_cache-error-"))
        .collect();
    assert_eq!(quarantined.len(), 1);
    assert_eq!(fs::read(quarantined[0].path()).unwrap(), b"{ truncated");
}
