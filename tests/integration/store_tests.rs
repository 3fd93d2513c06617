use sagecache::backup::BackupManager;
use sagecache::cache::MetadataCache;
use sagecache::store::{stage_bytes, JsonStore};
use std::collections::BTreeMap;
use std::fs;
use tempfile::tempdir;

fn error_copies(dir: &std::path::Path, prefix: &str) -> Vec<std::path::PathBuf> {
    let mut found: Vec<_> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(prefix))
                })
                .collect()
        })
        .unwrap_or_default();
    found.sort();
    found
}

#[test]
fn test_corrupt_info_document_is_quarantined_once() {
    let dir = tempdir().unwrap();
    let mut cache = MetadataCache::new(dir.path());
    cache.add_entry("/models/a.safetensors", "H").unwrap();
    let info_file = cache.layout().info_file();
    let backup_dir = cache.layout().backup_dir();

    fs::write(&info_file, b"{\"H\": {\"hash\": ").unwrap();
    filetime::set_file_mtime(&info_file, filetime::FileTime::from_unix_time(1, 0)).unwrap();

    cache.load();
    assert!(cache.infos().is_empty());
    assert_eq!(cache.hash_for_path("/models/a.safetensors"), Some("H"));

    let copies = error_copies(&backup_dir, "sage_cache_info-error-");
    assert_eq!(copies.len(), 1);
    assert_eq!(fs::read(&copies[0]).unwrap(), b"{\"H\": {\"hash\": ");

    // A second process hitting the same corruption adds no new copy.
    let mut other = MetadataCache::new(dir.path());
    other.load();
    assert_eq!(error_copies(&backup_dir, "sage_cache_info-error-").len(), 1);

    // The next save replaces the corrupt file with a valid document.
    cache.save();
    let text = fs::read_to_string(&info_file).unwrap();
    assert_eq!(text, "{}");
}

#[test]
fn test_interrupted_write_leaves_previous_document() {
    let dir = tempdir().unwrap();
    let store = JsonStore::new(BackupManager::new(dir.path().join("backup")));
    let target = dir.path().join("sage_cache_hash.json");

    let mut doc = BTreeMap::new();
    doc.insert("/models/a.safetensors", "H");
    store.write(&target, &doc).unwrap();
    let before = fs::read(&target).unwrap();

    let staged = stage_bytes(&target, b"{\"partial\":").unwrap();
    let temp = staged.temp_path().to_path_buf();
    assert!(temp.exists());
    drop(staged);

    assert_eq!(fs::read(&target).unwrap(), before);
    assert!(!temp.exists());
    let reread: BTreeMap<String, String> = store.read(&target, "sage_cache_hash").unwrap();
    assert_eq!(reread["/models/a.safetensors"], "H");
}
