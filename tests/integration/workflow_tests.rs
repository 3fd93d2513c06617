use sagecache::cache::{InfoRecord, MetadataCache};
use sagecache::config::Config;
use sagecache::context::SageContext;
use sagecache::fetcher::{FetchError, MetadataFetcher};
use sagecache::hasher::{hash_bytes, Hasher};
use sagecache::paths::cache_key;
use sagecache::workflow::{pull_metadata, PullOptions, PullStatus, Staleness};
use serde_json::json;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use tempfile::{tempdir, TempDir};

/// Registry double that replays scripted responses and records lookups.
#[derive(Clone, Default)]
struct ScriptedRegistry {
    responses: Rc<RefCell<VecDeque<Result<InfoRecord, FetchError>>>>,
    lookups: Rc<RefCell<Vec<String>>>,
}

impl ScriptedRegistry {
    fn respond(&self, response: Result<serde_json::Value, FetchError>) -> &Self {
        let response = response.map(|v| InfoRecord::from_value(v).unwrap());
        self.responses.borrow_mut().push_back(response);
        self
    }

    fn lookups(&self) -> usize {
        self.lookups.borrow().len()
    }
}

impl MetadataFetcher for ScriptedRegistry {
    fn fetch_by_hash(&self, hash: &str) -> Result<InfoRecord, FetchError> {
        self.lookups.borrow_mut().push(hash.to_string());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Network("no scripted response".into())))
    }
}

fn model_file(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, bytes).unwrap();
    path
}

fn registry_hit() -> serde_json::Value {
    json!({
        "modelId": 4201,
        "id": 130072,
        "name": "v5.1",
        "baseModel": "SD 1.5",
        "trainedWords": [],
        "model": {"name": "Realistic Vision", "type": "Checkpoint", "nsfw": false},
        "civitai": true
    })
}

#[test]
fn test_pull_fetches_and_persists() {
    let dir = tempdir().unwrap();
    let model = model_file(&dir, "realistic.safetensors", b"weights");
    let registry = ScriptedRegistry::default();
    registry.respond(Ok(registry_hit()));

    let mut cache = MetadataCache::new(dir.path().join("cache"));
    let result = pull_metadata(
        &mut cache,
        &Hasher::new(),
        &registry,
        &model,
        PullOptions::default(),
    )
    .unwrap();

    assert_eq!(result.status, PullStatus::Fetched);
    assert_eq!(result.hash, hash_bytes(b"weights"));
    assert_eq!(registry.lookups.borrow()[0], result.hash);
    assert!(result.record.is_registry_confirmed());
    assert_eq!(result.record.model_name(), Some("Realistic Vision"));
    assert!(result.record.last_used().is_some());
    assert_eq!(result.record.file_path(), Some(result.key.as_str()));

    let mut reopened = MetadataCache::new(dir.path().join("cache"));
    reopened.load();
    assert_eq!(reopened.by_path(&cache_key(&model)), result.record);
}

#[test]
fn test_confirmed_record_is_served_from_cache() {
    let dir = tempdir().unwrap();
    let model = model_file(&dir, "a.safetensors", b"weights");
    let registry = ScriptedRegistry::default();
    registry.respond(Ok(registry_hit()));
    let mut cache = MetadataCache::new(dir.path().join("cache"));
    let hasher = Hasher::new();

    pull_metadata(&mut cache, &hasher, &registry, &model, PullOptions::default()).unwrap();
    let second =
        pull_metadata(&mut cache, &hasher, &registry, &model, PullOptions::default()).unwrap();

    assert_eq!(second.status, PullStatus::Cached);
    assert_eq!(registry.lookups(), 1);
}

#[test]
fn test_force_refetches_confirmed_record() {
    let dir = tempdir().unwrap();
    let model = model_file(&dir, "a.safetensors", b"weights");
    let registry = ScriptedRegistry::default();
    registry
        .respond(Ok(registry_hit()))
        .respond(Ok(json!({"modelId": 4201, "name": "v6.0"})));
    let mut cache = MetadataCache::new(dir.path().join("cache"));
    let hasher = Hasher::new();

    pull_metadata(&mut cache, &hasher, &registry, &model, PullOptions::default()).unwrap();
    let forced = PullOptions {
        force: true,
        ..PullOptions::default()
    };
    let result = pull_metadata(&mut cache, &hasher, &registry, &model, forced).unwrap();

    assert_eq!(result.status, PullStatus::Fetched);
    assert_eq!(registry.lookups(), 2);
    assert_eq!(result.record.get("name"), Some(&json!("v6.0")));
    // Fields the second response lacks are kept from the first.
    assert_eq!(result.record.get("baseModel"), Some(&json!("SD 1.5")));
}

#[test]
fn test_failed_refetch_never_downgrades_confirmed_record() {
    let dir = tempdir().unwrap();
    let model = model_file(&dir, "a.safetensors", b"weights");
    let registry = ScriptedRegistry::default();
    registry
        .respond(Ok(registry_hit()))
        .respond(Err(FetchError::Http { status: 503 }));
    let mut cache = MetadataCache::new(dir.path().join("cache"));
    let hasher = Hasher::new();

    pull_metadata(&mut cache, &hasher, &registry, &model, PullOptions::default()).unwrap();
    let forced = PullOptions {
        force: true,
        ..PullOptions::default()
    };
    let result = pull_metadata(&mut cache, &hasher, &registry, &model, forced).unwrap();

    assert_eq!(
        result.status,
        PullStatus::Unavailable(FetchError::Http { status: 503 })
    );
    assert!(result.record.is_registry_confirmed());
    assert_eq!(result.record.model_name(), Some("Realistic Vision"));
}

#[test]
fn test_unknown_hash_is_retried_until_confirmed() {
    let dir = tempdir().unwrap();
    let model = model_file(&dir, "a.safetensors", b"weights");
    let hash = hash_bytes(b"weights");
    let registry = ScriptedRegistry::default();
    registry
        .respond(Err(FetchError::NotFound { hash: hash.clone() }))
        .respond(Ok(registry_hit()));
    let mut cache = MetadataCache::new(dir.path().join("cache"));
    let hasher = Hasher::new();

    let first =
        pull_metadata(&mut cache, &hasher, &registry, &model, PullOptions::default()).unwrap();
    assert_eq!(first.record.civitai(), Some(false));
    assert_eq!(first.record.hash(), Some(hash.as_str()));

    let second =
        pull_metadata(&mut cache, &hasher, &registry, &model, PullOptions::default()).unwrap();
    assert_eq!(second.status, PullStatus::Fetched);
    assert_eq!(registry.lookups(), 2);
}

#[test]
fn test_missing_record_staleness_skips_unconfirmed() {
    let dir = tempdir().unwrap();
    let model = model_file(&dir, "a.safetensors", b"weights");
    let registry = ScriptedRegistry::default();
    registry.respond(Err(FetchError::Network("timeout".into())));
    let mut cache = MetadataCache::new(dir.path().join("cache"));
    let hasher = Hasher::new();
    let options = PullOptions {
        staleness: Staleness::MissingRecord,
        ..PullOptions::default()
    };

    pull_metadata(&mut cache, &hasher, &registry, &model, options).unwrap();
    let second = pull_metadata(&mut cache, &hasher, &registry, &model, options).unwrap();

    assert_eq!(second.status, PullStatus::Cached);
    assert_eq!(registry.lookups(), 1);
}

#[test]
fn test_identical_files_share_one_record() {
    let dir = tempdir().unwrap();
    let a = model_file(&dir, "a.safetensors", b"same bytes");
    let b = model_file(&dir, "b.safetensors", b"same bytes");
    let registry = ScriptedRegistry::default();
    registry.respond(Ok(registry_hit()));
    let mut cache = MetadataCache::new(dir.path().join("cache"));
    let hasher = Hasher::new();

    pull_metadata(&mut cache, &hasher, &registry, &a, PullOptions::default()).unwrap();
    let second =
        pull_metadata(&mut cache, &hasher, &registry, &b, PullOptions::default()).unwrap();

    // b's path was new, so the registry was asked again and failed; the
    // shared record keeps its confirmation.
    assert_eq!(registry.lookups(), 2);
    assert!(second.record.is_registry_confirmed());
    assert_eq!(cache.infos().len(), 1);
    assert_eq!(cache.hashes().len(), 2);
    assert_eq!(second.hash, hash_bytes(b"same bytes"));
    assert_eq!(second.record.file_path(), Some(cache_key(&b).as_str()));
}

#[test]
fn test_context_pull_with_config() {
    let dir = tempdir().unwrap();
    let model = model_file(&dir, "a.safetensors", b"weights");
    let registry = ScriptedRegistry::default();
    registry.respond(Ok(registry_hit()));

    let mut config = Config {
        cache_dir: dir.path().join("cache"),
        ..Config::default()
    };
    config.pull.update_last_used = false;
    let mut ctx = SageContext::with_fetcher(config, Box::new(registry.clone()));

    let result = ctx.pull(&model, false).unwrap();
    assert_eq!(result.status, PullStatus::Fetched);
    assert_eq!(result.record.get("lastUsed"), Some(&json!("")));
    assert_eq!(ctx.cache().hash_for_path(&result.key), Some(result.hash.as_str()));
}
