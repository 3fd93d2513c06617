//! Migration from the legacy single-document cache.
//!
//! The legacy document mapped each path straight to its info object:
//!
//! ```json
//! { "/models/a.safetensors": { "hash": "…", "civitai": "True", … } }
//! ```
//!
//! It is split into the path → hash and hash → info documents. When two
//! paths share a hash, registry-confirmed entries are applied after
//! unconfirmed ones so confirmed data wins. Among entries of the same class
//! the last one in path order wins.

use super::entry::{InfoRecord, FILE_PATH};
use super::{HashInfos, PathHashes};
use serde_json::Value;
use std::collections::BTreeMap;

/// Output of a legacy migration.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Migration {
    /// Path → hash document
    pub hashes: PathHashes,
    /// Hash → info document
    pub infos: HashInfos,
    /// Legacy entries dropped because they had no usable hash
    pub skipped: usize,
}

/// Split a legacy document into the two-document form.
#[must_use]
pub fn migrate_legacy(legacy: &BTreeMap<String, Value>) -> Migration {
    let mut migration = Migration::default();
    let mut unconfirmed = Vec::new();
    let mut confirmed = Vec::new();

    for (path, value) in legacy {
        let Some(record) = InfoRecord::from_value(value.clone()) else {
            migration.skipped += 1;
            continue;
        };
        let Some(hash) = record.hash().map(str::to_string) else {
            migration.skipped += 1;
            continue;
        };

        migration.hashes.insert(path.clone(), hash.clone());
        if record.is_registry_confirmed() {
            confirmed.push((path, hash, record));
        } else {
            unconfirmed.push((path, hash, record));
        }
    }

    for (path, hash, mut record) in unconfirmed.into_iter().chain(confirmed) {
        if record.get(FILE_PATH).is_none() {
            record.insert(FILE_PATH, Value::from(path.as_str()));
        }
        migration.infos.insert(hash, record);
    }

    migration
}
