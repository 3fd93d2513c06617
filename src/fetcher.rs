//! Model registry client.
//!
//! The registry is queried by content hash. A hit returns the model version
//! the file belongs to; the fields the cache keeps are picked out of that
//! response by [`parse_version`]. Optionally a second request fetches the
//! model's version list to tell whether a newer version exists.
//!
//! Every failure is a typed [`FetchError`] value. Nothing here panics or
//! retries; the pull workflow decides how to degrade.

use crate::cache::entry::{InfoRecord, CIVITAI, MODEL_ID};
use crate::config::RegistryConfig;
use serde_json::{Map, Value};
use std::time::Duration;

/// Why a registry lookup produced no data.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The registry does not know this hash.
    #[error("Hash {hash} not found on registry")]
    NotFound {
        /// Hash that was looked up
        hash: String,
    },

    /// The registry answered with a non-success status.
    #[error("Registry returned HTTP {status}")]
    Http {
        /// HTTP status code
        status: u16,
    },

    /// The request did not complete (DNS, connect, TLS, timeout).
    #[error("Registry request failed: {0}")]
    Network(String),

    /// The response was not the JSON shape expected.
    #[error("Malformed registry response: {0}")]
    Malformed(String),

    /// The HTTP client could not be built.
    #[error("Failed to create HTTP client: {0}")]
    Client(String),
}

impl FetchError {
    /// `true` if the registry positively answered "unknown hash".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Source of registry metadata for a content hash.
pub trait MetadataFetcher {
    /// Look up `hash` and return the registry fields to merge into its info record.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] describing why no data is available.
    fn fetch_by_hash(&self, hash: &str) -> Result<InfoRecord, FetchError>;
}

/// Blocking client for a Civitai-compatible registry API.
pub struct CivitaiClient {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: Option<String>,
    check_updates: bool,
}

impl CivitaiClient {
    /// Build a client from registry settings.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the HTTP client cannot be created.
    pub fn new(config: &RegistryConfig) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("sagecache/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            check_updates: config.check_updates,
        })
    }

    /// URL of the by-hash endpoint for `hash`.
    #[must_use]
    pub fn version_url(&self, hash: &str) -> String {
        version_url(&self.base_url, hash)
    }

    fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
            });
        }

        response
            .json::<Value>()
            .map_err(|e| FetchError::Malformed(e.to_string()))
    }

    fn latest_version_id(&self, model_id: &str) -> Result<Option<u64>, FetchError> {
        let body = self.get_json(&model_url(&self.base_url, model_id))?;
        Ok(latest_version_id(&body))
    }
}

impl MetadataFetcher for CivitaiClient {
    fn fetch_by_hash(&self, hash: &str) -> Result<InfoRecord, FetchError> {
        let body = match self.get_json(&self.version_url(hash)) {
            Err(FetchError::Http { status: 404 }) => {
                return Err(FetchError::NotFound {
                    hash: hash.to_string(),
                })
            }
            other => other?,
        };
        let mut record = parse_version(hash, &body)?;

        if self.check_updates {
            if let (Some(model_id), Some(version_id)) =
                (record.model_id(), body.get("id").and_then(Value::as_u64))
            {
                match self.latest_version_id(&model_id) {
                    Ok(Some(latest)) => {
                        record.insert("update_available", Value::Bool(latest != version_id));
                    }
                    Ok(None) => log::debug!("Model {} lists no versions", model_id),
                    Err(e) => log::debug!("Update check for model {} failed: {}", model_id, e),
                }
            }
        }

        Ok(record)
    }
}

/// By-hash endpoint URL.
#[must_use]
pub fn version_url(base_url: &str, hash: &str) -> String {
    format!(
        "{}/model-versions/by-hash/{}",
        base_url.trim_end_matches('/'),
        hash
    )
}

/// Model endpoint URL.
#[must_use]
pub fn model_url(base_url: &str, model_id: &str) -> String {
    format!("{}/models/{}", base_url.trim_end_matches('/'), model_id)
}

/// Reduce a by-hash response to the fields the cache persists.
///
/// # Errors
///
/// Returns [`FetchError::NotFound`] for the registry's `{"error": …}` body and
/// [`FetchError::Malformed`] when the body is not an object or lacks `modelId`.
pub fn parse_version(hash: &str, body: &Value) -> Result<InfoRecord, FetchError> {
    let obj = body
        .as_object()
        .ok_or_else(|| FetchError::Malformed("response is not an object".to_string()))?;

    if obj.contains_key("error") {
        return Err(FetchError::NotFound {
            hash: hash.to_string(),
        });
    }

    let model_id = obj
        .get(MODEL_ID)
        .filter(|v| v.is_number() || v.is_string())
        .ok_or_else(|| FetchError::Malformed("missing modelId".to_string()))?;

    let mut record = InfoRecord::new();
    record.insert(MODEL_ID, model_id.clone());
    for key in ["id", "name", "baseModel", "downloadUrl"] {
        if let Some(value) = obj.get(key).filter(|v| !v.is_null()) {
            record.insert(key, value.clone());
        }
    }

    let trained_words = obj
        .get("trainedWords")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    record.insert("trainedWords", Value::Array(trained_words));

    if let Some(model) = obj.get("model").and_then(Value::as_object) {
        let mut summary = Map::new();
        for key in ["name", "type", "nsfw"] {
            if let Some(value) = model.get(key) {
                summary.insert(key.to_string(), value.clone());
            }
        }
        record.insert("model", Value::Object(summary));
    }

    record.insert(CIVITAI, Value::Bool(true));
    Ok(record)
}

/// Id of the newest version in a model response (`modelVersions[0].id`).
#[must_use]
pub fn latest_version_id(body: &Value) -> Option<u64> {
    body.get("modelVersions")?
        .as_array()?
        .first()?
        .get("id")?
        .as_u64()
}
