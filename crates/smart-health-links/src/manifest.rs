//! C10 — the manifest builder: a capability-callback state machine that
//! turns a set of SMART Health Cards / FHIR resources into an encrypted
//! SHLink manifest. Mirrors the callback-as-capability pattern used by
//! the storage backend in the crypto crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shc_crypto::error::{Result, ShcError};
use shc_crypto::jwe;

const SHC_CONTENT_TYPE: &str = "application/smart-health-card";
const FHIR_CONTENT_TYPE: &str = "application/fhir+json";
const DEFAULT_MAX_PARALLELISM: usize = 5;
const DEFAULT_EMBEDDED_LENGTH_MAX: usize = 16384;

/// Capability set a host must provide for the builder to persist and
/// later retrieve encrypted files. Implementations (filesystem, object
/// store, FHIR Binary) live outside this crate.
#[async_trait]
pub trait ManifestStorage: Send + Sync {
    async fn upload_file(&self, content: &[u8]) -> Result<String>;
    async fn get_file_url(&self, path: &str) -> Result<String>;
    async fn load_file(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.get_file_url(path).await?;
        let response = reqwest::get(&url)
            .await
            .map_err(|e| ShcError::ShlNetwork(format!("failed to fetch {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(ShcError::ShlNetwork(format!(
                "fetching {url} returned status {}",
                response.status()
            )));
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| ShcError::ShlNetwork(e.to_string()))
    }
    async fn remove_file(&self, _path: &str) -> Result<()> {
        Err(ShcError::ShlManifest("remove_file is not supported by this storage backend".into()))
    }
    async fn update_file(&self, _path: &str, _content: &[u8]) -> Result<()> {
        Err(ShcError::ShlManifest("update_file is not supported by this storage backend".into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileEntry {
    content_type: String,
    storage_path: String,
    ciphertext_length: usize,
    last_updated: i64,
}

/// Persistable builder state (files only — the `ShlPayload` is stored
/// separately per §3).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ManifestBuilderState {
    files: Vec<FileEntry>,
}

/// Options shared by `add_health_card`/`add_fhir_resource`.
#[derive(Debug, Clone, Copy)]
pub struct AddOptions {
    pub enable_compression: bool,
}

/// Options controlling [`ManifestBuilder::build_manifest`].
#[derive(Debug, Clone)]
pub struct BuildManifestOptions {
    pub embedded_length_max: usize,
    pub status: Option<String>,
    pub list: Option<Value>,
}

impl Default for BuildManifestOptions {
    fn default() -> Self {
        Self {
            embedded_length_max: DEFAULT_EMBEDDED_LENGTH_MAX,
            status: None,
            list: None,
        }
    }
}

/// Either an embedded ciphertext or a short-lived retrieval URL, per §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileDescriptor {
    Embedded {
        #[serde(rename = "contentType")]
        content_type: String,
        embedded: String,
        #[serde(rename = "lastUpdated", skip_serializing_if = "Option::is_none")]
        last_updated: Option<String>,
    },
    Location {
        #[serde(rename = "contentType")]
        content_type: String,
        location: String,
        #[serde(rename = "lastUpdated", skip_serializing_if = "Option::is_none")]
        last_updated: Option<String>,
    },
}

/// The manifest response handed to viewers (§3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShlManifest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub files: Vec<FileDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list: Option<Value>,
}

/// The manifest builder. Holds file state plus an `exp` cutoff and
/// `max_parallelism` knob; all I/O runs through `storage`.
pub struct ManifestBuilder {
    state: ManifestBuilderState,
    storage: Box<dyn ManifestStorage>,
    key_b64: String,
    exp: Option<i64>,
    max_parallelism: usize,
}

impl ManifestBuilder {
    pub fn new(storage: Box<dyn ManifestStorage>, key_b64: impl Into<String>) -> Self {
        Self {
            state: ManifestBuilderState::default(),
            storage,
            key_b64: key_b64.into(),
            exp: None,
            max_parallelism: DEFAULT_MAX_PARALLELISM,
        }
    }

    pub fn with_exp(mut self, exp: Option<i64>) -> Self {
        self.exp = exp;
        self
    }

    pub fn with_max_parallelism(mut self, max_parallelism: usize) -> Result<Self> {
        if max_parallelism == 0 {
            return Err(ShcError::ShlManifest("max_parallelism must be greater than 0".into()));
        }
        self.max_parallelism = max_parallelism;
        Ok(self)
    }

    async fn add_file(&mut self, body: &[u8], content_type: &str, compress: bool) -> Result<()> {
        let jwe = jwe::encrypt(body, content_type, &self.key_b64, compress)?;
        let path = self.storage.upload_file(jwe.as_bytes()).await?;
        self.state.files.push(FileEntry {
            content_type: content_type.to_string(),
            storage_path: path,
            ciphertext_length: jwe.len(),
            last_updated: shc_crypto::now_seconds(),
        });
        Ok(())
    }

    /// Wrap `jws` as a `.smart-health-card` file body, encrypt and upload it.
    pub async fn add_health_card(&mut self, jws: &str, options: AddOptions) -> Result<()> {
        let content = serde_json::to_vec(&serde_json::json!({"verifiableCredential": [jws]}))
            .map_err(|e| ShcError::ShlManifest(e.to_string()))?;
        self.add_file(&content, SHC_CONTENT_TYPE, options.enable_compression).await
    }

    pub async fn add_fhir_resource(&mut self, content: &Value, options: AddOptions) -> Result<()> {
        let body = serde_json::to_vec(content).map_err(|e| ShcError::ShlManifest(e.to_string()))?;
        self.add_file(&body, FHIR_CONTENT_TYPE, options.enable_compression).await
    }

    fn find_index(&self, path: &str) -> Result<usize> {
        self.state
            .files
            .iter()
            .position(|f| f.storage_path == path)
            .ok_or_else(|| ShcError::ShlManifest(format!("no file at path {path}")))
    }

    pub async fn remove_file(&mut self, path: &str) -> Result<()> {
        let index = self.find_index(path)?;
        self.storage.remove_file(path).await?;
        self.state.files.remove(index);
        Ok(())
    }

    async fn update_file(
        &mut self,
        path: &str,
        body: &[u8],
        expected_content_type: &str,
        compress: bool,
        last_updated: Option<i64>,
    ) -> Result<()> {
        let index = self.find_index(path)?;
        if self.state.files[index].content_type != expected_content_type {
            return Err(ShcError::ShlManifest(format!(
                "file at {path} has content type {}, expected {expected_content_type}",
                self.state.files[index].content_type
            )));
        }
        let jwe = jwe::encrypt(body, expected_content_type, &self.key_b64, compress)?;
        self.storage.update_file(path, jwe.as_bytes()).await?;
        self.state.files[index].ciphertext_length = jwe.len();
        self.state.files[index].last_updated = last_updated.unwrap_or_else(shc_crypto::now_seconds);
        Ok(())
    }

    pub async fn update_health_card(
        &mut self,
        path: &str,
        jws: &str,
        compress: bool,
        last_updated: Option<i64>,
    ) -> Result<()> {
        let content = serde_json::to_vec(&serde_json::json!({"verifiableCredential": [jws]}))
            .map_err(|e| ShcError::ShlManifest(e.to_string()))?;
        self.update_file(path, &content, SHC_CONTENT_TYPE, compress, last_updated).await
    }

    pub async fn update_fhir_resource(
        &mut self,
        path: &str,
        content: &Value,
        compress: bool,
        last_updated: Option<i64>,
    ) -> Result<()> {
        let body = serde_json::to_vec(content).map_err(|e| ShcError::ShlManifest(e.to_string()))?;
        self.update_file(path, &body, FHIR_CONTENT_TYPE, compress, last_updated).await
    }

    /// Build the viewer-facing manifest, embedding small files and
    /// emitting retrieval URLs for the rest, in bounded-size batches.
    #[tracing::instrument(skip(self, options), fields(file_count = self.state.files.len()))]
    pub async fn build_manifest(&self, options: BuildManifestOptions) -> Result<ShlManifest> {
        if let Some(exp) = self.exp {
            if exp < shc_crypto::now_seconds() {
                return Err(ShcError::ShlExpired);
            }
        }

        let mut descriptors = Vec::with_capacity(self.state.files.len());
        for batch in self.state.files.chunks(self.max_parallelism) {
            let futures_iter = batch.iter().map(|entry| self.describe_file(entry, options.embedded_length_max));
            let batch_results: Vec<Result<FileDescriptor>> = futures::future::join_all(futures_iter).await;
            for result in batch_results {
                descriptors.push(result?);
            }
        }

        tracing::debug!(embedded = descriptors.iter().filter(|d| matches!(d, FileDescriptor::Embedded { .. })).count(), "built manifest");

        Ok(ShlManifest {
            status: options.status,
            files: descriptors,
            list: options.list,
        })
    }

    async fn describe_file(&self, entry: &FileEntry, embedded_length_max: usize) -> Result<FileDescriptor> {
        let last_updated = Some(
            chrono::DateTime::from_timestamp(entry.last_updated, 0)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default(),
        );
        if entry.ciphertext_length <= embedded_length_max {
            let body = self.storage.load_file(&entry.storage_path).await?;
            let embedded = String::from_utf8(body)
                .map_err(|e| ShcError::ShlManifest(format!("embedded file is not valid UTF-8: {e}")))?;
            Ok(FileDescriptor::Embedded {
                content_type: entry.content_type.clone(),
                embedded,
                last_updated,
            })
        } else {
            let location = self.storage.get_file_url(&entry.storage_path).await?;
            Ok(FileDescriptor::Location {
                content_type: entry.content_type.clone(),
                location,
                last_updated,
            })
        }
    }

    pub fn to_db_attrs(&self) -> ManifestBuilderState {
        self.state.clone()
    }

    pub fn from_db_attrs(
        state: ManifestBuilderState,
        storage: Box<dyn ManifestStorage>,
        key_b64: impl Into<String>,
        exp: Option<i64>,
        max_parallelism: usize,
    ) -> Result<Self> {
        if max_parallelism == 0 {
            return Err(ShcError::ShlManifest("max_parallelism must be greater than 0".into()));
        }
        Ok(Self {
            state,
            storage,
            key_b64: key_b64.into(),
            exp,
            max_parallelism,
        })
    }
}
