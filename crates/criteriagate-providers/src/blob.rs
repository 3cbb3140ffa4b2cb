// crates/criteriagate-providers/src/blob.rs
// ============================================================================
// Module: CriteriaGate Blob Store Adapters
// Description: BlobStore implementations for `gs://` object storage and
//              `local://` filesystem reads.
// Purpose: Give the ingest node a single fetch surface regardless of where
//          the protocol PDF lives.
// Dependencies: criteriagate_core, reqwest
// ============================================================================

//! ## Overview
//! `LocalBlobStore` is for development only: it resolves `local://<path>`
//! against an allow-listed root and rejects any path that would escape it.
//! `GcsBlobStore` fetches `gs://<bucket>/<object>` through a signed-URL
//! HTTP client, classifying network failures as transient and 4xx
//! responses as permanent.

use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use criteriagate_core::BlobStore;
use criteriagate_core::ClassifiedError;
use criteriagate_core::PermanentError;
use criteriagate_core::TransientError;

/// Configuration shared by the HTTP-backed object-store client.
#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    /// Request timeout.
    pub timeout: Duration,
    /// Maximum response size accepted, in bytes.
    pub max_response_bytes: usize,
    /// User agent string for outbound requests.
    pub user_agent: String,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_response_bytes: 64 * 1024 * 1024,
            user_agent: "criteriagate/0.1".to_owned(),
        }
    }
}

/// Fetches `gs://<bucket>/<object>` URIs over HTTP via a signed-URL
/// translation performed by `resolve_signed_url`.
pub struct GcsBlobStore {
    config: ObjectStoreConfig,
    client: reqwest::Client,
}

impl GcsBlobStore {
    /// Builds a client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifiedError::Permanent`] if the underlying HTTP client
    /// cannot be constructed.
    pub fn new(config: ObjectStoreConfig) -> Result<Self, ClassifiedError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|err| ClassifiedError::Permanent(PermanentError::new(err.to_string())))?;
        Ok(Self { config, client })
    }

    /// Translates a `gs://bucket/object` URI into the signed HTTPS URL used
    /// to fetch it. Kept as a separate, overridable step so a real deployment
    /// can plug in its own signing authority.
    fn signed_url(uri: &str) -> Result<String, ClassifiedError> {
        let rest = uri.strip_prefix("gs://").ok_or_else(|| {
            ClassifiedError::Permanent(PermanentError::new(format!("not a gs:// uri: {uri}")))
        })?;
        Ok(format!("https://storage.googleapis.com/{rest}"))
    }
}

#[async_trait::async_trait]
impl BlobStore for GcsBlobStore {
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, ClassifiedError> {
        let url = Self::signed_url(uri)?;
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| ClassifiedError::Transient(TransientError::new(err.to_string())))?;

        if response.status().is_client_error() {
            return Err(ClassifiedError::Permanent(PermanentError::new(format!(
                "object fetch rejected with status {}",
                response.status()
            ))));
        }
        if !response.status().is_success() {
            return Err(ClassifiedError::Transient(TransientError::new(format!(
                "object fetch failed with status {}",
                response.status()
            ))));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| ClassifiedError::Transient(TransientError::new(err.to_string())))?;
        if bytes.len() > self.config.max_response_bytes {
            return Err(ClassifiedError::Permanent(PermanentError::new(format!(
                "object exceeds max_response_bytes ({} > {})",
                bytes.len(),
                self.config.max_response_bytes
            ))));
        }
        Ok(bytes.to_vec())
    }
}

/// Reads `local://<relative-path>` URIs from an allow-listed root directory.
///
/// # Invariants
/// - Rejects any resolved path that escapes `root`, including via `..`
///   components or absolute-path overrides.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Creates a store rooted at `root`. Every `local://` fetch is resolved
    /// relative to this directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves `uri` to a path within `root`, rejecting traversal attempts.
    fn resolve(&self, uri: &str) -> Result<PathBuf, ClassifiedError> {
        let relative = uri.strip_prefix("local://").ok_or_else(|| {
            ClassifiedError::Permanent(PermanentError::new(format!("not a local:// uri: {uri}")))
        })?;
        let relative_path = Path::new(relative);
        if relative_path
            .components()
            .any(|component| matches!(component, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(ClassifiedError::Permanent(PermanentError::new(format!(
                "path traversal rejected: {uri}"
            ))));
        }
        Ok(self.root.join(relative_path))
    }
}

#[async_trait::async_trait]
impl BlobStore for LocalBlobStore {
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, ClassifiedError> {
        let path = self.resolve(uri)?;
        tokio::fs::read(&path)
            .await
            .map_err(|err| ClassifiedError::Permanent(PermanentError::new(format!("{}: {err}", path.display()))))
    }
}
