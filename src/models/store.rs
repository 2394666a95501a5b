//! Read-only sources of model binaries.

use super::ModelRole;
use crate::config::ModelStoreConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Where model binaries come from.
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Fetch one model binary. `Ok(None)` means the store has no such model.
    async fn fetch(&self, detector_id: &str, role: ModelRole) -> Result<Option<Bytes>>;
}

fn unavailable(detector_id: &str, reason: impl Into<String>) -> Error {
    Error::ModelUnavailable {
        detector_id: detector_id.to_string(),
        reason: reason.into(),
    }
}

// Ids become path segments, so anything that could escape the root is refused.
fn check_detector_id(detector_id: &str) -> Result<()> {
    let safe = !detector_id.is_empty()
        && detector_id != "."
        && detector_id != ".."
        && !detector_id.contains(['/', '\\']);
    if safe {
        Ok(())
    } else {
        Err(unavailable(detector_id, "detector id is not a valid path segment"))
    }
}

/// Models laid out as `<root>/<detector_id>/primary.onnx` and `oodd.onnx`.
#[derive(Debug, Clone)]
pub struct FsModelStore {
    root: PathBuf,
}

impl FsModelStore {
    /// Store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a model file.
    pub fn path_for(&self, detector_id: &str, role: ModelRole) -> PathBuf {
        self.root.join(detector_id).join(role.filename())
    }
}

#[async_trait]
impl ModelStore for FsModelStore {
    async fn fetch(&self, detector_id: &str, role: ModelRole) -> Result<Option<Bytes>> {
        check_detector_id(detector_id)?;
        let path = self.path_for(detector_id, role);
        match tokio::fs::read(&path).await {
            Ok(data) => {
                debug!(detector_id, %role, path = %path.display(), bytes = data.len(), "read model");
                Ok(Some(Bytes::from(data)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(unavailable(
                detector_id,
                format!("failed to read '{}': {e}", path.display()),
            )),
        }
    }
}

/// Models served at `GET {base_url}/detectors/{id}/models/{role}`.
#[derive(Debug, Clone)]
pub struct HttpModelStore {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpModelStore {
    /// Store backed by the model service at `base_url`.
    pub fn new(base_url: &str, api_token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(30)))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal {
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }

    /// URL of a model binary.
    pub fn url_for(&self, detector_id: &str, role: ModelRole) -> String {
        format!("{}/detectors/{detector_id}/models/{role}", self.base_url)
    }
}

#[async_trait]
impl ModelStore for HttpModelStore {
    async fn fetch(&self, detector_id: &str, role: ModelRole) -> Result<Option<Bytes>> {
        check_detector_id(detector_id)?;
        let url = self.url_for(detector_id, role);

        let mut request = self.client.get(&url);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| unavailable(detector_id, format!("GET {url} failed: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(unavailable(
                detector_id,
                format!("GET {url} returned HTTP {}", response.status()),
            ));
        }

        let mut data = Vec::with_capacity(
            usize::try_from(response.content_length().unwrap_or(0)).unwrap_or(0),
        );
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| unavailable(detector_id, format!("download of {url} failed: {e}")))?;
            data.extend_from_slice(&chunk);
        }

        debug!(detector_id, %role, bytes = data.len(), "downloaded model");
        Ok(Some(Bytes::from(data)))
    }
}

/// Build the configured store.
pub fn store_from_config(config: &ModelStoreConfig, timeout: Duration) -> Result<Arc<dyn ModelStore>> {
    Ok(match config {
        ModelStoreConfig::Filesystem { root } => Arc::new(FsModelStore::new(root.clone())),
        ModelStoreConfig::Http { base_url, api_token } => {
            Arc::new(HttpModelStore::new(base_url, api_token.clone(), timeout)?)
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_store_reads_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("det_a")).unwrap();
        std::fs::write(dir.path().join("det_a").join("primary.onnx"), b"weights").unwrap();

        let store = FsModelStore::new(dir.path());
        let primary = store.fetch("det_a", ModelRole::Primary).await.unwrap();
        assert_eq!(primary.as_deref(), Some(&b"weights"[..]));

        let oodd = store.fetch("det_a", ModelRole::Oodd).await.unwrap();
        assert!(oodd.is_none());
    }

    #[tokio::test]
    async fn test_fs_store_rejects_traversal() {
        let store = FsModelStore::new("/tmp");
        let result = store.fetch("..", ModelRole::Primary).await;
        assert!(matches!(result, Err(Error::ModelUnavailable { .. })));
        assert!(store.fetch("a/b", ModelRole::Primary).await.is_err());
    }

    #[test]
    fn test_http_store_url_layout() {
        let store = HttpModelStore::new("http://models.local/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(
            store.url_for("det_a", ModelRole::Oodd),
            "http://models.local/detectors/det_a/models/oodd"
        );
    }
}
