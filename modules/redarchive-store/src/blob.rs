// Blob storage behind one trait. Local filesystem, S3-compatible object
// stores and an in-memory store all go through opendal; the backend is
// picked once at startup and call sites only see `dyn BlobStore`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use opendal::{services, ErrorKind, Operator};
use tracing::{debug, info};

use redarchive_common::BlobBackend;

use crate::error::BlobError;

type Result<T> = std::result::Result<T, BlobError>;

/// Per-upload options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOptions {
    pub content_type: Option<String>,
}

impl UploadOptions {
    pub fn content_type(content_type: &str) -> Self {
        Self {
            content_type: Some(content_type.to_string()),
        }
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` to `container/path`, creating the container if needed
    /// and silently replacing any existing blob. Returns the path the blob
    /// can be read back from, relative to the container.
    async fn upload(
        &self,
        bytes: Bytes,
        container: &str,
        path: &str,
        options: &UploadOptions,
    ) -> Result<String>;

    async fn read(&self, container: &str, path: &str) -> Result<Bytes>;

    /// All blob paths under `prefix`, recursively.
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>>;
}

enum Backend {
    Fs { root: PathBuf },
    S3 {
        endpoint: String,
        region: String,
        access_key: String,
        secret_key: String,
    },
    Memory,
}

/// opendal-backed store. One operator per container, built lazily.
pub struct OpendalBlobStore {
    backend: Backend,
    operators: Mutex<HashMap<String, Operator>>,
}

impl OpendalBlobStore {
    pub fn new(backend: &BlobBackend) -> Self {
        let backend = match backend {
            BlobBackend::Fs { root } => Backend::Fs { root: root.clone() },
            BlobBackend::S3 {
                endpoint,
                region,
                access_key,
                secret_key,
            } => Backend::S3 {
                endpoint: endpoint.clone(),
                region: region.clone(),
                access_key: access_key.clone(),
                secret_key: secret_key.clone(),
            },
        };
        Self::with_backend(backend)
    }

    /// Process-local store; contents vanish with the value.
    pub fn in_memory() -> Self {
        Self::with_backend(Backend::Memory)
    }

    fn with_backend(backend: Backend) -> Self {
        Self {
            backend,
            operators: Mutex::new(HashMap::new()),
        }
    }

    fn operator(&self, container: &str) -> Result<Operator> {
        let mut operators = self
            .operators
            .lock()
            .map_err(|_| BlobError::Transport("operator cache poisoned".into()))?;
        if let Some(op) = operators.get(container) {
            return Ok(op.clone());
        }

        let op = match &self.backend {
            Backend::Fs { root } => {
                let dir = root.join(container);
                let builder = services::Fs::default().root(&dir.to_string_lossy());
                Operator::new(builder).map(|b| b.finish())
            }
            Backend::S3 {
                endpoint,
                region,
                access_key,
                secret_key,
            } => {
                let builder = services::S3::default()
                    .bucket(container)
                    .endpoint(endpoint)
                    .region(region)
                    .access_key_id(access_key)
                    .secret_access_key(secret_key);
                Operator::new(builder).map(|b| b.finish())
            }
            Backend::Memory => Operator::new(services::Memory::default()).map(|b| b.finish()),
        }
        .map_err(|e| BlobError::Transport(format!("failed to open container {container}: {e}")))?;

        info!(container, "blob: opened container");
        operators.insert(container.to_string(), op.clone());
        Ok(op)
    }
}

fn map_err(err: opendal::Error, container: &str, path: &str) -> BlobError {
    if err.kind() == ErrorKind::NotFound {
        BlobError::NotFound {
            container: container.to_string(),
            path: path.to_string(),
        }
    } else {
        BlobError::Transport(format!("{container}/{path}: {err}"))
    }
}

#[async_trait]
impl BlobStore for OpendalBlobStore {
    async fn upload(
        &self,
        bytes: Bytes,
        container: &str,
        path: &str,
        options: &UploadOptions,
    ) -> Result<String> {
        let op = self.operator(container)?;
        let len = bytes.len();

        let mut write = op.write_with(path, bytes);
        if let Some(ref content_type) = options.content_type {
            write = write.content_type(content_type);
        }
        write.await.map_err(|e| map_err(e, container, path))?;

        info!(container, path, bytes = len, "blob: uploaded");
        Ok(path.to_string())
    }

    async fn read(&self, container: &str, path: &str) -> Result<Bytes> {
        let op = self.operator(container)?;
        let buf = op.read(path).await.map_err(|e| map_err(e, container, path))?;
        let bytes = buf.to_bytes();
        debug!(container, path, bytes = bytes.len(), "blob: read");
        Ok(bytes)
    }

    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>> {
        let op = self.operator(container)?;
        let entries = match op.list_with(prefix).recursive(true).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(map_err(e, container, prefix)),
        };

        let mut paths: Vec<String> = entries
            .into_iter()
            .filter(|e| e.metadata().mode().is_file())
            .map(|e| e.path().trim_start_matches('/').to_string())
            .collect();
        paths.sort();
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_roundtrip_and_overwrite() {
        let store = OpendalBlobStore::in_memory();
        let path = store
            .upload(
                Bytes::from_static(b"first"),
                "reddit-posts",
                "abc/post.json",
                &UploadOptions::content_type("application/json"),
            )
            .await
            .unwrap();
        assert_eq!(path, "abc/post.json");

        store
            .upload(
                Bytes::from_static(b"second"),
                "reddit-posts",
                "abc/post.json",
                &UploadOptions::default(),
            )
            .await
            .unwrap();

        let bytes = store.read("reddit-posts", "abc/post.json").await.unwrap();
        assert_eq!(&bytes[..], b"second");
    }

    #[tokio::test]
    async fn missing_blob_is_not_found() {
        let store = OpendalBlobStore::in_memory();
        let err = store.read("reddit-posts", "nope/post.json").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn containers_are_isolated() {
        let store = OpendalBlobStore::in_memory();
        store
            .upload(Bytes::from_static(b"x"), "a", "p.bin", &UploadOptions::default())
            .await
            .unwrap();
        assert!(store.read("b", "p.bin").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn fs_backend_creates_container_and_lists() {
        let dir = tempfile::tempdir().unwrap();
        let store = OpendalBlobStore::new(&BlobBackend::Fs {
            root: dir.path().to_path_buf(),
        });

        store
            .upload(Bytes::from_static(b"png"), "posts", "id1/screenshot.png", &UploadOptions::default())
            .await
            .unwrap();
        store
            .upload(Bytes::from_static(b"{}"), "posts", "id1/post.json", &UploadOptions::default())
            .await
            .unwrap();

        assert!(dir.path().join("posts/id1/screenshot.png").is_file());

        let listed = store.list("posts", "").await.unwrap();
        assert_eq!(listed, vec!["id1/post.json", "id1/screenshot.png"]);
    }
}
