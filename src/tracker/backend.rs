use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

use crate::store::BufferRatioStore;

/// Errors raised by persistence backends.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(String),
}

/// Persistence seam for per-device stores.
///
/// Implementations only move bytes; they never interpret versions. A store that
/// cannot be decoded is reported as absent so the classifier starts fresh.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn load(&self, device: &str) -> Result<Option<BufferRatioStore>, BackendError>;
    async fn save(&self, device: &str, store: &BufferRatioStore) -> Result<(), BackendError>;
    async fn remove(&self, device: &str) -> Result<(), BackendError>;
}

/// In-process backend, mostly for tests and short-lived hosts.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    stores: Mutex<HashMap<String, BufferRatioStore>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.stores.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.lock().is_empty()
    }

    /// Inserts a store directly, bypassing the classifier.
    pub fn insert(&self, device: impl Into<String>, store: BufferRatioStore) {
        self.stores.lock().insert(device.into(), store);
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn load(&self, device: &str) -> Result<Option<BufferRatioStore>, BackendError> {
        Ok(self.stores.lock().get(device).cloned())
    }

    async fn save(&self, device: &str, store: &BufferRatioStore) -> Result<(), BackendError> {
        self.stores.lock().insert(device.to_string(), store.clone());
        Ok(())
    }

    async fn remove(&self, device: &str) -> Result<(), BackendError> {
        self.stores.lock().remove(device);
        Ok(())
    }
}

/// On-disk encoding used by [`FileBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreEncoding {
    /// Host-compatible camelCase JSON.
    #[default]
    Json,
    /// Compact CBOR with the same field names.
    Cbor,
}

impl StoreEncoding {
    fn extension(&self) -> &'static str {
        match self {
            StoreEncoding::Json => "json",
            StoreEncoding::Cbor => "cbor",
        }
    }

    fn encode(&self, store: &BufferRatioStore) -> Result<Vec<u8>, BackendError> {
        match self {
            StoreEncoding::Json => {
                serde_json::to_vec(store).map_err(|e| BackendError::Encode(e.to_string()))
            }
            StoreEncoding::Cbor => {
                serde_cbor::to_vec(store).map_err(|e| BackendError::Encode(e.to_string()))
            }
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<BufferRatioStore, String> {
        match self {
            StoreEncoding::Json => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
            StoreEncoding::Cbor => serde_cbor::from_slice(bytes).map_err(|e| e.to_string()),
        }
    }
}

/// One file per device under `root`.
///
/// File names are the hex SHA-256 of the device key, so arbitrary keys never
/// escape the directory. Writes go through a temporary file and a rename.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
    encoding: StoreEncoding,
}

impl FileBackend {
    /// Creates the backend, creating `root` if needed.
    pub async fn open(root: impl Into<PathBuf>, encoding: StoreEncoding) -> Result<Self, BackendError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root, encoding })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn encoding(&self) -> StoreEncoding {
        self.encoding
    }

    /// Path of the file holding `device`'s store.
    pub fn path_for(&self, device: &str) -> PathBuf {
        let digest = Sha256::digest(device.as_bytes());
        let name: String = digest.iter().map(|byte| format!("{:02x}", byte)).collect();
        self.root
            .join(format!("{}.{}", name, self.encoding.extension()))
    }
}

#[async_trait]
impl StoreBackend for FileBackend {
    async fn load(&self, device: &str) -> Result<Option<BufferRatioStore>, BackendError> {
        let path = self.path_for(device);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match self.encoding.decode(&bytes) {
            Ok(store) => Ok(Some(store)),
            Err(reason) => {
                warn!(device, path = %path.display(), %reason, "ignoring undecodable buffer ratio store");
                Ok(None)
            }
        }
    }

    async fn save(&self, device: &str, store: &BufferRatioStore) -> Result<(), BackendError> {
        let path = self.path_for(device);
        let bytes = self.encoding.encode(store)?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn remove(&self, device: &str) -> Result<(), BackendError> {
        match tokio::fs::remove_file(self.path_for(device)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thresholds::HysteresisThresholds;

    #[tokio::test]
    async fn memory_backend_round_trip() {
        let backend = MemoryBackend::new();
        let store = BufferRatioStore::fresh(&HysteresisThresholds::v1_1(), 5);
        assert!(backend.load("tv-1").await.unwrap().is_none());
        backend.save("tv-1", &store).await.unwrap();
        assert_eq!(backend.load("tv-1").await.unwrap(), Some(store));
        backend.remove("tv-1").await.unwrap();
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn file_names_are_hashed() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path(), StoreEncoding::Cbor).await.unwrap();
        let path = backend.path_for("../../etc/passwd");
        assert_eq!(path.parent(), Some(dir.path()));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("cbor"));
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path(), StoreEncoding::Json).await.unwrap();
        tokio::fs::write(backend.path_for("tv-1"), b"{not json").await.unwrap();
        assert!(backend.load("tv-1").await.unwrap().is_none());
        backend.remove("tv-1").await.unwrap();
        backend.remove("tv-1").await.unwrap();
    }

    #[tokio::test]
    async fn failed_rename_cleans_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path(), StoreEncoding::Json).await.unwrap();
        let target = backend.path_for("tv-1");
        // a non-empty directory at the target path makes the rename fail
        tokio::fs::create_dir_all(target.join("blocker")).await.unwrap();

        let store = BufferRatioStore::fresh(&HysteresisThresholds::v1_1(), 0);
        assert!(matches!(
            backend.save("tv-1", &store).await,
            Err(BackendError::Io(_))
        ));
        assert!(!target.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path(), StoreEncoding::Cbor).await.unwrap();
        let store = BufferRatioStore::fresh(&HysteresisThresholds::v1_1(), 0);
        backend.save("tv-1", &store).await.unwrap();
        let target = backend.path_for("tv-1");
        assert!(target.exists());
        assert!(!target.with_extension("tmp").exists());
        assert_eq!(backend.load("tv-1").await.unwrap(), Some(store));
    }
}
