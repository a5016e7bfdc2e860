use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// 256 KB write unit; progress is reported after each one.
const CHUNK_SIZE: usize = 256 * 1024;

const PARTIAL_SUFFIX: &str = ".part";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid storage key '{0}'")]
    InvalidKey(String),

    #[error("upload cancelled")]
    Cancelled,

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result of a completed `put`.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub key: String,
    pub size: u64,
    pub sha256: String,
    pub url: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `key`. `progress` receives the cumulative number of
    /// bytes persisted so far.
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<StoredBlob, StorageError>;

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError>;

    /// Remove the blob and anything left by an unfinished `put` of the same
    /// key. Deleting a missing blob is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Public URL the blob is served from.
    fn url_for(&self, key: &str) -> String;
}

/// Reject keys that could escape the storage root.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key.ends_with(PARTIAL_SUFFIX)
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Blobs as plain files under a root directory.
///
/// Writes go to `{key}.part` first and are renamed into place once complete.
/// A failed write removes its partial file.
pub struct DiskBlobStore {
    dir: PathBuf,
    public_base: String,
}

impl DiskBlobStore {
    pub async fn new(dir: PathBuf, public_base: impl Into<String>) -> Result<Self, StorageError> {
        fs::create_dir_all(&dir).await?;
        info!("Blob storage directory: {}", dir.display());
        Ok(Self {
            dir,
            public_base: public_base.into().trim_end_matches('/').to_string(),
        })
    }

    /// Path to the file for a given key.
    pub fn file_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn partial_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}{}", key, PARTIAL_SUFFIX))
    }

    async fn write_partial(
        &self,
        partial: &Path,
        data: &[u8],
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<(), StorageError> {
        let mut file = fs::File::create(partial).await?;

        let mut written = 0;
        for chunk in data.chunks(CHUNK_SIZE) {
            file.write_all(chunk).await?;
            written += chunk.len();
            progress(written as u64);
        }
        file.flush().await?;
        file.sync_all().await?;

        if data.is_empty() {
            progress(0);
        }
        Ok(())
    }
}

async fn remove_if_present(path: &Path) -> Result<bool, StorageError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl BlobStore for DiskBlobStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        progress: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<StoredBlob, StorageError> {
        validate_key(key)?;

        let final_path = self.file_path(key);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let partial = self.partial_path(key);
        if let Err(e) = self.write_partial(&partial, &data, progress).await {
            if let Err(cleanup) = remove_if_present(&partial).await {
                warn!("Failed to remove partial {}: {}", partial.display(), cleanup);
            }
            return Err(e);
        }
        fs::rename(&partial, &final_path).await?;
        debug!("Wrote {} ({} bytes)", key, data.len());

        let mut hasher = Sha256::new();
        hasher.update(&data);

        Ok(StoredBlob {
            key: key.to_string(),
            size: data.len() as u64,
            sha256: hex::encode(hasher.finalize()),
            url: self.url_for(key),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        validate_key(key)?;
        match fs::read(self.file_path(key)).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        let removed = remove_if_present(&self.file_path(key)).await?;
        let partial = remove_if_present(&self.partial_path(key)).await?;
        if removed || partial {
            info!("Deleted blob {}", key);
        } else {
            warn!("Blob {} already gone", key);
        }
        Ok(())
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/files/{}", self.public_base, key)
    }
}
