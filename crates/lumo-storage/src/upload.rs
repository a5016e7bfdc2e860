use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lumo_types::models::DeliveryFile;

use crate::blob::{BlobStore, StorageError};

/// A file received from the client, not yet stored.
#[derive(Debug, Clone)]
pub struct PendingUpload {
    pub name: String,
    pub content_type: String,
    pub data: Bytes,
}

/// Progress of one file in a batch.
#[derive(Debug, Clone)]
pub struct UploadProgress {
    pub index: usize,
    pub name: String,
    pub bytes_done: u64,
    pub bytes_total: u64,
}

impl UploadProgress {
    /// Fraction in `0.0..=1.0`. An empty file counts as done.
    pub fn fraction(&self) -> f64 {
        if self.bytes_total == 0 {
            return 1.0;
        }
        (self.bytes_done as f64 / self.bytes_total as f64).min(1.0)
    }
}

pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

#[derive(Debug)]
pub struct UploadFailure {
    pub index: usize,
    pub name: String,
    pub error: StorageError,
}

/// Some uploads in a batch failed. Files in `uploaded` remain in the store.
#[derive(Debug, thiserror::Error)]
#[error("{} of {} uploads failed", .failed.len(), .failed.len() + .uploaded.len())]
pub struct UploadBatchError {
    pub uploaded: Vec<DeliveryFile>,
    pub failed: Vec<UploadFailure>,
}

/// Uploads a batch of files with at most `limit` in flight at once.
#[derive(Clone)]
pub struct UploadPool {
    store: Arc<dyn BlobStore>,
    limit: usize,
}

impl UploadPool {
    pub fn new(store: Arc<dyn BlobStore>, limit: usize) -> Self {
        Self {
            store,
            limit: limit.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Upload every file under `prefix` and wait for all of them to settle.
    ///
    /// Results keep the input order. If any file fails the whole batch is an
    /// error, but files that did upload are left in place.
    pub async fn upload_all(
        &self,
        prefix: &str,
        files: Vec<PendingUpload>,
        cancel: &CancellationToken,
        on_progress: ProgressCallback,
    ) -> Result<Vec<DeliveryFile>, UploadBatchError> {
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let millis = Utc::now().timestamp_millis();
        let count = files.len();
        info!("Uploading {} files under {} (limit {})", count, prefix, self.limit);

        let uploads = files.into_iter().enumerate().map(|(index, file)| {
            let key = storage_key(prefix, index, &file.name, millis);
            let semaphore = semaphore.clone();
            let on_progress = on_progress.clone();
            async move {
                let name = file.name.clone();
                let result = self
                    .upload_one(index, key, file, &semaphore, cancel, on_progress)
                    .await;
                (index, name, result)
            }
        });

        let mut uploaded = Vec::with_capacity(count);
        let mut failed = Vec::new();
        for (index, name, result) in join_all(uploads).await {
            match result {
                Ok(delivered) => uploaded.push(delivered),
                Err(error) => {
                    warn!("Upload {} ({}) failed: {}", index, name, error);
                    failed.push(UploadFailure { index, name, error });
                }
            }
        }

        if failed.is_empty() {
            Ok(uploaded)
        } else {
            Err(UploadBatchError { uploaded, failed })
        }
    }

    async fn upload_one(
        &self,
        index: usize,
        key: String,
        file: PendingUpload,
        semaphore: &Semaphore,
        cancel: &CancellationToken,
        on_progress: ProgressCallback,
    ) -> Result<DeliveryFile, StorageError> {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StorageError::Cancelled),
            permit = semaphore.acquire() => permit.map_err(|_| StorageError::Cancelled)?,
        };

        let total = file.data.len() as u64;
        let report = |done: u64| {
            on_progress(UploadProgress {
                index,
                name: file.name.clone(),
                bytes_done: done,
                bytes_total: total,
            })
        };

        let stored = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // The interrupted put may have left a partial write behind.
                if let Err(e) = self.store.delete(&key).await {
                    warn!("Failed to clean up cancelled upload {}: {}", key, e);
                }
                return Err(StorageError::Cancelled);
            }
            stored = self.store.put(&key, file.data.clone(), &report) => stored?,
        };
        debug!("Stored {} ({} bytes) at {}", file.name, stored.size, stored.key);

        Ok(DeliveryFile {
            name: file.name,
            size: stored.size,
            content_type: file.content_type,
            url: stored.url,
            storage_key: stored.key,
            sha256: stored.sha256,
            uploaded_at: Utc::now(),
        })
    }
}

/// `{prefix}/{millis}_{index}_{name}`; the index keeps same-named files in
/// one batch apart.
pub fn storage_key(prefix: &str, index: usize, name: &str, millis: i64) -> String {
    format!(
        "{}/{}_{}_{}",
        prefix.trim_end_matches('/'),
        millis,
        index,
        sanitize_name(name)
    )
}

/// Keep `[A-Za-z0-9._-]`, replace anything else with `_`.
pub fn sanitize_name(name: &str) -> String {
    let mut clean: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if clean.is_empty() || clean.chars().all(|c| c == '.') {
        clean = "file".to_string();
    }
    // ".part" is reserved for in-progress writes.
    if clean.ends_with(".part") {
        clean.push('_');
    }
    clean
}
