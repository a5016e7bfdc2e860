//! Blob storage for delivery files.
//!
//! `BlobStore` is the port the API talks to; `DiskBlobStore` is the
//! implementation wired in by the server. `UploadPool` fans a batch of files
//! out to a store with a concurrency bound and a cancellation token.

pub mod blob;
pub mod upload;

pub use blob::{BlobStore, DiskBlobStore, StorageError, StoredBlob, validate_key};
pub use upload::{
    PendingUpload, ProgressCallback, UploadBatchError, UploadFailure, UploadPool, UploadProgress,
};
