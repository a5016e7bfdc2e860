use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::error;

use lumo_db::Database;
use lumo_storage::UploadPool;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

/// Services and settings shared by every handler. Built once at startup.
pub struct AppStateInner {
    pub db: Database,
    pub uploads: UploadPool,
    pub jwt_secret: String,
    pub max_file_bytes: u64,
    /// Where intake form posts redirect to.
    pub intake_redirect: String,
    /// Cancelled on shutdown; in-flight uploads use child tokens.
    pub shutdown: CancellationToken,
}

/// Run a blocking DB call off the async runtime.
pub async fn run_db<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.to_string())
        })?
        .map_err(ApiError::from)
}
