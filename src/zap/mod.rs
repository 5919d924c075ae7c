//! Zap replay: fetch the hashes the coordinator already has for a task and
//! replay them as local cracks.
//!
//! Invoked after a stale status acknowledgment so the agent's view and disk
//! state converge with the coordinator's.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::api::{ApiError, CoordinatorApi, Task};
use crate::state::{DataPaths, restrict_file_permissions};

/// Errors raised while fetching or persisting a zap stream.
#[derive(Debug, Error)]
pub enum ZapError {
    /// Fetching the stream failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Writing the zap file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Downloads and replays missed cracks.
pub struct ZapProcessor {
    api: Arc<dyn CoordinatorApi>,
    paths: DataPaths,
}

impl ZapProcessor {
    #[must_use]
    pub fn new(api: Arc<dyn CoordinatorApi>, paths: DataPaths) -> Self {
        Self { api, paths }
    }

    /// Fetches the zap stream for `task`, persists it atomically into
    /// `<zaps>/<task_id>.zap`, and invokes `on_crack` for every well-formed
    /// `hash:plaintext` line. Malformed lines are skipped. Returns the
    /// number of replayed cracks.
    ///
    /// # Errors
    ///
    /// Returns [`ZapError`] when the fetch or the file write fails.
    pub async fn get_zaps<F, Fut>(&self, task: &Task, mut on_crack: F) -> Result<usize, ZapError>
    where
        F: FnMut(DateTime<Utc>, String, String) -> Fut,
        Fut: Future<Output = ()>,
    {
        let Some(payload) = self.api.get_zaps(task.id).await? else {
            warn!(task_id = task.id, "no zap stream available");
            return Ok(0);
        };

        let zap_path = self.paths.zap_file(task.id);
        write_zap_file(&zap_path, &payload).await?;

        let text = String::from_utf8_lossy(&payload);
        let mut replayed = 0usize;
        for line in text.lines() {
            // Split exactly on the first separator; plaintexts may contain
            // colons.
            let Some((hash, plain)) = line.split_once(':') else {
                if !line.is_empty() {
                    debug!(task_id = task.id, line, "skipping malformed zap line");
                }
                continue;
            };
            if hash.is_empty() {
                debug!(task_id = task.id, line, "skipping malformed zap line");
                continue;
            }
            on_crack(Utc::now(), hash.to_string(), plain.to_string()).await;
            replayed += 1;
        }
        debug!(task_id = task.id, replayed, "zap replay complete");
        Ok(replayed)
    }
}

/// Atomically replaces the zap file with the fetched payload.
async fn write_zap_file(path: &std::path::Path, payload: &[u8]) -> Result<(), ZapError> {
    let io_err = |source| ZapError::Io {
        path: path.to_path_buf(),
        source,
    };

    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(io_err(err)),
    }

    let mut tmp_name = path.file_name().map_or_else(
        || std::ffi::OsString::from("zap"),
        std::ffi::OsStr::to_os_string,
    );
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    if let Err(err) = tokio::fs::write(&tmp_path, payload).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(io_err(err));
    }
    if let Err(err) = restrict_file_permissions(&tmp_path) {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(io_err(err));
    }
    if let Err(err) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(io_err(err));
    }
    Ok(())
}
