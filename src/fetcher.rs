use std::sync::Arc;

use futures_util::StreamExt;
use tracing::{debug, info};

use crate::config::DOWNLOAD_PROGRESS_SHARE;
use crate::error::{AppError, Result};
use crate::prober::version_token;
use crate::source::{SnapshotBody, SnapshotSource};
use crate::types::CompleteDataset;

/// A decoded snapshot plus the token it should be cached under.
#[derive(Debug)]
pub struct DownloadedSnapshot {
    pub dataset: CompleteDataset,
    /// Same preference order as the prober (ETag, Last-Modified, embedded
    /// version) so a later probe compares like with like.
    pub version_token: String,
    pub bytes: u64,
}

/// Streams the full remote snapshot and decodes it.
pub struct DatasetFetcher {
    source: Arc<dyn SnapshotSource>,
}

impl DatasetFetcher {
    pub fn new(source: Arc<dyn SnapshotSource>) -> Self {
        Self { source }
    }

    /// Download and decode the snapshot. `on_progress` receives 0-50 after
    /// every chunk when the body length is known. No retries.
    pub async fn download<F>(&self, mut on_progress: F) -> Result<DownloadedSnapshot>
    where
        F: FnMut(u8) + Send,
    {
        let SnapshotBody { head, mut chunks } = self.source.open().await?;
        let total = head.content_length.unwrap_or(0);
        info!(total_bytes = total, "Downloading snapshot from {}", self.source.url());

        let mut body: Vec<u8> = Vec::with_capacity(usize::try_from(total).unwrap_or(0));
        let mut loaded = 0u64;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            loaded += chunk.len() as u64;
            body.extend_from_slice(&chunk);
            if total > 0 {
                on_progress(download_progress(loaded, total));
            }
        }

        if body.is_empty() {
            return Err(AppError::MissingBody(self.source.url().to_string()));
        }
        debug!(bytes = loaded, "Snapshot body received, decoding");

        let dataset: CompleteDataset = serde_json::from_slice(&body)?;
        let version_token = version_token(&head).unwrap_or_else(|| dataset.version.clone());
        info!(
            records = dataset.data.len(),
            version = %version_token,
            "Snapshot decoded ({:.2} MB)",
            loaded as f64 / 1024.0 / 1024.0,
        );

        Ok(DownloadedSnapshot { dataset, version_token, bytes: loaded })
    }
}

/// Map downloaded bytes onto the 0-50 half of the progress scale.
pub fn download_progress(loaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let share = f64::from(DOWNLOAD_PROGRESS_SHARE);
    ((loaded as f64 / total as f64) * share).round().min(share) as u8
}
