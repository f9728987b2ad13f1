use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{Config, DOWNLOAD_PROGRESS_SHARE};
use crate::db::LocalStore;
use crate::error::{AppError, Result};
use crate::fetcher::DatasetFetcher;
use crate::integrity::{IntegrityValidator, Verdict};
use crate::prober::VersionProber;
use crate::source::{HttpSource, SnapshotSource};
use crate::state::{StateHub, Subscription};
use crate::types::{DatasetMetadata, LoadingState};

/// Keeps the local store in step with the remote snapshot and publishes the
/// loading state.
///
/// State machine: idle → loading → ready | error, and ready → loading on
/// [`force_update`](Self::force_update). Refreshes never overlap: every path
/// that writes the store runs under `refresh_lock`.
pub struct SyncService {
    store: LocalStore,
    source: Arc<dyn SnapshotSource>,
    prober: VersionProber,
    fetcher: DatasetFetcher,
    validator: IntegrityValidator,
    hub: Arc<StateHub>,
    refresh_lock: Mutex<()>,
}

impl SyncService {
    /// Open the local store and point the service at the HTTP snapshot.
    pub async fn create(cfg: Config) -> Result<Arc<Self>> {
        let source = Arc::new(HttpSource::new(cfg.dataset_url.clone())?);
        Self::with_source(cfg, source).await
    }

    pub async fn with_source(cfg: Config, source: Arc<dyn SnapshotSource>) -> Result<Arc<Self>> {
        let store = LocalStore::open(&cfg.db_path, cfg.insert_batch_size).await?;
        Ok(Arc::new(Self {
            store,
            prober: VersionProber::new(Arc::clone(&source), cfg.probe_prefix_bytes),
            fetcher: DatasetFetcher::new(Arc::clone(&source)),
            validator: IntegrityValidator::new(cfg.freshness),
            source,
            hub: StateHub::new(),
            refresh_lock: Mutex::new(()),
        }))
    }

    /// Drop every listener and close the store. Waits for an in-flight refresh.
    pub async fn dispose(&self) {
        let _guard = self.refresh_lock.lock().await;
        self.hub.clear_listeners();
        self.store.close().await;
        debug!("Sync service disposed");
    }

    pub fn get_state(&self) -> LoadingState {
        self.hub.snapshot()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&LoadingState) + Send + Sync + 'static,
    {
        self.hub.subscribe(listener)
    }

    pub fn is_ready(&self) -> bool {
        self.hub.snapshot().is_initialized
    }

    pub(crate) fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Bring the cache up to date on startup. A no-op once initialized or
    /// while another call is loading. Failures end in the error state; they
    /// are never returned.
    pub async fn initialize(&self) {
        if !self.hub.try_begin_loading() {
            debug!("initialize() skipped: already initialized or loading");
            return;
        }
        let _guard = self.refresh_lock.lock().await;
        // A forced update queued ahead of us may have finished the job.
        let state = self.hub.snapshot();
        if state.is_initialized {
            debug!("initialize() skipped: a refresh completed while waiting");
            return;
        }
        if !state.is_loading {
            // A failed forced update cleared the flag we set.
            self.hub.update(|s| {
                s.is_loading = true;
                s.has_error = false;
                s.error = None;
            });
        }
        info!("Dataset initialization started");

        let outcome = match self.reconcile().await {
            Ok(()) => self.finish_ready().await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => info!("Dataset initialization complete"),
            Err(e) => self.fail("Dataset initialization failed", &e),
        }
    }

    /// Reset the local store and download the snapshot regardless of state.
    pub async fn force_update(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        info!("Forced update started");
        self.hub.update(|s| {
            s.is_initialized = false;
            s.is_loading = true;
            s.has_error = false;
            s.error = None;
            s.progress = Some(0);
        });

        let outcome = async {
            self.store.reset_schema().await?;
            self.full_refresh().await?;
            self.finish_ready().await
        }
        .await;

        match &outcome {
            Ok(()) => info!("Forced update complete"),
            Err(e) => self.fail("Forced update failed", e),
        }
        outcome
    }

    async fn reconcile(&self) -> Result<()> {
        let local = match self.store.read_metadata().await {
            Ok(Some(local)) => local,
            Ok(None) => {
                info!("No local dataset; downloading full snapshot");
                return self.full_refresh().await.map(|_| ());
            }
            Err(e) => {
                warn!("Local metadata unreadable ({e}); rebuilding local store");
                self.store.reset_schema().await?;
                return self.full_refresh().await.map(|_| ());
            }
        };
        info!(
            records = local.total_records,
            version = %local.version,
            "Local dataset found"
        );

        let now = Utc::now();
        if self.validator.fast_path(&local, now) {
            let age_mins = IntegrityValidator::age(&local, now).map_or(0, |a| a.as_secs() / 60);
            info!(age_mins, "Local dataset is fresh; skipping server check");
            return Ok(());
        }

        match self.validator.assess(&local, &self.store).await? {
            Verdict::SchemaMismatch => {
                info!("Schema changed; resetting local store before download");
                self.store.reset_schema().await?;
                self.full_refresh().await.map(|_| ())
            }
            Verdict::CountMismatch { .. } => {
                info!("Local dataset incomplete; downloading full snapshot");
                serve_cached_on_remote_error(self.full_refresh().await.map(|_| ()))
            }
            Verdict::Fresh | Verdict::Valid => {
                serve_cached_on_remote_error(self.refresh_if_changed(&local).await)
            }
        }
    }

    async fn refresh_if_changed(&self, local: &DatasetMetadata) -> Result<()> {
        debug!("Local dataset is stale; checking server version");
        let server = self.prober.probe().await?;
        if server.version == local.version {
            info!(version = %local.version, "Local dataset matches server; no update needed");
            return Ok(());
        }

        let size = server
            .size
            .map(|b| format!(" ({:.2} MB)", b as f64 / 1024.0 / 1024.0))
            .unwrap_or_default();
        info!(
            local = %local.version,
            server = %server.version,
            "Server snapshot changed{size}; refreshing"
        );

        let fresh = self.full_refresh().await?;
        let delta = fresh.total_records as i64 - local.total_records as i64;
        info!(
            before = local.total_records,
            after = fresh.total_records,
            "Refresh result: {delta:+} records"
        );
        Ok(())
    }

    async fn full_refresh(&self) -> Result<DatasetMetadata> {
        self.set_progress(0);
        let snapshot = self.fetcher.download(|p| self.set_progress(p)).await?;

        let metadata = self
            .store
            .replace_dataset(&snapshot.dataset, &snapshot.version_token, |done, total| {
                self.set_progress(insert_progress(done, total))
            })
            .await?;

        info!(
            records = metadata.total_records,
            version = %metadata.version,
            "Stored snapshot from {} ({:.2} MB)",
            self.source.url(),
            snapshot.bytes as f64 / 1024.0 / 1024.0,
        );
        Ok(metadata)
    }

    async fn finish_ready(&self) -> Result<()> {
        let metadata = self.store.read_metadata().await?;
        self.hub.update(|s| {
            *s = LoadingState {
                is_loading: false,
                is_initialized: true,
                has_error: false,
                error: None,
                progress: Some(100),
                last_updated: metadata.as_ref().map(|m| m.last_updated.clone()),
                total_records: metadata.as_ref().map(|m| m.total_records),
            };
        });
        Ok(())
    }

    fn fail(&self, context: &str, e: &AppError) {
        error!("{context}: {e}");
        let message = e.to_string();
        self.hub.update(|s| {
            s.is_loading = false;
            s.is_initialized = false;
            s.has_error = true;
            s.error = Some(message);
        });
    }

    fn set_progress(&self, progress: u8) {
        self.hub.update(|s| s.progress = Some(progress));
    }
}

/// With a cache already on disk, a server that cannot be reached or returns
/// garbage is not fatal. Storage errors still are.
fn serve_cached_on_remote_error(outcome: Result<()>) -> Result<()> {
    match outcome {
        Err(e) if e.is_remote() => {
            warn!("Server check failed, serving cached dataset: {e}");
            Ok(())
        }
        other => other,
    }
}

/// Map inserted rows onto the 50-100 half of the progress scale.
fn insert_progress(done: usize, total: usize) -> u8 {
    let base = f64::from(DOWNLOAD_PROGRESS_SHARE);
    if total == 0 {
        return 100;
    }
    (base + (done as f64 / total as f64) * (100.0 - base)).round().min(100.0) as u8
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
