use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use auction_sync::api::{router, ApiState};
use auction_sync::{Config, Result, SyncService};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let api_port = cfg.api_port;
    info!("Syncing {} into {}", cfg.dataset_url, cfg.db_path);
    let service = SyncService::create(cfg).await?;

    // Log every 10% step plus the terminal states.
    let last_step = std::sync::Mutex::new(None::<u8>);
    service
        .subscribe(move |state| {
            if state.has_error {
                error!("[SYNC] failed: {}", state.error.as_deref().unwrap_or("unknown error"));
                return;
            }
            let Some(progress) = state.progress else { return };
            let step = progress / 10;
            let mut last = last_step.lock().unwrap_or_else(|p| p.into_inner());
            if state.is_loading && *last != Some(step) {
                *last = Some(step);
                info!("[SYNC] {progress}%");
            }
        })
        .detach();

    service.initialize().await;
    let state = service.get_state();
    if state.is_initialized {
        info!(
            "[SYNC] ready: {} records (updated {})",
            state.total_records.unwrap_or(0),
            state.last_updated.as_deref().unwrap_or("never"),
        );
    } else {
        error!("[SYNC] not ready; API will answer 503 until POST /refresh succeeds");
    }

    // HTTP API server
    let app = router(ApiState { service: Arc::clone(&service) });
    let bind_addr = format!("0.0.0.0:{api_port}");
    info!("API listening on {bind_addr}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    service.dispose().await;
    info!("Shut down cleanly");
    Ok(())
}
