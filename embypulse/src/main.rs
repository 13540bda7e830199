use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use embypulse::config::ConfigService;
use embypulse::emby::EmbyClient;
use embypulse::logging::{LoggingHandle, init_logging};
use embypulse::service::{PulseService, ServiceDeps};
use embypulse::stats::{SqliteStatsStore, StatsStore};
use embypulse::utils::http_client::{build_client, install_rustls_provider};
use embypulse::webhook;

/// How often the config file is checked for edits.
const CONFIG_WATCH_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    install_rustls_provider();

    let config = Arc::new(
        ConfigService::load_from_env()
            .await
            .context("failed to load configuration")?,
    );
    let snapshot = config.snapshot();

    let (logging, _guard) = init_logging(&snapshot.logging).context("failed to initialize logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?config.path(),
        "EmbyPulse starting"
    );
    if !snapshot.emby.is_configured() {
        warn!("Emby API key is not configured, lookups will fail until it is set");
    }

    let stats: Option<Arc<dyn StatsStore>> = match snapshot.stats.database_url.as_deref() {
        Some(url) if !url.trim().is_empty() => match SqliteStatsStore::connect(url).await {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                warn!(error = %e, "Statistics database unavailable, stats commands disabled");
                None
            }
        },
        _ => None,
    };

    let emby = Arc::new(EmbyClient::new(&snapshot.emby));
    let http = build_client(&snapshot.proxy, Duration::from_secs(15));
    let service = PulseService::new(config.clone(), ServiceDeps::from_emby(emby, stats, http));
    service.start();
    let retention = logging.start_retention_cleanup(service.cancellation_token());
    let log_filter = spawn_log_filter_listener(config.clone(), logging.clone(), service.cancellation_token());
    let config_watcher = config.spawn_file_watcher(CONFIG_WATCH_INTERVAL, service.cancellation_token());

    let listener = TcpListener::bind(&snapshot.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", snapshot.server.listen_addr))?;
    info!(addr = %snapshot.server.listen_addr, path = webhook::WEBHOOK_PATH, "Webhook listening");

    let cancel = service.cancellation_token();
    axum::serve(listener, webhook::router(service.clone()))
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
                _ = cancel.cancelled() => {}
            }
        })
        .await
        .context("webhook server failed")?;

    service.stop().await;
    let _ = tokio::join!(retention, log_filter, config_watcher);
    info!("EmbyPulse stopped");
    Ok(())
}

/// Apply `logging.filter` changes without a restart.
fn spawn_log_filter_listener(
    config: Arc<ConfigService>,
    logging: Arc<LoggingHandle>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut receiver = config.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = receiver.recv() => match result {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        let Some(filter) = config.snapshot().logging.filter.clone() else {
                            continue;
                        };
                        if filter != logging.get_filter()
                            && let Err(e) = logging.set_filter(&filter)
                        {
                            warn!(error = %e, "Rejected log filter");
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    })
}
