use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use jemallocator::Jemalloc;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use delegation_tracker::{
    api, AppState, CachedStore, CollectionScheduler, DeltaCollector, LcdClient, PostgresClient,
    QueryService, Settings, SnapshotStore,
};

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let settings = Settings::new().context(
        "Invalid configuration. Check config.yaml and TRACKER_* environment variables",
    )?;

    let level = LevelFilter::from_str(&settings.log_level)
        .map_err(|_| anyhow::anyhow!("Invalid log_level {:?}", settings.log_level))?;
    SimpleLogger::new()
        .with_level(level)
        .init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    if !settings.collector.enabled && !settings.api.enabled {
        anyhow::bail!("Both collector and api are disabled, nothing to run");
    }

    let postgres = PostgresClient::new(settings.postgres.clone())
        .await
        .context("Snapshot store unavailable")?;
    postgres
        .migrate()
        .await
        .context("Failed to apply snapshot store schema")?;

    let store: Arc<dyn SnapshotStore> = Arc::new(CachedStore::new(postgres, &settings.cache));

    run(Arc::new(settings), store).await
}

async fn run(settings: Arc<Settings>, store: Arc<dyn SnapshotStore>) -> anyhow::Result<()> {
    let cancellation_token = CancellationToken::new();
    let mut handles = Vec::new();

    if settings.collector.enabled {
        let source = LcdClient::new(&settings.collector).context("Invalid collector settings")?;
        let collector = Arc::new(DeltaCollector::new(
            Arc::new(source),
            store.clone(),
            settings.collector.validators.clone(),
        ));
        let scheduler = CollectionScheduler::new(
            collector,
            Duration::from_secs(settings.collector.poll_interval_secs),
        );

        let scheduler_token = cancellation_token.child_token();
        handles.push(tokio::spawn(async move {
            scheduler.run(scheduler_token).await;
        }));
        info!("Collector started");
    }

    if settings.api.enabled {
        let state = AppState::new(QueryService::new(store.clone()), &settings.api);
        let api_settings = settings.api.clone();
        let api_token = cancellation_token.child_token();
        handles.push(tokio::spawn(async move {
            if let Err(e) = api::serve(&api_settings, state, api_token).await {
                error!("API server failed: {:#}", e);
            }
        }));
        info!("API started");
    }

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    info!("Delegation tracker running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    // A running poll cycle completes before the scheduler observes this
    info!("Finishing all tasks...");
    cancellation_token.cancel();

    for handle in handles {
        let _ = handle.await;
    }

    info!("All tasks stopped");
    Ok(())
}
