use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use fleetcheck::auth::{Caller, Role};
use fleetcheck::background;
use fleetcheck::blob::MemoryBlobStore;
use fleetcheck::cache::IdentifierCache;
use fleetcheck::config::Config;
use fleetcheck::directory::StaticDirectory;
use fleetcheck::engine::{Engine, EngineSettings, Services, read_csv_rows};
use fleetcheck::notify::NotifyHub;
use fleetcheck::store::MemoryStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    fleetcheck::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(MemoryStore::open(&config.wal_path())?);

    let directory = match &config.directory_file {
        Some(path) => Arc::new(StaticDirectory::load(path)?),
        None => {
            warn!("FLEETCHECK_DIRECTORY_FILE not set, no dealerships available");
            Arc::new(StaticDirectory::default())
        }
    };
    let services = Services {
        directory: directory.clone(),
        locator: directory,
        notifier: Arc::new(NotifyHub::new()),
        blobs: Arc::new(MemoryBlobStore::new()),
    };
    let cache = IdentifierCache::new(config.cache_ttl_ms, config.refresh_timeout_ms);
    let engine = Arc::new(Engine::new(
        store.clone(),
        services,
        cache,
        EngineSettings::from(&config),
    ));

    info!("fleetcheck started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  slot: {} min", config.slot_ms / 60_000);
    info!("  utc offset: {}", config.utc_offset);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    for tenant in &config.warm_tenants {
        match engine.warm_identifiers(tenant).await {
            Ok(snapshot) => info!("warmed identifiers for {tenant}: {} records", snapshot.len()),
            Err(e) => warn!("identifier warm-up for {tenant} failed: {e}"),
        }
    }

    if let Some(path) = &config.import_file {
        let account = config
            .import_account
            .clone()
            .ok_or("FLEETCHECK_IMPORT_ACCOUNT is required with FLEETCHECK_IMPORT_FILE")?;
        let rows = read_csv_rows(std::fs::File::open(path)?)?;
        let caller = Caller::new(Role::Fleet, account, "import");
        let result = engine.import_tickets(&caller, rows).await;
        info!(
            "import of {}: {} processed, {} created, {} updated, {} skipped, {} failed",
            path.display(),
            result.total_processed,
            result.created,
            result.updated,
            result.skipped,
            result.errors.len()
        );
        for e in &result.errors {
            warn!("  row {}: {}", e.row, e.message);
        }
    }

    tokio::spawn(background::run_compactor(store.clone(), config.compact_threshold));
    if !config.warm_tenants.is_empty() {
        let period = Duration::from_millis((config.cache_ttl_ms / 2).max(1_000) as u64);
        tokio::spawn(background::run_identifier_warmer(
            engine.clone(),
            config.warm_tenants.clone(),
            period,
        ));
    }

    // Graceful shutdown on SIGTERM/ctrl-c
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    info!("shutdown signal received, compacting WAL");
    if let Err(e) = store.compact().await {
        warn!("final compaction failed: {e}");
    }
    info!("fleetcheck stopped");
    Ok(())
}
