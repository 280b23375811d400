use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::store::MemoryStore;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Periodically rewrite the WAL once enough appends have piled up.
pub async fn run_compactor(store: Arc<MemoryStore>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&store, threshold).await;
    }
}

/// Returns whether a compaction ran.
pub async fn compact_if_needed(store: &MemoryStore, threshold: u64) -> bool {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Keep the identifier snapshots of the given tenants warm. Each tick only
/// launches a refresh for snapshots that went stale.
pub async fn run_identifier_warmer(engine: Arc<Engine>, tenants: Vec<String>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        for tenant in &tenants {
            if engine
                .cache()
                .ensure_fresh(tenant, engine.identifier_fetch(tenant))
                .is_some()
            {
                debug!("identifier refresh launched for {tenant}");
            }
        }
    }
}
