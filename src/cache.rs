//! Per-tenant snapshots of vehicle identifiers.
//!
//! Reads never wait for a refresh. A stale or missing snapshot triggers one
//! background fetch per tenant; concurrent callers see the refreshing flag
//! and return immediately. A successful fetch replaces the snapshot whole,
//! a failed one leaves the previous snapshot in place.
//!
//! A fetch returns the tenant's own vehicles plus records of other accounts
//! with the same identification. The latter only feed fleet-asset
//! resolution: an own record takes the asset id of the matching foreign
//! record (its `fleet_asset_id`, else its internal id). Lookups only ever
//! return own records.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::limits::{DEFAULT_CACHE_TTL_MS, DEFAULT_REFRESH_TIMEOUT_MS};
use crate::model::{IdentifierRecord, Ms, normalize_identification, now_ms};
use crate::observability::{CACHE_REFRESH_DURATION_SECONDS, CACHE_REFRESH_TOTAL};

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("identifier fetch failed: {0}")]
    Fetch(String),
    #[error("identifier fetch timed out after {0:?}")]
    Timeout(Duration),
}

pub type FetchFuture = BoxFuture<'static, Result<Vec<IdentifierRecord>, CacheError>>;

#[derive(Debug)]
pub struct Snapshot {
    records: HashMap<String, IdentifierRecord>,
    pub updated_at: Ms,
}

impl Snapshot {
    fn build(tenant: &str, records: Vec<IdentifierRecord>, updated_at: Ms) -> Self {
        let (own, foreign): (Vec<_>, Vec<_>) = records.into_iter().partition(|r| r.account_id == tenant);

        // Lowest account id wins so the resolution does not depend on fetch order.
        let mut network: HashMap<String, IdentifierRecord> = HashMap::new();
        for r in foreign {
            match network.entry(normalize_identification(&r.identification)) {
                Entry::Occupied(mut e) => {
                    if r.account_id < e.get().account_id {
                        e.insert(r);
                    }
                }
                Entry::Vacant(e) => {
                    e.insert(r);
                }
            }
        }

        let records = own
            .into_iter()
            .map(|mut r| {
                let key = normalize_identification(&r.identification);
                if let Some(asset) = network.get(&key) {
                    r.fleet_asset_id = Some(
                        asset
                            .fleet_asset_id
                            .clone()
                            .unwrap_or_else(|| asset.internal_id.clone()),
                    );
                }
                (key, r)
            })
            .collect();
        Self { records, updated_at }
    }

    pub fn lookup(&self, identification: &str) -> Option<&IdentifierRecord> {
        self.records.get(&normalize_identification(identification))
    }

    /// Number of own records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Default)]
struct Slot {
    snapshot: Option<Arc<Snapshot>>,
    refreshing: bool,
}

#[derive(Clone)]
pub struct IdentifierCache {
    slots: Arc<DashMap<String, Slot>>,
    ttl_ms: Ms,
    refresh_timeout: Duration,
}

impl Default for IdentifierCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL_MS, DEFAULT_REFRESH_TIMEOUT_MS)
    }
}

impl IdentifierCache {
    pub fn new(ttl_ms: Ms, refresh_timeout_ms: Ms) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            ttl_ms,
            refresh_timeout: Duration::from_millis(refresh_timeout_ms.max(0) as u64),
        }
    }

    /// Current snapshot, however old. Never blocks on a refresh.
    pub fn get(&self, tenant: &str) -> Option<Arc<Snapshot>> {
        self.slots.get(tenant).and_then(|s| s.snapshot.clone())
    }

    pub fn is_refreshing(&self, tenant: &str) -> bool {
        self.slots.get(tenant).is_some_and(|s| s.refreshing)
    }

    /// Launch a background refresh if the snapshot is missing or stale and
    /// none is in flight. Returns the task handle when one was launched.
    pub fn ensure_fresh<F>(&self, tenant: &str, fetch: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce() -> FetchFuture + Send + 'static,
    {
        self.ensure_fresh_at(tenant, now_ms(), fetch)
    }

    pub fn ensure_fresh_at<F>(&self, tenant: &str, now: Ms, fetch: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce() -> FetchFuture + Send + 'static,
    {
        // Check-and-set under the shard lock: only one caller wins.
        {
            let mut slot = self.slots.entry(tenant.to_string()).or_default();
            let stale = slot
                .snapshot
                .as_ref()
                .is_none_or(|s| now - s.updated_at >= self.ttl_ms);
            if !stale || slot.refreshing {
                return None;
            }
            slot.refreshing = true;
        }

        let cache = self.clone();
        let tenant = tenant.to_string();
        Some(tokio::spawn(async move {
            match cache.fetch_with_timeout(fetch).await {
                Ok(records) => {
                    let count = records.len();
                    cache.install(&tenant, records);
                    debug!("identifier cache refreshed for {tenant}: {count} records");
                }
                Err(e) => {
                    if let Some(mut slot) = cache.slots.get_mut(&tenant) {
                        slot.refreshing = false;
                    }
                    warn!("identifier cache refresh for {tenant} failed: {e}");
                }
            }
        }))
    }

    /// Fetch now regardless of age and return the error to the caller.
    pub async fn force_refresh<F>(&self, tenant: &str, fetch: F) -> Result<Arc<Snapshot>, CacheError>
    where
        F: FnOnce() -> FetchFuture + Send + 'static,
    {
        let records = self.fetch_with_timeout(fetch).await?;
        Ok(self.install(tenant, records))
    }

    async fn fetch_with_timeout<F>(&self, fetch: F) -> Result<Vec<IdentifierRecord>, CacheError>
    where
        F: FnOnce() -> FetchFuture,
    {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.refresh_timeout, fetch()).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.refresh_timeout)),
        };
        let outcome = match &result {
            Ok(_) => "ok",
            Err(CacheError::Fetch(_)) => "error",
            Err(CacheError::Timeout(_)) => "timeout",
        };
        metrics::counter!(CACHE_REFRESH_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(CACHE_REFRESH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        result
    }

    fn install(&self, tenant: &str, records: Vec<IdentifierRecord>) -> Arc<Snapshot> {
        let snapshot = Arc::new(Snapshot::build(tenant, records, now_ms()));
        let mut slot = self.slots.entry(tenant.to_string()).or_default();
        slot.snapshot = Some(snapshot.clone());
        slot.refreshing = false;
        snapshot
    }
}
