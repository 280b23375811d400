mod availability;
mod changelog;
mod dispatch;
mod error;
mod import;
mod occurrences;
mod schedules;
mod tickets;
mod vehicles;

pub use availability::slot_is_free;
pub use dispatch::DispatchRequest;
pub use error::{EngineError, FieldError};
use error::Validator;
pub use import::{ImportError, ImportResult, ImportRow, parse_import_date, read_csv_rows};
pub use occurrences::{AdvanceInput, OccurrenceFilter, OccurrenceInput, PartOrderInput, RepairTimes, StepTiming};
pub use schedules::{RescheduleInput, ScheduleFilter, ScheduleInput};
pub use tickets::{OpenTicketInput, TicketFilter};
pub use vehicles::VehicleInput;

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::warn;
use ulid::Ulid;

use crate::auth::Caller;
use crate::blob::BlobStore;
use crate::cache::IdentifierCache;
use crate::config::Config;
use crate::directory::{ConsultantDirectory, DealershipLocator};
use crate::limits::*;
use crate::model::*;
use crate::notify::{Notification, NotificationSender};
use crate::observability::NOTIFY_FAILURES_TOTAL;
use crate::store::{Entity, Key, Repository, SortRange, Store, consultant_partition};
use crate::tenant::TenantScope;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub slot_ms: Ms,
    /// Offset used to cut calendar days.
    pub utc_offset: FixedOffset,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            slot_ms: DEFAULT_SLOT_MS,
            utc_offset: Utc.fix(),
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            slot_ms: config.slot_ms,
            utc_offset: config.utc_offset,
        }
    }
}

/// External collaborators the engine consumes.
#[derive(Clone)]
pub struct Services {
    pub directory: Arc<dyn ConsultantDirectory>,
    pub locator: Arc<dyn DealershipLocator>,
    pub notifier: Arc<dyn NotificationSender>,
    pub blobs: Arc<dyn BlobStore>,
}

pub struct Engine {
    repo: Repository,
    services: Services,
    cache: IdentifierCache,
    settings: EngineSettings,
    /// One lock per `{dealership}#{consultant}`, held across a slot check
    /// and the write that books it.
    consultant_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Change-log ids must sort in append order within one millisecond.
    log_ids: std::sync::Mutex<ulid::Generator>,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, services: Services, cache: IdentifierCache, settings: EngineSettings) -> Self {
        Self {
            repo: Repository::new(store),
            services,
            cache,
            settings,
            consultant_locks: DashMap::new(),
            log_ids: std::sync::Mutex::new(ulid::Generator::new()),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn cache(&self) -> &IdentifierCache {
        &self.cache
    }

    fn consultant_lock(&self, dealership_id: &str, consultant_id: &str) -> Arc<Mutex<()>> {
        self.consultant_locks
            .entry(consultant_partition(dealership_id, consultant_id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    fn next_log_id(&self) -> String {
        let mut generator = self.log_ids.lock().unwrap_or_else(|e| e.into_inner());
        generator.generate().unwrap_or_else(|_| Ulid::new()).to_string()
    }

    async fn load<E: Entity>(&self, entity: &'static str, id: &str) -> Result<E, EngineError> {
        self.repo
            .get::<E>(&Key::new(id))
            .await?
            .ok_or_else(|| EngineError::not_found(entity, id))
    }

    /// Best effort: failures are logged and counted, never returned.
    async fn notify(&self, notification: Notification) {
        let to = notification.to_id.clone();
        if let Err(e) = self.services.notifier.send(notification).await {
            metrics::counter!(NOTIFY_FAILURES_TOTAL).increment(1);
            warn!("notification to {to} failed: {e}");
        }
    }
}

/// Entities outside the caller's tenant read as missing.
fn ensure_visible(
    caller: &Caller,
    entity: &'static str,
    id: &str,
    fleet: &str,
    dealership: &str,
    tower: Option<&str>,
) -> Result<(), EngineError> {
    if TenantScope::of(caller).covers(fleet, dealership, tower) {
        Ok(())
    } else {
        Err(EngineError::not_found(entity, id))
    }
}

fn new_id() -> String {
    Ulid::new().to_string()
}

/// Human-readable protocol number: `{prefix}-YYYYMMDD-XXXXXX`.
fn protocol(prefix: &str, now: Ms) -> String {
    let day = DateTime::<Utc>::from_timestamp_millis(now)
        .map(|dt| dt.format("%Y%m%d").to_string())
        .unwrap_or_default();
    let id = Ulid::new().to_string();
    format!("{prefix}-{day}-{}", &id[id.len() - 6..])
}

/// Sort-key range over one state prefix, optionally bounded by dates.
fn state_date_range(prefix: &str, from: Option<Ms>, to: Option<Ms>) -> SortRange {
    if from.is_none() && to.is_none() {
        return SortRange::BeginsWith(prefix.to_string());
    }
    SortRange::Between {
        start: format!("{prefix}{}", from.map(key_time).unwrap_or_default()),
        // '~' sorts after every character of a rendered timestamp
        end: to.map_or_else(|| format!("{prefix}~"), |t| format!("{prefix}{}", key_time(t))),
    }
}

fn page_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
