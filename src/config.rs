use std::path::PathBuf;

use chrono::{FixedOffset, Offset, Utc};

use crate::limits::*;
use crate::model::{MINUTE_MS, Ms};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

/// Process configuration, read from `FLEETCHECK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub cache_ttl_ms: Ms,
    pub refresh_timeout_ms: Ms,
    pub slot_ms: Ms,
    pub utc_offset: FixedOffset,
    /// JSON file with dealerships and their consultants.
    pub directory_file: Option<PathBuf>,
    /// Tenants whose identifier cache is warmed at startup.
    pub warm_tenants: Vec<String>,
    pub import_file: Option<PathBuf>,
    pub import_account: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            cache_ttl_ms: DEFAULT_CACHE_TTL_MS,
            refresh_timeout_ms: DEFAULT_REFRESH_TIMEOUT_MS,
            slot_ms: DEFAULT_SLOT_MS,
            utc_offset: Utc.fix(),
            directory_file: None,
            warm_tenants: Vec::new(),
            import_file: None,
            import_account: None,
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match var(name) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var: name, value }),
        None => Ok(None),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        if let Some(dir) = var("FLEETCHECK_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        config.metrics_port = parsed("FLEETCHECK_METRICS_PORT")?;
        if let Some(v) = parsed("FLEETCHECK_COMPACT_THRESHOLD")? {
            config.compact_threshold = v;
        }
        if let Some(secs) = parsed::<i64>("FLEETCHECK_CACHE_TTL_SECS")? {
            config.cache_ttl_ms = secs.saturating_mul(1000);
        }
        if let Some(secs) = parsed::<i64>("FLEETCHECK_REFRESH_TIMEOUT_SECS")? {
            config.refresh_timeout_ms = secs.saturating_mul(1000);
        }
        if let Some(minutes) = parsed::<i64>("FLEETCHECK_SLOT_MINUTES")? {
            if minutes <= 0 {
                return Err(ConfigError::Invalid {
                    var: "FLEETCHECK_SLOT_MINUTES",
                    value: minutes.to_string(),
                });
            }
            config.slot_ms = minutes.saturating_mul(MINUTE_MS);
        }
        if let Some(minutes) = parsed::<i32>("FLEETCHECK_UTC_OFFSET_MINUTES")? {
            config.utc_offset = FixedOffset::east_opt(minutes * 60).ok_or(ConfigError::Invalid {
                var: "FLEETCHECK_UTC_OFFSET_MINUTES",
                value: minutes.to_string(),
            })?;
        }
        config.directory_file = var("FLEETCHECK_DIRECTORY_FILE").map(PathBuf::from);
        config.warm_tenants = var("FLEETCHECK_WARM_TENANTS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        config.import_file = var("FLEETCHECK_IMPORT_FILE").map(PathBuf::from);
        config.import_account = var("FLEETCHECK_IMPORT_ACCOUNT");
        Ok(config)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("fleetcheck.wal")
    }
}
