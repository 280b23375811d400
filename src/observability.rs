use std::net::SocketAddr;

// ── Business counters ───────────────────────────────────────────

/// Counter: schedules created.
pub const SCHEDULES_CREATED_TOTAL: &str = "fleetcheck_schedules_created_total";

/// Counter: schedule transitions. Labels: state.
pub const SCHEDULE_TRANSITIONS_TOTAL: &str = "fleetcheck_schedule_transitions_total";

/// Counter: consultant slot checks that found an overlapping booking.
pub const CONSULTANT_CONFLICTS_TOTAL: &str = "fleetcheck_consultant_conflicts_total";

/// Counter: ticket and occurrence step transitions. Labels: entity, step.
pub const STEP_TRANSITIONS_TOTAL: &str = "fleetcheck_step_transitions_total";

/// Counter: dispatch transitions. Labels: status.
pub const DISPATCH_TRANSITIONS_TOTAL: &str = "fleetcheck_dispatch_transitions_total";

/// Counter: import rows processed. Labels: outcome.
pub const IMPORT_ROWS_TOTAL: &str = "fleetcheck_import_rows_total";

/// Counter: notifications that could not be delivered.
pub const NOTIFY_FAILURES_TOTAL: &str = "fleetcheck_notify_failures_total";

// ── Cache and storage ───────────────────────────────────────────

/// Counter: identifier cache refreshes. Labels: outcome.
pub const CACHE_REFRESH_TOTAL: &str = "fleetcheck_cache_refresh_total";

/// Histogram: identifier cache refresh duration in seconds.
pub const CACHE_REFRESH_DURATION_SECONDS: &str = "fleetcheck_cache_refresh_duration_seconds";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "fleetcheck_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "fleetcheck_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
