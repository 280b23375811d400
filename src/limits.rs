use crate::model::{DAY_MS, HOUR_MS, MINUTE_MS, Ms};

/// Default length of a checkup slot on a consultant's calendar.
pub const DEFAULT_SLOT_MS: Ms = 30 * MINUTE_MS;

/// Identifier-cache staleness window.
pub const DEFAULT_CACHE_TTL_MS: Ms = 2 * HOUR_MS;

/// Upper bound for one background identifier fetch.
pub const DEFAULT_REFRESH_TIMEOUT_MS: Ms = 60_000;

pub const MAX_NOTES_LEN: usize = 1000;
pub const MAX_FINALIZATION_LEN: usize = 1000;
pub const MAX_REFUSAL_LEN: usize = 500;
pub const MAX_COMMENT_LEN: usize = 1000;
pub const MAX_REPORT_LEN: usize = 2000;

pub const MAX_PLATE_LEN: usize = 10;
pub const MAX_CHASSIS_LEN: usize = 17;
pub const MAX_ID_LEN: usize = 64;
pub const MAX_CAMPAIGN_LEN: usize = 120;

pub const MIN_CRITICALITY: u8 = 1;
pub const MAX_CRITICALITY: u8 = 5;
pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 5;

/// Largest page a list call may request.
pub const MAX_PAGE_SIZE: usize = 500;
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Longest planned duration of one occurrence step.
pub const MAX_PLANNED_MS: Ms = 365 * DAY_MS;
/// Last accepted instant, 9999-12-31T23:59:59.999Z.
pub const MAX_TIMESTAMP_MS: Ms = 253_402_300_799_999;

pub const MAX_IMPORT_ROWS: usize = 10_000;
pub const MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;
