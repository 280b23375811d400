mod changelog;
mod occurrence;
mod schedule;
mod ticket;
mod vehicle;

pub use changelog::*;
pub use occurrence::*;
pub use schedule::*;
pub use ticket::*;
pub use vehicle::*;

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// A slot of `len` milliseconds starting at `start`. A slot that would
    /// run past `Ms::MAX` is shifted back so it keeps its length.
    pub fn slot(start: Ms, len: Ms) -> Self {
        let len = len.max(1);
        let start = start.min(Ms::MAX - len);
        Self::new(start, start + len)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

/// Render a timestamp so that lexicographic order equals chronological order.
/// Used as the date component of every derived sort key.
pub fn key_time(ms: Ms) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        None => format!("{ms:020}"),
    }
}

/// The calendar day containing `ms`, as seen from `offset`.
pub fn calendar_day(ms: Ms, offset: FixedOffset) -> Span {
    let local = match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => dt.with_timezone(&offset),
        None => return Span::slot(ms, DAY_MS),
    };
    let midnight = local.date_naive().and_time(NaiveTime::MIN);
    let start = offset
        .from_local_datetime(&midnight)
        .single()
        .map_or(ms, |dt| dt.timestamp_millis());
    Span::new(start, start.saturating_add(Duration::days(1).num_milliseconds()))
}
