use serde::{Deserialize, Serialize};

use crate::blob::BlobError;
use crate::directory::DirectoryError;
use crate::limits::*;
use crate::model::{Ms, key_time};
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("{entity} {id}: {reason}")]
    InvalidState {
        entity: &'static str,
        id: String,
        reason: String,
    },
    #[error("no consultant available at dealership {dealership_id} for {}", key_time_of(.at))]
    NoConsultantAvailable { dealership_id: String, at: Ms },
    #[error("no dealership available")]
    NoDealershipAvailable,
    #[error("validation failed: {}", describe(.0))]
    Validation(Vec<FieldError>),
    #[error("upstream failure: {0}")]
    Upstream(String),
}

fn key_time_of(at: &Ms) -> String {
    key_time(*at)
}

fn describe(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl EngineError {
    /// Stable machine-readable code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidState { .. } => "invalid_state",
            Self::NoConsultantAvailable { .. } => "no_consultant_available",
            Self::NoDealershipAvailable => "no_dealership_available",
            Self::Validation(_) => "validation_error",
            Self::Upstream(_) => "upstream_failure",
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: &str) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn invalid(entity: &'static str, id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            entity,
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn field(field: &str, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError {
            field: field.to_string(),
            message: message.into(),
        }])
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        Self::Upstream(e.to_string())
    }
}

impl From<DirectoryError> for EngineError {
    fn from(e: DirectoryError) -> Self {
        Self::Upstream(e.to_string())
    }
}

impl From<BlobError> for EngineError {
    fn from(e: BlobError) -> Self {
        Self::Upstream(e.to_string())
    }
}

/// Collects every field problem of an input before failing.
#[derive(Debug, Default)]
pub(crate) struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub fn required(&mut self, field: &str, value: &str, max: usize) {
        if value.trim().is_empty() {
            self.fail(field, "is required");
        } else {
            self.max_len(field, value, max);
        }
    }

    pub fn max_len(&mut self, field: &str, value: &str, max: usize) {
        if value.chars().count() > max {
            self.fail(field, format!("must be at most {max} characters"));
        }
    }

    pub fn optional(&mut self, field: &str, value: Option<&str>, max: usize) {
        if let Some(v) = value {
            self.max_len(field, v, max);
        }
    }

    pub fn score(&mut self, field: &str, value: u8) {
        if !(MIN_SCORE..=MAX_SCORE).contains(&value) {
            self.fail(field, format!("must be between {MIN_SCORE} and {MAX_SCORE}"));
        }
    }

    pub fn timestamp(&mut self, field: &str, value: Ms) {
        if !(0..=MAX_TIMESTAMP_MS).contains(&value) {
            self.fail(field, "is out of range");
        }
    }

    pub fn planned(&mut self, field: &str, value: Option<Ms>) {
        if let Some(ms) = value
            && !(0..=MAX_PLANNED_MS).contains(&ms)
        {
            self.fail(field, format!("must be between 0 and {MAX_PLANNED_MS} ms"));
        }
    }

    pub fn finish(self) -> Result<(), EngineError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Validation(self.errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validator_collects_all_fields() {
        let mut v = Validator::new();
        v.required("plate", " ", MAX_PLATE_LEN);
        v.required("chassis", &"X".repeat(MAX_CHASSIS_LEN + 1), MAX_CHASSIS_LEN);
        v.score("score", 0);
        v.optional("notes", None, 1);
        let err = v.finish().unwrap_err();
        assert_eq!(err.code(), "validation_error");
        let EngineError::Validation(fields) = &err else { panic!() };
        let names: Vec<&str> = fields.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(names, vec!["plate", "chassis", "score"]);
        assert!(err.to_string().contains("plate: is required"));
    }

    #[test]
    fn validator_bounds_times() {
        let mut v = Validator::new();
        v.timestamp("scheduled_at", Ms::MAX);
        v.timestamp("ok_at", 1_700_000_000_000);
        v.planned("planned_ms", Some(-1));
        v.planned("long_ms", Some(Ms::MAX));
        v.planned("unset_ms", None);
        let EngineError::Validation(fields) = v.finish().unwrap_err() else { panic!() };
        let names: Vec<&str> = fields.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(names, vec!["scheduled_at", "planned_ms", "long_ms"]);
    }

    #[test]
    fn store_errors_become_upstream() {
        let err: EngineError = StoreError::Wal("disk full".into()).into();
        assert_eq!(err.code(), "upstream_failure");
    }
}
