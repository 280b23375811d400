//! Bulk creation of campaign tickets from loosely typed rows.

use std::collections::HashMap;
use std::io::Read;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use csv::StringRecord;
use serde::Serialize;
use tracing::{info, warn};

use super::tickets::new_ticket;
use super::*;
use crate::auth::Role;
use crate::observability::IMPORT_ROWS_TOTAL;

/// One input row. Every field is optional; the importer decides what is
/// missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportRow {
    pub chassis: Option<String>,
    pub plate: Option<String>,
    pub campaign: Option<String>,
    pub planned_date: Option<String>,
    pub fleet_account_id: Option<String>,
    pub dealership_id: Option<String>,
    pub tower_account_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportRowError {
    /// 1-based data row.
    pub row: usize,
    pub chassis: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportResult {
    pub total_processed: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<ImportRowError>,
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing required column: {0}")]
    MissingColumn(&'static str),
    #[error("too many rows: {0} (max {max})", max = MAX_IMPORT_ROWS)]
    TooManyRows(usize),
}

const COLUMNS: &[(&str, &[&str])] = &[
    ("chassis", &["chassis", "vin"]),
    ("plate", &["plate", "license_plate"]),
    ("campaign", &["campaign", "campaign_name"]),
    ("planned_date", &["planned_date", "date"]),
    ("fleet_account_id", &["fleet_account_id", "fleet"]),
    ("dealership_id", &["dealership_id", "dealership"]),
    ("tower_account_id", &["tower_account_id", "tower"]),
];

fn normalize_header(header: &str) -> String {
    header.trim().to_lowercase().replace([' ', '-'], "_")
}

/// Read rows from a CSV with a header line. Column names are matched
/// case-insensitively; unknown columns are ignored.
pub fn read_csv_rows<R: Read>(reader: R) -> Result<Vec<ImportRow>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: StringRecord = reader.headers()?.clone();
    let by_name: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(idx, h)| (normalize_header(h), idx))
        .collect();
    let column = |name: &str| -> Option<usize> {
        COLUMNS
            .iter()
            .find(|(canonical, _)| *canonical == name)
            .and_then(|(_, aliases)| aliases.iter().find_map(|a| by_name.get(*a).copied()))
    };
    let chassis_col = column("chassis").ok_or(ImportError::MissingColumn("chassis"))?;
    let cols: Vec<Option<usize>> = COLUMNS.iter().map(|(name, _)| column(name)).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if rows.len() >= MAX_IMPORT_ROWS {
            return Err(ImportError::TooManyRows(rows.len() + 1));
        }
        let field = |col: Option<usize>| {
            col.and_then(|i| record.get(i))
                .map(str::to_string)
                .filter(|v| !v.is_empty())
        };
        rows.push(ImportRow {
            chassis: field(Some(chassis_col)),
            plate: field(cols[1]),
            campaign: field(cols[2]),
            planned_date: field(cols[3]),
            fleet_account_id: field(cols[4]),
            dealership_id: field(cols[5]),
            tower_account_id: field(cols[6]),
        });
    }
    Ok(rows)
}

/// Accepts `M-d-yyyy h:mm:ss AM`, `M-d-yyyy` and RFC 3339. Slashes may
/// replace dashes in the first two forms. Local forms are read at `offset`.
pub fn parse_import_date(raw: &str, offset: FixedOffset) -> Option<Ms> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }
    let dashed = raw.replace('/', "-");
    let naive = NaiveDateTime::parse_from_str(&dashed, "%m-%d-%Y %I:%M:%S %p")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(&dashed, "%m-%d-%Y")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.timestamp_millis())
}

fn truncate(value: &str, max: usize) -> String {
    value.trim().chars().take(max).collect()
}

fn clip(value: Option<String>, max: usize) -> Option<String> {
    value.map(|v| truncate(&v, max)).filter(|v| !v.is_empty())
}

enum RowOutcome {
    Created,
    Updated,
    Skipped,
}

impl Engine {
    /// Create or update campaign tickets. Rows are independent: a failing
    /// row is reported and the rest still run.
    pub async fn import_tickets(&self, caller: &Caller, rows: Vec<ImportRow>) -> ImportResult {
        let mut result = ImportResult::default();
        for (idx, row) in rows.into_iter().enumerate() {
            result.total_processed += 1;
            let chassis = row.chassis.as_deref().map(normalize_identification);
            let outcome = match self.import_row(caller, row).await {
                Ok(RowOutcome::Created) => {
                    result.created += 1;
                    "created"
                }
                Ok(RowOutcome::Updated) => {
                    result.updated += 1;
                    "updated"
                }
                Ok(RowOutcome::Skipped) => {
                    result.skipped += 1;
                    "skipped"
                }
                Err(e) => {
                    result.errors.push(ImportRowError {
                        row: idx + 1,
                        chassis,
                        message: e.to_string(),
                    });
                    "error"
                }
            };
            metrics::counter!(IMPORT_ROWS_TOTAL, "outcome" => outcome).increment(1);
        }
        if result.errors.is_empty() {
            info!(
                "import finished: {} rows, {} created, {} updated, {} skipped",
                result.total_processed, result.created, result.updated, result.skipped
            );
        } else {
            warn!(
                "import finished with {} failed rows out of {}",
                result.errors.len(),
                result.total_processed
            );
        }
        result
    }

    async fn import_row(&self, caller: &Caller, row: ImportRow) -> Result<RowOutcome, EngineError> {
        let chassis = truncate(
            &normalize_identification(row.chassis.as_deref().unwrap_or("")),
            MAX_CHASSIS_LEN,
        );
        if chassis.is_empty() {
            return Ok(RowOutcome::Skipped);
        }
        let plate = clip(row.plate.map(|p| normalize_identification(&p)), MAX_PLATE_LEN);
        let campaign = clip(row.campaign, MAX_CAMPAIGN_LEN);
        let planned_for = match row.planned_date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(raw) => Some(
                parse_import_date(raw, self.settings.utc_offset)
                    .ok_or_else(|| EngineError::field("planned_date", format!("unrecognized date '{raw}'")))?,
            ),
            None => None,
        };
        let own = |role: Role| (caller.role == role).then(|| caller.account_id.clone());
        let fleet_account_id = own(Role::Fleet)
            .or_else(|| clip(row.fleet_account_id, MAX_ID_LEN))
            .ok_or_else(|| EngineError::field("fleet_account_id", "is required"))?;
        let dealership_id = own(Role::Dealership)
            .or_else(|| clip(row.dealership_id, MAX_ID_LEN))
            .ok_or_else(|| EngineError::field("dealership_id", "is required"))?;
        let tower_account_id = own(Role::Tower).or_else(|| clip(row.tower_account_id, MAX_ID_LEN));

        let pending = self
            .tickets_by_chassis(caller, &chassis, Some(StatusGroup::Pending))
            .await?
            .into_iter()
            .find(|t| t.fleet_account_id == fleet_account_id);

        if let Some(mut ticket) = pending {
            let before = ticket.clone();
            let from_campaign = matches!(ticket.origin, TicketOrigin::Campaign { .. });
            if let Some(name) = &campaign
                && from_campaign
            {
                ticket.origin = TicketOrigin::Campaign { name: name.clone() };
            }
            if planned_for.is_some() {
                ticket.planned_for = planned_for;
            }
            if ticket.plate.is_none() {
                ticket.plate = plate;
            }
            if ticket == before {
                return Ok(RowOutcome::Updated);
            }
            self.repo.put(&ticket).await?;
            self.record_change(EntityKind::Ticket, &ticket.id, "ticket.imported", caller, Some(&before), &ticket)
                .await?;
            return Ok(RowOutcome::Updated);
        }

        let ticket = new_ticket(
            None,
            TicketOrigin::Campaign {
                name: campaign.ok_or_else(|| EngineError::field("campaign", "is required for new tickets"))?,
            },
            fleet_account_id,
            dealership_id,
            tower_account_id,
            chassis,
            plate,
            planned_for,
        );
        self.persist_new_ticket(caller, ticket).await?;
        Ok(RowOutcome::Created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc() -> FixedOffset {
        Utc.fix()
    }

    fn rfc(s: &str) -> Ms {
        DateTime::parse_from_rfc3339(s).unwrap().timestamp_millis()
    }

    #[test]
    fn parses_all_accepted_date_forms() {
        assert_eq!(
            parse_import_date("3-7-2024 2:05:09 PM", utc()),
            Some(rfc("2024-03-07T14:05:09Z"))
        );
        assert_eq!(parse_import_date("03/07/2024", utc()), Some(rfc("2024-03-07T00:00:00Z")));
        assert_eq!(
            parse_import_date("2024-03-07T10:00:00-03:00", utc()),
            Some(rfc("2024-03-07T13:00:00Z"))
        );
        assert_eq!(parse_import_date("yesterday", utc()), None);
    }

    #[test]
    fn local_dates_use_offset() {
        let offset = FixedOffset::west_opt(3 * 3600).unwrap();
        assert_eq!(parse_import_date("3-7-2024", offset), Some(rfc("2024-03-07T03:00:00Z")));
    }

    #[test]
    fn csv_headers_are_matched_loosely() {
        let data = "VIN, License Plate ,Campaign,Unknown\n9bw-123,abc1234,Brakes,x\n,,,\n";
        let rows = read_csv_rows(data.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].chassis.as_deref(), Some("9bw-123"));
        assert_eq!(rows[0].plate.as_deref(), Some("abc1234"));
        assert_eq!(rows[0].campaign.as_deref(), Some("Brakes"));
        assert_eq!(rows[1], ImportRow::default());
    }

    #[test]
    fn csv_without_chassis_column_is_rejected() {
        let err = read_csv_rows("plate\nABC\n".as_bytes()).unwrap_err();
        assert!(matches!(err, ImportError::MissingColumn("chassis")));
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate("  çççç  ", 2), "çç");
    }
}
