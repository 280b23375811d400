use serde::{Deserialize, Serialize};

use super::Ms;

/// Roadside workflow steps, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OccurrenceStep {
    Ticket,
    Screening,
    Dispatch,
    Repair,
    Release,
}

impl OccurrenceStep {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ticket => "ticket",
            Self::Screening => "screening",
            Self::Dispatch => "dispatch",
            Self::Repair => "repair",
            Self::Release => "release",
        }
    }
}

// ── Snapshots copied at creation time ────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    pub vehicle_id: Option<String>,
    pub plate: String,
    pub chassis: Option<String>,
    pub model: Option<String>,
    pub mileage_km: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverSnapshot {
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealershipSnapshot {
    pub dealership_id: String,
    pub name: Option<String>,
    pub city: Option<String>,
}

// ── Steps ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: OccurrenceStep,
    pub dt_start: Ms,
    pub dt_expected_end: Option<Ms>,
    pub dt_end: Option<Ms>,
    pub report: Option<String>,
    pub observation: Option<String>,
    pub latest: bool,
}

impl StepRecord {
    pub fn actual_ms(&self) -> Option<Ms> {
        self.dt_end.map(|end| end - self.dt_start)
    }

    pub fn planned_ms(&self) -> Option<Ms> {
        self.dt_expected_end.map(|end| end - self.dt_start)
    }
}

// ── Dispatch ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefusalReason {
    PaymentDenied,
    NoResourceAvailable,
    OutOfCoverageArea,
    SolvedRemotely,
    DuplicateRequest,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchStatus {
    Requested,
    Authorized,
    EnRoute,
    Completed,
    Refused {
        reason: RefusalReason,
        description: String,
    },
}

impl DispatchStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Authorized => "authorized",
            Self::EnRoute => "en_route",
            Self::Completed => "completed",
            Self::Refused { .. } => "refused",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Refused { .. })
    }

    pub fn refusal_reason(&self) -> Option<RefusalReason> {
        match self {
            Self::Refused { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payer {
    FleetAccount,
    Tower,
    Dealership,
    Warranty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub origin: String,
    pub destination: String,
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    pub id: String,
    pub status: DispatchStatus,
    pub payer: Payer,
    pub route: Route,
    pub resource: Option<String>,
    pub requested_at: Ms,
    pub updated_at: Ms,
}

// ── Parts and closing ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartOrder {
    pub order_number: String,
    pub supplier: Option<String>,
    pub ordered_at: Ms,
    pub expected_delivery: Option<Ms>,
    pub delivered_at: Option<Ms>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalizationReason {
    Repaired,
    TowedToDealership,
    CanceledByCustomer,
    DuplicateOccurrence,
    VehicleReplaced,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finalization {
    pub reason: FinalizationReason,
    pub description: Option<String>,
    pub at: Ms,
}

/// Satisfaction rating of one occurrence step, stored keyed by
/// `(occurrence_id, step)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceRating {
    pub occurrence_id: String,
    pub step: OccurrenceStep,
    pub score: u8,
    pub comment: Option<String>,
    pub rated_by: String,
    pub rated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: String,
    pub protocol: String,
    pub fleet_account_id: String,
    pub tower_account_id: Option<String>,
    pub criticality: u8,
    pub step: OccurrenceStep,
    pub vehicle: VehicleSnapshot,
    pub driver: DriverSnapshot,
    pub dealership: DealershipSnapshot,
    pub steps: Vec<StepRecord>,
    pub dispatch: Option<Dispatch>,
    pub part_order: Option<PartOrder>,
    pub finalization: Option<Finalization>,
    pub dt_start: Ms,
    pub dt_end: Option<Ms>,
}

impl Occurrence {
    pub fn is_closed(&self) -> bool {
        self.dt_end.is_some()
    }

    pub fn latest_step(&self) -> Option<&StepRecord> {
        self.steps.iter().rev().find(|s| s.latest)
    }

    /// End the open step, then open `next`. The previous step gets its end
    /// timestamp before its `latest` flag is cleared.
    pub fn advance(
        &mut self,
        next: OccurrenceStep,
        at: Ms,
        expected_end: Option<Ms>,
        report: Option<String>,
        observation: Option<String>,
    ) -> Result<(), &'static str> {
        if self.is_closed() {
            return Err("occurrence is closed");
        }
        if next <= self.step {
            return Err("step must move forward");
        }
        self.end_latest(at);
        self.steps.push(StepRecord {
            step: next,
            dt_start: at,
            dt_expected_end: expected_end,
            dt_end: None,
            report,
            observation,
            latest: true,
        });
        self.step = next;
        Ok(())
    }

    /// Close the occurrence. Returns `false` when it was already closed.
    pub fn close(&mut self, finalization: Finalization) -> bool {
        if self.is_closed() {
            return false;
        }
        self.end_latest(finalization.at);
        self.dt_end = Some(finalization.at);
        self.finalization = Some(finalization);
        true
    }

    fn end_latest(&mut self, at: Ms) {
        for record in self.steps.iter_mut().filter(|s| s.latest) {
            record.dt_end = Some(at);
            record.latest = false;
        }
    }

    /// Total time from opening to closing (or to `now` while open).
    pub fn time_to_repair(&self, now: Ms) -> Ms {
        self.dt_end.unwrap_or(now) - self.dt_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occurrence() -> Occurrence {
        Occurrence {
            id: "o1".into(),
            protocol: "OC-1".into(),
            fleet_account_id: "f1".into(),
            tower_account_id: None,
            criticality: 3,
            step: OccurrenceStep::Ticket,
            vehicle: VehicleSnapshot {
                vehicle_id: None,
                plate: "ABC1234".into(),
                chassis: None,
                model: None,
                mileage_km: None,
            },
            driver: DriverSnapshot {
                name: "Driver".into(),
                phone: None,
            },
            dealership: DealershipSnapshot {
                dealership_id: "d1".into(),
                name: None,
                city: None,
            },
            steps: vec![StepRecord {
                step: OccurrenceStep::Ticket,
                dt_start: 0,
                dt_expected_end: None,
                dt_end: None,
                report: None,
                observation: None,
                latest: true,
            }],
            dispatch: None,
            part_order: None,
            finalization: None,
            dt_start: 0,
            dt_end: None,
        }
    }

    #[test]
    fn advance_keeps_single_latest() {
        let mut o = occurrence();
        o.advance(OccurrenceStep::Screening, 10, None, None, None).unwrap();
        o.advance(OccurrenceStep::Repair, 20, Some(80), None, None).unwrap();
        assert_eq!(o.steps.iter().filter(|s| s.latest).count(), 1);
        assert_eq!(o.steps[0].dt_end, Some(10));
        assert_eq!(o.steps[1].dt_end, Some(20));
        assert_eq!(o.latest_step().unwrap().step, OccurrenceStep::Repair);
        assert_eq!(o.steps[2].planned_ms(), Some(60));
    }

    #[test]
    fn advance_backwards_rejected() {
        let mut o = occurrence();
        o.advance(OccurrenceStep::Repair, 10, None, None, None).unwrap();
        assert_eq!(
            o.advance(OccurrenceStep::Screening, 20, None, None, None),
            Err("step must move forward")
        );
        assert_eq!(
            o.advance(OccurrenceStep::Repair, 20, None, None, None),
            Err("step must move forward")
        );
    }

    #[test]
    fn close_clears_latest_and_is_idempotent() {
        let mut o = occurrence();
        let fin = Finalization {
            reason: FinalizationReason::Repaired,
            description: None,
            at: 100,
        };
        assert!(o.close(fin.clone()));
        assert!(o.steps.iter().all(|s| !s.latest));
        assert_eq!(o.steps[0].actual_ms(), Some(100));
        assert!(!o.close(Finalization { at: 200, ..fin }));
        assert_eq!(o.dt_end, Some(100));
        assert_eq!(o.time_to_repair(500), 100);
    }

    #[test]
    fn refusal_reason_only_when_refused() {
        assert_eq!(DispatchStatus::Authorized.refusal_reason(), None);
        let refused = DispatchStatus::Refused {
            reason: RefusalReason::PaymentDenied,
            description: "card declined".into(),
        };
        assert_eq!(refused.refusal_reason(), Some(RefusalReason::PaymentDenied));
        assert!(refused.is_terminal());
    }
}
