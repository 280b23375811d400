use serde::{Deserialize, Serialize};

use super::{Ms, key_time};

/// Workflow steps of a maintenance visit, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TicketStep {
    Inspection,
    Screening,
    Repair,
    Release,
}

impl TicketStep {
    pub const ALL: [TicketStep; 4] = [Self::Inspection, Self::Screening, Self::Repair, Self::Release];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inspection => "inspection",
            Self::Screening => "screening",
            Self::Repair => "repair",
            Self::Release => "release",
        }
    }

    pub fn previous(&self) -> Option<TicketStep> {
        match self {
            Self::Inspection => None,
            Self::Screening => Some(Self::Inspection),
            Self::Repair => Some(Self::Screening),
            Self::Release => Some(Self::Repair),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketStatus {
    Opened,
    InStep(TicketStep),
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusGroup {
    Pending,
    Finished,
}

impl StatusGroup {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Finished => "FINISHED",
        }
    }

    pub fn prefix(&self) -> String {
        format!("{}#", self.as_str())
    }
}

/// Shared capability of every phase record.
pub trait CheckInOut {
    fn check_in(&self) -> Option<Ms>;
    fn check_out(&self) -> Option<Ms>;
    fn record_check_out(&mut self, at: Ms);

    fn is_open(&self) -> bool {
        self.check_in().is_some() && self.check_out().is_none()
    }
}

macro_rules! impl_check_in_out {
    ($($ty:ty),*) => {
        $(impl CheckInOut for $ty {
            fn check_in(&self) -> Option<Ms> {
                Some(self.checked_in_at)
            }

            fn check_out(&self) -> Option<Ms> {
                self.checked_out_at
            }

            fn record_check_out(&mut self, at: Ms) {
                self.checked_out_at = Some(at);
            }
        })*
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inspection {
    pub checked_in_at: Ms,
    pub checked_out_at: Option<Ms>,
    pub mileage_km: Option<u32>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screening {
    pub checked_in_at: Ms,
    pub checked_out_at: Option<Ms>,
    pub diagnosis: Option<String>,
    pub budget_approved: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repair {
    pub checked_in_at: Ms,
    pub checked_out_at: Option<Ms>,
    pub services: Vec<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub checked_in_at: Ms,
    pub checked_out_at: Option<Ms>,
    pub released_to: Option<String>,
    pub notes: Option<String>,
}

impl_check_in_out!(Inspection, Screening, Repair, Release);

/// Free-form details captured at check-in; each phase keeps what applies to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInDetails {
    pub notes: Option<String>,
    pub mileage_km: Option<u32>,
    pub diagnosis: Option<String>,
    pub budget_approved: Option<bool>,
    pub services: Vec<String>,
    pub released_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketOrigin {
    Schedule,
    Campaign { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRating {
    pub step: TicketStep,
    pub score: u8,
    pub comment: Option<String>,
    pub rated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceTicket {
    pub id: String,
    pub schedule_id: Option<String>,
    pub origin: TicketOrigin,
    pub fleet_account_id: String,
    pub dealership_id: String,
    pub tower_account_id: Option<String>,
    pub chassis: String,
    pub plate: Option<String>,
    pub planned_for: Option<Ms>,
    pub status: TicketStatus,
    pub inspection: Option<Inspection>,
    pub screening: Option<Screening>,
    pub repair: Option<Repair>,
    pub release: Option<Release>,
    pub ratings: Vec<StepRating>,
    pub has_review: bool,
    pub created_at: Ms,
    /// `{PENDING|FINISHED}#{start}`. Only written by `refresh_keys`.
    pub status_group_and_start: String,
}

impl MaintenanceTicket {
    pub fn phase(&self, step: TicketStep) -> Option<&dyn CheckInOut> {
        match step {
            TicketStep::Inspection => self.inspection.as_ref().map(|p| p as &dyn CheckInOut),
            TicketStep::Screening => self.screening.as_ref().map(|p| p as &dyn CheckInOut),
            TicketStep::Repair => self.repair.as_ref().map(|p| p as &dyn CheckInOut),
            TicketStep::Release => self.release.as_ref().map(|p| p as &dyn CheckInOut),
        }
    }

    fn phase_mut(&mut self, step: TicketStep) -> Option<&mut dyn CheckInOut> {
        match step {
            TicketStep::Inspection => self.inspection.as_mut().map(|p| p as &mut dyn CheckInOut),
            TicketStep::Screening => self.screening.as_mut().map(|p| p as &mut dyn CheckInOut),
            TicketStep::Repair => self.repair.as_mut().map(|p| p as &mut dyn CheckInOut),
            TicketStep::Release => self.release.as_mut().map(|p| p as &mut dyn CheckInOut),
        }
    }

    pub fn status_group(&self) -> StatusGroup {
        let released = self
            .release
            .as_ref()
            .is_some_and(|r| r.check_out().is_some());
        if released {
            StatusGroup::Finished
        } else {
            StatusGroup::Pending
        }
    }

    /// Start of the visit: the first check-in, else the creation time.
    pub fn start_date(&self) -> Ms {
        self.inspection
            .as_ref()
            .and_then(|p| p.check_in())
            .unwrap_or(self.created_at)
    }

    /// Recompute status and the derived key. Called after every mutation.
    pub fn refresh_keys(&mut self) {
        if self.status_group() == StatusGroup::Finished {
            self.status = TicketStatus::Finished;
        }
        self.status_group_and_start =
            format!("{}#{}", self.status_group().as_str(), key_time(self.start_date()));
    }

    pub fn check_in(&mut self, step: TicketStep, details: CheckInDetails, at: Ms) -> Result<(), &'static str> {
        if self.status == TicketStatus::Finished {
            return Err("ticket already finished");
        }
        if self.phase(step).is_some() {
            return Err("step already checked in");
        }
        if let Some(prev) = step.previous()
            && self.phase(prev).and_then(|p| p.check_out()).is_none()
        {
            return Err("previous step not checked out");
        }
        match step {
            TicketStep::Inspection => {
                self.inspection = Some(Inspection {
                    checked_in_at: at,
                    checked_out_at: None,
                    mileage_km: details.mileage_km,
                    notes: details.notes,
                })
            }
            TicketStep::Screening => {
                self.screening = Some(Screening {
                    checked_in_at: at,
                    checked_out_at: None,
                    diagnosis: details.diagnosis,
                    budget_approved: details.budget_approved,
                })
            }
            TicketStep::Repair => {
                self.repair = Some(Repair {
                    checked_in_at: at,
                    checked_out_at: None,
                    services: details.services,
                    notes: details.notes,
                })
            }
            TicketStep::Release => {
                self.release = Some(Release {
                    checked_in_at: at,
                    checked_out_at: None,
                    released_to: details.released_to,
                    notes: details.notes,
                })
            }
        }
        self.status = TicketStatus::InStep(step);
        self.refresh_keys();
        Ok(())
    }

    pub fn check_out(&mut self, step: TicketStep, at: Ms) -> Result<(), &'static str> {
        let phase = self.phase_mut(step).ok_or("step not checked in")?;
        if phase.check_out().is_some() {
            return Err("step already checked out");
        }
        phase.record_check_out(at);
        self.refresh_keys();
        Ok(())
    }

    /// One rating per step; resubmission replaces the previous one.
    pub fn rate(&mut self, rating: StepRating) {
        self.ratings.retain(|r| r.step != rating.step);
        self.ratings.push(rating);
        self.ratings.sort_by_key(|r| r.step);
        self.has_review = true;
    }
}
