use tracing::info;

use super::*;
use crate::auth::Role;
use crate::observability::{SCHEDULE_TRANSITIONS_TOTAL, SCHEDULES_CREATED_TOTAL};
use crate::store::{Cursor, IndexQuery, Page};

#[derive(Debug, Clone, Default)]
pub struct ScheduleInput {
    /// Required unless the caller is a fleet account.
    pub fleet_account_id: Option<String>,
    /// Chosen by the dealership locator when absent.
    pub dealership_id: Option<String>,
    /// Book this consultant instead of the first free one.
    pub consultant_id: Option<String>,
    pub tower_account_id: Option<String>,
    pub scheduled_at: Ms,
    pub plate: String,
    pub chassis: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RescheduleInput {
    pub schedule_id: String,
    pub scheduled_at: Ms,
    /// Keeps the current consultant when absent.
    pub consultant_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ScheduleFilter {
    pub state: KeyState,
    pub from: Option<Ms>,
    pub to: Option<Ms>,
    pub limit: Option<usize>,
    pub cursor: Option<Cursor>,
    pub descending: bool,
}

impl Default for ScheduleFilter {
    fn default() -> Self {
        Self {
            state: KeyState::Pending,
            from: None,
            to: None,
            limit: None,
            cursor: None,
            descending: false,
        }
    }
}

const ENTITY: &str = "schedule";

impl Engine {
    pub async fn create_schedule(&self, caller: &Caller, input: ScheduleInput) -> Result<Schedule, EngineError> {
        let plate = normalize_identification(&input.plate);
        let chassis = normalize_identification(&input.chassis);
        let fleet_account_id = match caller.role {
            Role::Fleet => Some(caller.account_id.clone()),
            _ => trimmed(input.fleet_account_id),
        };
        let tower_account_id = match caller.role {
            Role::Tower => Some(caller.account_id.clone()),
            _ => trimmed(input.tower_account_id),
        };

        let mut v = Validator::new();
        v.required("plate", &plate, MAX_PLATE_LEN);
        v.required("chassis", &chassis, MAX_CHASSIS_LEN);
        v.required("fleet_account_id", fleet_account_id.as_deref().unwrap_or(""), MAX_ID_LEN);
        v.optional("notes", input.notes.as_deref(), MAX_NOTES_LEN);
        v.timestamp("scheduled_at", input.scheduled_at);
        v.finish()?;
        let fleet_account_id = fleet_account_id.unwrap_or_default();

        let dealership_id = match trimmed(input.dealership_id) {
            Some(id) => id,
            None => self
                .services
                .locator
                .locate(&fleet_account_id, &plate)
                .await?
                .map(|d| d.id)
                .ok_or(EngineError::NoDealershipAvailable)?,
        };

        let (consultant, claim) = match trimmed(input.consultant_id) {
            Some(id) => {
                self.claim_consultant(&dealership_id, &id, input.scheduled_at, None)
                    .await?
            }
            None => self.claim_first_available(&dealership_id, input.scheduled_at).await?,
        };

        let vehicle = match self.resolve_vehicle(&fleet_account_id, &chassis).await? {
            Some(found) => Some(found),
            None => self.resolve_vehicle(&fleet_account_id, &plate).await?,
        };

        let now = now_ms();
        let mut schedule = Schedule {
            id: new_id(),
            protocol: protocol("AG", now),
            scheduled_at: input.scheduled_at,
            history: Vec::new(),
            consultant_id: consultant.id.clone(),
            dealership_id,
            fleet_account_id,
            tower_account_id,
            plate,
            chassis,
            vehicle_id: vehicle.as_ref().map(|r| r.internal_id.clone()),
            fleet_asset_id: vehicle.and_then(|r| r.fleet_asset_id),
            notes: trimmed(input.notes),
            created_at: now,
            state_and_scheduled_date: String::new(),
        };
        schedule.push_state(StateEntry {
            state: ScheduleState::Pending,
            at: now,
            rescheduled_to: None,
            consultant_id: None,
        });
        self.repo.put(&schedule).await?;
        drop(claim);

        metrics::counter!(SCHEDULES_CREATED_TOTAL).increment(1);
        info!(
            "schedule {} booked with consultant {} at {}",
            schedule.protocol,
            schedule.consultant_id,
            key_time(schedule.scheduled_at)
        );
        self.record_change(EntityKind::Schedule, &schedule.id, "schedule.created", caller, None, &schedule)
            .await?;
        self.notify(Notification {
            title: "New schedule".into(),
            message: format!("{} booked for {}", schedule.plate, key_time(schedule.scheduled_at)),
            from_id: caller.account_id.clone(),
            to_id: schedule.dealership_id.clone(),
            link: Some(format!("schedules/{}", schedule.id)),
        })
        .await;
        Ok(schedule)
    }

    /// Accept a pending schedule and open its maintenance ticket. Safe to
    /// retry: an accepted schedule is not re-appended and an existing ticket
    /// is returned as is.
    pub async fn accept_schedule(
        &self,
        caller: &Caller,
        id: &str,
    ) -> Result<(Schedule, MaintenanceTicket), EngineError> {
        let mut schedule = self.visible_schedule(caller, id).await?;
        if schedule.is_canceled() {
            return Err(EngineError::invalid(ENTITY, id, "schedule is canceled"));
        }
        if schedule.state() != ScheduleState::Accepted {
            let before = schedule.clone();
            schedule.push_state(StateEntry {
                state: ScheduleState::Accepted,
                at: now_ms(),
                rescheduled_to: None,
                consultant_id: None,
            });
            self.repo.put(&schedule).await?;
            metrics::counter!(SCHEDULE_TRANSITIONS_TOTAL, "state" => "accepted").increment(1);
            self.record_change(EntityKind::Schedule, id, "schedule.accepted", caller, Some(&before), &schedule)
                .await?;
            self.notify(Notification {
                title: "Schedule accepted".into(),
                message: format!("{} confirmed for {}", schedule.plate, key_time(schedule.scheduled_at)),
                from_id: caller.account_id.clone(),
                to_id: schedule.fleet_account_id.clone(),
                link: Some(format!("schedules/{id}")),
            })
            .await;
        }

        let ticket = match self.ticket_for_schedule(id).await? {
            Some(ticket) => ticket,
            None => self.open_ticket_for_schedule(caller, &schedule).await?,
        };
        Ok((schedule, ticket))
    }

    /// Cancel a schedule. Canceled schedules accept no further transitions.
    pub async fn reject_schedule(&self, caller: &Caller, id: &str) -> Result<Schedule, EngineError> {
        let mut schedule = self.visible_schedule(caller, id).await?;
        if schedule.is_canceled() {
            return Err(EngineError::invalid(ENTITY, id, "schedule is already canceled"));
        }
        let before = schedule.clone();
        schedule.push_state(StateEntry {
            state: ScheduleState::Rejected,
            at: now_ms(),
            rescheduled_to: None,
            consultant_id: None,
        });
        self.repo.put(&schedule).await?;
        metrics::counter!(SCHEDULE_TRANSITIONS_TOTAL, "state" => "rejected").increment(1);
        info!("schedule {} rejected", schedule.protocol);
        self.record_change(EntityKind::Schedule, id, "schedule.rejected", caller, Some(&before), &schedule)
            .await?;
        self.notify(Notification {
            title: "Schedule rejected".into(),
            message: format!("{} on {} was rejected", schedule.plate, key_time(schedule.scheduled_at)),
            from_id: caller.account_id.clone(),
            to_id: schedule.fleet_account_id.clone(),
            link: Some(format!("schedules/{id}")),
        })
        .await;
        Ok(schedule)
    }

    pub async fn reschedule(&self, caller: &Caller, input: RescheduleInput) -> Result<Schedule, EngineError> {
        let mut v = Validator::new();
        v.timestamp("scheduled_at", input.scheduled_at);
        v.finish()?;

        let id = input.schedule_id.as_str();
        let mut schedule = self.visible_schedule(caller, id).await?;
        if schedule.is_canceled() {
            return Err(EngineError::invalid(ENTITY, id, "schedule is canceled"));
        }
        let consultant_id = trimmed(input.consultant_id).unwrap_or_else(|| schedule.consultant_id.clone());
        let (consultant, claim) = self
            .claim_consultant(&schedule.dealership_id, &consultant_id, input.scheduled_at, Some(id))
            .await?;

        let before = schedule.clone();
        let state = schedule.state();
        schedule.push_state(StateEntry {
            state,
            at: now_ms(),
            rescheduled_to: Some(input.scheduled_at),
            consultant_id: Some(consultant.id),
        });
        self.repo.put(&schedule).await?;
        drop(claim);

        metrics::counter!(SCHEDULE_TRANSITIONS_TOTAL, "state" => "rescheduled").increment(1);
        info!(
            "schedule {} moved to {} with consultant {}",
            schedule.protocol,
            key_time(schedule.scheduled_at),
            schedule.consultant_id
        );
        self.record_change(EntityKind::Schedule, id, "schedule.rescheduled", caller, Some(&before), &schedule)
            .await?;
        self.notify(Notification {
            title: "Schedule moved".into(),
            message: format!("{} moved to {}", schedule.plate, key_time(schedule.scheduled_at)),
            from_id: caller.account_id.clone(),
            to_id: schedule.dealership_id.clone(),
            link: Some(format!("schedules/{id}")),
        })
        .await;
        Ok(schedule)
    }

    pub async fn get_schedule(&self, caller: &Caller, id: &str) -> Result<Schedule, EngineError> {
        self.visible_schedule(caller, id).await
    }

    /// Schedules of the caller's tenant in one key state, by scheduled date.
    pub async fn list_schedules(&self, caller: &Caller, filter: ScheduleFilter) -> Result<Page<Schedule>, EngineError> {
        let scope = TenantScope::of(caller);
        let mut query = IndexQuery::new(scope.index, scope.partition)
            .range(state_date_range(&filter.state.prefix(), filter.from, filter.to))
            .limit(page_limit(filter.limit))
            .cursor(filter.cursor);
        if filter.descending {
            query = query.descending();
        }
        Ok(self.repo.query::<Schedule>(&query).await?)
    }

    pub(super) async fn visible_schedule(&self, caller: &Caller, id: &str) -> Result<Schedule, EngineError> {
        let schedule: Schedule = self.load(ENTITY, id).await?;
        ensure_visible(
            caller,
            ENTITY,
            id,
            &schedule.fleet_account_id,
            &schedule.dealership_id,
            schedule.tower_account_id.as_deref(),
        )?;
        Ok(schedule)
    }
}
