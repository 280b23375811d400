use tracing::info;

use super::*;
use crate::auth::Role;
use crate::observability::STEP_TRANSITIONS_TOTAL;
use crate::store::{BY_CHASSIS, BY_SCHEDULE, Cursor, IndexQuery, Page};

#[derive(Debug, Clone, Default)]
pub struct OpenTicketInput {
    pub schedule_id: Option<String>,
    /// Required when there is no schedule.
    pub campaign: Option<String>,
    pub fleet_account_id: String,
    pub dealership_id: String,
    pub tower_account_id: Option<String>,
    pub chassis: String,
    pub plate: Option<String>,
    pub planned_for: Option<Ms>,
}

#[derive(Debug, Clone)]
pub struct TicketFilter {
    pub group: StatusGroup,
    pub from: Option<Ms>,
    pub to: Option<Ms>,
    pub limit: Option<usize>,
    pub cursor: Option<Cursor>,
}

impl Default for TicketFilter {
    fn default() -> Self {
        Self {
            group: StatusGroup::Pending,
            from: None,
            to: None,
            limit: None,
            cursor: None,
        }
    }
}

const ENTITY: &str = "ticket";

impl Engine {
    /// Open a ticket from a schedule or a campaign. A schedule never gets a
    /// second ticket: the existing one is returned.
    pub async fn open_ticket(&self, caller: &Caller, input: OpenTicketInput) -> Result<MaintenanceTicket, EngineError> {
        if let Some(schedule_id) = trimmed(input.schedule_id.clone()) {
            let schedule = self.visible_schedule(caller, &schedule_id).await?;
            if schedule.is_canceled() {
                return Err(EngineError::invalid("schedule", &schedule_id, "schedule is canceled"));
            }
            if let Some(existing) = self.ticket_for_schedule(&schedule_id).await? {
                return Ok(existing);
            }
            return self.open_ticket_for_schedule(caller, &schedule).await;
        }

        // The caller's own tenant id always wins over the input.
        let own = |role: Role, given: String| {
            if caller.role == role {
                caller.account_id.clone()
            } else {
                given.trim().to_string()
            }
        };
        let fleet_account_id = own(Role::Fleet, input.fleet_account_id);
        let dealership_id = own(Role::Dealership, input.dealership_id);
        let tower_account_id = match caller.role {
            Role::Tower => Some(caller.account_id.clone()),
            _ => trimmed(input.tower_account_id),
        };
        let chassis = normalize_identification(&input.chassis);
        let campaign = trimmed(input.campaign);
        let mut v = Validator::new();
        v.required("chassis", &chassis, MAX_CHASSIS_LEN);
        v.required("fleet_account_id", &fleet_account_id, MAX_ID_LEN);
        v.required("dealership_id", &dealership_id, MAX_ID_LEN);
        v.required("campaign", campaign.as_deref().unwrap_or(""), MAX_CAMPAIGN_LEN);
        v.optional("plate", input.plate.as_deref(), MAX_PLATE_LEN);
        v.finish()?;

        let ticket = new_ticket(
            None,
            TicketOrigin::Campaign {
                name: campaign.unwrap_or_default(),
            },
            fleet_account_id,
            dealership_id,
            tower_account_id,
            chassis,
            input.plate.map(|p| normalize_identification(&p)).filter(|p| !p.is_empty()),
            input.planned_for,
        );
        self.persist_new_ticket(caller, ticket).await
    }

    pub(super) async fn open_ticket_for_schedule(
        &self,
        caller: &Caller,
        schedule: &Schedule,
    ) -> Result<MaintenanceTicket, EngineError> {
        let ticket = new_ticket(
            Some(schedule.id.clone()),
            TicketOrigin::Schedule,
            schedule.fleet_account_id.clone(),
            schedule.dealership_id.clone(),
            schedule.tower_account_id.clone(),
            schedule.chassis.clone(),
            Some(schedule.plate.clone()),
            Some(schedule.scheduled_at),
        );
        self.persist_new_ticket(caller, ticket).await
    }

    pub(super) async fn persist_new_ticket(
        &self,
        caller: &Caller,
        ticket: MaintenanceTicket,
    ) -> Result<MaintenanceTicket, EngineError> {
        self.repo.put(&ticket).await?;
        info!("ticket {} opened for chassis {}", ticket.id, ticket.chassis);
        self.record_change(EntityKind::Ticket, &ticket.id, "ticket.opened", caller, None, &ticket)
            .await?;
        Ok(ticket)
    }

    pub async fn check_in(
        &self,
        caller: &Caller,
        id: &str,
        step: TicketStep,
        details: CheckInDetails,
    ) -> Result<MaintenanceTicket, EngineError> {
        let mut v = Validator::new();
        v.optional("notes", details.notes.as_deref(), MAX_NOTES_LEN);
        v.optional("diagnosis", details.diagnosis.as_deref(), MAX_REPORT_LEN);
        v.optional("released_to", details.released_to.as_deref(), MAX_CAMPAIGN_LEN);
        v.finish()?;

        let mut ticket = self.visible_ticket(caller, id).await?;
        let before = ticket.clone();
        ticket
            .check_in(step, details, now_ms())
            .map_err(|reason| EngineError::invalid(ENTITY, id, reason))?;
        self.save_ticket_step(caller, &before, &ticket, format!("ticket.{}.check_in", step.as_str()), step)
            .await?;
        Ok(ticket)
    }

    pub async fn check_out(&self, caller: &Caller, id: &str, step: TicketStep) -> Result<MaintenanceTicket, EngineError> {
        let mut ticket = self.visible_ticket(caller, id).await?;
        let before = ticket.clone();
        ticket
            .check_out(step, now_ms())
            .map_err(|reason| EngineError::invalid(ENTITY, id, reason))?;
        self.save_ticket_step(caller, &before, &ticket, format!("ticket.{}.check_out", step.as_str()), step)
            .await?;
        if ticket.status == TicketStatus::Finished {
            info!("ticket {id} finished");
        }
        Ok(ticket)
    }

    async fn save_ticket_step(
        &self,
        caller: &Caller,
        before: &MaintenanceTicket,
        after: &MaintenanceTicket,
        action: String,
        step: TicketStep,
    ) -> Result<(), EngineError> {
        self.repo.put(after).await?;
        metrics::counter!(STEP_TRANSITIONS_TOTAL, "entity" => "ticket", "step" => step.as_str()).increment(1);
        self.record_change(EntityKind::Ticket, &after.id, &action, caller, Some(before), after)
            .await?;
        Ok(())
    }

    /// Rate one step of the visit. Resubmitting replaces the earlier rating.
    pub async fn rate_ticket_step(
        &self,
        caller: &Caller,
        id: &str,
        step: TicketStep,
        score: u8,
        comment: Option<String>,
    ) -> Result<MaintenanceTicket, EngineError> {
        let mut v = Validator::new();
        v.score("score", score);
        v.optional("comment", comment.as_deref(), MAX_COMMENT_LEN);
        v.finish()?;

        let mut ticket = self.visible_ticket(caller, id).await?;
        if ticket.phase(step).is_none() {
            return Err(EngineError::invalid(ENTITY, id, format!("{} was not started", step.as_str())));
        }
        let before = ticket.clone();
        ticket.rate(StepRating {
            step,
            score,
            comment: trimmed(comment),
            rated_at: now_ms(),
        });
        self.repo.put(&ticket).await?;
        self.record_change(EntityKind::Ticket, id, "ticket.rated", caller, Some(&before), &ticket)
            .await?;
        Ok(ticket)
    }

    pub async fn get_ticket(&self, caller: &Caller, id: &str) -> Result<MaintenanceTicket, EngineError> {
        self.visible_ticket(caller, id).await
    }

    /// Tickets for a chassis visible to the caller, newest first.
    pub async fn tickets_by_chassis(
        &self,
        caller: &Caller,
        chassis: &str,
        group: Option<StatusGroup>,
    ) -> Result<Vec<MaintenanceTicket>, EngineError> {
        let scope = TenantScope::of(caller);
        let mut query = IndexQuery::new(BY_CHASSIS, normalize_identification(chassis)).descending();
        if let Some(group) = group {
            query = query.range(SortRange::BeginsWith(group.prefix()));
        }
        let tickets = self.repo.query_all::<MaintenanceTicket>(query).await?;
        Ok(tickets
            .into_iter()
            .filter(|t| scope.covers(&t.fleet_account_id, &t.dealership_id, t.tower_account_id.as_deref()))
            .collect())
    }

    pub async fn ticket_for_schedule(&self, schedule_id: &str) -> Result<Option<MaintenanceTicket>, EngineError> {
        let page = self
            .repo
            .query::<MaintenanceTicket>(&IndexQuery::new(BY_SCHEDULE, schedule_id).limit(1))
            .await?;
        Ok(page.items.into_iter().next())
    }

    pub async fn list_tickets(
        &self,
        caller: &Caller,
        filter: TicketFilter,
    ) -> Result<Page<MaintenanceTicket>, EngineError> {
        let scope = TenantScope::of(caller);
        let query = IndexQuery::new(scope.index, scope.partition)
            .range(state_date_range(&filter.group.prefix(), filter.from, filter.to))
            .limit(page_limit(filter.limit))
            .cursor(filter.cursor);
        Ok(self.repo.query::<MaintenanceTicket>(&query).await?)
    }

    async fn visible_ticket(&self, caller: &Caller, id: &str) -> Result<MaintenanceTicket, EngineError> {
        let ticket: MaintenanceTicket = self.load(ENTITY, id).await?;
        ensure_visible(
            caller,
            ENTITY,
            id,
            &ticket.fleet_account_id,
            &ticket.dealership_id,
            ticket.tower_account_id.as_deref(),
        )?;
        Ok(ticket)
    }
}

#[allow(clippy::too_many_arguments)]
pub(super) fn new_ticket(
    schedule_id: Option<String>,
    origin: TicketOrigin,
    fleet_account_id: String,
    dealership_id: String,
    tower_account_id: Option<String>,
    chassis: String,
    plate: Option<String>,
    planned_for: Option<Ms>,
) -> MaintenanceTicket {
    let mut ticket = MaintenanceTicket {
        id: new_id(),
        schedule_id,
        origin,
        fleet_account_id,
        dealership_id,
        tower_account_id,
        chassis,
        plate,
        planned_for,
        status: TicketStatus::Opened,
        inspection: None,
        screening: None,
        repair: None,
        release: None,
        ratings: Vec::new(),
        has_review: false,
        created_at: now_ms(),
        status_group_and_start: String::new(),
    };
    ticket.refresh_keys();
    ticket
}
