use bytes::Bytes;
use serde::Serialize;
use tracing::info;

use super::*;
use crate::auth::Role;
use crate::blob::BlobMeta;
use crate::observability::STEP_TRANSITIONS_TOTAL;
use crate::store::{Cursor, IndexQuery, Page, PRIMARY};

#[derive(Debug, Clone)]
pub struct OccurrenceInput {
    /// Required unless the caller is a fleet account.
    pub fleet_account_id: Option<String>,
    pub tower_account_id: Option<String>,
    pub criticality: u8,
    /// First step; `Ticket` when absent.
    pub step: Option<OccurrenceStep>,
    pub planned_ms: Option<Ms>,
    pub report: Option<String>,
    pub vehicle: VehicleSnapshot,
    pub driver: DriverSnapshot,
    pub dealership: DealershipSnapshot,
}

#[derive(Debug, Clone)]
pub struct AdvanceInput {
    pub step: OccurrenceStep,
    /// Expected duration of the new step.
    pub planned_ms: Option<Ms>,
    pub report: Option<String>,
    pub observation: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PartOrderInput {
    pub order_number: String,
    pub supplier: Option<String>,
    pub expected_delivery: Option<Ms>,
}

#[derive(Debug, Clone, Default)]
pub struct OccurrenceFilter {
    pub from: Option<Ms>,
    pub to: Option<Ms>,
    pub limit: Option<usize>,
    pub cursor: Option<Cursor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepTiming {
    pub step: OccurrenceStep,
    pub actual_ms: Option<Ms>,
    pub planned_ms: Option<Ms>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairTimes {
    /// Opening to closing, or to now while open.
    pub total_ms: Ms,
    pub closed: bool,
    pub steps: Vec<StepTiming>,
    /// Time spent waiting on parts, when an order exists.
    pub parts_wait_ms: Option<Ms>,
}

const ENTITY: &str = "occurrence";

impl Engine {
    pub async fn create_occurrence(&self, caller: &Caller, input: OccurrenceInput) -> Result<Occurrence, EngineError> {
        let fleet_account_id = match caller.role {
            Role::Fleet => Some(caller.account_id.clone()),
            _ => trimmed(input.fleet_account_id),
        };
        let tower_account_id = match caller.role {
            Role::Tower => Some(caller.account_id.clone()),
            _ => trimmed(input.tower_account_id),
        };

        let mut vehicle = input.vehicle;
        vehicle.plate = normalize_identification(&vehicle.plate);
        vehicle.chassis = vehicle
            .chassis
            .map(|c| normalize_identification(&c))
            .filter(|c| !c.is_empty());

        let mut v = Validator::new();
        if !(MIN_CRITICALITY..=MAX_CRITICALITY).contains(&input.criticality) {
            v.fail(
                "criticality",
                format!("must be between {MIN_CRITICALITY} and {MAX_CRITICALITY}"),
            );
        }
        v.required("fleet_account_id", fleet_account_id.as_deref().unwrap_or(""), MAX_ID_LEN);
        v.required("vehicle.plate", &vehicle.plate, MAX_PLATE_LEN);
        v.optional("vehicle.chassis", vehicle.chassis.as_deref(), MAX_CHASSIS_LEN);
        v.required("driver.name", &input.driver.name, MAX_CAMPAIGN_LEN);
        v.required("dealership.dealership_id", &input.dealership.dealership_id, MAX_ID_LEN);
        v.optional("report", input.report.as_deref(), MAX_REPORT_LEN);
        v.planned("planned_ms", input.planned_ms);
        v.finish()?;
        let fleet_account_id = fleet_account_id.unwrap_or_default();

        if vehicle.vehicle_id.is_none() {
            let identification = vehicle.chassis.clone().unwrap_or_else(|| vehicle.plate.clone());
            vehicle.vehicle_id = self
                .resolve_vehicle(&fleet_account_id, &identification)
                .await?
                .map(|r| r.internal_id);
        }

        let now = now_ms();
        let step = input.step.unwrap_or(OccurrenceStep::Ticket);
        let occurrence = Occurrence {
            id: new_id(),
            protocol: protocol("OC", now),
            fleet_account_id,
            tower_account_id,
            criticality: input.criticality,
            step,
            vehicle,
            driver: input.driver,
            dealership: input.dealership,
            steps: vec![StepRecord {
                step,
                dt_start: now,
                dt_expected_end: input.planned_ms.map(|p| now.saturating_add(p)),
                dt_end: None,
                report: trimmed(input.report),
                observation: None,
                latest: true,
            }],
            dispatch: None,
            part_order: None,
            finalization: None,
            dt_start: now,
            dt_end: None,
        };
        self.repo.put(&occurrence).await?;
        info!(
            "occurrence {} opened, criticality {}",
            occurrence.protocol, occurrence.criticality
        );
        self.record_change(EntityKind::Occurrence, &occurrence.id, "occurrence.created", caller, None, &occurrence)
            .await?;
        if let Some(tower) = &occurrence.tower_account_id {
            self.notify(Notification {
                title: "New occurrence".into(),
                message: format!("{} needs assistance", occurrence.vehicle.plate),
                from_id: caller.account_id.clone(),
                to_id: tower.clone(),
                link: Some(format!("occurrences/{}", occurrence.id)),
            })
            .await;
        }
        Ok(occurrence)
    }

    /// Move to a later step: the current step is ended and the new one
    /// becomes the only `latest` record.
    pub async fn advance_step(&self, caller: &Caller, id: &str, input: AdvanceInput) -> Result<Occurrence, EngineError> {
        let mut v = Validator::new();
        v.optional("report", input.report.as_deref(), MAX_REPORT_LEN);
        v.optional("observation", input.observation.as_deref(), MAX_REPORT_LEN);
        v.planned("planned_ms", input.planned_ms);
        v.finish()?;

        let mut occurrence = self.visible_occurrence(caller, id).await?;
        let before = occurrence.clone();
        let now = now_ms();
        occurrence
            .advance(
                input.step,
                now,
                input.planned_ms.map(|p| now.saturating_add(p)),
                trimmed(input.report),
                trimmed(input.observation),
            )
            .map_err(|reason| EngineError::invalid(ENTITY, id, reason))?;
        self.repo.put(&occurrence).await?;
        metrics::counter!(STEP_TRANSITIONS_TOTAL, "entity" => "occurrence", "step" => input.step.as_str())
            .increment(1);
        self.record_change(
            EntityKind::Occurrence,
            id,
            &format!("occurrence.step.{}", input.step.as_str()),
            caller,
            Some(&before),
            &occurrence,
        )
        .await?;
        Ok(occurrence)
    }

    /// Close the occurrence. Closing an already closed occurrence returns it
    /// unchanged.
    pub async fn close_occurrence(
        &self,
        caller: &Caller,
        id: &str,
        reason: FinalizationReason,
        description: Option<String>,
    ) -> Result<Occurrence, EngineError> {
        let mut v = Validator::new();
        v.optional("description", description.as_deref(), MAX_FINALIZATION_LEN);
        v.finish()?;

        let mut occurrence = self.visible_occurrence(caller, id).await?;
        let before = occurrence.clone();
        let closed = occurrence.close(Finalization {
            reason,
            description: trimmed(description),
            at: now_ms(),
        });
        if !closed {
            return Ok(occurrence);
        }
        self.repo.put(&occurrence).await?;
        info!(
            "occurrence {} closed after {} ms",
            occurrence.protocol,
            occurrence.time_to_repair(now_ms())
        );
        self.record_change(EntityKind::Occurrence, id, "occurrence.closed", caller, Some(&before), &occurrence)
            .await?;
        Ok(occurrence)
    }

    /// Rate one step. Stored apart from the occurrence, one per step.
    pub async fn rate_occurrence_step(
        &self,
        caller: &Caller,
        id: &str,
        step: OccurrenceStep,
        score: u8,
        comment: Option<String>,
    ) -> Result<OccurrenceRating, EngineError> {
        let mut v = Validator::new();
        v.score("score", score);
        v.optional("comment", comment.as_deref(), MAX_COMMENT_LEN);
        v.finish()?;

        let occurrence = self.visible_occurrence(caller, id).await?;
        if !occurrence.steps.iter().any(|s| s.step == step) {
            return Err(EngineError::invalid(ENTITY, id, format!("{} was not reached", step.as_str())));
        }
        let rating = OccurrenceRating {
            occurrence_id: id.to_string(),
            step,
            score,
            comment: trimmed(comment),
            rated_by: caller.user_id.clone(),
            rated_at: now_ms(),
        };
        self.repo.put(&rating).await?;
        Ok(rating)
    }

    pub async fn occurrence_ratings(&self, caller: &Caller, id: &str) -> Result<Vec<OccurrenceRating>, EngineError> {
        self.visible_occurrence(caller, id).await?;
        Ok(self
            .repo
            .query_all::<OccurrenceRating>(IndexQuery::new(PRIMARY, id))
            .await?)
    }

    pub async fn record_part_order(
        &self,
        caller: &Caller,
        id: &str,
        input: PartOrderInput,
    ) -> Result<Occurrence, EngineError> {
        let mut v = Validator::new();
        v.required("order_number", &input.order_number, MAX_ID_LEN);
        v.optional("supplier", input.supplier.as_deref(), MAX_CAMPAIGN_LEN);
        if let Some(at) = input.expected_delivery {
            v.timestamp("expected_delivery", at);
        }
        v.finish()?;

        let mut occurrence = self.open_occurrence(caller, id).await?;
        let before = occurrence.clone();
        occurrence.part_order = Some(PartOrder {
            order_number: input.order_number.trim().to_string(),
            supplier: trimmed(input.supplier),
            ordered_at: now_ms(),
            expected_delivery: input.expected_delivery,
            delivered_at: None,
        });
        self.repo.put(&occurrence).await?;
        self.record_change(EntityKind::Occurrence, id, "occurrence.parts_ordered", caller, Some(&before), &occurrence)
            .await?;
        Ok(occurrence)
    }

    pub async fn mark_parts_delivered(&self, caller: &Caller, id: &str) -> Result<Occurrence, EngineError> {
        let mut occurrence = self.open_occurrence(caller, id).await?;
        let before = occurrence.clone();
        match occurrence.part_order.as_mut() {
            None => return Err(EngineError::invalid(ENTITY, id, "no part order")),
            Some(order) if order.delivered_at.is_some() => {
                return Err(EngineError::invalid(ENTITY, id, "parts already delivered"));
            }
            Some(order) => order.delivered_at = Some(now_ms()),
        }
        self.repo.put(&occurrence).await?;
        self.record_change(EntityKind::Occurrence, id, "occurrence.parts_delivered", caller, Some(&before), &occurrence)
            .await?;
        Ok(occurrence)
    }

    pub async fn time_to_repair(&self, caller: &Caller, id: &str) -> Result<RepairTimes, EngineError> {
        let occurrence = self.visible_occurrence(caller, id).await?;
        Ok(repair_times(&occurrence, now_ms()))
    }

    /// Store a file under `occurrences/{id}/`.
    pub async fn attach_file(
        &self,
        caller: &Caller,
        id: &str,
        name: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<BlobMeta, EngineError> {
        let file_name: String = name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            .collect();
        let mut v = Validator::new();
        v.required("name", &file_name, MAX_ID_LEN);
        if file_name.starts_with('.') {
            v.fail("name", "must not start with a dot");
        }
        if data.len() > MAX_ATTACHMENT_BYTES {
            v.fail("data", format!("must be at most {MAX_ATTACHMENT_BYTES} bytes"));
        }
        v.finish()?;

        self.visible_occurrence(caller, id).await?;
        let meta = self
            .services
            .blobs
            .put(&format!("occurrences/{id}/{file_name}"), content_type, data)
            .await?;
        info!("attached {} ({} bytes) to occurrence {id}", meta.key, meta.size);
        Ok(meta)
    }

    pub async fn list_attachments(&self, caller: &Caller, id: &str) -> Result<Vec<BlobMeta>, EngineError> {
        self.visible_occurrence(caller, id).await?;
        Ok(self.services.blobs.list(&format!("occurrences/{id}/")).await?)
    }

    pub async fn get_occurrence(&self, caller: &Caller, id: &str) -> Result<Occurrence, EngineError> {
        self.visible_occurrence(caller, id).await
    }

    /// Occurrences of the caller's tenant, newest first.
    pub async fn list_occurrences(
        &self,
        caller: &Caller,
        filter: OccurrenceFilter,
    ) -> Result<Page<Occurrence>, EngineError> {
        let scope = TenantScope::of(caller);
        let mut query = IndexQuery::new(scope.index, scope.partition)
            .limit(page_limit(filter.limit))
            .cursor(filter.cursor)
            .descending();
        if filter.from.is_some() || filter.to.is_some() {
            query = query.range(state_date_range("", filter.from, filter.to));
        }
        Ok(self.repo.query::<Occurrence>(&query).await?)
    }

    pub(super) async fn visible_occurrence(&self, caller: &Caller, id: &str) -> Result<Occurrence, EngineError> {
        let occurrence: Occurrence = self.load(ENTITY, id).await?;
        ensure_visible(
            caller,
            ENTITY,
            id,
            &occurrence.fleet_account_id,
            &occurrence.dealership.dealership_id,
            occurrence.tower_account_id.as_deref(),
        )?;
        Ok(occurrence)
    }

    pub(super) async fn open_occurrence(&self, caller: &Caller, id: &str) -> Result<Occurrence, EngineError> {
        let occurrence = self.visible_occurrence(caller, id).await?;
        if occurrence.is_closed() {
            return Err(EngineError::invalid(ENTITY, id, "occurrence is closed"));
        }
        Ok(occurrence)
    }
}

fn repair_times(occurrence: &Occurrence, now: Ms) -> RepairTimes {
    RepairTimes {
        total_ms: occurrence.time_to_repair(now),
        closed: occurrence.is_closed(),
        steps: occurrence
            .steps
            .iter()
            .map(|s| StepTiming {
                step: s.step,
                actual_ms: s.actual_ms(),
                planned_ms: s.planned_ms(),
            })
            .collect(),
        parts_wait_ms: occurrence
            .part_order
            .as_ref()
            .map(|o| o.delivered_at.unwrap_or(now) - o.ordered_at),
    }
}
