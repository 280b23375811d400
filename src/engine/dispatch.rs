use tracing::info;

use super::*;
use crate::observability::DISPATCH_TRANSITIONS_TOTAL;

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub payer: Payer,
    pub route: Route,
    /// Payment already cleared: skip straight to `Authorized`.
    pub authorize_payment: bool,
}

const ENTITY: &str = "dispatch";

impl Engine {
    pub async fn create_dispatch(
        &self,
        caller: &Caller,
        occurrence_id: &str,
        request: DispatchRequest,
    ) -> Result<Dispatch, EngineError> {
        let mut v = Validator::new();
        v.required("route.origin", &request.route.origin, MAX_NOTES_LEN);
        v.required("route.destination", &request.route.destination, MAX_NOTES_LEN);
        if request.route.distance_km.is_some_and(|d| !d.is_finite() || d < 0.0) {
            v.fail("route.distance_km", "must be a non-negative number");
        }
        v.finish()?;

        let mut occurrence = self.open_occurrence(caller, occurrence_id).await?;
        if occurrence.dispatch.as_ref().is_some_and(|d| !d.status.is_terminal()) {
            return Err(EngineError::invalid(
                ENTITY,
                occurrence_id,
                "occurrence already has an active dispatch",
            ));
        }
        let before = occurrence.clone();
        let now = now_ms();
        let dispatch = Dispatch {
            id: new_id(),
            status: if request.authorize_payment {
                DispatchStatus::Authorized
            } else {
                DispatchStatus::Requested
            },
            payer: request.payer,
            route: request.route,
            resource: None,
            requested_at: now,
            updated_at: now,
        };
        occurrence.dispatch = Some(dispatch.clone());
        self.save_dispatch(caller, &before, &occurrence, &dispatch, "dispatch.created")
            .await?;
        Ok(dispatch)
    }

    /// Requested → Authorized.
    pub async fn authorize_dispatch(&self, caller: &Caller, occurrence_id: &str) -> Result<Dispatch, EngineError> {
        self.transition(caller, occurrence_id, "dispatch.authorized", |d| match d.status {
            DispatchStatus::Requested => {
                d.status = DispatchStatus::Authorized;
                Ok(())
            }
            _ => Err("dispatch is not awaiting authorization"),
        })
        .await
    }

    /// Authorized → EnRoute with the assigned mechanic or tow.
    pub async fn start_route(
        &self,
        caller: &Caller,
        occurrence_id: &str,
        resource: &str,
    ) -> Result<Dispatch, EngineError> {
        let resource = resource.trim().to_string();
        let mut v = Validator::new();
        v.required("resource", &resource, MAX_ID_LEN);
        v.finish()?;
        self.transition(caller, occurrence_id, "dispatch.en_route", move |d| match d.status {
            DispatchStatus::Authorized => {
                d.status = DispatchStatus::EnRoute;
                d.resource = Some(resource);
                Ok(())
            }
            _ => Err("dispatch is not authorized"),
        })
        .await
    }

    /// EnRoute → Completed.
    pub async fn complete_dispatch(&self, caller: &Caller, occurrence_id: &str) -> Result<Dispatch, EngineError> {
        self.transition(caller, occurrence_id, "dispatch.completed", |d| match d.status {
            DispatchStatus::EnRoute => {
                d.status = DispatchStatus::Completed;
                Ok(())
            }
            _ => Err("dispatch is not en route"),
        })
        .await
    }

    /// Refuse the dispatch from any non-final status.
    pub async fn cancel_dispatch(
        &self,
        caller: &Caller,
        occurrence_id: &str,
        reason: RefusalReason,
        description: &str,
    ) -> Result<Dispatch, EngineError> {
        let description = description.trim().to_string();
        let mut v = Validator::new();
        v.required("description", &description, MAX_REFUSAL_LEN);
        v.finish()?;
        self.transition(caller, occurrence_id, "dispatch.refused", move |d| {
            if d.status.is_terminal() {
                return Err("dispatch already finished");
            }
            d.status = DispatchStatus::Refused { reason, description };
            Ok(())
        })
        .await
    }

    async fn transition(
        &self,
        caller: &Caller,
        occurrence_id: &str,
        action: &str,
        apply: impl FnOnce(&mut Dispatch) -> Result<(), &'static str> + Send,
    ) -> Result<Dispatch, EngineError> {
        let mut occurrence = self.open_occurrence(caller, occurrence_id).await?;
        let before = occurrence.clone();
        let Some(dispatch) = occurrence.dispatch.as_mut() else {
            return Err(EngineError::invalid(ENTITY, occurrence_id, "occurrence has no dispatch"));
        };
        apply(&mut *dispatch).map_err(|reason| EngineError::invalid(ENTITY, &dispatch.id, reason))?;
        dispatch.updated_at = now_ms();
        let dispatch = dispatch.clone();
        self.save_dispatch(caller, &before, &occurrence, &dispatch, action)
            .await?;
        Ok(dispatch)
    }

    async fn save_dispatch(
        &self,
        caller: &Caller,
        before: &Occurrence,
        after: &Occurrence,
        dispatch: &Dispatch,
        action: &str,
    ) -> Result<(), EngineError> {
        self.repo.put(after).await?;
        metrics::counter!(DISPATCH_TRANSITIONS_TOTAL, "status" => dispatch.status.as_str()).increment(1);
        info!(
            "dispatch {} for occurrence {} is {}",
            dispatch.id,
            after.protocol,
            dispatch.status.as_str()
        );
        self.record_change(EntityKind::Occurrence, &after.id, action, caller, Some(before), after)
            .await?;
        Ok(())
    }
}
