use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use super::*;
use crate::directory::Consultant;
use crate::observability::CONSULTANT_CONFLICTS_TOTAL;
use crate::store::{BY_CONSULTANT, IndexQuery};

/// Held while a claimed slot is being written.
pub(super) type SlotClaim = OwnedMutexGuard<()>;

/// True if a slot starting at `target` overlaps none of `bookings`.
/// Every booking occupies `[start, start + slot_ms)`.
pub fn slot_is_free(bookings: &[Ms], target: Ms, slot_ms: Ms) -> bool {
    let wanted = Span::slot(target, slot_ms);
    bookings
        .iter()
        .all(|&start| !Span::slot(start, slot_ms).overlaps(&wanted))
}

impl Engine {
    /// Start times of the consultant's PENDING schedules that could touch
    /// the calendar day of `target`.
    pub async fn consultant_bookings(
        &self,
        dealership_id: &str,
        consultant_id: &str,
        target: Ms,
        exclude_schedule: Option<&str>,
    ) -> Result<Vec<Ms>, EngineError> {
        let day = calendar_day(target, self.settings.utc_offset);
        let slot = self.settings.slot_ms;
        // widened by one slot so bookings straddling midnight are seen
        let range = state_date_range(
            &KeyState::Pending.prefix(),
            Some(day.start.saturating_sub(slot)),
            Some(day.end.saturating_add(slot)),
        );
        let query = IndexQuery::new(BY_CONSULTANT, consultant_partition(dealership_id, consultant_id)).range(range);
        let schedules = self.repo.query_all::<Schedule>(query).await?;
        Ok(schedules
            .into_iter()
            .filter(|s| exclude_schedule.is_none_or(|id| s.id != id))
            .map(|s| s.scheduled_at)
            .collect())
    }

    async fn is_free(
        &self,
        dealership_id: &str,
        consultant_id: &str,
        target: Ms,
        exclude_schedule: Option<&str>,
    ) -> Result<bool, EngineError> {
        let bookings = self
            .consultant_bookings(dealership_id, consultant_id, target, exclude_schedule)
            .await?;
        let free = slot_is_free(&bookings, target, self.settings.slot_ms);
        if !free {
            metrics::counter!(CONSULTANT_CONFLICTS_TOTAL).increment(1);
            debug!("consultant {consultant_id} busy at {}", key_time(target));
        }
        Ok(free)
    }

    /// First consultant, in directory order, free for the slot at `target`.
    pub async fn first_available_consultant(&self, dealership_id: &str, target: Ms) -> Result<Consultant, EngineError> {
        let (consultant, _claim) = self.claim_first_available(dealership_id, target).await?;
        Ok(consultant)
    }

    /// Check one specific consultant for the slot at `target`.
    pub async fn consultant_by_id_available(
        &self,
        dealership_id: &str,
        consultant_id: &str,
        target: Ms,
    ) -> Result<Consultant, EngineError> {
        let (consultant, _claim) = self
            .claim_consultant(dealership_id, consultant_id, target, None)
            .await?;
        Ok(consultant)
    }

    /// Like `first_available_consultant`, but keeps the winner's lock so the
    /// caller can persist the booking before anyone else checks.
    pub(super) async fn claim_first_available(
        &self,
        dealership_id: &str,
        target: Ms,
    ) -> Result<(Consultant, SlotClaim), EngineError> {
        let consultants = self.services.directory.list_consultants(dealership_id).await?;
        for consultant in consultants {
            let claim = self.consultant_lock(dealership_id, &consultant.id).lock_owned().await;
            if self.is_free(dealership_id, &consultant.id, target, None).await? {
                return Ok((consultant, claim));
            }
        }
        Err(EngineError::NoConsultantAvailable {
            dealership_id: dealership_id.to_string(),
            at: target,
        })
    }

    pub(super) async fn claim_consultant(
        &self,
        dealership_id: &str,
        consultant_id: &str,
        target: Ms,
        exclude_schedule: Option<&str>,
    ) -> Result<(Consultant, SlotClaim), EngineError> {
        let consultant = self
            .services
            .directory
            .get_consultant(dealership_id, consultant_id)
            .await?
            .ok_or_else(|| EngineError::not_found("consultant", consultant_id))?;
        let claim = self.consultant_lock(dealership_id, consultant_id).lock_owned().await;
        if self.is_free(dealership_id, consultant_id, target, exclude_schedule).await? {
            Ok((consultant, claim))
        } else {
            Err(EngineError::NoConsultantAvailable {
                dealership_id: dealership_id.to_string(),
                at: target,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLOT: Ms = 30 * MINUTE_MS;

    #[test]
    fn free_when_no_bookings() {
        assert!(slot_is_free(&[], 0, SLOT));
    }

    #[test]
    fn adjacent_slots_do_not_conflict() {
        let t = 10 * HOUR_MS;
        assert!(slot_is_free(&[t - SLOT, t + SLOT], t, SLOT));
    }

    #[test]
    fn partial_overlap_conflicts() {
        let t = 10 * HOUR_MS;
        assert!(!slot_is_free(&[t + 15 * MINUTE_MS], t, SLOT));
        assert!(!slot_is_free(&[t - SLOT + 1], t, SLOT));
        assert!(!slot_is_free(&[t], t, SLOT));
    }

    #[test]
    fn bookings_near_range_end_do_not_overflow() {
        assert!(!slot_is_free(&[Ms::MAX], Ms::MAX, SLOT));
        assert!(!slot_is_free(&[Ms::MAX - 1], Ms::MAX, SLOT));
        assert!(slot_is_free(&[Ms::MAX - 2 * SLOT], Ms::MAX, SLOT));
    }
}
