use crate::model::*;

use super::{Entity, IndexKey, Key};

pub const BY_FLEET: &str = "by_fleet";
pub const BY_DEALERSHIP: &str = "by_dealership";
pub const BY_TOWER: &str = "by_tower";
pub const BY_CONSULTANT: &str = "by_consultant";
pub const BY_CHASSIS: &str = "by_chassis";
pub const BY_SCHEDULE: &str = "by_schedule";
pub const BY_ACCOUNT: &str = "by_account";
pub const BY_IDENTIFICATION: &str = "by_identification";

/// Partition of the `by_consultant` index.
pub fn consultant_partition(dealership_id: &str, consultant_id: &str) -> String {
    format!("{dealership_id}#{consultant_id}")
}

/// Fleet, dealership and tower projections sharing one sort key.
fn tenant_indexes(fleet: &str, dealership: &str, tower: Option<&str>, sort: &str) -> Vec<IndexKey> {
    let mut keys = vec![
        IndexKey::new(BY_FLEET, fleet, sort),
        IndexKey::new(BY_DEALERSHIP, dealership, sort),
    ];
    if let Some(tower) = tower {
        keys.push(IndexKey::new(BY_TOWER, tower, sort));
    }
    keys
}

impl Entity for Schedule {
    const TABLE: &'static str = "schedules";

    fn key(&self) -> Key {
        Key::new(self.id.clone())
    }

    fn index_keys(&self) -> Vec<IndexKey> {
        let sort = &self.state_and_scheduled_date;
        let mut keys = tenant_indexes(
            &self.fleet_account_id,
            &self.dealership_id,
            self.tower_account_id.as_deref(),
            sort,
        );
        keys.push(IndexKey::new(
            BY_CONSULTANT,
            consultant_partition(&self.dealership_id, &self.consultant_id),
            sort.clone(),
        ));
        keys
    }
}

impl Entity for MaintenanceTicket {
    const TABLE: &'static str = "tickets";

    fn key(&self) -> Key {
        Key::new(self.id.clone())
    }

    fn index_keys(&self) -> Vec<IndexKey> {
        let sort = &self.status_group_and_start;
        let mut keys = tenant_indexes(
            &self.fleet_account_id,
            &self.dealership_id,
            self.tower_account_id.as_deref(),
            sort,
        );
        keys.push(IndexKey::new(BY_CHASSIS, self.chassis.clone(), sort.clone()));
        if let Some(schedule_id) = &self.schedule_id {
            keys.push(IndexKey::new(BY_SCHEDULE, schedule_id.clone(), self.id.clone()));
        }
        keys
    }
}

impl Entity for Occurrence {
    const TABLE: &'static str = "occurrences";

    fn key(&self) -> Key {
        Key::new(self.id.clone())
    }

    fn index_keys(&self) -> Vec<IndexKey> {
        tenant_indexes(
            &self.fleet_account_id,
            &self.dealership.dealership_id,
            self.tower_account_id.as_deref(),
            &key_time(self.dt_start),
        )
    }
}

impl Entity for OccurrenceRating {
    const TABLE: &'static str = "occurrence_ratings";

    fn key(&self) -> Key {
        Key::composite(self.occurrence_id.clone(), self.step.as_str())
    }
}

impl Entity for ChangeLogEntry {
    const TABLE: &'static str = "change_log";

    fn key(&self) -> Key {
        Key::composite(self.entity_id.clone(), self.id.clone())
    }
}

impl Entity for Vehicle {
    const TABLE: &'static str = "vehicles";

    fn key(&self) -> Key {
        Key::new(self.id.clone())
    }

    fn index_keys(&self) -> Vec<IndexKey> {
        vec![
            IndexKey::new(BY_ACCOUNT, self.account_id.clone(), self.identification.clone()),
            IndexKey::new(BY_IDENTIFICATION, self.identification.clone(), self.account_id.clone()),
        ]
    }
}
