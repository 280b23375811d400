use serde::{Deserialize, Serialize};

use super::{Ms, Span, key_time};

/// Lifecycle states recorded in a schedule's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleState {
    Pending,
    Accepted,
    Rejected,
}

impl ScheduleState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

/// The state component of the derived sort key. Accepted schedules still
/// occupy their slot, so they fold into `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyState {
    Pending,
    Canceled,
}

impl KeyState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Canceled => "CANCELED",
        }
    }

    /// Sort key prefix for range queries over one state.
    pub fn prefix(&self) -> String {
        format!("{}#", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    pub state: ScheduleState,
    pub at: Ms,
    pub rescheduled_to: Option<Ms>,
    pub consultant_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub protocol: String,
    pub scheduled_at: Ms,
    pub history: Vec<StateEntry>,
    pub consultant_id: String,
    pub dealership_id: String,
    pub fleet_account_id: String,
    pub tower_account_id: Option<String>,
    pub plate: String,
    pub chassis: String,
    pub vehicle_id: Option<String>,
    pub fleet_asset_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: Ms,
    /// `{PENDING|CANCELED}#{scheduled_at}`. Only written by `push_state`.
    pub state_and_scheduled_date: String,
}

impl Schedule {
    /// Latest recorded state. A schedule always has at least one entry.
    pub fn state(&self) -> ScheduleState {
        self.history
            .last()
            .map_or(ScheduleState::Pending, |e| e.state)
    }

    pub fn key_state(&self) -> KeyState {
        match self.state() {
            ScheduleState::Rejected => KeyState::Canceled,
            ScheduleState::Pending | ScheduleState::Accepted => KeyState::Pending,
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.key_state() == KeyState::Canceled
    }

    /// The slot this schedule occupies on its consultant's calendar.
    pub fn slot(&self, slot_ms: Ms) -> Span {
        Span::slot(self.scheduled_at, slot_ms)
    }

    /// Append a history entry and recompute the derived key. Every state
    /// mutation goes through here.
    pub fn push_state(&mut self, entry: StateEntry) {
        if let Some(to) = entry.rescheduled_to {
            self.scheduled_at = to;
        }
        if let Some(ref consultant) = entry.consultant_id {
            self.consultant_id = consultant.clone();
        }
        self.history.push(entry);
        self.state_and_scheduled_date = derive_schedule_key(self.key_state(), self.scheduled_at);
    }
}

pub fn derive_schedule_key(state: KeyState, scheduled_at: Ms) -> String {
    format!("{}#{}", state.as_str(), key_time(scheduled_at))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> Schedule {
        let mut s = Schedule {
            id: "s1".into(),
            protocol: "AG-1".into(),
            scheduled_at: 1_000,
            history: Vec::new(),
            consultant_id: "c1".into(),
            dealership_id: "d1".into(),
            fleet_account_id: "f1".into(),
            tower_account_id: None,
            plate: "ABC1234".into(),
            chassis: "9BW000".into(),
            vehicle_id: None,
            fleet_asset_id: None,
            notes: None,
            created_at: 0,
            state_and_scheduled_date: String::new(),
        };
        s.push_state(StateEntry {
            state: ScheduleState::Pending,
            at: 0,
            rescheduled_to: None,
            consultant_id: None,
        });
        s
    }

    #[test]
    fn key_follows_latest_state() {
        let mut s = schedule();
        assert!(s.state_and_scheduled_date.starts_with("PENDING#"));

        s.push_state(StateEntry {
            state: ScheduleState::Accepted,
            at: 1,
            rescheduled_to: None,
            consultant_id: None,
        });
        assert_eq!(s.key_state(), KeyState::Pending);

        s.push_state(StateEntry {
            state: ScheduleState::Rejected,
            at: 2,
            rescheduled_to: None,
            consultant_id: None,
        });
        assert_eq!(s.key_state(), KeyState::Canceled);
        assert!(s.state_and_scheduled_date.starts_with("CANCELED#"));
    }

    #[test]
    fn reschedule_entry_moves_key_date() {
        let mut s = schedule();
        let new_time = 86_400_000;
        s.push_state(StateEntry {
            state: s.state(),
            at: 5,
            rescheduled_to: Some(new_time),
            consultant_id: Some("c2".into()),
        });
        assert_eq!(s.scheduled_at, new_time);
        assert_eq!(s.consultant_id, "c2");
        assert_eq!(s.state_and_scheduled_date, derive_schedule_key(KeyState::Pending, new_time));
        assert_eq!(s.history.len(), 2);
    }
}
