use std::path::PathBuf;
use std::sync::Arc;

use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use fleetcheck::auth::{Caller, Role};
use fleetcheck::blob::MemoryBlobStore;
use fleetcheck::cache::IdentifierCache;
use fleetcheck::directory::StaticDirectory;
use fleetcheck::engine::{Engine, EngineSettings, ScheduleFilter, ScheduleInput, Services, read_csv_rows};
use fleetcheck::model::{CheckInDetails, KeyState, MINUTE_MS, Ms, ScheduleState, TicketStatus, TicketStep};
use fleetcheck::notify::NotifyHub;
use fleetcheck::store::MemoryStore;

// ── Test infrastructure ──────────────────────────────────────

const DIRECTORY: &str = r#"{
    "dealerships": [
        {"id": "D1", "name": "North Motors", "consultants": [
            {"id": "C1", "name": "Ana"},
            {"id": "C2", "name": "Bia"}
        ]}
    ],
    "fleet_dealerships": {"F1": "D1"}
}"#;

fn temp_wal() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("fleetcheck_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join("fleetcheck.wal")
}

fn engine_on(store: Arc<MemoryStore>) -> (Engine, Arc<NotifyHub>) {
    let directory = Arc::new(StaticDirectory::from_json(DIRECTORY).unwrap());
    let hub = Arc::new(NotifyHub::new());
    let services = Services {
        directory: directory.clone(),
        locator: directory,
        notifier: hub.clone(),
        blobs: Arc::new(MemoryBlobStore::new()),
    };
    let engine = Engine::new(store, services, IdentifierCache::default(), EngineSettings::default());
    (engine, hub)
}

fn fleet() -> Caller {
    Caller::new(Role::Fleet, "F1", "fleet-user")
}

fn dealer() -> Caller {
    Caller::new(Role::Dealership, "D1", "dealer-user")
}

fn at(s: &str) -> Ms {
    chrono::DateTime::parse_from_rfc3339(s).unwrap().timestamp_millis()
}

fn booking(scheduled_at: Ms) -> ScheduleInput {
    ScheduleInput {
        dealership_id: Some("D1".into()),
        scheduled_at,
        plate: "ABC1234".into(),
        chassis: "9BWZZZ377VT004251".into(),
        ..Default::default()
    }
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn schedule_to_finished_ticket() {
    let (engine, hub) = engine_on(Arc::new(MemoryStore::new()));
    let mut dealer_inbox = hub.subscribe("D1");
    let mut fleet_inbox = hub.subscribe("F1");

    let schedule = assert_ok!(engine.create_schedule(&fleet(), booking(at("2024-05-02T09:00:00Z"))).await);
    let note = assert_ok!(dealer_inbox.recv().await);
    assert_eq!(note.to_id, "D1");

    let (accepted, ticket) = assert_ok!(engine.accept_schedule(&dealer(), &schedule.id).await);
    assert_eq!(accepted.state(), ScheduleState::Accepted);
    assert_eq!(ticket.schedule_id.as_deref(), Some(schedule.id.as_str()));
    assert_ok!(fleet_inbox.recv().await);

    let mut ticket = ticket;
    for step in TicketStep::ALL {
        assert_ok!(engine.check_in(&dealer(), &ticket.id, step, CheckInDetails::default()).await);
        ticket = assert_ok!(engine.check_out(&dealer(), &ticket.id, step).await);
    }
    assert_eq!(ticket.status, TicketStatus::Finished);
    assert!(ticket.status_group_and_start.starts_with("FINISHED#"));

    let log = assert_ok!(engine.change_log(&schedule.id).await);
    let actions: Vec<&str> = log.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, ["schedule.created", "schedule.accepted"]);
}

#[tokio::test]
async fn second_consultant_takes_overlapping_slot() {
    let (engine, _) = engine_on(Arc::new(MemoryStore::new()));
    let nine = at("2024-05-02T09:00:00Z");

    let a = assert_ok!(engine.create_schedule(&fleet(), booking(nine)).await);
    let b = assert_ok!(engine.create_schedule(&fleet(), booking(nine + 10 * MINUTE_MS)).await);
    assert_eq!(a.consultant_id, "C1");
    assert_eq!(b.consultant_id, "C2");

    let err = assert_err!(engine.create_schedule(&fleet(), booking(nine + 20 * MINUTE_MS)).await);
    assert_eq!(err.code(), "no_consultant_available");

    let free = assert_ok!(engine.create_schedule(&fleet(), booking(nine + 30 * MINUTE_MS)).await);
    assert_eq!(free.consultant_id, "C1");
}

#[tokio::test]
async fn schedules_survive_wal_replay() {
    let path = temp_wal();
    let nine = at("2024-05-02T09:00:00Z");

    let created = {
        let store = Arc::new(MemoryStore::open(&path).unwrap());
        let (engine, _) = engine_on(store);
        let s = assert_ok!(engine.create_schedule(&fleet(), booking(nine)).await);
        assert_ok!(engine.reject_schedule(&dealer(), &s.id).await);
        assert_ok!(engine.create_schedule(&fleet(), booking(nine)).await)
    };

    let store = Arc::new(MemoryStore::open(&path).unwrap());
    let (engine, _) = engine_on(store);
    let reloaded = assert_ok!(engine.get_schedule(&fleet(), &created.id).await);
    assert_eq!(reloaded, created);

    let pending = assert_ok!(engine.list_schedules(&fleet(), ScheduleFilter::default()).await);
    assert_eq!(pending.items.len(), 1);
    let canceled = assert_ok!(
        engine
            .list_schedules(
                &fleet(),
                ScheduleFilter {
                    state: KeyState::Canceled,
                    ..Default::default()
                },
            )
            .await
    );
    assert_eq!(canceled.items.len(), 1);

    // The replayed booking still occupies C1 at nine.
    let next = assert_ok!(engine.create_schedule(&fleet(), booking(nine)).await);
    assert_eq!(next.consultant_id, "C2");

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[tokio::test]
async fn csv_import_creates_then_updates() {
    let (engine, _) = engine_on(Arc::new(MemoryStore::new()));
    let csv = "Chassis,Plate,Campaign,Planned Date,Dealership\n\
               9BWZZZ377VT004251,ABC1234,Recall 2024,05-10-2024,D1\n";
    let rows = read_csv_rows(csv.as_bytes()).unwrap();

    let first = engine.import_tickets(&fleet(), rows.clone()).await;
    assert_eq!(first.created, 1);
    assert!(first.errors.is_empty());

    let again = engine.import_tickets(&fleet(), rows).await;
    assert_eq!(again.created, 0);
    assert_eq!(again.updated, 1);

    let tickets = assert_ok!(engine.tickets_by_chassis(&fleet(), "9BWZZZ377VT004251", None).await);
    assert_eq!(tickets.len(), 1);
}
