use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use ulid::Ulid;

use fleetcheck::auth::{Caller, Role};
use fleetcheck::blob::MemoryBlobStore;
use fleetcheck::cache::IdentifierCache;
use fleetcheck::directory::{Consultant, Dealership, StaticDirectory};
use fleetcheck::engine::{Engine, EngineSettings, ScheduleFilter, ScheduleInput, Services};
use fleetcheck::model::{DAY_MS, MINUTE_MS, Ms};
use fleetcheck::notify::NotifyHub;
use fleetcheck::store::MemoryStore;

const SLOT: Ms = 30 * MINUTE_MS;
const CONSULTANTS: usize = 5;
const DEALERSHIPS: usize = 10;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn directory() -> StaticDirectory {
    let dealerships = (0..DEALERSHIPS)
        .map(|d| Dealership {
            id: format!("D{d}"),
            name: format!("Dealership {d}"),
            city: None,
            consultants: (0..CONSULTANTS)
                .map(|c| Consultant {
                    id: format!("D{d}-C{c}"),
                    name: format!("Consultant {c}"),
                    active: true,
                })
                .collect(),
        })
        .collect();
    StaticDirectory::new(dealerships)
}

fn engine(store: Arc<MemoryStore>) -> Arc<Engine> {
    let directory = Arc::new(directory());
    let services = Services {
        directory: directory.clone(),
        locator: directory,
        notifier: Arc::new(NotifyHub::new()),
        blobs: Arc::new(MemoryBlobStore::new()),
    };
    let settings = EngineSettings {
        slot_ms: SLOT,
        ..Default::default()
    };
    Arc::new(Engine::new(store, services, IdentifierCache::default(), settings))
}

fn booking(dealership: usize, scheduled_at: Ms) -> ScheduleInput {
    ScheduleInput {
        dealership_id: Some(format!("D{dealership}")),
        scheduled_at,
        plate: "ABC1234".into(),
        chassis: "9BWZZZ377VT004251".into(),
        ..Default::default()
    }
}

fn fleet() -> Caller {
    Caller::new(Role::Fleet, "F1", "bench")
}

async fn phase1_sequential(engine: &Engine) {
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        // Walk the slots of one dealership; every consultant fills up in turn.
        let at = (i / CONSULTANTS) as Ms * SLOT;
        let t = Instant::now();
        engine.create_schedule(&fleet(), booking(0, at)).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} schedules in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("create latency", &mut latencies);
}

async fn phase2_contended(engine: Arc<Engine>) {
    let n_tasks = 50;
    let n_slots = 40;
    let base = 30 * DAY_MS;
    let booked = Arc::new(AtomicUsize::new(0));
    let refused = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let engine = engine.clone();
        let booked = booked.clone();
        let refused = refused.clone();
        handles.push(tokio::spawn(async move {
            for slot in 0..n_slots {
                match engine.create_schedule(&fleet(), booking(1, base + slot * SLOT)).await {
                    Ok(_) => booked.fetch_add(1, Ordering::Relaxed),
                    Err(_) => refused.fetch_add(1, Ordering::Relaxed),
                };
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let booked = booked.load(Ordering::Relaxed);
    let refused = refused.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks x {n_slots} slots in {:.2}s: {booked} booked, {refused} refused",
        elapsed.as_secs_f64()
    );
    let expected = n_slots as usize * CONSULTANTS;
    if booked != expected {
        println!("  !! expected exactly {expected} bookings");
    }
}

async fn phase3_read_under_load(engine: Arc<Engine>) {
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let engine = engine.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let mut i: Ms = 0;
            while !stop.load(Ordering::Relaxed) {
                let at = 60 * DAY_MS + (i / CONSULTANTS as Ms) * SLOT;
                let _ = engine.create_schedule(&fleet(), booking(2 + w, at)).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let engine = engine.clone();
        reader_handles.push(tokio::spawn(async move {
            let dealer = Caller::new(Role::Dealership, format!("D{}", r % DEALERSHIPS), "bench");
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                engine
                    .list_schedules(
                        &dealer,
                        ScheduleFilter {
                            limit: Some(100),
                            ..Default::default()
                        },
                    )
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }
    print_latency("list_schedules", &mut all_latencies);
}

#[tokio::main]
async fn main() {
    let dir = std::env::temp_dir().join(format!("fleetcheck_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let store = Arc::new(MemoryStore::open(&dir.join("fleetcheck.wal")).unwrap());
    let engine = engine(store.clone());

    println!("=== fleetcheck stress benchmark ===");
    println!("wal: {}\n", dir.display());

    println!("[phase 1] sequential schedule creation");
    phase1_sequential(&engine).await;

    println!("\n[phase 2] contended slots");
    phase2_contended(engine.clone()).await;

    println!("\n[phase 3] listing under write load");
    phase3_read_under_load(engine.clone()).await;

    println!("\n[compaction]");
    let t = Instant::now();
    store.compact().await.unwrap();
    println!("  compacted in {:.2}ms", t.elapsed().as_secs_f64() * 1000.0);

    let _ = std::fs::remove_dir_all(&dir);
    println!("\n=== done ===");
}
