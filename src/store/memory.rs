use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};

use super::wal::{StoreEvent, Wal};
use super::{Cursor, IndexQuery, Key, PRIMARY, Page, Record, ScanFilter, SortRange, Store, StoreError};
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct IndexEntry {
    partition: String,
    sort: String,
    key: Key,
}

#[derive(Default)]
struct Table {
    rows: BTreeMap<Key, Record>,
    indexes: HashMap<String, BTreeSet<IndexEntry>>,
}

impl Table {
    fn apply(&mut self, record: Record) {
        if let Some(old) = self.rows.get(&record.key) {
            for ik in &old.indexes {
                if let Some(set) = self.indexes.get_mut(&ik.index) {
                    set.remove(&IndexEntry {
                        partition: ik.partition.clone(),
                        sort: ik.sort.clone(),
                        key: old.key.clone(),
                    });
                }
            }
        }
        for ik in &record.indexes {
            self.indexes
                .entry(ik.index.clone())
                .or_default()
                .insert(IndexEntry {
                    partition: ik.partition.clone(),
                    sort: ik.sort.clone(),
                    key: record.key.clone(),
                });
        }
        self.rows.insert(record.key.clone(), record);
    }

    /// Matching (sort, key) pairs of one partition, ascending.
    fn matches(&self, query: &IndexQuery) -> Vec<(String, Key)> {
        let lower = query.range.as_ref().map_or("", SortRange::lower);
        let in_range = |sort: &str| query.range.as_ref().is_none_or(|r| r.contains(sort));

        if query.index == PRIMARY {
            let start = Key::composite(query.partition.clone(), lower);
            return self
                .rows
                .range(start..)
                .take_while(|(k, _)| k.partition == query.partition)
                .filter(|(k, _)| in_range(&k.sort))
                .map(|(k, _)| (k.sort.clone(), k.clone()))
                .collect();
        }

        let Some(set) = self.indexes.get(&query.index) else {
            return Vec::new();
        };
        let start = IndexEntry {
            partition: query.partition.clone(),
            sort: lower.to_string(),
            key: Key::default(),
        };
        set.range(start..)
            .take_while(|e| e.partition == query.partition)
            .filter(|e| in_range(&e.sort))
            .map(|e| (e.sort.clone(), e.key.clone()))
            .collect()
    }

    fn query(&self, query: &IndexQuery) -> Page<Record> {
        let mut hits = self.matches(query);
        if query.descending {
            hits.reverse();
        }
        if let Some(cursor) = &query.cursor {
            let pos = (cursor.sort.clone(), cursor.key.clone());
            hits.retain(|hit| if query.descending { *hit < pos } else { *hit > pos });
        }

        let limit = query.limit.unwrap_or(usize::MAX).max(1);
        let next_cursor = if hits.len() > limit {
            let (sort, key) = hits[limit - 1].clone();
            Some(Cursor { sort, key })
        } else {
            None
        };
        let items = hits
            .into_iter()
            .take(limit)
            .filter_map(|(_, key)| self.rows.get(&key).cloned())
            .collect();
        Page { items, next_cursor }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

type Ack<T> = oneshot::Sender<io::Result<T>>;

enum WalCommand {
    Append { event: StoreEvent, ack: Ack<()> },
    Control(Control),
}

/// Commands that must not be reordered with appends around them.
enum Control {
    Compact { events: Vec<StoreEvent>, ack: Ack<()> },
    AppendsSinceCompact { ack: oneshot::Sender<u64> },
}

/// Owns the WAL. Each append that finds the writer idle opens a batch; every
/// append already queued behind it joins that batch, and one fsync commits
/// them all. A control command ends the batch and runs after it.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let first = match cmd {
            WalCommand::Append { event, ack } => (event, ack),
            WalCommand::Control(control) => {
                run_control(&mut wal, control);
                continue;
            }
        };
        let mut batch = vec![first];
        let mut after = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, ack } => batch.push((event, ack)),
                WalCommand::Control(control) => {
                    after = Some(control);
                    break;
                }
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(control) = after {
            run_control(&mut wal, control);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<(StoreEvent, Ack<()>)>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so a partial frame is not left
    // buffered in front of the next batch.
    let result = result.and(wal.flush_sync());
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL commit of {} records failed: {e}", batch.len());
    }
    for (_, ack) in batch {
        let _ = ack.send(match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        });
    }
}

fn run_control(wal: &mut Wal, control: Control) {
    match control {
        Control::Compact { events, ack } => {
            let _ = ack.send(wal.compact(&events));
        }
        Control::AppendsSinceCompact { ack } => {
            let _ = ack.send(wal.appends_since_compact());
        }
    }
}

/// In-memory tables, optionally backed by a WAL for durability.
pub struct MemoryStore {
    tables: DashMap<String, Arc<RwLock<Table>>>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
    /// Puts hold it shared, compaction exclusive. A put acknowledged by the
    /// writer is therefore either in the compaction snapshot or appended
    /// after the swap.
    compaction_gate: RwLock<()>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Volatile store, used by tests and one-shot tools.
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            wal_tx: None,
            compaction_gate: RwLock::new(()),
        }
    }

    /// Replay the WAL at `path` and start the group-commit writer.
    /// Must be called from within a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut tables: HashMap<String, Table> = HashMap::new();
        let replayed = events.len();
        for StoreEvent::Put(record) in events {
            tables.entry(record.table.clone()).or_default().apply(record);
        }
        tracing::info!("replayed {replayed} WAL records from {}", path.display());

        Ok(Self {
            tables: tables
                .into_iter()
                .map(|(name, t)| (name, Arc::new(RwLock::new(t))))
                .collect(),
            wal_tx: Some(wal_tx),
            compaction_gate: RwLock::new(()),
        })
    }

    fn table(&self, name: &str) -> Option<Arc<RwLock<Table>>> {
        self.tables.get(name).map(|t| t.value().clone())
    }

    fn table_or_create(&self, name: &str) -> Arc<RwLock<Table>> {
        self.tables
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Table::default())))
            .value()
            .clone()
    }

    /// Send a command to the writer and wait for it to be durable.
    async fn wal_request(&self, command: impl FnOnce(Ack<()>) -> WalCommand) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let (ack, done) = oneshot::channel();
        wal_tx
            .send(command(ack))
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        done.await
            .map_err(|_| StoreError::Wal("WAL writer dropped the request".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// Rewrite the WAL with one put per live record.
    pub async fn compact(&self) -> Result<(), StoreError> {
        if self.wal_tx.is_none() {
            return Ok(());
        }
        let _exclusive = self.compaction_gate.write().await;
        let tables: Vec<Arc<RwLock<Table>>> = self.tables.iter().map(|t| t.value().clone()).collect();
        let mut events = Vec::new();
        for table in tables {
            let guard = table.read().await;
            events.extend(guard.rows.values().cloned().map(StoreEvent::Put));
        }
        let records = events.len();
        self.wal_request(|ack| WalCommand::Control(Control::Compact { events, ack }))
            .await?;
        tracing::debug!("WAL compacted to {records} records");
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let Some(wal_tx) = &self.wal_tx else {
            return 0;
        };
        let (ack, count) = oneshot::channel();
        let command = WalCommand::Control(Control::AppendsSinceCompact { ack });
        if wal_tx.send(command).await.is_err() {
            return 0;
        }
        count.await.unwrap_or(0)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, table: &str, key: &Key) -> Result<Option<Record>, StoreError> {
        let Some(t) = self.table(table) else {
            return Ok(None);
        };
        let guard = t.read().await;
        Ok(guard.rows.get(key).cloned())
    }

    async fn query(&self, table: &str, query: &IndexQuery) -> Result<Page<Record>, StoreError> {
        let Some(t) = self.table(table) else {
            return Ok(Page {
                items: Vec::new(),
                next_cursor: None,
            });
        };
        let guard = t.read().await;
        Ok(guard.query(query))
    }

    async fn scan(&self, table: &str, filter: ScanFilter<'_>) -> Result<Vec<Record>, StoreError> {
        let Some(t) = self.table(table) else {
            return Ok(Vec::new());
        };
        let guard = t.read().await;
        Ok(guard.rows.values().filter(|r| filter(r)).cloned().collect())
    }

    async fn put(&self, record: Record) -> Result<(), StoreError> {
        let _shared = self.compaction_gate.read().await;
        let table = self.table_or_create(&record.table);
        let mut guard = table.write().await;
        self.wal_request(|ack| WalCommand::Append {
            event: StoreEvent::Put(record.clone()),
            ack,
        })
        .await?;
        guard.apply(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::IndexKey;

    fn record(id: &str, idx: &[(&str, &str, &str)]) -> Record {
        Record {
            table: "things".into(),
            key: Key::new(id),
            indexes: idx
                .iter()
                .map(|(i, p, s)| IndexKey::new(i, *p, *s))
                .collect(),
            body: format!("{{\"id\":\"{id}\"}}"),
        }
    }

    fn ids(page: &Page<Record>) -> Vec<&str> {
        page.items.iter().map(|r| r.key.partition.as_str()).collect()
    }

    #[tokio::test]
    async fn put_get_overwrite() {
        let store = MemoryStore::new();
        store.put(record("a", &[])).await.unwrap();
        let mut updated = record("a", &[]);
        updated.body = "{\"v\":2}".into();
        store.put(updated.clone()).await.unwrap();
        assert_eq!(store.get("things", &Key::new("a")).await.unwrap(), Some(updated));
        assert_eq!(store.get("things", &Key::new("b")).await.unwrap(), None);
        assert_eq!(store.get("other", &Key::new("a")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn index_entries_follow_updates() {
        let store = MemoryStore::new();
        store.put(record("a", &[("by_owner", "o1", "PENDING#1")])).await.unwrap();
        store.put(record("a", &[("by_owner", "o1", "CANCELED#1")])).await.unwrap();

        let pending = IndexQuery::new("by_owner", "o1").range(SortRange::BeginsWith("PENDING#".into()));
        assert!(store.query("things", &pending).await.unwrap().items.is_empty());

        let canceled = IndexQuery::new("by_owner", "o1").range(SortRange::BeginsWith("CANCELED#".into()));
        assert_eq!(ids(&store.query("things", &canceled).await.unwrap()), vec!["a"]);
    }

    #[tokio::test]
    async fn range_query_is_half_open_and_partitioned() {
        let store = MemoryStore::new();
        store.put(record("a", &[("ix", "p1", "10")])).await.unwrap();
        store.put(record("b", &[("ix", "p1", "20")])).await.unwrap();
        store.put(record("c", &[("ix", "p1", "30")])).await.unwrap();
        store.put(record("d", &[("ix", "p2", "15")])).await.unwrap();

        let q = IndexQuery::new("ix", "p1").range(SortRange::Between {
            start: "10".into(),
            end: "30".into(),
        });
        assert_eq!(ids(&store.query("things", &q).await.unwrap()), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn pagination_and_descending() {
        let store = MemoryStore::new();
        for (id, sort) in [("a", "1"), ("b", "2"), ("c", "3")] {
            store.put(record(id, &[("ix", "p", sort)])).await.unwrap();
        }

        let q = IndexQuery::new("ix", "p").limit(2);
        let first = store.query("things", &q).await.unwrap();
        assert_eq!(ids(&first), vec!["a", "b"]);
        let second = store
            .query("things", &q.clone().cursor(first.next_cursor))
            .await
            .unwrap();
        assert_eq!(ids(&second), vec!["c"]);
        assert!(second.next_cursor.is_none());

        let desc = IndexQuery::new("ix", "p").descending().limit(1);
        let page = store.query("things", &desc).await.unwrap();
        assert_eq!(ids(&page), vec!["c"]);
        let page = store
            .query("things", &desc.clone().cursor(page.next_cursor))
            .await
            .unwrap();
        assert_eq!(ids(&page), vec!["b"]);
    }

    #[tokio::test]
    async fn primary_key_range() {
        let store = MemoryStore::new();
        for sort in ["01", "02", "03"] {
            let mut r = record("log", &[]);
            r.key = Key::composite("entity-1", sort);
            store.put(r).await.unwrap();
        }
        let mut other = record("log", &[]);
        other.key = Key::composite("entity-2", "01");
        store.put(other).await.unwrap();

        let page = store
            .query("things", &IndexQuery::new(PRIMARY, "entity-1"))
            .await
            .unwrap();
        let sorts: Vec<&str> = page.items.iter().map(|r| r.key.sort.as_str()).collect();
        assert_eq!(sorts, vec!["01", "02", "03"]);
    }

    #[tokio::test]
    async fn scan_with_filter() {
        let store = MemoryStore::new();
        store.put(record("a", &[])).await.unwrap();
        store.put(record("b", &[])).await.unwrap();
        let hits = store.scan("things", &|r| r.key.partition == "b").await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn wal_replay_restores_tables_and_indexes() {
        let dir = std::env::temp_dir().join("fleetcheck_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("replay.wal");
        let _ = std::fs::remove_file(&path);

        {
            let store = MemoryStore::open(&path).unwrap();
            store.put(record("a", &[("ix", "p", "1")])).await.unwrap();
            store.put(record("a", &[("ix", "p", "2")])).await.unwrap();
            assert_eq!(store.appends_since_compact().await, 2);
            store.compact().await.unwrap();
            assert_eq!(store.appends_since_compact().await, 0);
        }

        let store = MemoryStore::open(&path).unwrap();
        let page = store
            .query("things", &IndexQuery::new("ix", "p"))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].indexes[0].sort, "2");
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn compaction_during_puts_keeps_every_acknowledged_record() {
        let dir = std::env::temp_dir().join("fleetcheck_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("compact_race.wal");
        let _ = std::fs::remove_file(&path);

        {
            let store = Arc::new(MemoryStore::open(&path).unwrap());
            let writer = {
                let store = store.clone();
                tokio::spawn(async move {
                    for i in 0..200 {
                        let mut r = record(&format!("r{i:03}"), &[]);
                        // Spread over tables so some are created mid-compaction.
                        r.table = format!("things{}", i % 7);
                        store.put(r).await.unwrap();
                    }
                })
            };
            let compactor = {
                let store = store.clone();
                tokio::spawn(async move {
                    for _ in 0..50 {
                        store.compact().await.unwrap();
                        tokio::task::yield_now().await;
                    }
                })
            };
            writer.await.unwrap();
            compactor.await.unwrap();
        }

        let store = MemoryStore::open(&path).unwrap();
        let mut total = 0;
        for t in 0..7 {
            total += store.scan(&format!("things{t}"), &|_| true).await.unwrap().len();
        }
        assert_eq!(total, 200);
        let _ = std::fs::remove_file(&path);
    }
}
