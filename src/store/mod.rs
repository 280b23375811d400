//! Key-value persistence with hand-designed secondary indexes.
//!
//! Every record has a primary key `(partition, sort)` and zero or more index
//! entries, each with its own `(partition, sort)` projection. Queries are
//! equality on the partition plus an optional range on the sort key, in sort
//! order, paginated by an opaque cursor.

mod memory;
mod tables;
pub mod wal;

pub use memory::MemoryStore;
pub use tables::*;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Index name that addresses the primary key space.
pub const PRIMARY: &str = "primary";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("WAL error: {0}")]
    Wal(String),
    #[error("codec error in {table}: {message}")]
    Codec { table: String, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    pub partition: String,
    /// Empty when the entity has a simple key.
    pub sort: String,
}

impl Key {
    pub fn new(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: String::new(),
        }
    }

    pub fn composite(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexKey {
    pub index: String,
    pub partition: String,
    pub sort: String,
}

impl IndexKey {
    pub fn new(index: &str, partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            index: index.to_string(),
            partition: partition.into(),
            sort: sort.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub table: String,
    pub key: Key,
    pub indexes: Vec<IndexKey>,
    /// JSON body of the entity.
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortRange {
    BeginsWith(String),
    /// Half-open `[start, end)`.
    Between { start: String, end: String },
}

impl SortRange {
    pub fn contains(&self, sort: &str) -> bool {
        match self {
            SortRange::BeginsWith(prefix) => sort.starts_with(prefix.as_str()),
            SortRange::Between { start, end } => start.as_str() <= sort && sort < end.as_str(),
        }
    }

    /// Smallest sort key that can match.
    pub fn lower(&self) -> &str {
        match self {
            SortRange::BeginsWith(prefix) => prefix,
            SortRange::Between { start, .. } => start,
        }
    }
}

/// Position after the last returned item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub sort: String,
    pub key: Key,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexQuery {
    pub index: String,
    pub partition: String,
    pub range: Option<SortRange>,
    pub limit: Option<usize>,
    pub cursor: Option<Cursor>,
    pub descending: bool,
}

impl IndexQuery {
    pub fn new(index: &str, partition: impl Into<String>) -> Self {
        Self {
            index: index.to_string(),
            partition: partition.into(),
            range: None,
            limit: None,
            cursor: None,
            descending: false,
        }
    }

    pub fn range(mut self, range: SortRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn cursor(mut self, cursor: Option<Cursor>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<Cursor>,
}

pub type ScanFilter<'a> = &'a (dyn Fn(&Record) -> bool + Send + Sync);

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, table: &str, key: &Key) -> Result<Option<Record>, StoreError>;

    async fn query(&self, table: &str, query: &IndexQuery) -> Result<Page<Record>, StoreError>;

    async fn scan(&self, table: &str, filter: ScanFilter<'_>) -> Result<Vec<Record>, StoreError>;

    async fn put(&self, record: Record) -> Result<(), StoreError>;
}

/// A type stored in one table with its own key and index projections.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    const TABLE: &'static str;

    fn key(&self) -> Key;

    fn index_keys(&self) -> Vec<IndexKey> {
        Vec::new()
    }

    fn to_record(&self) -> Result<Record, StoreError> {
        let body = serde_json::to_string(self).map_err(|e| StoreError::Codec {
            table: Self::TABLE.to_string(),
            message: e.to_string(),
        })?;
        Ok(Record {
            table: Self::TABLE.to_string(),
            key: self.key(),
            indexes: self.index_keys(),
            body,
        })
    }

    fn from_record(record: &Record) -> Result<Self, StoreError> {
        serde_json::from_str(&record.body).map_err(|e| StoreError::Codec {
            table: Self::TABLE.to_string(),
            message: e.to_string(),
        })
    }
}

/// Typed access to a `Store`.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn Store>,
}

impl Repository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn get<E: Entity>(&self, key: &Key) -> Result<Option<E>, StoreError> {
        match self.store.get(E::TABLE, key).await? {
            Some(record) => E::from_record(&record).map(Some),
            None => Ok(None),
        }
    }

    pub async fn put<E: Entity>(&self, entity: &E) -> Result<(), StoreError> {
        self.store.put(entity.to_record()?).await
    }

    pub async fn query<E: Entity>(&self, query: &IndexQuery) -> Result<Page<E>, StoreError> {
        let page = self.store.query(E::TABLE, query).await?;
        let items = page
            .items
            .iter()
            .map(E::from_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            next_cursor: page.next_cursor,
        })
    }

    /// Every item of the partition, following cursors.
    pub async fn query_all<E: Entity>(&self, query: IndexQuery) -> Result<Vec<E>, StoreError> {
        let mut query = query;
        let mut out = Vec::new();
        loop {
            let page = self.query::<E>(&query).await?;
            out.extend(page.items);
            match page.next_cursor {
                Some(cursor) => query.cursor = Some(cursor),
                None => return Ok(out),
            }
        }
    }
}
