use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::model::{Ms, now_ms};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMeta {
    pub key: String,
    pub content_type: String,
    pub size: usize,
    pub uploaded_at: Ms,
}

#[derive(Debug, Clone)]
pub struct Blob {
    pub meta: BlobMeta,
    pub data: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
    #[error("blob backend failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, content_type: &str, data: Bytes) -> Result<BlobMeta, BlobError>;

    async fn get(&self, key: &str) -> Result<Option<Blob>, BlobError>;

    /// Metadata of every blob under `prefix`, in key order.
    async fn list(&self, prefix: &str) -> Result<Vec<BlobMeta>, BlobError>;

    /// Returns whether a blob was removed.
    async fn delete(&self, key: &str) -> Result<bool, BlobError>;
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Blob>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, content_type: &str, data: Bytes) -> Result<BlobMeta, BlobError> {
        let meta = BlobMeta {
            key: key.to_string(),
            content_type: content_type.to_string(),
            size: data.len(),
            uploaded_at: now_ms(),
        };
        self.blobs.insert(
            key.to_string(),
            Blob {
                meta: meta.clone(),
                data,
            },
        );
        Ok(meta)
    }

    async fn get(&self, key: &str) -> Result<Option<Blob>, BlobError> {
        Ok(self.blobs.get(key).map(|b| b.value().clone()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobMeta>, BlobError> {
        let mut metas: Vec<BlobMeta> = self
            .blobs
            .iter()
            .filter(|b| b.key().starts_with(prefix))
            .map(|b| b.meta.clone())
            .collect();
        metas.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(metas)
    }

    async fn delete(&self, key: &str) -> Result<bool, BlobError> {
        Ok(self.blobs.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_by_prefix_in_key_order() {
        let store = MemoryBlobStore::new();
        store.put("occurrences/o1/b.jpg", "image/jpeg", Bytes::from_static(b"b")).await.unwrap();
        store.put("occurrences/o1/a.pdf", "application/pdf", Bytes::from_static(b"aa")).await.unwrap();
        store.put("occurrences/o2/c.jpg", "image/jpeg", Bytes::from_static(b"c")).await.unwrap();

        let listed = store.list("occurrences/o1/").await.unwrap();
        let keys: Vec<&str> = listed.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["occurrences/o1/a.pdf", "occurrences/o1/b.jpg"]);
        assert_eq!(listed[0].size, 2);

        assert!(store.delete("occurrences/o1/a.pdf").await.unwrap());
        assert!(!store.delete("occurrences/o1/a.pdf").await.unwrap());
        assert!(store.get("occurrences/o1/a.pdf").await.unwrap().is_none());
    }
}
