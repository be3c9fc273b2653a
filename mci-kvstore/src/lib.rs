//! Ordered key-value store adapter.
//!
//! The orchestration engine treats its store as an external ordered
//! string to string map with four operations plus an atomic put-if-absent used
//! to claim unique names. Production deployments plug an etcd- or
//! BoltDB-backed implementation in behind [`KvStore`]; the in-memory
//! [`MemKvStore`] backs every test.
//!
//! Higher layers must tolerate partial writes across multiple keys and
//! reconcile via idempotent puts; no cross-key transaction is assumed.

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

/// One key/value pair returned by a prefix scan.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KvPair {
    pub key: String,
    pub value: String,
}

/// Errors surfaced by the store adapter.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// The value at `key` failed structural decoding. Callers apply the
    /// corrupted-state policy: delete the key and treat it as absent.
    #[error("corrupted record at '{key}': {source}")]
    Corrupted {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The record being written could not be serialized.
    #[error("failed to encode record for '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// An ordered string to string store.
///
/// `list` returns pairs in lexicographic key order; that scan order is the
/// only ordering guarantee the engine builds on.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a single value.
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Last-writer-wins write.
    async fn put(&self, key: &str, value: &str) -> Result<(), KvError>;

    /// Atomic put-if-absent. Returns false (and writes nothing) when the key
    /// already exists.
    async fn create(&self, key: &str, value: &str) -> Result<bool, KvError>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// All pairs whose key starts with `prefix`, ordered by key.
    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>, KvError>;
}

/// Read and decode a JSON record.
///
/// Returns `KvError::Corrupted` when the key exists but does not decode;
/// the caller decides whether to delete it.
pub async fn get_record<T: DeserializeOwned>(
    kv: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, KvError> {
    match kv.get(key).await? {
        None => Ok(None),
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(source) => Err(KvError::Corrupted {
                key: key.to_string(),
                source,
            }),
        },
    }
}

/// Encode and write a JSON record.
pub async fn put_record<T: Serialize>(kv: &dyn KvStore, key: &str, value: &T) -> Result<(), KvError> {
    let raw = serde_json::to_string(value).map_err(|source| KvError::Encode {
        key: key.to_string(),
        source,
    })?;
    kv.put(key, &raw).await
}

/// Encode and write a JSON record only if the key is absent.
pub async fn create_record<T: Serialize>(
    kv: &dyn KvStore,
    key: &str,
    value: &T,
) -> Result<bool, KvError> {
    let raw = serde_json::to_string(value).map_err(|source| KvError::Encode {
        key: key.to_string(),
        source,
    })?;
    kv.create(key, &raw).await
}

/// In-memory [`KvStore`] over an ordered map.
#[derive(Default)]
pub struct MemKvStore {
    inner: RwLock<BTreeMap<String, String>>,
}

impl MemKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys; test helper.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl KvStore for MemKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.inner
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn create(&self, key: &str, value: &str) -> Result<bool, KvError> {
        let mut inner = self.inner.write().await;
        if inner.contains_key(key) {
            return Ok(false);
        }
        inner.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.inner.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>, KvError> {
        let inner = self.inner.read().await;
        let pairs = inner
            .range::<String, _>((Bound::Included(prefix.to_string()), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| KvPair {
                key: k.clone(),
                value: v.clone(),
            })
            .collect();
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde::{Deserialize, Serialize};

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct Record {
        name: String,
        size: u32,
    }

    #[tokio::test]
    async fn list_is_ordered_and_prefix_bounded() {
        let kv = MemKvStore::new();
        kv.put("/ns/demo/mci/m1/vm/v-3", "c").await.unwrap();
        kv.put("/ns/demo/mci/m1/vm/v-1", "a").await.unwrap();
        kv.put("/ns/demo/mci/m1/vm/v-2", "b").await.unwrap();
        kv.put("/ns/demo/mci/m10", "other").await.unwrap();

        let pairs = kv.list("/ns/demo/mci/m1/").await.unwrap();
        let keys: Vec<_> = pairs.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(
            keys,
            [
                "/ns/demo/mci/m1/vm/v-1",
                "/ns/demo/mci/m1/vm/v-2",
                "/ns/demo/mci/m1/vm/v-3",
            ]
        );
    }

    #[tokio::test]
    async fn create_is_put_if_absent() {
        let kv = MemKvStore::new();
        assert!(kv.create("/ns/demo/mci/m1", "one").await.unwrap());
        assert!(!kv.create("/ns/demo/mci/m1", "two").await.unwrap());
        assert_eq!(kv.get("/ns/demo/mci/m1").await.unwrap().unwrap(), "one");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let kv = MemKvStore::new();
        kv.put("k", "v").await.unwrap();
        kv.delete("k").await.unwrap();
        kv.delete("k").await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn record_round_trip_and_corruption() {
        let kv = MemKvStore::new();
        let record = Record {
            name: "v".into(),
            size: 3,
        };
        put_record(&kv, "/r", &record).await.unwrap();
        let back: Option<Record> = get_record(&kv, "/r").await.unwrap();
        assert_eq!(back, Some(record));

        kv.put("/r", "{not json").await.unwrap();
        match get_record::<Record>(&kv, "/r").await {
            Err(KvError::Corrupted { key, .. }) => assert_eq!(key, "/r"),
            other => panic!("expected Corrupted, got {other:?}"),
        }
    }
}
