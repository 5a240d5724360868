//! Durable store boundary
//!
//! `LogStore` is the injection point for the durable key-value/relational
//! store holding log records and DLQ entries. The atomic `insert_if_absent`
//! is the duplicate guard's claim: exactly one concurrent caller per
//! message id wins and runs dispatch, everyone else observes the existing
//! record. Backends must implement that claim with a unique-constraint
//! insert, never a read-then-write race.
//!
//! `MemoryStore` is the in-process implementation used by the binary and
//! the test suite; durable backends live outside this crate.

use crate::signal::{DlqEntry, LogRecord, MessageId};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;

/// Store-level failures; fatal for the current request
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result of the atomic duplicate-guard claim
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// This caller won the claim and must run dispatch
    Inserted,
    /// Another caller already claimed this message id
    Existing(LogRecord),
}

/// Durable store operations consumed by the pipeline
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Atomically create the record if its message id is absent
    async fn insert_if_absent(&self, record: LogRecord) -> Result<InsertOutcome, StoreError>;

    /// Fetch a record by message id
    async fn get(&self, message_id: &str) -> Result<Option<LogRecord>, StoreError>;

    /// Replace an existing record in place (status finalization)
    async fn update(&self, record: LogRecord) -> Result<(), StoreError>;

    /// Persist a DLQ entry; a no-op if the message id is already enqueued
    async fn dlq_enqueue(&self, entry: DlqEntry) -> Result<(), StoreError>;

    /// Oldest entries first (enqueue time, then attempt count), up to `limit`
    async fn dlq_list_oldest(&self, limit: usize) -> Result<Vec<DlqEntry>, StoreError>;

    /// Remove an entry after successful replay or duplicate skip
    async fn dlq_resolve(&self, message_id: &str) -> Result<(), StoreError>;

    /// Count a failed replay attempt; the entry is retained
    async fn dlq_increment_attempt(&self, message_id: &str) -> Result<(), StoreError>;

    /// Current queue depth
    async fn dlq_depth(&self) -> Result<usize, StoreError>;

    /// Reachability probe for health reporting
    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    logs: HashMap<MessageId, LogRecord>,
    dlq: Vec<DlqEntry>,
}

/// In-process store; a single mutex over both tables makes
/// `insert_if_absent` atomic with respect to concurrent claims
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn insert_if_absent(&self, record: LogRecord) -> Result<InsertOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.logs.get(&record.message_id) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        inner.logs.insert(record.message_id.clone(), record);
        Ok(InsertOutcome::Inserted)
    }

    async fn get(&self, message_id: &str) -> Result<Option<LogRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.logs.get(message_id).cloned())
    }

    async fn update(&self, record: LogRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.logs.insert(record.message_id.clone(), record);
        Ok(())
    }

    async fn dlq_enqueue(&self, entry: DlqEntry) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.dlq.iter().any(|e| e.message_id == entry.message_id) {
            return Ok(());
        }
        inner.dlq.push(entry);
        Ok(())
    }

    async fn dlq_list_oldest(&self, limit: usize) -> Result<Vec<DlqEntry>, StoreError> {
        let inner = self.inner.lock().await;
        let mut entries = inner.dlq.clone();
        entries.sort_by(|a, b| {
            a.enqueued_at
                .cmp(&b.enqueued_at)
                .then(a.attempts.cmp(&b.attempts))
        });
        entries.truncate(limit);
        Ok(entries)
    }

    async fn dlq_resolve(&self, message_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.dlq.retain(|e| e.message_id != message_id);
        Ok(())
    }

    async fn dlq_increment_attempt(&self, message_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.dlq.iter_mut().find(|e| e.message_id == message_id) {
            entry.attempts += 1;
        }
        Ok(())
    }

    async fn dlq_depth(&self) -> Result<usize, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.dlq.len())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureReason;
    use crate::signal::Signal;
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::json;
    use std::sync::Arc;

    fn entry(message_id: &str) -> DlqEntry {
        DlqEntry::new(
            message_id.to_string(),
            Signal::new("u1", json!({"m": 1})),
            None,
            FailureReason::AllAgentsFailed,
        )
    }

    #[tokio::test]
    async fn test_insert_if_absent_first_wins() {
        let store = MemoryStore::new();
        let record = LogRecord::pending("m1".to_string(), "u1");
        assert_eq!(
            store.insert_if_absent(record.clone()).await.unwrap(),
            InsertOutcome::Inserted
        );
        match store.insert_if_absent(record).await.unwrap() {
            InsertOutcome::Existing(existing) => assert_eq!(existing.message_id, "m1"),
            other => panic!("expected existing record, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_claims_single_winner() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let record = LogRecord::pending("race".to_string(), "u1");
                store.insert_if_absent(record).await.unwrap()
            }));
        }
        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() == InsertOutcome::Inserted {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
    }

    #[tokio::test]
    async fn test_update_replaces_in_place() {
        let store = MemoryStore::new();
        let mut record = LogRecord::pending("m1".to_string(), "u1");
        store.insert_if_absent(record.clone()).await.unwrap();
        record.status = crate::signal::RecordStatus::Success;
        store.update(record).await.unwrap();
        let fetched = store.get("m1").await.unwrap().unwrap();
        assert_eq!(fetched.status, crate::signal::RecordStatus::Success);
    }

    #[tokio::test]
    async fn test_dlq_enqueue_is_idempotent_per_id() {
        let store = MemoryStore::new();
        store.dlq_enqueue(entry("m1")).await.unwrap();
        store.dlq_enqueue(entry("m1")).await.unwrap();
        assert_eq!(store.dlq_depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dlq_list_oldest_orders_and_limits() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            let mut e = entry(id);
            e.enqueued_at = now - ChronoDuration::seconds(10 - i as i64);
            store.dlq_enqueue(e).await.unwrap();
        }
        let oldest = store.dlq_list_oldest(2).await.unwrap();
        assert_eq!(oldest.len(), 2);
        assert_eq!(oldest[0].message_id, "a");
        assert_eq!(oldest[1].message_id, "b");
    }

    #[tokio::test]
    async fn test_dlq_resolve_and_attempts() {
        let store = MemoryStore::new();
        store.dlq_enqueue(entry("m1")).await.unwrap();
        store.dlq_increment_attempt("m1").await.unwrap();
        store.dlq_increment_attempt("m1").await.unwrap();
        let entries = store.dlq_list_oldest(10).await.unwrap();
        assert_eq!(entries[0].attempts, 2);

        store.dlq_resolve("m1").await.unwrap();
        assert_eq!(store.dlq_depth().await.unwrap(), 0);
    }
}
