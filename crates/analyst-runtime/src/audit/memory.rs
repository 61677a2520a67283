//! In-process audit store for tests and ephemeral runs.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{AuditError, AuditRecord, AuditStore, AuditSummary, NewAuditRecord};

/// Audit store kept in memory. Lost on drop.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Copy of every record, oldest first.
    pub fn snapshot(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn record(&self, record: NewAuditRecord) -> Result<i64, AuditError> {
        // Id assignment and append share one critical section
        let mut records = self.records.lock();
        let id = records.last().map_or(1, |r| r.id + 1);
        records.push(AuditRecord::from_new(id, Utc::now(), record));
        Ok(id)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditSummary>, AuditError> {
        let records = self.records.lock();
        Ok(records.iter().rev().take(limit).map(AuditRecord::summary).collect())
    }

    async fn get(&self, id: i64) -> Result<Option<AuditRecord>, AuditError> {
        let records = self.records.lock();
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn ping(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{sample_record, ParseStatus};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_record_and_query() {
        let store = MemoryAuditStore::new();
        assert!(store.is_empty());

        let first = store.record(sample_record("first", ParseStatus::Success)).await.unwrap();
        let second = store
            .record(sample_record("second", ParseStatus::SchemaInvalid))
            .await
            .unwrap();
        assert_eq!((first, second), (1, 2));

        let recent = store.recent(10).await.unwrap();
        assert_eq!(recent.iter().map(|s| s.id).collect::<Vec<_>>(), vec![2, 1]);

        let stored = store.get(2).await.unwrap().unwrap();
        assert_eq!(stored.parse_status, ParseStatus::SchemaInvalid);
        assert!(store.get(99).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ids_unique() {
        let store = Arc::new(MemoryAuditStore::new());

        let tasks = (0..50).map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .record(sample_record(&format!("event {}", i), ParseStatus::Success))
                    .await
                    .unwrap()
            })
        });

        let ids: BTreeSet<i64> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(ids.len(), 50);
        assert_eq!(ids.iter().copied().collect::<Vec<_>>(), (1..=50).collect::<Vec<_>>());

        let stored: Vec<i64> = store.snapshot().iter().map(|r| r.id).collect();
        assert!(stored.windows(2).all(|w| w[0] < w[1]));
    }
}
