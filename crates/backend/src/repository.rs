//! Scan record store abstraction.
//!
//! Handlers and the scan worker only see `dyn ScanRecordStore`, so the Postgres
//! store can be swapped for the in-memory one in tests.

use std::sync::Arc;

use async_trait::async_trait;
use shared_types::{ScanRecord, Verdict};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::NewScanRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid status value: {0}")]
    InvalidStatus(String),

    #[error("scan record {0} not found")]
    NotFound(i32),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("database error: {0}")]
    Persistence(#[source] anyhow::Error),
}

impl From<diesel::result::Error> for StoreError {
    fn from(err: diesel::result::Error) -> Self {
        StoreError::Persistence(err.into())
    }
}

/// Shared handle to whichever store the process runs with.
pub type SharedStore = Arc<dyn ScanRecordStore>;

/// Storage for classified emails.
///
/// A record is identified logically by (user_email, subject, sender, date);
/// `upsert` keeps at most one row per identity.
#[async_trait]
pub trait ScanRecordStore: Send + Sync {
    /// Insert a new row unconditionally.
    async fn insert(&self, record: NewScanRecord) -> Result<ScanRecord, StoreError>;

    /// Row with the same (user_email, subject, sender, date), if any.
    async fn find_matching(&self, record: &NewScanRecord)
        -> Result<Option<ScanRecord>, StoreError>;

    /// Overwrite the status of a row, and its creation time when given.
    async fn set_status(
        &self,
        id: i32,
        status: &str,
        created_at: Option<i64>,
    ) -> Result<ScanRecord, StoreError>;

    /// A user's records, most recent email date first.
    async fn list_by_date(&self, user_email: &str) -> Result<Vec<ScanRecord>, StoreError>;

    /// A user's records, most recently created first.
    async fn list_by_created(&self, user_email: &str) -> Result<Vec<ScanRecord>, StoreError>;

    /// Create the record, or update the verdict of the matching one.
    ///
    /// An unchanged verdict leaves the existing row untouched. A changed verdict
    /// also refreshes its creation time.
    async fn upsert(&self, record: NewScanRecord) -> Result<ScanRecord, StoreError> {
        match self.find_matching(&record).await? {
            Some(existing) if existing.status == record.status => {
                tracing::debug!("Scan record {} unchanged", existing.id);
                Ok(existing)
            }
            Some(existing) => {
                tracing::info!(
                    "Updating scan record {}: {} -> {}",
                    existing.id,
                    existing.status,
                    record.status
                );
                self.set_status(existing.id, &record.status, Some(record.created_at))
                    .await
            }
            None => {
                let created = self.insert(record).await?;
                tracing::info!("Stored new scan record {}", created.id);
                Ok(created)
            }
        }
    }

    /// Set a verdict by hand. Creation time is kept.
    async fn update_verdict(&self, id: i32, verdict: Verdict) -> Result<ScanRecord, StoreError> {
        self.set_status(id, verdict.as_str(), None).await
    }
}

/// In-process store backed by a vector.
#[derive(Debug, Default)]
pub struct MemoryScanStore {
    inner: Mutex<MemoryRows>,
}

#[derive(Debug, Default)]
struct MemoryRows {
    last_id: i32,
    rows: Vec<ScanRecord>,
}

impl MemoryScanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ScanRecordStore for MemoryScanStore {
    async fn insert(&self, record: NewScanRecord) -> Result<ScanRecord, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.last_id += 1;
        let row = ScanRecord {
            id: inner.last_id,
            user_email: record.user_email,
            subject: record.subject,
            sender: record.sender,
            date: record.date,
            body: record.body,
            status: record.status,
            created_at: record.created_at,
        };
        inner.rows.push(row.clone());
        Ok(row)
    }

    async fn find_matching(
        &self,
        record: &NewScanRecord,
    ) -> Result<Option<ScanRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rows
            .iter()
            .find(|row| record.same_identity(row))
            .cloned())
    }

    async fn set_status(
        &self,
        id: i32,
        status: &str,
        created_at: Option<i64>,
    ) -> Result<ScanRecord, StoreError> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .rows
            .iter_mut()
            .find(|row| row.id == id)
            .ok_or(StoreError::NotFound(id))?;
        row.status = status.to_string();
        if let Some(ts) = created_at {
            row.created_at = ts;
        }
        Ok(row.clone())
    }

    async fn list_by_date(&self, user_email: &str) -> Result<Vec<ScanRecord>, StoreError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<ScanRecord> = inner
            .rows
            .iter()
            .filter(|row| row.user_email == user_email)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(rows)
    }

    async fn list_by_created(&self, user_email: &str) -> Result<Vec<ScanRecord>, StoreError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<ScanRecord> = inner
            .rows
            .iter()
            .filter(|row| row.user_email == user_email)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(subject: &str, date: &str, verdict: Verdict) -> NewScanRecord {
        NewScanRecord::new(
            "alice@contoso.com",
            subject,
            "bank@evil.test",
            date,
            "body",
            verdict,
        )
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryScanStore::new();
        let first = store
            .upsert(record("Verify", "2024-05-01", Verdict::Phishing))
            .await
            .unwrap();
        let second = store
            .upsert(record("Verify", "2024-05-01", Verdict::Phishing))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_upsert_updates_changed_verdict_in_place() {
        let store = MemoryScanStore::new();
        let mut original = record("Verify", "2024-05-01", Verdict::Phishing);
        original.created_at = 100;
        let first = store.upsert(original).await.unwrap();

        let mut changed = record("Verify", "2024-05-01", Verdict::Safe);
        changed.created_at = 200;
        let second = store.upsert(changed).await.unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.status, "Safe");
        assert_eq!(second.created_at, 200);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_different_identity_creates_new_row() {
        let store = MemoryScanStore::new();
        store
            .upsert(record("Verify", "2024-05-01", Verdict::Phishing))
            .await
            .unwrap();
        store
            .upsert(record("Verify", "2024-05-02", Verdict::Phishing))
            .await
            .unwrap();
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_update_verdict_unknown_id() {
        let store = MemoryScanStore::new();
        let err = store.update_verdict(42, Verdict::Safe).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(42)));
    }

    #[tokio::test]
    async fn test_update_verdict_keeps_created_at() {
        let store = MemoryScanStore::new();
        let mut new = record("Invoice", "2024-05-01", Verdict::Phishing);
        new.created_at = 5;
        let row = store.insert(new).await.unwrap();

        let updated = store.update_verdict(row.id, Verdict::Safe).await.unwrap();
        assert_eq!(updated.status, "Safe");
        assert_eq!(updated.created_at, 5);
    }

    #[tokio::test]
    async fn test_list_orderings() {
        let store = MemoryScanStore::new();
        let mut older_mail = record("a", "2024-05-01T08:00:00Z", Verdict::Safe);
        older_mail.created_at = 300;
        let mut newer_mail = record("b", "2024-05-03T08:00:00Z", Verdict::Safe);
        newer_mail.created_at = 100;
        store.insert(older_mail).await.unwrap();
        store.insert(newer_mail).await.unwrap();
        store
            .insert(NewScanRecord::new(
                "bob@contoso.com",
                "c",
                "x",
                "2024-06-01",
                "",
                Verdict::Safe,
            ))
            .await
            .unwrap();

        let by_date = store.list_by_date("alice@contoso.com").await.unwrap();
        assert_eq!(
            by_date.iter().map(|r| r.subject.as_str()).collect::<Vec<_>>(),
            vec!["b", "a"]
        );

        let by_created = store.list_by_created("alice@contoso.com").await.unwrap();
        assert_eq!(
            by_created
                .iter()
                .map(|r| r.subject.as_str())
                .collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }
}
