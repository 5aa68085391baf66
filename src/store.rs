//! Collaborator seams for job persistence and PDF archiving.
//!
//! The pipeline is write-only into both: it never reads transactions back
//! and only needs the job id returned by [`JobStore::create_job`].
//! Production deployments implement these traits over their database and
//! object storage; [`MemoryJobStore`] and [`FsObjectStore`] back the CLI
//! and the tests.

use crate::error::StoreError;
use crate::model::{ArchivedObject, JobId, NewJob, StatementJob, StatusUpdate, TransactionRecord};
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;
use uuid::Uuid;

/// Durable job and transaction storage.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new `PENDING` job.
    async fn create_job(&self, meta: &NewJob) -> Result<JobId, StoreError>;

    /// Apply a status change, optionally recording page count or error text.
    ///
    /// Implementations must reject regressions and moves out of a terminal
    /// state with [`StoreError::InvalidTransition`].
    async fn update_job_status(&self, id: JobId, update: StatusUpdate) -> Result<(), StoreError>;

    /// Insert every record for the job in one all-or-nothing write.
    async fn bulk_insert_transactions(
        &self,
        id: JobId,
        records: &[TransactionRecord],
    ) -> Result<(), StoreError>;

    /// Remember where the original PDF was archived.
    async fn attach_archive(&self, id: JobId, archive: &ArchivedObject) -> Result<(), StoreError>;
}

/// Durable storage for the original PDF.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, bytes: &[u8], filename: &str) -> Result<ArchivedObject, StoreError>;
}

// ── In-memory job store ──────────────────────────────────────────────────

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<JobId, StatementJob>,
    transactions: HashMap<JobId, Vec<TransactionRecord>>,
}

/// Process-local [`JobStore`] enforcing the job state machine.
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic mid-update cannot leave a half-written job: every mutation
    // is a single field assignment after validation.
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of a job.
    pub fn job(&self, id: JobId) -> Option<StatementJob> {
        self.lock().jobs.get(&id).cloned()
    }

    /// Every record inserted for a job, in insertion order.
    pub fn transactions(&self, id: JobId) -> Vec<TransactionRecord> {
        self.lock().transactions.get(&id).cloned().unwrap_or_default()
    }

    pub fn job_count(&self) -> usize {
        self.lock().jobs.len()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, meta: &NewJob) -> Result<JobId, StoreError> {
        let id = JobId::new();
        self.lock().jobs.insert(id, StatementJob::new(id, meta));
        debug!(job_id = %id, filename = %meta.filename, "Created job");
        Ok(id)
    }

    async fn update_job_status(&self, id: JobId, update: StatusUpdate) -> Result<(), StoreError> {
        let mut state = self.lock();
        let job = state.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if !job.status.can_transition_to(update.status) {
            return Err(StoreError::InvalidTransition {
                job_id: id,
                from: job.status,
                to: update.status,
            });
        }
        job.status = update.status;
        if update.page_count.is_some() {
            job.page_count = update.page_count;
        }
        if update.error_message.is_some() {
            job.error_message = update.error_message;
        }
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn bulk_insert_transactions(
        &self,
        id: JobId,
        records: &[TransactionRecord],
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if !state.jobs.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        state
            .transactions
            .entry(id)
            .or_default()
            .extend_from_slice(records);
        Ok(())
    }

    async fn attach_archive(&self, id: JobId, archive: &ArchivedObject) -> Result<(), StoreError> {
        let mut state = self.lock();
        let job = state.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.archive = Some(archive.clone());
        job.updated_at = Utc::now();
        Ok(())
    }
}

// ── Filesystem object store ─────────────────────────────────────────────

static RE_UNSAFE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());

/// Archives PDFs into a local directory as `<unix_millis>-<uuid8>-<stem>.pdf`.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    dir: PathBuf,
}

impl FsObjectStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Reduce an upload filename to a safe stem; never empty.
pub(crate) fn sanitise_stem(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned = RE_UNSAFE_NAME.replace_all(&stem, "_");
    let cleaned = cleaned.trim_matches(|c| c == '_' || c == '.');
    if cleaned.is_empty() {
        "statement".to_string()
    } else {
        cleaned.to_string()
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, bytes: &[u8], filename: &str) -> Result<ArchivedObject, StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let nonce = Uuid::new_v4().simple().to_string();
        let name = format!(
            "{}-{}-{}.pdf",
            Utc::now().timestamp_millis(),
            &nonce[..8],
            sanitise_stem(filename)
        );
        let tmp = self.dir.join(format!(".{name}.{nonce}.tmp"));
        let dest = self.dir.join(&name);

        if let Err(e) = tokio::fs::write(&tmp, bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::Backend(format!("archive {name} already exists")));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &dest).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        let absolute = tokio::fs::canonicalize(&dest).await?;
        debug!(path = %absolute.display(), bytes = bytes.len(), "Archived PDF");
        Ok(ArchivedObject {
            url: format!("file://{}", absolute.display()),
            reference_id: name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobStatus;
    use tempfile::TempDir;

    fn meta() -> NewJob {
        NewJob::new("user-1", "march.pdf", 1234)
    }

    #[tokio::test]
    async fn memory_store_walks_the_lifecycle() {
        let store = MemoryJobStore::new();
        let id = store.create_job(&meta()).await.unwrap();
        assert_eq!(store.job(id).unwrap().status, JobStatus::Pending);

        store
            .update_job_status(id, StatusUpdate::status(JobStatus::Processing))
            .await
            .unwrap();
        store.update_job_status(id, StatusUpdate::page_count(3)).await.unwrap();
        store
            .update_job_status(id, StatusUpdate::status(JobStatus::Completed))
            .await
            .unwrap();

        let job = store.job(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.page_count, Some(3));
        assert_eq!(job.error_message, None);
    }

    #[tokio::test]
    async fn memory_store_rejects_regression() {
        let store = MemoryJobStore::new();
        let id = store.create_job(&meta()).await.unwrap();
        store
            .update_job_status(id, StatusUpdate::status(JobStatus::Processing))
            .await
            .unwrap();
        store
            .update_job_status(id, StatusUpdate::failed("boom"))
            .await
            .unwrap();

        let err = store
            .update_job_status(id, StatusUpdate::status(JobStatus::Processing))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: JobStatus::Failed,
                to: JobStatus::Processing,
                ..
            }
        ));
        assert_eq!(store.job(id).unwrap().error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn memory_store_unknown_job() {
        let store = MemoryJobStore::new();
        let id = JobId::new();
        assert!(matches!(
            store.bulk_insert_transactions(id, &[]).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(store.transactions(id).is_empty());
    }

    #[tokio::test]
    async fn memory_store_keeps_records_and_archive() {
        let store = MemoryJobStore::new();
        let id = store.create_job(&meta()).await.unwrap();
        let records = vec![TransactionRecord {
            date: "01-03-2025".into(),
            ..Default::default()
        }];
        store.bulk_insert_transactions(id, &records).await.unwrap();
        let archive = ArchivedObject {
            url: "file:///tmp/x.pdf".into(),
            reference_id: "x.pdf".into(),
        };
        store.attach_archive(id, &archive).await.unwrap();

        assert_eq!(store.transactions(id), records);
        assert_eq!(store.job(id).unwrap().archive, Some(archive));
    }

    #[test]
    fn stem_sanitising() {
        assert_eq!(sanitise_stem("March 2025 (GTB).pdf"), "March_2025_GTB");
        assert_eq!(sanitise_stem("../../etc/passwd"), "passwd");
        assert_eq!(sanitise_stem("???.pdf"), "statement");
        assert_eq!(sanitise_stem(""), "statement");
    }

    #[tokio::test]
    async fn fs_store_archives_atomically() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path().join("archive"));

        let archived = store.put(b"%PDF-1.4 body", "march statement.pdf").await.unwrap();

        assert!(archived.reference_id.ends_with("-march_statement.pdf"));
        assert!(archived.url.starts_with("file://"));
        let entries: Vec<_> = std::fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec![archived.reference_id.clone()]);
        let stored = std::fs::read(store.dir().join(&archived.reference_id)).unwrap();
        assert_eq!(stored, b"%PDF-1.4 body");
    }

    #[tokio::test]
    async fn fs_store_keeps_every_upload_of_the_same_name() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path());

        let mut archived = Vec::new();
        for i in 0..200 {
            let body = format!("%PDF-1.4 JOB-{i}");
            archived.push(store.put(body.as_bytes(), "march.pdf").await.unwrap());
        }

        let refs: std::collections::HashSet<_> =
            archived.iter().map(|a| a.reference_id.clone()).collect();
        assert_eq!(refs.len(), 200);
        assert_eq!(std::fs::read_dir(store.dir()).unwrap().count(), 200);
        for (i, a) in archived.iter().enumerate() {
            let stored = std::fs::read(store.dir().join(&a.reference_id)).unwrap();
            assert_eq!(stored, format!("%PDF-1.4 JOB-{i}").into_bytes());
        }
    }
}
