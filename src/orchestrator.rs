//! The ingestion state machine: `PENDING → PROCESSING → COMPLETED | FAILED`.
//!
//! ## Stage order
//!
//! ```text
//! claim ─▶ PROCESSING ─▶ archive ─▶ validate ─▶ render ─▶ page count ─▶ extract ─▶ insert ─▶ COMPLETED
//!                        └──────────── cancellable / time-bounded ────────────┘
//! ```
//!
//! `PROCESSING` is written before any remote call so a crash leaves an
//! inspectable job rather than a silent loss. Every classified failure is
//! recorded as `FAILED` with the error's display text before it is
//! returned. Once extraction has produced records the commit (insert +
//! `COMPLETED`) runs to completion; cancellation only interrupts the
//! stages before it.
//!
//! A job id is owned by one invocation at a time: a second concurrent
//! `process` for the same id fails fast with
//! [`IngestionError::AlreadyProcessing`].

use crate::config::IngestionConfig;
use crate::error::IngestionError;
use crate::model::{
    ArchivedObject, JobId, JobStatus, NewJob, StatementJob, StatusUpdate, TransactionRecord,
};
use crate::pipeline::extract::TransactionExtractor;
use crate::pipeline::input::validate_pdf;
use crate::pipeline::render::PageRenderer;
use crate::progress::ProgressCallback;
use crate::store::{JobStore, ObjectStore};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Per-invocation inputs that are not part of the job record.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Document password for encrypted statements.
    pub password: Option<String>,
    /// Cancelling the token aborts the in-flight stage; the job ends `FAILED`.
    pub cancel: Option<CancellationToken>,
}

impl ProcessOptions {
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Successful end state of a job.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionOutcome {
    /// The job as last written (`COMPLETED`, page count, archive).
    pub job: StatementJob,
    /// Possibly empty; zero transactions is a valid outcome.
    pub transactions: Vec<TransactionRecord>,
}

struct StagesDone {
    archive: ArchivedObject,
    page_count: usize,
    transactions: Vec<TransactionRecord>,
}

/// Drives one statement through rendering and extraction.
#[derive(Clone)]
pub struct IngestionOrchestrator {
    renderer: Arc<dyn PageRenderer>,
    extractor: Arc<dyn TransactionExtractor>,
    jobs: Arc<dyn JobStore>,
    objects: Arc<dyn ObjectStore>,
    config: IngestionConfig,
    progress: Option<ProgressCallback>,
    claims: Arc<Mutex<HashSet<JobId>>>,
}

impl IngestionOrchestrator {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        extractor: Arc<dyn TransactionExtractor>,
        jobs: Arc<dyn JobStore>,
        objects: Arc<dyn ObjectStore>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            renderer,
            extractor,
            jobs,
            objects,
            config,
            progress: None,
            claims: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_progress(mut self, cb: ProgressCallback) -> Self {
        self.progress = Some(cb);
        self
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.config
    }

    /// Create a `PENDING` job for `meta` and process it.
    pub async fn submit(
        &self,
        meta: NewJob,
        pdf: &[u8],
        options: ProcessOptions,
    ) -> Result<IngestionOutcome, IngestionError> {
        let id = self.jobs.create_job(&meta).await?;
        info!(job_id = %id, filename = %meta.filename, bytes = pdf.len(), "Statement accepted");
        let job = StatementJob::new(id, &meta);
        self.process_with(&job, pdf, options).await
    }

    /// Process a `PENDING` job with no password and no cancellation token.
    pub async fn process(
        &self,
        job: &StatementJob,
        pdf: &[u8],
    ) -> Result<IngestionOutcome, IngestionError> {
        self.process_with(job, pdf, ProcessOptions::default()).await
    }

    pub async fn process_with(
        &self,
        job: &StatementJob,
        pdf: &[u8],
        options: ProcessOptions,
    ) -> Result<IngestionOutcome, IngestionError> {
        let _claim = ClaimGuard::acquire(&self.claims, job.id)?;
        let mut job = job.clone();
        if job.status != JobStatus::Pending {
            return Err(IngestionError::InvalidTransition {
                job_id: job.id,
                from: job.status,
                to: JobStatus::Processing,
            });
        }

        self.jobs
            .update_job_status(job.id, StatusUpdate::status(JobStatus::Processing))
            .await?;
        job.transition(JobStatus::Processing)?;
        self.notify_status(&job);
        info!(job_id = %job.id, "Processing statement");

        let stages = self.run_stages(job.id, &job.filename, pdf, options.password.as_deref());
        let bounded = async {
            match self.config.job_timeout {
                Some(limit) => tokio::time::timeout(limit, stages)
                    .await
                    .unwrap_or(Err(IngestionError::Timeout { after: limit })),
                None => stages.await,
            }
        };
        let result = match &options.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(IngestionError::Cancelled),
                r = bounded => r,
            },
            None => bounded.await,
        };

        let done = match result {
            Ok(done) => done,
            Err(e) => return Err(self.record_failure(&mut job, e).await),
        };

        job.archive = Some(done.archive);
        job.page_count = Some(done.page_count);

        if done.transactions.is_empty() {
            info!(job_id = %job.id, "No transactions found");
        } else if let Err(e) = self
            .jobs
            .bulk_insert_transactions(job.id, &done.transactions)
            .await
        {
            return Err(self.record_failure(&mut job, e.into()).await);
        }

        self.jobs
            .update_job_status(job.id, StatusUpdate::status(JobStatus::Completed))
            .await?;
        job.transition(JobStatus::Completed)?;
        self.notify_status(&job);
        info!(
            job_id = %job.id,
            pages = done.page_count,
            transactions = done.transactions.len(),
            "Statement completed"
        );

        Ok(IngestionOutcome {
            job,
            transactions: done.transactions,
        })
    }

    async fn run_stages(
        &self,
        id: JobId,
        filename: &str,
        pdf: &[u8],
        password: Option<&str>,
    ) -> Result<StagesDone, IngestionError> {
        let archive = self
            .objects
            .put(pdf, filename)
            .await
            .map_err(|e| IngestionError::ArchiveFailed {
                detail: e.to_string(),
            })?;
        self.jobs.attach_archive(id, &archive).await?;
        info!(job_id = %id, url = %archive.url, "Archived original PDF");

        validate_pdf(pdf)?;

        let pages = self
            .renderer
            .render(pdf, self.config.max_pages, password)
            .await?;
        if pages.is_empty() {
            return Err(IngestionError::RenderingFailed {
                detail: "renderer returned no pages".into(),
            });
        }
        let page_count = pages.len();
        if let Some(cb) = &self.progress {
            cb.on_pages_rendered(id, page_count);
        }
        self.jobs
            .update_job_status(id, StatusUpdate::page_count(page_count))
            .await?;

        let transactions = self.extractor.extract(&pages).await?;
        Ok(StagesDone {
            archive,
            page_count,
            transactions,
        })
    }

    /// Best-effort `FAILED` write; always hands back the original error.
    async fn record_failure(&self, job: &mut StatementJob, err: IngestionError) -> IngestionError {
        let message = err.to_string();
        error!(job_id = %job.id, kind = ?err.kind(), "Statement failed: {message}");

        match self
            .jobs
            .update_job_status(job.id, StatusUpdate::failed(message.clone()))
            .await
        {
            Ok(()) => {
                if job.transition(JobStatus::Failed).is_ok() {
                    job.error_message = Some(message);
                    self.notify_status(job);
                }
            }
            Err(store_err) => {
                warn!(job_id = %job.id, "Could not record FAILED status: {store_err}");
            }
        }
        err
    }

    fn notify_status(&self, job: &StatementJob) {
        if let Some(cb) = &self.progress {
            cb.on_status_change(job.id, job.status);
        }
    }
}

/// Registration of a job id in the claim set; released on drop.
struct ClaimGuard {
    claims: Arc<Mutex<HashSet<JobId>>>,
    id: JobId,
}

impl ClaimGuard {
    fn acquire(claims: &Arc<Mutex<HashSet<JobId>>>, id: JobId) -> Result<Self, IngestionError> {
        let inserted = claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        if !inserted {
            warn!(job_id = %id, "Rejected concurrent processing of job");
            return Err(IngestionError::AlreadyProcessing { job_id: id });
        }
        Ok(Self {
            claims: Arc::clone(claims),
            id,
        })
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_exclusive_until_dropped() {
        let claims = Arc::new(Mutex::new(HashSet::new()));
        let id = JobId::new();

        let first = ClaimGuard::acquire(&claims, id).unwrap();
        assert!(matches!(
            ClaimGuard::acquire(&claims, id),
            Err(IngestionError::AlreadyProcessing { .. })
        ));
        assert!(ClaimGuard::acquire(&claims, JobId::new()).is_ok());

        drop(first);
        assert!(ClaimGuard::acquire(&claims, id).is_ok());
    }

    #[test]
    fn options_builders() {
        let token = CancellationToken::new();
        let opts = ProcessOptions::default()
            .with_password("secret")
            .with_cancel(token.clone());
        assert_eq!(opts.password.as_deref(), Some("secret"));
        token.cancel();
        assert!(opts.cancel.unwrap().is_cancelled());
    }
}
