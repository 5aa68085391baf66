//! Progress-callback trait for ingestion events.
//!
//! Inject an [`Arc<dyn IngestionProgressCallback>`] into the orchestrator
//! (status changes, page counts) and into
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] (attempts,
//! backoffs, abandoned variants) to observe a job as it runs.
//!
//! Callers can forward events to a progress bar, a WebSocket or a metrics
//! sink without the library knowing how the host application communicates.
//!
//! # Example
//!
//! ```rust
//! use pdf2txn::IngestionProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::time::Duration;
//!
//! #[derive(Default)]
//! struct BackoffCounter(AtomicUsize);
//!
//! impl IngestionProgressCallback for BackoffCounter {
//!     fn on_backoff(&self, _model: &str, _attempt: u32, _delay: Duration, _reason: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//! ```

use crate::model::{JobId, JobStatus};
use std::sync::Arc;
use std::time::Duration;

/// Called by the pipeline as a job moves through its stages.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Jobs for different ids may run concurrently, so
/// implementations must be `Send + Sync` and guard their own state.
pub trait IngestionProgressCallback: Send + Sync {
    /// The job's durable status changed.
    fn on_status_change(&self, job_id: JobId, status: JobStatus) {
        let _ = (job_id, status);
    }

    /// Rendering finished with `page_count` page images.
    fn on_pages_rendered(&self, job_id: JobId, page_count: usize) {
        let _ = (job_id, page_count);
    }

    /// An extraction request is about to be sent.
    ///
    /// # Arguments
    /// * `model`        — model variant being tried
    /// * `attempt`      — 1-indexed attempt within this variant
    /// * `max_attempts` — attempt budget per variant
    fn on_attempt(&self, model: &str, attempt: u32, max_attempts: u32) {
        let _ = (model, attempt, max_attempts);
    }

    /// The client is about to wait `delay` before retrying the same variant.
    fn on_backoff(&self, model: &str, attempt: u32, delay: Duration, reason: &str) {
        let _ = (model, attempt, delay, reason);
    }

    /// The client gave up on `model` and moves to the next variant.
    fn on_variant_abandoned(&self, model: &str, reason: &str) {
        let _ = (model, reason);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl IngestionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in configs.
pub type ProgressCallback = Arc<dyn IngestionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        statuses: Mutex<Vec<JobStatus>>,
        attempts: AtomicUsize,
    }

    impl IngestionProgressCallback for Recorder {
        fn on_status_change(&self, _job_id: JobId, status: JobStatus) {
            self.statuses.lock().unwrap().push(status);
        }

        fn on_attempt(&self, _model: &str, _attempt: u32, _max: u32) {
            self.attempts.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        let id = JobId::new();
        cb.on_status_change(id, JobStatus::Processing);
        cb.on_pages_rendered(id, 3);
        cb.on_attempt("gemini-1.5-flash", 1, 3);
        cb.on_backoff("gemini-1.5-flash", 1, Duration::from_secs(10), "429");
        cb.on_variant_abandoned("gemini-1.5-flash", "404");
    }

    #[test]
    fn overridden_methods_receive_events() {
        let rec = Recorder::default();
        let id = JobId::new();
        rec.on_status_change(id, JobStatus::Processing);
        rec.on_status_change(id, JobStatus::Completed);
        rec.on_attempt("m", 1, 3);
        rec.on_attempt("m", 2, 3);
        rec.on_pages_rendered(id, 2);

        assert_eq!(
            *rec.statuses.lock().unwrap(),
            vec![JobStatus::Processing, JobStatus::Completed]
        );
        assert_eq!(rec.attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_attempt("m", 1, 1);
    }
}
