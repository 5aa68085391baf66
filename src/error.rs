//! Error types for the pdf2txn library.
//!
//! Each pipeline component has its own error so callers of the component
//! alone (a renderer, the extraction client) can match on exactly what
//! that component can fail with:
//!
//! * [`RenderError`] — the PageRenderer contract: password problems are
//!   kept apart from every other rasterisation failure.
//! * [`ExtractionError`] — every model variant and attempt was exhausted.
//! * [`StoreError`] — a persistence or object-store collaborator failed.
//!
//! [`IngestionError`] is what the orchestrator returns. Every variant maps
//! to an [`ErrorKind`] so a caller can branch on the class of failure (for
//! example re-prompt for a password) without parsing messages.

use crate::model::{JobId, JobStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failures of a single `PageRenderer::render` call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    /// The PDF is encrypted and no password was supplied.
    #[error("PDF is encrypted and requires a password")]
    PasswordRequired,

    /// A password was supplied but the document rejected it.
    #[error("Incorrect password for encrypted PDF")]
    IncorrectPassword,

    /// Anything else: corrupt file, unsupported feature, renderer missing.
    #[error("PDF conversion failed: {0}")]
    ConversionFailed(String),
}

/// Failure of `ExtractionClient::extract`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    /// No variant produced a decodable transaction array.
    #[error("Extraction failed after trying {variants} model variant(s): {last_error}")]
    Exhausted { variants: usize, last_error: String },
}

impl ExtractionError {
    /// The last diagnostic captured before giving up.
    pub fn last_error(&self) -> &str {
        match self {
            ExtractionError::Exhausted { last_error, .. } => last_error,
        }
    }
}

/// Failures reported by the persistence and object-store collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job {0} not found")]
    NotFound(JobId),

    #[error("Job {job_id}: illegal status transition {from} → {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Classified failure returned by the ingestion orchestrator.
#[derive(Debug, Error)]
pub enum IngestionError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Payload is empty or not a PDF.
    #[error("Invalid PDF payload: {detail}")]
    InvalidInput { detail: String },

    // ── Rendering errors ─────────────────────────────────────────────────
    /// PDF requires a password but none was provided.
    #[error("PDF is encrypted and requires a password. Provide the document password and retry.")]
    PasswordRequired,

    /// A password was provided but it is wrong.
    #[error("Incorrect password for encrypted PDF. Check the document password and retry.")]
    IncorrectPassword,

    /// Rasterisation failed for a reason unrelated to passwords.
    #[error("PDF rendering failed: {detail}")]
    RenderingFailed { detail: String },

    // ── Extraction errors ────────────────────────────────────────────────
    /// Every model variant and attempt was exhausted.
    #[error("Failed to extract transactions: {last_error}")]
    ExtractionFailed { last_error: String },

    // ── Collaborator errors ──────────────────────────────────────────────
    /// The original PDF could not be archived.
    #[error("Failed to archive statement PDF: {detail}")]
    ArchiveFailed { detail: String },

    /// A durable write failed. The job may be left in `PROCESSING`.
    #[error("Persistence error: {detail}")]
    Persistence { detail: String },

    // ── Job-state errors ─────────────────────────────────────────────────
    /// Another invocation currently owns this job.
    #[error("Job {job_id} is already being processed")]
    AlreadyProcessing { job_id: JobId },

    /// The job is not in a state that allows the requested move.
    #[error("Job {job_id}: illegal status transition {from} → {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    /// The configured job timeout elapsed.
    #[error("Processing timed out after {after:?}")]
    Timeout { after: Duration },

    /// The caller cancelled processing.
    #[error("Processing was cancelled")]
    Cancelled,

    // ── Config errors ────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Coarse class of an [`IngestionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    PasswordRequired,
    IncorrectPassword,
    RenderingFailed,
    ExtractionFailed,
    ArchiveFailed,
    Persistence,
    AlreadyProcessing,
    InvalidTransition,
    Timeout,
    Cancelled,
    InvalidConfig,
}

impl IngestionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestionError::InvalidInput { .. } => ErrorKind::InvalidInput,
            IngestionError::PasswordRequired => ErrorKind::PasswordRequired,
            IngestionError::IncorrectPassword => ErrorKind::IncorrectPassword,
            IngestionError::RenderingFailed { .. } => ErrorKind::RenderingFailed,
            IngestionError::ExtractionFailed { .. } => ErrorKind::ExtractionFailed,
            IngestionError::ArchiveFailed { .. } => ErrorKind::ArchiveFailed,
            IngestionError::Persistence { .. } => ErrorKind::Persistence,
            IngestionError::AlreadyProcessing { .. } => ErrorKind::AlreadyProcessing,
            IngestionError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            IngestionError::Timeout { .. } => ErrorKind::Timeout,
            IngestionError::Cancelled => ErrorKind::Cancelled,
            IngestionError::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }

    /// True when the caller should ask the user for (another) password.
    pub fn is_password_related(&self) -> bool {
        matches!(
            self,
            IngestionError::PasswordRequired | IngestionError::IncorrectPassword
        )
    }

    /// True when resubmitting the same input may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            IngestionError::Persistence { .. }
                | IngestionError::Timeout { .. }
                | IngestionError::Cancelled
                | IngestionError::AlreadyProcessing { .. }
        )
    }
}

impl From<RenderError> for IngestionError {
    fn from(e: RenderError) -> Self {
        match e {
            RenderError::PasswordRequired => IngestionError::PasswordRequired,
            RenderError::IncorrectPassword => IngestionError::IncorrectPassword,
            RenderError::ConversionFailed(detail) => IngestionError::RenderingFailed { detail },
        }
    }
}

impl From<ExtractionError> for IngestionError {
    fn from(e: ExtractionError) -> Self {
        IngestionError::ExtractionFailed {
            last_error: e.last_error().to_string(),
        }
    }
}

impl From<StoreError> for IngestionError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidTransition { job_id, from, to } => {
                IngestionError::InvalidTransition { job_id, from, to }
            }
            other => IngestionError::Persistence {
                detail: other.to_string(),
            },
        }
    }
}
