//! Domain types shared by every pipeline stage.
//!
//! A [`StatementJob`] tracks one submitted PDF through the
//! `PENDING → PROCESSING → COMPLETED | FAILED` lifecycle. Pages travel
//! between the renderer and the extractor as [`PageImage`]s and come out
//! the other end as [`TransactionRecord`]s.

use crate::amount::{parse_amount, parse_amount_number};
use crate::error::IngestionError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

// ── Job identity ─────────────────────────────────────────────────────────

/// Opaque identifier of a [`StatementJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ── Lifecycle ────────────────────────────────────────────────────────────

/// Lifecycle status of a job.
///
/// Transitions are monotonic: `Pending → Processing → Completed | Failed`.
/// `Processing → Processing` is allowed so the page count can be recorded
/// mid-flight; the two terminal states accept nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata supplied when a PDF is accepted for processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    /// Reference to the owning user in the identity provider.
    pub owner: String,
    /// Original upload filename.
    pub filename: String,
    /// Size of the source PDF in bytes.
    pub size_bytes: u64,
}

impl NewJob {
    pub fn new(owner: impl Into<String>, filename: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            owner: owner.into(),
            filename: filename.into(),
            size_bytes,
        }
    }
}

/// Durable location of an archived source PDF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedObject {
    pub url: String,
    pub reference_id: String,
}

/// One user-submitted conversion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementJob {
    pub id: JobId,
    pub owner: String,
    pub filename: String,
    pub size_bytes: u64,
    /// Populated once rendering succeeds.
    pub page_count: Option<usize>,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub archive: Option<ArchivedObject>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StatementJob {
    /// A fresh `PENDING` job.
    pub fn new(id: JobId, meta: &NewJob) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner: meta.owner.clone(),
            filename: meta.filename.clone(),
            size_bytes: meta.size_bytes,
            page_count: None,
            status: JobStatus::Pending,
            error_message: None,
            archive: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, rejecting regressions and moves out of a terminal state.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), IngestionError> {
        if !self.status.can_transition_to(next) {
            return Err(IngestionError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Payload of `JobStore::update_job_status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub page_count: Option<usize>,
    pub error_message: Option<String>,
}

impl StatusUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status,
            page_count: None,
            error_message: None,
        }
    }

    pub fn page_count(count: usize) -> Self {
        Self {
            status: JobStatus::Processing,
            page_count: Some(count),
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            page_count: None,
            error_message: Some(message.into()),
        }
    }
}

// ── Pages ────────────────────────────────────────────────────────────────

/// Raster encoding of a rendered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RasterFormat {
    /// Lossless 8-bit RGB PNG.
    #[default]
    Png,
}

impl RasterFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            RasterFormat::Png => "image/png",
        }
    }
}

/// One rendered page, owned by the in-flight request that produced it.
#[derive(Clone, PartialEq, Eq)]
pub struct PageImage {
    /// Zero-based page index.
    pub index: usize,
    pub format: RasterFormat,
    pub data: Vec<u8>,
}

impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImage")
            .field("index", &self.index)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

// ── Transactions ─────────────────────────────────────────────────────────

/// One parsed ledger line.
///
/// Nothing here is validated: the date keeps the statement's own format and
/// a row may carry a debit, a credit, both, or neither. Deserialisation is
/// permissive so one odd field never discards the whole statement.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransactionRecord {
    #[serde(default, deserialize_with = "lenient_text")]
    pub date: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub debit: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub credit: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub balance: Option<Decimal>,
}

fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

fn lenient_amount<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => parse_amount_number(&n),
        Some(Value::String(s)) => parse_amount(&s),
        _ => None,
    })
}
