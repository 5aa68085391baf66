//! # pdf2txn
//!
//! Turn bank-statement PDFs into transaction records using a vision LLM.
//!
//! Statement layouts differ per bank and many are scanned, so text
//! extraction and per-bank parsers break constantly. This crate instead
//! rasterises the pages and asks a Gemini vision model to read the ledger,
//! with a model fallback chain and bounded retries around the unreliable
//! parts, and a durable job status around the whole.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Archive   store the original via ObjectStore
//!  ├─ 2. Validate  %PDF- header check
//!  ├─ 3. Render    first N pages → PNG (pdftoppm, or pdfium)
//!  ├─ 4. Extract   one request → gemini-1.5-flash → 1.5-pro → 2.0-flash-exp
//!  └─ 5. Commit    bulk insert + COMPLETED, or FAILED with the diagnostic
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2txn::{
//!     ExtractionClient, ExtractionConfig, FsObjectStore, IngestionConfig,
//!     IngestionOrchestrator, MemoryJobStore, NewJob, PdftoppmRenderer,
//!     ProcessOptions, RenderConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let extraction = ExtractionConfig::builder(std::env::var("GEMINI_API_KEY")?).build()?;
//!     let orchestrator = IngestionOrchestrator::new(
//!         Arc::new(PdftoppmRenderer::new(RenderConfig::default())),
//!         Arc::new(ExtractionClient::new(extraction)?),
//!         Arc::new(MemoryJobStore::new()),
//!         Arc::new(FsObjectStore::new("archive")),
//!         IngestionConfig::default(),
//!     );
//!
//!     let pdf = std::fs::read("statement.pdf")?;
//!     let meta = NewJob::new("user-1", "statement.pdf", pdf.len() as u64);
//!     let outcome = orchestrator.submit(meta, &pdf, ProcessOptions::default()).await?;
//!     println!("{} transactions", outcome.transactions.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `pdf2txn` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `pdfium` | off     | In-process [`PdfiumRenderer`] instead of the `pdftoppm` subprocess |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod amount;
pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ExtractionConfig, ExtractionConfigBuilder, IngestionConfig, IngestionConfigBuilder,
    RenderConfig,
};
pub use error::{ErrorKind, ExtractionError, IngestionError, RenderError, StoreError};
pub use export::{to_csv, to_json, ExportError};
pub use model::{
    ArchivedObject, JobId, JobStatus, NewJob, PageImage, RasterFormat, StatementJob,
    StatusUpdate, TransactionRecord,
};
pub use orchestrator::{IngestionOrchestrator, IngestionOutcome, ProcessOptions};
pub use pipeline::extract::{AttemptOutcome, ExtractionClient, TransactionExtractor};
pub use pipeline::gemini::{GenerateContentTransport, HttpTransport, TransportError, TransportResponse};
#[cfg(feature = "pdfium")]
pub use pipeline::pdfium::PdfiumRenderer;
pub use pipeline::render::{PageRenderer, PdftoppmRenderer};
pub use progress::{IngestionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use store::{FsObjectStore, JobStore, MemoryJobStore, ObjectStore};
