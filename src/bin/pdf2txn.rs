//! CLI binary for pdf2txn.
//!
//! A thin shim over the library crate: maps flags onto the configs, runs
//! one statement through the orchestrator with an in-memory job store, and
//! prints the transactions as JSON or CSV.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf2txn::{
    to_csv, to_json, ExtractionClient, ExtractionConfig, FsObjectStore, IngestionConfig,
    IngestionError, IngestionOrchestrator, IngestionProgressCallback, JobId, JobStatus,
    MemoryJobStore, NewJob, PageRenderer, PdftoppmRenderer, ProcessOptions, ProgressCallback,
    RenderConfig,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner with one log line per notable event (render, backoff, fallback).
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Archiving statement…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl IngestionProgressCallback for CliProgressCallback {
    fn on_status_change(&self, _job_id: JobId, status: JobStatus) {
        match status {
            JobStatus::Processing => self.bar.set_prefix("Rendering"),
            JobStatus::Completed | JobStatus::Failed => self.bar.finish_and_clear(),
            JobStatus::Pending => {}
        }
    }

    fn on_pages_rendered(&self, _job_id: JobId, page_count: usize) {
        self.bar
            .println(format!("  {} Rendered {page_count} page(s)", green("✓")));
        self.bar.set_prefix("Extracting");
    }

    fn on_attempt(&self, model: &str, attempt: u32, max_attempts: u32) {
        self.bar
            .set_message(format!("{model} {}", dim(&format!("attempt {attempt}/{max_attempts}"))));
    }

    fn on_backoff(&self, model: &str, _attempt: u32, delay: Duration, reason: &str) {
        self.bar.println(format!(
            "  {} {model}: {reason}  {}",
            yellow("⏳"),
            dim(&format!("waiting {}s", delay.as_secs()))
        ));
    }

    fn on_variant_abandoned(&self, model: &str, reason: &str) {
        let msg = if reason.chars().count() > 100 {
            format!("{}\u{2026}", reason.chars().take(99).collect::<String>())
        } else {
            reason.to_string()
        };
        self.bar
            .println(format!("  {} {model}: {}", red("✗"), red(&msg)));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract transactions to stdout as JSON
  pdf2txn statement.pdf

  # CSV file, encrypted statement
  pdf2txn --format csv --password 1234 statement.pdf -o march.csv

  # Try only the pro model, five attempts
  pdf2txn --models gemini-1.5-pro --attempts 5 statement.pdf

  # Wrap pdftoppm, e.g. inside a sandbox
  pdf2txn --pdftoppm /usr/local/bin/pdftoppm statement.pdf

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY      Google Gemini API key (required)
  GEMINI_ENDPOINT     Override the generateContent base URL
  PDF2TXN_*           Any flag, e.g. PDF2TXN_MAX_PAGES=10
  RUST_LOG            Override log filtering (e.g. pdf2txn=debug)

SETUP:
  1. Install poppler: apt install poppler-utils  /  brew install poppler
  2. Set API key:     export GEMINI_API_KEY=...
  3. Extract:         pdf2txn statement.pdf -o transactions.json
"#;

/// Extract bank-statement transactions from a PDF using Gemini vision models.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2txn",
    version,
    about = "Extract bank-statement transactions from a PDF using Gemini vision models",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Bank statement PDF.
    input: PathBuf,

    /// Write transactions to this file instead of stdout.
    #[arg(short, long, env = "PDF2TXN_OUTPUT")]
    output: Option<PathBuf>,

    /// Output format.
    #[arg(long, env = "PDF2TXN_FORMAT", value_enum, default_value = "json")]
    format: FormatArg,

    /// Password for encrypted statements.
    #[arg(long, env = "PDF2TXN_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Render at most this many pages, starting at page 1.
    #[arg(long, env = "PDF2TXN_MAX_PAGES", default_value_t = 20)]
    max_pages: usize,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDF2TXN_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Gemini API key.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// generateContent base URL.
    #[arg(long, env = "GEMINI_ENDPOINT")]
    endpoint: Option<String>,

    /// Comma-separated fallback chain (default: gemini-1.5-flash,gemini-1.5-pro,gemini-2.0-flash-exp).
    #[arg(long, env = "PDF2TXN_MODELS", value_delimiter = ',')]
    models: Vec<String>,

    /// Attempts per model.
    #[arg(long, env = "PDF2TXN_ATTEMPTS", default_value_t = 3)]
    attempts: u32,

    /// Directory the original PDF is archived into (default: system temp).
    #[arg(long, env = "PDF2TXN_ARCHIVE_DIR")]
    archive_dir: Option<PathBuf>,

    /// Owner recorded on the job.
    #[arg(long, env = "PDF2TXN_OWNER", default_value = "local")]
    owner: String,

    /// pdftoppm executable.
    #[arg(long, env = "PDF2TXN_PDFTOPPM", default_value = "pdftoppm")]
    pdftoppm: PathBuf,

    /// Rendering backend.
    #[arg(long, env = "PDF2TXN_RENDERER", value_enum, default_value = "pdftoppm")]
    renderer: RendererArg,

    /// Abort the job after this many seconds.
    #[arg(long, env = "PDF2TXN_TIMEOUT")]
    timeout: Option<u64>,

    /// Disable the progress spinner.
    #[arg(long, env = "PDF2TXN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2TXN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2TXN_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Json,
    Csv,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum RendererArg {
    Pdftoppm,
    Pdfium,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner carries progress; library INFO logs would fight with it.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let pdf = tokio::fs::read(&cli.input)
        .await
        .with_context(|| format!("Failed to read {}", cli.input.display()))?;

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn IngestionProgressCallback>)
    } else {
        None
    };

    let orchestrator = build_orchestrator(&cli, progress)?;

    // ── Ctrl-C cancels the job ───────────────────────────────────────────
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let filename = cli
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "statement.pdf".to_string());
    let meta = NewJob::new(cli.owner.clone(), filename, pdf.len() as u64);
    let mut options = ProcessOptions::default().with_cancel(cancel);
    if let Some(pw) = &cli.password {
        options = options.with_password(pw.clone());
    }

    let outcome = match orchestrator.submit(meta, &pdf, options).await {
        Ok(o) => o,
        Err(e) => {
            report_failure(&e);
            return Err(e).context("Extraction failed");
        }
    };

    let rendered = match cli.format {
        FormatArg::Json => to_json(&outcome.transactions),
        FormatArg::Csv => to_csv(&outcome.transactions),
    }
    .context("Failed to serialise transactions")?;

    match &cli.output {
        Some(path) => write_atomically(path, rendered.as_bytes())?,
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(rendered.as_bytes())
                .context("Failed to write to stdout")?;
        }
    }

    if !cli.quiet {
        let pages = outcome.job.page_count.unwrap_or(0);
        let count = outcome.transactions.len();
        let summary = if count == 0 {
            "no transactions found".to_string()
        } else {
            format!("{count} transaction(s)")
        };
        eprintln!(
            "{}  {}  from {pages} page(s){}",
            green("✔"),
            bold(&summary),
            cli.output
                .as_ref()
                .map(|p| format!("  →  {}", bold(&p.display().to_string())))
                .unwrap_or_default(),
        );
        if let Some(archive) = &outcome.job.archive {
            eprintln!("   {}", dim(&format!("archived at {}", archive.url)));
        }
    }

    Ok(())
}

/// Map CLI args onto the pipeline components.
fn build_orchestrator(cli: &Cli, progress: Option<ProgressCallback>) -> Result<IngestionOrchestrator> {
    let api_key = cli
        .api_key
        .clone()
        .context("GEMINI_API_KEY is not set (pass --api-key or export GEMINI_API_KEY)")?;

    let mut builder = ExtractionConfig::builder(api_key).attempts_per_variant(cli.attempts);
    if let Some(endpoint) = &cli.endpoint {
        builder = builder.endpoint(endpoint.clone());
    }
    if !cli.models.is_empty() {
        builder = builder.models(cli.models.iter().map(|m| m.trim().to_string()));
    }
    if let Some(cb) = &progress {
        builder = builder.progress_callback(cb.clone());
    }
    let extraction = builder.build().context("Invalid extraction configuration")?;

    let render = RenderConfig {
        dpi: cli.dpi,
        program: cli.pdftoppm.clone(),
        ..RenderConfig::default()
    };
    render.validate().context("Invalid render configuration")?;
    let renderer = build_renderer(cli.renderer, render)?;

    let mut ingestion = IngestionConfig::builder().max_pages(cli.max_pages);
    if let Some(secs) = cli.timeout {
        ingestion = ingestion.job_timeout(Duration::from_secs(secs));
    }
    let ingestion = ingestion.build().context("Invalid ingestion configuration")?;

    let archive_dir = cli
        .archive_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("pdf2txn-archive"));

    let orchestrator = IngestionOrchestrator::new(
        renderer,
        Arc::new(ExtractionClient::new(extraction).context("Failed to build HTTP client")?),
        Arc::new(MemoryJobStore::new()),
        Arc::new(FsObjectStore::new(archive_dir)),
        ingestion,
    );
    Ok(match progress {
        Some(cb) => orchestrator.with_progress(cb),
        None => orchestrator,
    })
}

fn build_renderer(kind: RendererArg, config: RenderConfig) -> Result<Arc<dyn PageRenderer>> {
    match kind {
        RendererArg::Pdftoppm => Ok(Arc::new(PdftoppmRenderer::new(config))),
        #[cfg(feature = "pdfium")]
        RendererArg::Pdfium => Ok(Arc::new(pdf2txn::PdfiumRenderer::new(config))),
        #[cfg(not(feature = "pdfium"))]
        RendererArg::Pdfium => {
            drop(config);
            anyhow::bail!("pdf2txn was built without the `pdfium` feature")
        }
    }
}

fn report_failure(e: &IngestionError) {
    eprintln!("{} {}", red("✘"), bold(&e.to_string()));
    if e.is_password_related() {
        eprintln!("   {}", dim("Pass the statement password with --password <PASSWORD>."));
    } else if e.is_retriable() {
        eprintln!("   {}", dim("This failure is transient; re-running may succeed."));
    }
}

/// Write via a sibling temp file so a crash never leaves a truncated output.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(&parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
    tmp.write_all(bytes).context("Failed to write output")?;
    tmp.persist(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
