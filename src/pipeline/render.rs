//! PDF rasterisation behind the [`PageRenderer`] seam.
//!
//! The default backend, [`PdftoppmRenderer`], shells out to poppler's
//! `pdftoppm` once per statement. Each call stages the PDF in its own
//! `TempDir`, so concurrent renders never see each other's files, and the
//! directory is removed when the guard drops: on success, on every error
//! path, and when the caller drops the future mid-render (the child is
//! killed too).
//!
//! The pdfium backend lives in [`crate::pipeline::pdfium`] behind the
//! `pdfium` feature and honours the same error taxonomy.

use crate::config::RenderConfig;
use crate::error::RenderError;
use crate::model::{PageImage, RasterFormat};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Turns a PDF into page images, first page first.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Render at most `max_pages` pages starting at page 1.
    ///
    /// # Errors
    /// * [`RenderError::PasswordRequired`] — encrypted and `password` is None
    /// * [`RenderError::IncorrectPassword`] — `password` was rejected
    /// * [`RenderError::ConversionFailed`] — anything else
    async fn render(
        &self,
        pdf: &[u8],
        max_pages: usize,
        password: Option<&str>,
    ) -> Result<Vec<PageImage>, RenderError>;
}

static RE_PAGE_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^page-(\d+)\.png$").unwrap());

const INPUT_FILE: &str = "input.pdf";
const OUTPUT_PREFIX: &str = "page";

/// Renders via a one-shot `pdftoppm` process.
#[derive(Debug, Clone, Default)]
pub struct PdftoppmRenderer {
    config: RenderConfig,
}

impl PdftoppmRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    fn command(&self, scratch: &Path, max_pages: usize, password: Option<&str>) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.program_args)
            .arg("-png")
            .arg("-r")
            .arg(self.config.dpi.to_string())
            .arg("-f")
            .arg("1")
            .arg("-l")
            .arg(max_pages.to_string());
        if let Some(pw) = password {
            cmd.arg("-opw").arg(pw).arg("-upw").arg(pw);
        }
        cmd.arg(scratch.join(INPUT_FILE))
            .arg(scratch.join(OUTPUT_PREFIX))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl PageRenderer for PdftoppmRenderer {
    async fn render(
        &self,
        pdf: &[u8],
        max_pages: usize,
        password: Option<&str>,
    ) -> Result<Vec<PageImage>, RenderError> {
        if max_pages == 0 {
            return Err(RenderError::ConversionFailed(
                "max_pages must be at least 1".into(),
            ));
        }

        let mut builder = tempfile::Builder::new();
        builder.prefix("pdf2txn-");
        let scratch = match &self.config.scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| RenderError::ConversionFailed(format!("cannot create scratch dir: {e}")))?;

        tokio::fs::write(scratch.path().join(INPUT_FILE), pdf)
            .await
            .map_err(|e| RenderError::ConversionFailed(format!("cannot stage PDF: {e}")))?;

        debug!(
            program = %self.config.program.display(),
            dpi = self.config.dpi,
            max_pages,
            encrypted = password.is_some(),
            "Running rasteriser"
        );

        let mut cmd = self.command(scratch.path(), max_pages, password);
        let output = cmd.output();
        let output = match self.config.timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), output)
                .await
                .map_err(|_| {
                    RenderError::ConversionFailed(format!("rasteriser timed out after {secs}s"))
                })?,
            None => output.await,
        }
        .map_err(|e| spawn_failure(&self.config.program, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(stderr.trim(), password.is_some()));
        }

        let pages = collect_pages(scratch.path(), max_pages).await?;
        if pages.is_empty() {
            return Err(RenderError::ConversionFailed(
                "rasteriser produced no page images".into(),
            ));
        }

        if let Err(e) = scratch.close() {
            warn!("Failed to remove scratch dir: {e}");
        }

        info!(pages = pages.len(), dpi = self.config.dpi, "Rendered PDF pages");
        Ok(pages)
    }
}

fn spawn_failure(program: &Path, e: std::io::Error) -> RenderError {
    if e.kind() == std::io::ErrorKind::NotFound {
        RenderError::ConversionFailed(format!(
            "rasteriser `{}` not found; install poppler-utils \
             (apt install poppler-utils / brew install poppler)",
            program.display()
        ))
    } else {
        RenderError::ConversionFailed(format!(
            "cannot run rasteriser `{}`: {e}",
            program.display()
        ))
    }
}

/// Map a failed run's stderr onto the password taxonomy.
pub(crate) fn classify_failure(stderr: &str, password_supplied: bool) -> RenderError {
    let lower = stderr.to_lowercase();
    if lower.contains("password") || lower.contains("encrypted") {
        if password_supplied {
            RenderError::IncorrectPassword
        } else {
            RenderError::PasswordRequired
        }
    } else if stderr.is_empty() {
        RenderError::ConversionFailed("rasteriser exited with an error and no output".into())
    } else {
        RenderError::ConversionFailed(stderr.to_string())
    }
}

/// Read `page-<n>.png` files in numeric order; pdftoppm zero-pads `n` to
/// the page-count width, so lexical order is not reliable.
async fn collect_pages(dir: &Path, max_pages: usize) -> Result<Vec<PageImage>, RenderError> {
    let io_err = |e: std::io::Error| RenderError::ConversionFailed(format!("reading output: {e}"));

    let mut numbered = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(caps) = RE_PAGE_FILE.captures(name) else {
            continue;
        };
        if let Ok(n) = caps[1].parse::<usize>() {
            if n >= 1 {
                numbered.push((n, entry.path()));
            }
        }
    }
    numbered.sort_by_key(|(n, _)| *n);

    let mut pages = Vec::with_capacity(numbered.len().min(max_pages));
    for (n, path) in numbered.into_iter().take(max_pages) {
        let data = tokio::fs::read(&path).await.map_err(io_err)?;
        pages.push(PageImage {
            index: n - 1,
            format: RasterFormat::Png,
            data,
        });
    }
    Ok(pages)
}
