//! Configuration types for statement ingestion.
//!
//! Every knob is passed in explicitly: the library never reads environment
//! variables itself, so a test can build a pipeline around fakes without
//! touching process state. The CLI maps flags and env vars onto these types.
//!
//! * [`RenderConfig`] — how pages are rasterised.
//! * [`ExtractionConfig`] — the vision-LLM endpoint, the model fallback
//!   chain and its retry budget. Built via [`ExtractionConfig::builder`].
//! * [`IngestionConfig`] — orchestrator limits.

use crate::error::IngestionError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Base URL of the Gemini `generateContent` REST API.
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Default fallback chain: cheapest and fastest first.
pub const DEFAULT_MODELS: &[&str] = &["gemini-1.5-flash", "gemini-1.5-pro", "gemini-2.0-flash-exp"];

// ── Rendering ────────────────────────────────────────────────────────────

/// Configuration for page rasterisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Rendering DPI. Range: 72–400. Default: 150.
    ///
    /// 150 DPI keeps statement fine print legible to a vision model while a
    /// 20-page request stays well below API payload limits.
    pub dpi: u32,

    /// Rasteriser executable. Default: `pdftoppm` (poppler-utils).
    pub program: PathBuf,

    /// Arguments placed before the rasteriser flags, for wrappers such as
    /// `firejail` or `sh -c`.
    pub program_args: Vec<String>,

    /// Parent directory for per-call scratch dirs. Default: system temp dir.
    pub scratch_root: Option<PathBuf>,

    /// Kill the rasteriser after this many seconds. Default: no limit.
    pub timeout_secs: Option<u64>,

    /// Directory containing the pdfium shared library (`pdfium` feature).
    /// If None, the system loader path is searched.
    pub library_path: Option<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            program: PathBuf::from("pdftoppm"),
            program_args: Vec::new(),
            scratch_root: None,
            timeout_secs: None,
            library_path: None,
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<(), IngestionError> {
        if !(72..=400).contains(&self.dpi) {
            return Err(IngestionError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                self.dpi
            )));
        }
        if self.program.as_os_str().is_empty() {
            return Err(IngestionError::InvalidConfig(
                "Renderer program must not be empty".into(),
            ));
        }
        Ok(())
    }
}

// ── Extraction ───────────────────────────────────────────────────────────

/// Configuration for the vision-LLM extraction client.
///
/// # Example
/// ```rust
/// use pdf2txn::ExtractionConfig;
///
/// let config = ExtractionConfig::builder("my-api-key")
///     .models(["gemini-1.5-flash", "gemini-1.5-pro"])
///     .attempts_per_variant(3)
///     .build()
///     .unwrap();
/// assert_eq!(config.models.len(), 2);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// API key sent as the `key` query parameter. Never logged.
    pub api_key: String,

    /// Base URL; requests go to `<endpoint>/<model>:generateContent`.
    pub endpoint: String,

    /// Ordered fallback chain of model variants.
    pub models: Vec<String>,

    /// Attempts per variant. Default: 3.
    pub attempts_per_variant: u32,

    /// Base wait after HTTP 429; attempt `n` waits `n × rate_limit_backoff`.
    /// Default: 10 s.
    pub rate_limit_backoff: Duration,

    /// Fixed wait after a transport failure before retrying. Default: 5 s.
    pub transport_retry_delay: Duration,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Transcription wants the model faithful to the page, not creative.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 8192.
    ///
    /// A dense 20-page statement can run to several hundred rows; a low
    /// limit silently truncates the JSON array and fails decoding.
    pub max_output_tokens: u32,

    /// Per-request HTTP timeout in seconds. Default: 120.
    pub request_timeout_secs: u64,

    /// Instruction override. If None, uses [`crate::prompts::EXTRACTION_PROMPT`].
    pub prompt: Option<String>,

    /// Observer for attempts, backoffs and abandoned variants.
    pub progress_callback: Option<ProgressCallback>,
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("models", &self.models)
            .field("attempts_per_variant", &self.attempts_per_variant)
            .field("rate_limit_backoff", &self.rate_limit_backoff)
            .field("transport_retry_delay", &self.transport_retry_delay)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("prompt", &self.prompt.as_ref().map(|_| "<custom>"))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn IngestionProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder with every default except the API key.
    pub fn builder(api_key: impl Into<String>) -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: ExtractionConfig {
                api_key: api_key.into(),
                endpoint: DEFAULT_ENDPOINT.to_string(),
                models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
                attempts_per_variant: 3,
                rate_limit_backoff: Duration::from_secs(10),
                transport_retry_delay: Duration::from_secs(5),
                temperature: 0.1,
                max_output_tokens: 8192,
                request_timeout_secs: 120,
                prompt: None,
                progress_callback: None,
            },
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    pub fn models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn attempts_per_variant(mut self, n: u32) -> Self {
        self.config.attempts_per_variant = n;
        self
    }

    pub fn rate_limit_backoff(mut self, d: Duration) -> Self {
        self.config.rate_limit_backoff = d;
        self
    }

    pub fn transport_retry_delay(mut self, d: Duration) -> Self {
        self.config.transport_retry_delay = d;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t;
        self
    }

    pub fn max_output_tokens(mut self, n: u32) -> Self {
        self.config.max_output_tokens = n;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, IngestionError> {
        let c = &self.config;
        if c.api_key.trim().is_empty() {
            return Err(IngestionError::InvalidConfig("API key must not be empty".into()));
        }
        if c.endpoint.trim().is_empty() {
            return Err(IngestionError::InvalidConfig("Endpoint must not be empty".into()));
        }
        if c.models.is_empty() || c.models.iter().any(|m| m.trim().is_empty()) {
            return Err(IngestionError::InvalidConfig(
                "Model list must contain at least one non-empty model name".into(),
            ));
        }
        if c.attempts_per_variant == 0 {
            return Err(IngestionError::InvalidConfig(
                "Attempts per variant must be ≥ 1".into(),
            ));
        }
        if !(0.0..=2.0).contains(&c.temperature) {
            return Err(IngestionError::InvalidConfig(format!(
                "Temperature must be 0.0–2.0, got {}",
                c.temperature
            )));
        }
        Ok(self.config)
    }
}

// ── Orchestration ────────────────────────────────────────────────────────

/// Limits applied by the ingestion orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionConfig {
    /// Pages rendered per statement, starting at page 1. Default: 20.
    pub max_pages: usize,

    /// Upper bound on archive + render + extract for one job. Default: none.
    pub job_timeout: Option<Duration>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_pages: 20,
            job_timeout: None,
        }
    }
}

impl IngestionConfig {
    pub fn builder() -> IngestionConfigBuilder {
        IngestionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`IngestionConfig`].
#[derive(Debug)]
pub struct IngestionConfigBuilder {
    config: IngestionConfig,
}

impl IngestionConfigBuilder {
    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n;
        self
    }

    pub fn job_timeout(mut self, d: Duration) -> Self {
        self.config.job_timeout = Some(d);
        self
    }

    pub fn build(self) -> Result<IngestionConfig, IngestionError> {
        if self.config.max_pages == 0 {
            return Err(IngestionError::InvalidConfig("max_pages must be ≥ 1".into()));
        }
        if self.config.job_timeout == Some(Duration::ZERO) {
            return Err(IngestionError::InvalidConfig(
                "job_timeout must be greater than zero".into(),
            ));
        }
        Ok(self.config)
    }
}
