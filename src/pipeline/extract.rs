//! Transaction extraction: the model fallback chain.
//!
//! One request carries every page plus the instruction prompt. The client
//! walks the configured model variants in order, giving each a fixed
//! attempt budget, and classifies every attempt into an [`AttemptOutcome`]:
//!
//! | Response                          | Outcome                                 |
//! |-----------------------------------|-----------------------------------------|
//! | 429                               | retry same variant after `n × backoff`  |
//! | transport failure                 | retry same variant after fixed delay    |
//! | 404                               | abandon variant                         |
//! | other non-2xx                     | abandon variant                         |
//! | safety block / no text            | abandon variant                         |
//! | text without a decodable array    | abandon variant                         |
//! | decodable array                   | return immediately                      |
//!
//! A retryable failure on the last attempt of a variant becomes
//! [`AttemptOutcome::ExhaustAttempts`] and moves on without waiting.
//! Requests are strictly sequential: at most one call is outstanding.

use crate::config::ExtractionConfig;
use crate::error::{ExtractionError, IngestionError};
use crate::model::{PageImage, TransactionRecord};
use crate::pipeline::gemini::{
    api_error_message, GenerateContentRequest, GenerateContentResponse, GenerateContentTransport,
    HttpTransport, TransportError, TransportResponse,
};
use crate::prompts::EXTRACTION_PROMPT;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const SNIPPET_CHARS: usize = 200;

const NO_DIAGNOSTIC: &str =
    "All extraction attempts failed without a diagnostic; check the API key and network";

/// Turns rendered pages into transaction records.
#[async_trait]
pub trait TransactionExtractor: Send + Sync {
    async fn extract(&self, pages: &[PageImage]) -> Result<Vec<TransactionRecord>, ExtractionError>;
}

/// Classified result of one attempt against one variant.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success(Vec<TransactionRecord>),
    /// Transient; retry the same variant after `delay`.
    RetryableFailure { reason: String, delay: Duration },
    /// Move to the next variant now.
    AbandonVariant(String),
    /// Transient, but this variant has no attempts left.
    ExhaustAttempts(String),
}

impl AttemptOutcome {
    /// Downgrade a retry on the final attempt; nothing would follow the wait.
    fn settle(self, attempt: u32, max_attempts: u32) -> Self {
        match self {
            AttemptOutcome::RetryableFailure { reason, .. } if attempt >= max_attempts => {
                AttemptOutcome::ExhaustAttempts(reason)
            }
            other => other,
        }
    }
}

/// Vision-LLM extraction client.
///
/// # Example
/// ```rust,no_run
/// use pdf2txn::{ExtractionClient, ExtractionConfig, TransactionExtractor};
///
/// # async fn run(pages: Vec<pdf2txn::PageImage>) -> Result<(), Box<dyn std::error::Error>> {
/// let config = ExtractionConfig::builder(std::env::var("GEMINI_API_KEY")?).build()?;
/// let client = ExtractionClient::new(config)?;
/// let records = client.extract(&pages).await?;
/// println!("{} transactions", records.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ExtractionClient<T = HttpTransport> {
    config: ExtractionConfig,
    transport: T,
}

impl ExtractionClient<HttpTransport> {
    pub fn new(config: ExtractionConfig) -> Result<Self, IngestionError> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self { config, transport })
    }
}

impl<T: GenerateContentTransport> ExtractionClient<T> {
    pub fn with_transport(config: ExtractionConfig, transport: T) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    fn build_request(&self, pages: &[PageImage]) -> GenerateContentRequest {
        let prompt = self.config.prompt.as_deref().unwrap_or(EXTRACTION_PROMPT);
        GenerateContentRequest::for_pages(
            pages,
            prompt,
            self.config.temperature,
            self.config.max_output_tokens,
        )
    }
}

#[async_trait]
impl<T: GenerateContentTransport> TransactionExtractor for ExtractionClient<T> {
    async fn extract(&self, pages: &[PageImage]) -> Result<Vec<TransactionRecord>, ExtractionError> {
        let request = self.build_request(pages);
        let max_attempts = self.config.attempts_per_variant;
        let cb = self.config.progress_callback.as_ref();
        let mut last_error = String::new();

        for model in &self.config.models {
            for attempt in 1..=max_attempts {
                info!(model = %model, attempt, max_attempts, pages = pages.len(), "Requesting extraction");
                if let Some(cb) = cb {
                    cb.on_attempt(model, attempt, max_attempts);
                }

                let response = self.transport.generate_content(model, &request).await;
                let outcome =
                    classify_response(model, attempt, response, &self.config).settle(attempt, max_attempts);

                match outcome {
                    AttemptOutcome::Success(records) => {
                        info!(model = %model, attempt, records = records.len(), "Extraction succeeded");
                        return Ok(records);
                    }
                    AttemptOutcome::RetryableFailure { reason, delay } => {
                        warn!(model = %model, attempt, ?delay, "{reason}; retrying");
                        if let Some(cb) = cb {
                            cb.on_backoff(model, attempt, delay, &reason);
                        }
                        last_error = reason;
                        sleep(delay).await;
                    }
                    AttemptOutcome::AbandonVariant(reason) => {
                        warn!(model = %model, attempt, "{reason}; trying next model");
                        if let Some(cb) = cb {
                            cb.on_variant_abandoned(model, &reason);
                        }
                        last_error = reason;
                        break;
                    }
                    AttemptOutcome::ExhaustAttempts(reason) => {
                        warn!(model = %model, attempt, "{reason}; attempts exhausted");
                        if let Some(cb) = cb {
                            cb.on_variant_abandoned(model, &reason);
                        }
                        last_error = reason;
                    }
                }
            }
        }

        if last_error.is_empty() {
            last_error = NO_DIAGNOSTIC.to_string();
        }
        warn!(variants = self.config.models.len(), "Extraction exhausted: {last_error}");
        Err(ExtractionError::Exhausted {
            variants: self.config.models.len(),
            last_error,
        })
    }
}

/// Classify one attempt's raw result.
pub fn classify_response(
    model: &str,
    attempt: u32,
    response: Result<TransportResponse, TransportError>,
    config: &ExtractionConfig,
) -> AttemptOutcome {
    let response = match response {
        Ok(r) => r,
        Err(e) => {
            return AttemptOutcome::RetryableFailure {
                reason: format!("Network error calling {model}: {e}"),
                delay: config.transport_retry_delay,
            }
        }
    };

    match response.status {
        429 => {
            return AttemptOutcome::RetryableFailure {
                reason: format!("Rate limit exceeded (429) on {model}"),
                delay: config.rate_limit_backoff * attempt,
            }
        }
        404 => return AttemptOutcome::AbandonVariant(format!("Model {model} not found (404)")),
        _ if !response.is_success() => {
            return AttemptOutcome::AbandonVariant(http_failure(model, &response));
        }
        _ => {}
    }

    let parsed: GenerateContentResponse = match serde_json::from_str(&response.body) {
        Ok(p) => p,
        Err(e) => {
            return AttemptOutcome::AbandonVariant(format!(
                "Failed to parse API response from {model}: {e}"
            ))
        }
    };

    if parsed.is_safety_blocked() {
        return AttemptOutcome::AbandonVariant(format!(
            "Content blocked by safety filters ({model})"
        ));
    }

    let Some(text) = parsed.first_text() else {
        return AttemptOutcome::AbandonVariant(format!(
            "No response text from {model}; finish reason: {}",
            parsed.finish_reason()
        ));
    };
    debug!(model, text_len = text.len(), "Model responded with text");

    let Some(array) = find_json_array(text) else {
        return AttemptOutcome::AbandonVariant(format!(
            "No JSON array found in {model} response: {}",
            snippet(text)
        ));
    };

    match decode_transactions(array) {
        Ok(records) => AttemptOutcome::Success(records),
        Err(e) => AttemptOutcome::AbandonVariant(format!(
            "Failed to parse transaction JSON from {model}: {e}. Response: {}",
            snippet(text)
        )),
    }
}

fn http_failure(model: &str, response: &TransportResponse) -> String {
    let message = api_error_message(&response.body);
    match response.status {
        400 if response.body.contains("API_KEY_INVALID") => {
            "Invalid Gemini API key; check GEMINI_API_KEY".to_string()
        }
        403 => format!("API access forbidden (403); check the API key permissions: {message}"),
        status => format!("API error ({status}) from {model}: {message}"),
    }
}

/// The substring from the first `[` to the last `]`, inclusive.
pub fn find_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (start < end).then(|| &text[start..=end])
}

/// Decode a JSON array into records, skipping elements that are not objects.
pub fn decode_transactions(json: &str) -> Result<Vec<TransactionRecord>, serde_json::Error> {
    let values: Vec<Value> = serde_json::from_str(json)?;
    let mut records = Vec::with_capacity(values.len());
    for (i, value) in values.into_iter().enumerate() {
        if value.is_object() {
            records.push(serde_json::from_value(value)?);
        } else {
            warn!(element = i, "Skipping non-object element in transaction array");
        }
    }
    Ok(records)
}

fn snippet(text: &str) -> String {
    text.chars().take(SNIPPET_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RasterFormat;
    use crate::progress::IngestionProgressCallback;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    const ATM_ROW: &str =
        r#"[{"date":"01-03-2025","description":"ATM WITHDRAWAL","debit":5000,"credit":null,"balance":45000}]"#;

    type Scripted = Result<TransportResponse, TransportError>;

    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Scripted>>,
        calls: Mutex<Vec<String>>,
        part_counts: Mutex<Vec<usize>>,
    }

    impl ScriptedTransport {
        fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GenerateContentTransport for ScriptedTransport {
        async fn generate_content(
            &self,
            model: &str,
            request: &GenerateContentRequest,
        ) -> Result<TransportResponse, TransportError> {
            self.calls.lock().unwrap().push(model.to_string());
            self.part_counts
                .lock()
                .unwrap()
                .push(request.contents[0].parts.len());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError("script exhausted".into())))
        }
    }

    #[derive(Default)]
    struct Recorder {
        backoffs: Mutex<Vec<Duration>>,
        abandoned: Mutex<Vec<String>>,
    }

    impl IngestionProgressCallback for Recorder {
        fn on_backoff(&self, _model: &str, _attempt: u32, delay: Duration, _reason: &str) {
            self.backoffs.lock().unwrap().push(delay);
        }
        fn on_variant_abandoned(&self, model: &str, _reason: &str) {
            self.abandoned.lock().unwrap().push(model.to_string());
        }
    }

    fn text_response(text: &str) -> Scripted {
        let body = json!({
            "candidates": [{ "content": { "parts": [{ "text": text }] }, "finishReason": "STOP" }]
        });
        Ok(TransportResponse::new(200, body.to_string()))
    }

    fn status(code: u16) -> Scripted {
        Ok(TransportResponse::new(code, r#"{"error":{"message":"nope"}}"#))
    }

    fn pages(n: usize) -> Vec<PageImage> {
        (0..n)
            .map(|index| PageImage {
                index,
                format: RasterFormat::Png,
                data: vec![index as u8],
            })
            .collect()
    }

    fn client(
        script: impl IntoIterator<Item = Scripted>,
    ) -> (ExtractionClient<Arc<ScriptedTransport>>, Arc<ScriptedTransport>, Arc<Recorder>) {
        let transport = Arc::new(ScriptedTransport::new(script));
        let recorder = Arc::new(Recorder::default());
        let config = ExtractionConfig::builder("test-key")
            .progress_callback(recorder.clone())
            .build()
            .unwrap();
        (
            ExtractionClient::with_transport(config, transport.clone()),
            transport,
            recorder,
        )
    }

    #[test]
    fn find_array_spans_first_to_last_bracket() {
        assert_eq!(find_json_array("Here you go: [1, [2]] done"), Some("[1, [2]]"));
        assert_eq!(find_json_array("no array here"), None);
        assert_eq!(find_json_array("] backwards ["), None);
    }

    #[test]
    fn decode_skips_non_objects() {
        let records = decode_transactions(r#"[{"date":"a"}, 7, "x", {"date":"b"}]"#).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].date, "b");
    }

    #[test]
    fn snippet_is_char_bounded() {
        let long = "₦".repeat(500);
        assert_eq!(snippet(&long).chars().count(), SNIPPET_CHARS);
    }

    #[test]
    fn settle_turns_final_retry_into_exhaustion() {
        let retry = AttemptOutcome::RetryableFailure {
            reason: "429".into(),
            delay: Duration::from_secs(30),
        };
        assert!(matches!(retry.clone().settle(2, 3), AttemptOutcome::RetryableFailure { .. }));
        assert_eq!(retry.settle(3, 3), AttemptOutcome::ExhaustAttempts("429".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_twice_then_success() {
        let (client, transport, recorder) = client([status(429), status(429), text_response(ATM_ROW)]);
        let start = Instant::now();

        let records = client.extract(&pages(2)).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].debit, Some(Decimal::from(5000)));
        assert_eq!(
            *recorder.backoffs.lock().unwrap(),
            vec![Duration::from_secs(10), Duration::from_secs(20)]
        );
        assert_eq!(transport.calls(), vec!["gemini-1.5-flash"; 3]);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_everywhere_tries_each_variant_once() {
        let (client, transport, recorder) = client([status(404), status(404), status(404)]);

        let err = client.extract(&pages(1)).await.unwrap_err();

        assert_eq!(
            transport.calls(),
            vec!["gemini-1.5-flash", "gemini-1.5-pro", "gemini-2.0-flash-exp"]
        );
        assert!(recorder.backoffs.lock().unwrap().is_empty());
        let ExtractionError::Exhausted { variants, last_error } = err;
        assert_eq!(variants, 3);
        assert!(last_error.contains("gemini-2.0-flash-exp not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_waits_fixed_delay() {
        let (client, transport, recorder) = client([
            Err(TransportError("connection reset".into())),
            text_response(ATM_ROW),
        ]);
        let start = Instant::now();

        let records = client.extract(&pages(1)).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(transport.calls().len(), 2);
        assert_eq!(*recorder.backoffs.lock().unwrap(), vec![Duration::from_secs(5)]);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_transport_errors_advance_after_last_attempt() {
        let reset = || Err(TransportError("connection reset".into()));
        let (client, transport, recorder) =
            client([reset(), reset(), reset(), text_response(ATM_ROW)]);
        let start = Instant::now();

        let records = client.extract(&pages(1)).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(
            transport.calls(),
            vec!["gemini-1.5-flash", "gemini-1.5-flash", "gemini-1.5-flash", "gemini-1.5-pro"]
        );
        assert_eq!(
            *recorder.backoffs.lock().unwrap(),
            vec![Duration::from_secs(5), Duration::from_secs(5)]
        );
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn server_error_abandons_variant_without_retry() {
        let (client, transport, recorder) = client([status(500), text_response(ATM_ROW)]);
        let start = Instant::now();

        let records = client.extract(&pages(1)).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(transport.calls(), vec!["gemini-1.5-flash", "gemini-1.5-pro"]);
        assert!(recorder.backoffs.lock().unwrap().is_empty());
        assert_eq!(*recorder.abandoned.lock().unwrap(), vec!["gemini-1.5-flash"]);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn forbidden_is_tried_once_per_variant() {
        let (client, transport, _) = client([status(403), status(403), status(403)]);

        let err = client.extract(&pages(1)).await.unwrap_err();

        assert_eq!(
            transport.calls(),
            vec!["gemini-1.5-flash", "gemini-1.5-pro", "gemini-2.0-flash-exp"]
        );
        assert!(err.last_error().contains("forbidden (403)"));
        assert!(err.last_error().contains("nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn final_attempt_moves_on_without_waiting() {
        let (client, transport, recorder) = client([
            status(429),
            status(429),
            status(429),
            text_response(ATM_ROW),
        ]);
        let start = Instant::now();

        let records = client.extract(&pages(1)).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(
            transport.calls(),
            vec!["gemini-1.5-flash", "gemini-1.5-flash", "gemini-1.5-flash", "gemini-1.5-pro"]
        );
        assert_eq!(recorder.backoffs.lock().unwrap().len(), 2);
        assert_eq!(*recorder.abandoned.lock().unwrap(), vec!["gemini-1.5-flash"]);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn safety_block_abandons_variant() {
        let blocked = Ok(TransportResponse::new(
            200,
            r#"{"candidates":[{"finishReason":"SAFETY"}]}"#,
        ));
        let (client, transport, _) = client([blocked, text_response("[]")]);

        let records = client.extract(&pages(1)).await.unwrap();

        assert!(records.is_empty());
        assert_eq!(transport.calls(), vec!["gemini-1.5-flash", "gemini-1.5-pro"]);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_json_falls_back_to_next_model() {
        let (client, transport, _) = client([
            text_response("[{\"date\": \"01-03-2025\", oops}]"),
            text_response(ATM_ROW),
        ]);

        let records = client.extract(&pages(1)).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(transport.calls(), vec!["gemini-1.5-flash", "gemini-1.5-pro"]);
    }

    #[tokio::test(start_paused = true)]
    async fn array_embedded_in_prose_is_decoded() {
        let text = format!("Sure! Here are the transactions:\n```json\n{ATM_ROW}\n```\nLet me know.");
        let (client, _, _) = client([text_response(&text)]);

        let records = client.extract(&pages(1)).await.unwrap();

        assert_eq!(
            records,
            vec![TransactionRecord {
                date: "01-03-2025".into(),
                description: "ATM WITHDRAWAL".into(),
                debit: Some(Decimal::from(5000)),
                credit: None,
                balance: Some(Decimal::from(45000)),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_key_diagnostic_is_surfaced() {
        let bad_key = || {
            Ok(TransportResponse::new(
                400,
                r#"{"error":{"code":400,"message":"API key not valid.","details":[{"reason":"API_KEY_INVALID"}]}}"#,
            ))
        };
        let (client, transport, _) = client([bad_key(), bad_key(), bad_key()]);

        let err = client.extract(&pages(1)).await.unwrap_err();

        assert_eq!(
            transport.calls(),
            vec!["gemini-1.5-flash", "gemini-1.5-pro", "gemini-2.0-flash-exp"]
        );
        assert!(err.last_error().contains("Invalid Gemini API key"));
    }

    #[tokio::test(start_paused = true)]
    async fn no_text_diagnostic_names_finish_reason() {
        let empty = || Ok(TransportResponse::new(200, r#"{"candidates":[{"finishReason":"RECITATION"}]}"#));
        let (client, _, _) = client([empty(), empty(), empty()]);

        let err = client.extract(&pages(1)).await.unwrap_err();

        assert!(err.last_error().contains("RECITATION"));
    }

    #[tokio::test(start_paused = true)]
    async fn request_carries_every_page_then_prompt() {
        let (client, transport, _) = client([text_response("[]")]);
        client.extract(&pages(4)).await.unwrap();
        assert_eq!(*transport.part_counts.lock().unwrap(), vec![5]);
    }
}
