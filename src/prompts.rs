//! The fixed instruction sent alongside the page images.
//!
//! The prompt is the only place the output contract is stated to the
//! model, so the decoder in [`crate::pipeline::extract`] and this text must
//! agree on the key names. Callers can override it via
//! [`crate::config::ExtractionConfigBuilder::prompt`].

/// Default extraction instruction.
pub const EXTRACTION_PROMPT: &str = r#"These images are the pages of one bank statement, in order. Extract EVERY transaction row from all pages.

For each transaction return an object with exactly these keys:
- "date": the date exactly as printed on the statement (do not reformat it)
- "description": the full narration text of the row
- "debit": money leaving the account as a plain number, or null
- "credit": money entering the account as a plain number, or null
- "balance": the running balance as a plain number, or null

Numbers must not contain thousands separators or currency symbols. Use null for any empty field.

Respond with ONLY a JSON array and nothing else. Example:
[{"date":"01-03-2025","description":"ATM WITHDRAWAL","debit":5000,"credit":null,"balance":45000}]"#;
