//! Serialise transaction lists for the CLI's `--format` option.

use crate::model::TransactionRecord;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("JSON serialisation failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV serialisation failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV buffer error: {0}")]
    Buffer(String),
}

/// Pretty-printed JSON array, amounts as JSON strings (lossless decimals).
pub fn to_json(records: &[TransactionRecord]) -> Result<String, ExportError> {
    let mut out = serde_json::to_string_pretty(records)?;
    out.push('\n');
    Ok(out)
}

/// CSV with header `date,description,debit,credit,balance`; absent amounts
/// are empty cells.
pub fn to_csv(records: &[TransactionRecord]) -> Result<String, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["date", "description", "debit", "credit", "balance"])?;
    for r in records {
        writer.write_record([
            r.date.as_str(),
            r.description.as_str(),
            amount_cell(r.debit).as_str(),
            amount_cell(r.credit).as_str(),
            amount_cell(r.balance).as_str(),
        ])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Buffer(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ExportError::Buffer(e.to_string()))
}

fn amount_cell(amount: Option<Decimal>) -> String {
    amount.map(|d| d.to_string()).unwrap_or_default()
}
