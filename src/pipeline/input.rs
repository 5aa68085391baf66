//! Input validation: reject payloads that cannot possibly be a PDF.
//!
//! The check is deliberately shallow. Anything past the header is left to
//! the renderer, which reports corruption as `RenderingFailed`. Some
//! producers emit a few junk bytes (a BOM, an HTTP preamble) before the
//! header, and readers tolerate up to 1 KiB of them, so we do too.

use crate::error::IngestionError;
use tracing::debug;

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Readers accept the header anywhere in the first 1024 bytes.
const HEADER_SEARCH_WINDOW: usize = 1024;

/// Check that `bytes` is non-empty and carries a `%PDF-` header.
pub fn validate_pdf(bytes: &[u8]) -> Result<(), IngestionError> {
    if bytes.is_empty() {
        return Err(IngestionError::InvalidInput {
            detail: "payload is empty".into(),
        });
    }

    let window = &bytes[..bytes.len().min(HEADER_SEARCH_WINDOW)];
    match window
        .windows(PDF_MAGIC.len())
        .position(|w| w == PDF_MAGIC)
    {
        Some(offset) => {
            debug!(offset, size = bytes.len(), "PDF header found");
            Ok(())
        }
        None => Err(IngestionError::InvalidInput {
            detail: format!(
                "missing %PDF- header (starts with {:?})",
                String::from_utf8_lossy(&bytes[..bytes.len().min(8)])
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn accepts_pdf_header() {
        assert!(validate_pdf(b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n").is_ok());
    }

    #[test]
    fn accepts_header_after_leading_junk() {
        let mut bytes = vec![b' '; 200];
        bytes.extend_from_slice(b"%PDF-1.4\n");
        assert!(validate_pdf(&bytes).is_ok());
    }

    #[test]
    fn rejects_empty() {
        let err = validate_pdf(b"").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn rejects_non_pdf() {
        let err = validate_pdf(b"\x89PNG\r\n\x1a\n....").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("%PDF-"));
    }

    #[test]
    fn rejects_header_beyond_window() {
        let mut bytes = vec![0u8; HEADER_SEARCH_WINDOW];
        bytes.extend_from_slice(b"%PDF-1.4\n");
        assert!(validate_pdf(&bytes).is_err());
    }
}
