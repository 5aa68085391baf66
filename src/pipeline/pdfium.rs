//! In-process rasterisation via pdfium (`pdfium` feature).
//!
//! pdfium keeps thread-local state and blocks for the whole render, so the
//! work runs on tokio's blocking pool. Nothing touches disk: the document
//! is loaded straight from the byte buffer, so there is no scratch area to
//! clean up.

use crate::config::RenderConfig;
use crate::error::RenderError;
use crate::model::{PageImage, RasterFormat};
use crate::pipeline::encode::encode_png;
use crate::pipeline::render::PageRenderer;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};

/// PDF points per inch.
const POINTS_PER_INCH: f32 = 72.0;

/// Renders with a linked pdfium library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRenderer {
    config: RenderConfig,
}

impl PdfiumRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PageRenderer for PdfiumRenderer {
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

        let bytes = pdf.to_vec();
        let password = password.map(str::to_string);
        let library_path = self.config.library_path.clone();
        let dpi = self.config.dpi;

        let pages = tokio::task::spawn_blocking(move || {
            render_blocking(bytes, library_path, dpi, max_pages, password.as_deref())
        })
        .await
        .map_err(|e| RenderError::ConversionFailed(format!("render task panicked: {e}")))??;

        if pages.is_empty() {
            return Err(RenderError::ConversionFailed("document has no pages".into()));
        }
        info!(pages = pages.len(), dpi, "Rendered PDF pages (pdfium)");
        Ok(pages)
    }
}

fn bind(library_path: Option<PathBuf>) -> Result<Pdfium, RenderError> {
    let bindings = match library_path {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir)),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| RenderError::ConversionFailed(format!("pdfium library unavailable: {e}")))?;
    Ok(Pdfium::new(bindings))
}

fn render_blocking(
    bytes: Vec<u8>,
    library_path: Option<PathBuf>,
    dpi: u32,
    max_pages: usize,
    password: Option<&str>,
) -> Result<Vec<PageImage>, RenderError> {
    let pdfium = bind(library_path)?;

    let document = pdfium
        .load_pdf_from_byte_vec(bytes, password)
        .map_err(|e| classify_load_error(&format!("{e:?}"), password.is_some()))?;

    let scale = dpi as f32 / POINTS_PER_INCH;
    let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);

    let mut pages = Vec::new();
    for (index, page) in document.pages().iter().take(max_pages).enumerate() {
        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            RenderError::ConversionFailed(format!("page {}: {e:?}", index + 1))
        })?;
        let image = bitmap.as_image().to_rgb8();
        debug!(page = index + 1, width = image.width(), height = image.height(), "Rendered page");

        let data = encode_png(&image::DynamicImage::ImageRgb8(image)).map_err(|e| {
            RenderError::ConversionFailed(format!("page {}: PNG encoding failed: {e}", index + 1))
        })?;
        pages.push(PageImage {
            index,
            format: RasterFormat::Png,
            data,
        });
    }
    Ok(pages)
}

/// pdfium only reports a generic error code; the password case is
/// recognisable from its debug text.
fn classify_load_error(detail: &str, password_supplied: bool) -> RenderError {
    if detail.to_lowercase().contains("password") {
        if password_supplied {
            RenderError::IncorrectPassword
        } else {
            RenderError::PasswordRequired
        }
    } else {
        RenderError::ConversionFailed(detail.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_password_error() {
        let detail = "PdfiumLibraryInternalError(PasswordError)";
        assert_eq!(classify_load_error(detail, false), RenderError::PasswordRequired);
        assert_eq!(classify_load_error(detail, true), RenderError::IncorrectPassword);
        assert!(matches!(
            classify_load_error("PdfiumLibraryInternalError(FormatError)", false),
            RenderError::ConversionFailed(_)
        ));
    }

    #[tokio::test]
    async fn zero_max_pages_is_rejected() {
        let err = PdfiumRenderer::default()
            .render(b"%PDF-1.4", 0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::ConversionFailed(_)));
    }
}
