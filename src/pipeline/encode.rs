//! Image encoding: `PageImage` → base64 inline part for the request body.
//!
//! Gemini accepts images as `inline_data { mime_type, data }` parts with
//! standard (padded) base64. PNG is used throughout because it is lossless;
//! compression artefacts on small print hurt digit recognition.

use crate::model::PageImage;
use crate::pipeline::gemini::{InlineData, RequestPart};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::debug;

/// Wrap a rendered page as an inline image part.
pub fn inline_part(page: &PageImage) -> RequestPart {
    let data = STANDARD.encode(&page.data);
    debug!(page = page.index + 1, bytes = data.len(), "Encoded page → base64");

    RequestPart::InlineData {
        inline_data: InlineData {
            mime_type: page.format.mime_type().to_string(),
            data,
        },
    }
}

/// PNG-encode a rasterised page (pdfium backend only).
#[cfg(feature = "pdfium")]
pub fn encode_png(img: &image::DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RasterFormat;

    #[test]
    fn inline_part_is_base64_png() {
        let page = PageImage {
            index: 0,
            format: RasterFormat::Png,
            data: b"\x89PNG fake".to_vec(),
        };
        match inline_part(&page) {
            RequestPart::InlineData { inline_data } => {
                assert_eq!(inline_data.mime_type, "image/png");
                assert_eq!(STANDARD.decode(&inline_data.data).unwrap(), page.data);
            }
            other => panic!("expected inline data, got {other:?}"),
        }
    }

    #[test]
    fn inline_part_serialises_snake_case_keys() {
        let page = PageImage {
            index: 2,
            format: RasterFormat::Png,
            data: vec![1, 2, 3],
        };
        let json = serde_json::to_value(inline_part(&page)).unwrap();
        assert_eq!(json["inline_data"]["mime_type"], "image/png");
        assert_eq!(json["inline_data"]["data"], "AQID");
    }

    #[cfg(feature = "pdfium")]
    #[test]
    fn encode_small_image() {
        use image::{DynamicImage, Rgb, RgbImage};
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([255, 0, 0])));
        let png = encode_png(&img).unwrap();
        assert_eq!(&png[..4], b"\x89PNG");
    }
}
