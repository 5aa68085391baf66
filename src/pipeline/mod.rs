//! Pipeline stages for statement ingestion.
//!
//! Each submodule implements exactly one step, so a stage can be faked in
//! tests or swapped (pdftoppm subprocess vs. linked pdfium) without
//! touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ gemini ──▶ extract
//! (magic)   (PNG pages) (base64)  (HTTP)     (retry + JSON recovery)
//! ```
//!
//! 1. [`input`]   — reject payloads that are empty or not a PDF
//! 2. [`render`]  — rasterise the first N pages; `pdftoppm` by default,
//!    [`pdfium`] behind the `pdfium` cargo feature
//! 3. [`encode`]  — base64-wrap each page as an inline request part
//! 4. [`gemini`]  — `generateContent` wire types and the HTTP transport
//! 5. [`extract`] — fallback chain over model variants, bounded retries,
//!    and recovery of the transaction array from free-form model text

pub mod encode;
pub mod extract;
pub mod gemini;
pub mod input;
#[cfg(feature = "pdfium")]
pub mod pdfium;
pub mod render;
