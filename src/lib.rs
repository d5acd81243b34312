//! # pdf-ingest
//!
//! Turn PDF documents into structured data for downstream processing:
//! per-page text, tables with merged cells, embedded images, page renders,
//! and vision-model OCR of pages and table cells.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF bytes
//!  │
//!  ├─ 1. Validate  %PDF signature, non-empty, page range
//!  ├─ 2. Extract   page text + ruled tables (pdfplumber)
//!  ├─ 3. Grid      cell rectangles → row/col spans + placeholders
//!  ├─ 4. Images    image XObjects → PNG / JPEG (lopdf)
//!  ├─ 5. Render    pages and padded cell crops → PNG (pdfium)
//!  └─ 6. Vision    page OCR / cell LaTeX, with rate-limit backoff
//! ```
//!
//! Everything runs synchronously on the calling thread, in document order.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_ingest::{ingest, IngestConfig, PageRange};
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bytes = std::fs::read("document.pdf")?;
//!     let config = IngestConfig::builder()
//!         .pages(PageRange::new(Some(1), Some(3))?)
//!         .build()?;
//!     let output = ingest(&bytes, &config, Some(Path::new("images")))?;
//!     for table in &output.tables {
//!         println!("page {}: {}x{}\n{}", table.page_number, table.rows, table.cols, table.csv_preview);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Vision calls
//!
//! [`ocr_pages`] and [`recognize_table_formulas`] take any [`VisionClient`].
//! [`HttpVisionClient::from_env`] reads `VISION_API_KEY` and
//! `VISION_API_BASE`; tests substitute a scripted client.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf-ingest` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdf-ingest = { version = "0.3", default-features = false }
//! ```
//!
//! ## pdfium
//!
//! Rendering, page OCR and cell crops need the pdfium shared library at
//! runtime. It is looked up via `PDFIUM_LIB_PATH`, in the working directory,
//! then system-wide. Text, tables and embedded images do not need it.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod geometry;
pub mod ingest;
pub mod naming;
pub mod output;
pub mod pdfium;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{IngestConfig, IngestConfigBuilder, PageRange, DEFAULT_MODEL};
pub use error::{IngestError, ItemError, SkipReason, VisionError};
pub use geometry::{PagePoint, PageRect, PageSize, PixelPoint, PixelRect, PointToPixel};
pub use ingest::{ingest, ocr_pages, ocr_rendered_pages, recognize_table_formulas, save_page_renders};
pub use naming::third_party_image_filename;
pub use output::{
    ExtractedTable, ImageSource, IngestOutput, OcrPageResult, PageText, PdfPayload, RenderedCrop,
    RenderedPage, SavedImage, SkippedImage, TableCell, TableFormulaOutput,
};
pub use pipeline::extract::extract_pdf_payload;
pub use pipeline::grid::build_grid;
pub use pipeline::images::{extract_embedded_images, ImageExtraction, ImageLimits};
pub use pipeline::render::{render_crop, render_pages};
pub use pipeline::response::extract_json_object;
pub use pipeline::retry::{call_with_retry, RetryPolicy, RetryRunner};
pub use pipeline::vision::{HttpVisionClient, VisionClient, VisionEndpoint};
pub use progress::{IngestProgressCallback, NoopProgressCallback, ProgressCallback};
