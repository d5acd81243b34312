//! Processing stages behind the entry points in [`crate::ingest`].
//!
//! Each submodule implements one step and is testable on its own.
//!
//! ## Data Flow
//!
//! ```text
//!           ┌─▶ extract (pdfplumber text + tables ─▶ grid)     ──▶ pages, tables
//! input ────┼─▶ images  (lopdf XObjects ─▶ PNG/JPEG)           ──▶ images, skips
//!           └─▶ render  (pdfium bitmaps ─▶ encode) ──▶ vision ──▶ OCR text, cell LaTeX
//!                                                      (retry, response)
//! ```
//!
//! 1. [`input`]: byte-level validation before any PDF engine is touched
//! 2. [`extract`]: page text and table detection over [`extract::PageContent`]
//! 3. [`grid`]: rebuilds merged-cell grids from the cell rectangles
//!    pdfplumber's table finder reports
//! 4. [`images`]: embedded image XObjects, walked with lopdf
//! 5. [`render`]: page and crop rasterisation; [`encode`] turns bitmaps into
//!    PNG bytes and data URLs
//! 6. [`vision`]: chat-completion calls; [`retry`] waits out rate limits and
//!    [`response`] recovers JSON from model replies

pub mod encode;
pub mod extract;
pub mod grid;
pub mod images;
pub mod input;
pub mod render;
pub mod response;
pub mod retry;
pub mod vision;
