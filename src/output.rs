//! Result types produced by the ingestion entry points.
//!
//! Everything here is plain data: created fresh per call, owned by the
//! caller, serialisable to JSON for the CLI and for downstream services.

use crate::error::{ItemError, SkipReason};
use crate::geometry::PageRect;
use serde::{Deserialize, Serialize};

/// Extracted text of one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    /// 1-indexed page number.
    pub page_number: usize,
    /// Text, truncated to the configured per-page budget.
    pub text: String,
}

/// One grid position of an extracted table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCell {
    pub content: String,
    pub rowspan: u32,
    pub colspan: u32,
    pub is_placeholder: bool,
    /// Page-space rectangle of the anchor cell. Placeholders never carry one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<PageRect>,
    /// LaTeX recognised from the cell crop, filled by the formula flow only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latex: Option<String>,
}

impl TableCell {
    /// Top-left position of a span.
    pub fn anchor(content: impl Into<String>, rowspan: u32, colspan: u32, bbox: Option<PageRect>) -> Self {
        Self {
            content: content.into(),
            rowspan: rowspan.max(1),
            colspan: colspan.max(1),
            is_placeholder: false,
            bbox,
            latex: None,
        }
    }

    /// A 1×1 cell without geometry, as produced by the text-alignment detector.
    pub fn plain(content: impl Into<String>) -> Self {
        Self::anchor(content, 1, 1, None)
    }

    /// Empty 1×1 filler for a covered or unused position.
    pub fn placeholder() -> Self {
        Self {
            content: String::new(),
            rowspan: 1,
            colspan: 1,
            is_placeholder: true,
            bbox: None,
            latex: None,
        }
    }
}

/// A table detected on one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTable {
    pub page_number: usize,
    pub rows: usize,
    pub cols: usize,
    /// `rows × cols`, row-major.
    pub cells: Vec<Vec<TableCell>>,
    /// First rows as comma-separated text, for previews and logs.
    pub csv_preview: String,
}

impl ExtractedTable {
    /// Anchor cells with their grid position, in row-major order.
    pub fn anchors(&self) -> impl Iterator<Item = (usize, usize, &TableCell)> {
        self.cells.iter().enumerate().flat_map(|(r, row)| {
            row.iter()
                .enumerate()
                .filter(|(_, cell)| !cell.is_placeholder)
                .map(move |(c, cell)| (r, c, cell))
        })
    }
}

/// Where a persisted image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    /// An image XObject embedded in the PDF.
    Embedded,
    /// A rasterised page or page crop.
    PageRender,
}

/// Metadata of an image written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedImage {
    pub filename: String,
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub page_number: usize,
    pub source: ImageSource,
}

/// A page rasterised to PNG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedPage {
    pub page_number: usize,
    #[serde(skip)]
    pub png_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// A padded crop of a page, rasterised to PNG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedCrop {
    pub page_number: usize,
    #[serde(skip)]
    pub png_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// The page-space rectangle that was requested (before padding).
    pub bbox: PageRect,
}

/// OCR outcome for one page. Exactly one of `text` / `error` is meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrPageResult {
    pub page_number: usize,
    pub text: String,
    pub error: Option<String>,
}

impl OcrPageResult {
    pub fn ok(page_number: usize, text: String) -> Self {
        Self {
            page_number,
            text,
            error: None,
        }
    }

    pub fn failed(error: &ItemError, page_number: usize) -> Self {
        Self {
            page_number,
            text: String::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// An embedded image that was left out, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedImage {
    pub page_number: usize,
    /// Resource name of the XObject, e.g. `Im0`.
    pub name: String,
    pub reason: SkipReason,
}

/// Text and tables of the selected pages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdfPayload {
    pub pages: Vec<PageText>,
    pub tables: Vec<ExtractedTable>,
}

/// Everything [`crate::ingest::ingest`] produces for one document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestOutput {
    pub pages: Vec<PageText>,
    pub tables: Vec<ExtractedTable>,
    /// Persisted images; empty when no directory was supplied.
    pub images: Vec<SavedImage>,
    pub skipped: Vec<SkippedImage>,
}

/// Result of [`crate::ingest::recognize_table_formulas`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableFormulaOutput {
    /// Tables with `latex` filled on the cells that were recognised.
    pub tables: Vec<ExtractedTable>,
    /// Crops written to disk, when a directory was supplied.
    pub crops: Vec<SavedImage>,
    /// Cells that were attempted.
    pub cells_processed: usize,
    /// Per-cell failures; the batch went on past each of them.
    pub diagnostics: Vec<ItemError>,
}
