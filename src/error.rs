//! Error types for the pdf-ingest library.
//!
//! Three distinct error types reflect three distinct failure modes:
//!
//! * [`IngestError`]: **Fatal**: the call cannot produce a meaningful result
//!   (not a PDF, inverted page range, upstream rejected the request). Returned
//!   as `Err(IngestError)` from the top-level entry points.
//!
//! * [`ItemError`]: **Non-fatal**: one page or one table cell failed while
//!   the rest of the batch is fine. Stored next to the results so callers can
//!   inspect partial success.
//!
//! * [`SkipReason`]: why one embedded image was left out of an extraction.
//!
//! [`VisionError`] is the transport-level error of a single upstream chat
//! call. The retry wrapper classifies it by message and folds it into
//! [`IngestError`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf-ingest library.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// No bytes were supplied.
    #[error("Empty input: no PDF bytes were supplied")]
    EmptyInput,

    /// The bytes do not start with the `%PDF` signature.
    #[error("Input is not a PDF document\nFirst bytes: {magic:?}")]
    NotAPdf { magic: Vec<u8> },

    /// `page_end` precedes `page_start`, or a bound is zero.
    #[error("Invalid page range: {detail}")]
    InvalidPageRange { detail: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// The document could not be opened by the PDF engine.
    #[error("PDF is corrupt or unreadable: {detail}\nTry repairing with: qpdf input.pdf output.pdf")]
    CorruptPdf { detail: String },

    /// A single-page operation targeted a page the document does not have.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// A crop rectangle with zero or negative extent, or non-finite bounds.
    #[error("Invalid bounding box ({x0}, {top}, {x1}, {bottom}): {detail}")]
    InvalidBBox {
        x0: f64,
        top: f64,
        x1: f64,
        bottom: f64,
        detail: String,
    },

    /// The crop rectangle, after padding and clamping, covers no pixels.
    #[error("Crop of page {page} is empty after clamping to the rendered image")]
    EmptyCrop { page: usize },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// PNG encoding of a rendered bitmap failed.
    #[error("Image encoding failed: {0}")]
    ImageEncoding(String),

    // ── Upstream errors ───────────────────────────────────────────────────
    /// The upstream vision service failed with a non-retryable error.
    #[error("Vision API error: {message}")]
    Upstream { message: String },

    /// The retry wrapper hit its attempt cap on rate-limit errors.
    #[error("rate-limited after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    /// The retry wrapper's overall time budget ran out.
    #[error("retry deadline of {budget_ms}ms exceeded after {attempts} attempts: {message}")]
    DeadlineExceeded {
        attempts: u32,
        budget_ms: u64,
        message: String,
    },

    /// No JSON object could be recovered from model output.
    #[error("unable to parse JSON object; raw preview:\n{preview}")]
    JsonUnparseable { preview: String },

    /// The model returned an empty string.
    #[error("model returned empty content")]
    EmptyModelOutput,

    /// Every page of an OCR batch failed; the output would be empty.
    #[error("All {total} pages failed.\nFirst error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
You can:\n\
  • Place libpdfium in the working directory.\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium (file or directory).\n\
  • Install pdfium system-wide so the dynamic loader can find it.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    /// Whether this error came from the upstream vision service (as opposed
    /// to the document or the local environment).
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            IngestError::Upstream { .. }
                | IngestError::RetriesExhausted { .. }
                | IngestError::DeadlineExceeded { .. }
        )
    }
}

impl From<VisionError> for IngestError {
    fn from(e: VisionError) -> Self {
        IngestError::Upstream {
            message: e.to_string(),
        }
    }
}

/// A non-fatal error for one page or one table cell.
///
/// The batch continues past these; they are reported next to the results.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemError {
    /// Page rasterisation failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// Page OCR failed (upstream, parse, or empty output).
    #[error("Page {page}: OCR failed: {detail}")]
    OcrFailed { page: usize, detail: String },

    /// One merged-cell crop could not be rendered or recognised.
    #[error("Page {page} table {table} cell ({row}, {col}): {detail}")]
    CellFailed {
        page: usize,
        table: usize,
        row: usize,
        col: usize,
        detail: String,
    },
}

/// Why an embedded image was not extracted.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// The XObject reference did not resolve to a stream.
    #[error("XObject is not a stream")]
    NotAStream,

    /// The stream's filter chain could not be decoded.
    #[error("stream could not be decoded: {0}")]
    UndecodableStream(String),

    /// The stream decoded to zero bytes.
    #[error("stream is empty")]
    EmptyStream,

    /// Neither a standard image format nor a reconstructible raw buffer.
    #[error("unrecognised image data ({0})")]
    Unrecognised(String),

    /// A verbatim JPEG/PNG payload is larger than the per-image budget.
    #[error("verbatim payload of {size} bytes exceeds the {budget} byte budget")]
    OverBudget { size: usize, budget: usize },

    /// Re-encoding the decoded pixels failed.
    #[error("re-encoding failed: {0}")]
    Encoding(String),
}

/// Error of one upstream chat-completion call.
#[derive(Debug, Clone, Error)]
pub enum VisionError {
    /// No API key configured.
    #[error("vision API key is not configured (set VISION_API_KEY)")]
    NotConfigured,

    /// The request never got a response (connect, TLS, timeout).
    #[error("vision request failed: {0}")]
    Transport(String),

    /// The service answered with a non-success status.
    #[error("vision upstream error: {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body was not the expected chat-completion shape.
    #[error("vision upstream returned a malformed body: {0}")]
    MalformedBody(String),

    /// The response had no message content.
    #[error("vision upstream returned empty content")]
    EmptyContent,
}
