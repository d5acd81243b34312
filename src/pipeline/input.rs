//! Input validation: reject bytes that are obviously not a PDF before any
//! PDF engine touches them.
//!
//! Both pdfium and lopdf produce confusing errors for non-PDF input, so the
//! `%PDF` signature is checked up front and reported with the offending
//! bytes.

use crate::config::PageRange;
use crate::error::IngestError;
use std::path::Path;
use tracing::debug;

/// The signature every PDF file starts with.
pub const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// Check that `bytes` is non-empty and carries the PDF signature, and that
/// `pages` is a valid range.
pub fn validate_input(bytes: &[u8], pages: &PageRange) -> Result<(), IngestError> {
    if bytes.is_empty() {
        return Err(IngestError::EmptyInput);
    }
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(IngestError::NotAPdf {
            magic: bytes.iter().take(PDF_MAGIC.len()).copied().collect(),
        });
    }
    pages.validate()?;
    debug!("Validated PDF input: {} bytes", bytes.len());
    Ok(())
}

/// Read a PDF from disk. The content is not validated here.
pub fn read_pdf_file(path: &Path) -> Result<Vec<u8>, IngestError> {
    std::fs::read(path).map_err(|e| IngestError::CorruptPdf {
        detail: format!("cannot read {}: {}", path.display(), e),
    })
}
