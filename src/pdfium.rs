//! Binding to the pdfium shared library and opening documents.
//!
//! pdfium is a C++ library loaded at runtime. Lookup order:
//!
//! 1. `PDFIUM_LIB_PATH`: a library file, or a directory containing the
//!    platform library (`libpdfium.so`, `libpdfium.dylib`, `pdfium.dll`);
//! 2. the platform library in the working directory;
//! 3. the system library search path.
//!
//! Every entry point binds its own instance and drops it on return, so calls
//! share no state.

use crate::error::IngestError;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming an explicit pdfium library or directory.
pub const ENV_PDFIUM_LIB_PATH: &str = "PDFIUM_LIB_PATH";

/// Bind to pdfium using the lookup order above.
pub fn bind_pdfium() -> Result<Pdfium, IngestError> {
    let bindings = match std::env::var_os(ENV_PDFIUM_LIB_PATH) {
        Some(path) => {
            let library = library_path(Path::new(&path));
            debug!("Binding pdfium from {}", library.display());
            Pdfium::bind_to_library(&library)
        }
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| IngestError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

fn library_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        Pdfium::pdfium_platform_library_name_at_path(path)
    } else {
        path.to_path_buf()
    }
}

/// Open a document from memory. Password-protected and malformed files are
/// both reported as [`IngestError::CorruptPdf`] with pdfium's reason.
pub fn open_document<'a>(pdfium: &'a Pdfium, bytes: &'a [u8]) -> Result<PdfDocument<'a>, IngestError> {
    pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| IngestError::CorruptPdf {
            detail: format!("{:?}", e),
        })
}

/// Page count of an open document.
pub fn page_count(document: &PdfDocument<'_>) -> usize {
    document.pages().len() as usize
}

/// Open page `index` (0-based).
pub fn page_at<'a>(document: &PdfDocument<'a>, index: usize) -> Result<PdfPage<'a>, IngestError> {
    let pages = document.pages();
    let pdfium_index = page_index(index, pages.len() as usize)?;
    pages.get(pdfium_index).map_err(|e| IngestError::RasterisationFailed {
        page: index + 1,
        detail: format!("{:?}", e),
    })
}

/// pdfium addresses pages with a `u16`.
fn page_index(index: usize, total: usize) -> Result<u16, IngestError> {
    u16::try_from(index).map_err(|_| IngestError::PageOutOfRange {
        page: index + 1,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_index_past_u16_is_out_of_range() {
        assert_eq!(page_index(65_535, 70_000).unwrap(), u16::MAX);
        let err = page_index(65_536, 70_000).unwrap_err();
        assert!(matches!(err, IngestError::PageOutOfRange { page: 65_537, total: 70_000 }));
    }

    #[test]
    fn explicit_file_path_is_used_verbatim() {
        let p = library_path(Path::new("/definitely/not/here/libpdfium.so"));
        assert_eq!(p, PathBuf::from("/definitely/not/here/libpdfium.so"));
    }

    #[test]
    fn directory_resolves_to_platform_library() {
        let dir = tempfile::tempdir().unwrap();
        let p = library_path(dir.path());
        assert!(p.starts_with(dir.path()));
        assert!(p.to_string_lossy().contains("pdfium"));
    }
}
