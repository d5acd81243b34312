//! Page rasterisation via pdfium: whole pages, or padded crops of a page
//! region mapped from point space into pixel space.
//!
//! Pages render at `points × scale` pixels on each axis, so scale 1.0 is
//! 72 dpi and 2.0 is 144 dpi. Crops are cut from the full-page render with a
//! [`PointToPixel`] built from the actual bitmap size.

use crate::config::PageRange;
use crate::error::IngestError;
use crate::geometry::{PageRect, PageSize, PixelRect, PointToPixel};
use crate::output::{RenderedCrop, RenderedPage};
use crate::pdfium::{bind_pdfium, open_document, page_at, page_count};
use crate::pipeline::encode::encode_png;
use crate::pipeline::input::validate_input;
use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::{debug, info, warn};

/// A rendered page bitmap together with the page's size in points.
pub struct PageBitmap {
    pub page_number: usize,
    pub size: PageSize,
    pub image: DynamicImage,
}

/// Render the selected pages to PNG.
///
/// The document is opened once; if that fails nothing is returned. A page
/// that cannot be opened or rendered is skipped with a warning.
pub fn render_pages(
    pdf_bytes: &[u8],
    pages: &PageRange,
    max_pages: usize,
    scale: f32,
) -> Result<Vec<RenderedPage>, IngestError> {
    let bitmaps = render_bitmaps(pdf_bytes, pages, max_pages, scale)?;
    let mut out = Vec::with_capacity(bitmaps.len());
    for bitmap in bitmaps {
        let png_bytes = encode_png(&bitmap.image)?;
        out.push(RenderedPage {
            page_number: bitmap.page_number,
            width: bitmap.image.width(),
            height: bitmap.image.height(),
            png_bytes,
        });
    }
    Ok(out)
}

/// Render the selected pages, keeping the decoded bitmaps.
pub fn render_bitmaps(
    pdf_bytes: &[u8],
    pages: &PageRange,
    max_pages: usize,
    scale: f32,
) -> Result<Vec<PageBitmap>, IngestError> {
    validate_input(pdf_bytes, pages)?;
    let scale = check_scale(scale)?;

    let pdfium = bind_pdfium()?;
    let document = open_document(&pdfium, pdf_bytes)?;
    let total = page_count(&document);
    let indices = pages.to_indices(total, max_pages);
    info!(
        "Rendering {} of {} pages at scale {:.2}",
        indices.len(),
        total,
        scale
    );

    let mut out = Vec::with_capacity(indices.len());
    for idx in indices {
        match page_at(&document, idx).and_then(|page| render_page(&page, idx + 1, scale)) {
            Ok(bitmap) => out.push(bitmap),
            Err(e) => warn!("Skipping page {}: {}", idx + 1, e),
        }
    }
    Ok(out)
}

/// Render one page (1-indexed) and return the padded crop around `bbox`.
pub fn render_crop(
    pdf_bytes: &[u8],
    page_number: usize,
    bbox: PageRect,
    scale: f32,
    padding_px: u32,
) -> Result<RenderedCrop, IngestError> {
    validate_input(pdf_bytes, &PageRange::all())?;
    check_bbox(&bbox)?;
    let scale = check_scale(scale)?;

    let pdfium = bind_pdfium()?;
    let document = open_document(&pdfium, pdf_bytes)?;
    let total = page_count(&document);
    if page_number == 0 || page_number > total {
        return Err(IngestError::PageOutOfRange {
            page: page_number,
            total,
        });
    }
    let page = page_at(&document, page_number - 1)?;
    let bitmap = render_page(&page, page_number, scale)?;
    crop_bitmap(&bitmap, bbox, padding_px)
}

/// Cut the padded crop around `bbox` out of an already rendered page.
pub fn crop_bitmap(
    bitmap: &PageBitmap,
    bbox: PageRect,
    padding_px: u32,
) -> Result<RenderedCrop, IngestError> {
    check_bbox(&bbox)?;
    let rect = crop_pixels(&bitmap.image, bitmap.size, &bbox, padding_px).ok_or(
        IngestError::EmptyCrop {
            page: bitmap.page_number,
        },
    )?;
    let crop = bitmap
        .image
        .crop_imm(rect.left, rect.upper, rect.width(), rect.height());
    debug!(
        "Cropped page {} to {}x{} px at ({}, {})",
        bitmap.page_number,
        crop.width(),
        crop.height(),
        rect.left,
        rect.upper
    );
    Ok(RenderedCrop {
        page_number: bitmap.page_number,
        png_bytes: encode_png(&crop)?,
        width: crop.width(),
        height: crop.height(),
        bbox,
    })
}

/// Pixel rectangle of `bbox` on `image`, padded and clamped.
pub fn crop_pixels(
    image: &DynamicImage,
    page: PageSize,
    bbox: &PageRect,
    padding_px: u32,
) -> Option<PixelRect> {
    PointToPixel::new(page, image.width(), image.height()).crop_rect(bbox, padding_px)
}

/// Rasterise one open page.
pub fn render_page(page: &PdfPage, page_number: usize, scale: f32) -> Result<PageBitmap, IngestError> {
    let size = PageSize {
        width: page.width().value as f64,
        height: page.height().value as f64,
    };
    let (width, height) = target_pixels(size, scale);
    let config = PdfRenderConfig::new()
        .set_target_width(width)
        .set_target_height(height);

    let bitmap = page
        .render_with_config(&config)
        .map_err(|e| IngestError::RasterisationFailed {
            page: page_number,
            detail: format!("{:?}", e),
        })?;
    let image = bitmap.as_image();
    debug!(
        "Rendered page {} → {}x{} px",
        page_number,
        image.width(),
        image.height()
    );
    Ok(PageBitmap {
        page_number,
        size,
        image,
    })
}

/// Bitmap size for a page: points × scale, rounded, at least one pixel.
pub fn target_pixels(size: PageSize, scale: f32) -> (i32, i32) {
    let px = |points: f64| ((points * scale as f64).round() as i32).max(1);
    (px(size.width), px(size.height))
}

fn check_scale(scale: f32) -> Result<f32, IngestError> {
    if scale.is_finite() && scale > 0.0 {
        Ok(scale)
    } else {
        Err(IngestError::InvalidConfig(format!(
            "render scale must be positive, got {}",
            scale
        )))
    }
}

fn check_bbox(bbox: &PageRect) -> Result<(), IngestError> {
    let detail = if !bbox.is_finite() {
        "coordinates must be finite"
    } else if bbox.is_degenerate() {
        "x1 must exceed x0 and bottom must exceed top"
    } else {
        return Ok(());
    };
    Err(IngestError::InvalidBBox {
        x0: bbox.x0,
        top: bbox.top,
        x1: bbox.x1,
        bottom: bbox.bottom,
        detail: detail.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn bitmap(w: u32, h: u32) -> PageBitmap {
        let mut img = RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255]));
        img.put_pixel(w / 2, h / 2, Rgba([0, 0, 0, 255]));
        PageBitmap {
            page_number: 1,
            size: PageSize {
                width: w as f64 / 2.0,
                height: h as f64 / 2.0,
            },
            image: DynamicImage::ImageRgba8(img),
        }
    }

    #[test]
    fn target_pixels_scale_points() {
        let letter = PageSize {
            width: 612.0,
            height: 792.0,
        };
        assert_eq!(target_pixels(letter, 1.0), (612, 792));
        assert_eq!(target_pixels(letter, 2.0), (1224, 1584));
        assert_eq!(target_pixels(letter, 0.0001), (1, 1));
    }

    #[test]
    fn full_page_crop_matches_bitmap() {
        let b = bitmap(200, 100);
        let crop = crop_bitmap(&b, PageRect::new(0.0, 0.0, 100.0, 50.0), 0).unwrap();
        assert_eq!((crop.width, crop.height), (200, 100));
        assert_eq!(&crop.png_bytes[..4], b"\x89PNG");
    }

    #[test]
    fn padded_crop_is_clamped() {
        let b = bitmap(200, 100);
        let crop = crop_bitmap(&b, PageRect::new(10.0, 10.0, 20.0, 20.0), 5).unwrap();
        // 20..40 px on each axis, plus 5 px padding on each side.
        assert_eq!((crop.width, crop.height), (30, 30));
        let crop = crop_bitmap(&b, PageRect::new(0.0, 0.0, 5.0, 5.0), 50).unwrap();
        assert_eq!((crop.width, crop.height), (60, 60));
    }

    #[test]
    fn degenerate_bbox_is_rejected() {
        let b = bitmap(20, 20);
        let err = crop_bitmap(&b, PageRect::new(5.0, 5.0, 5.0, 8.0), 0).unwrap_err();
        assert!(matches!(err, IngestError::InvalidBBox { .. }));
        let err = crop_bitmap(&b, PageRect::new(0.0, f64::NAN, 5.0, 8.0), 0).unwrap_err();
        assert!(matches!(err, IngestError::InvalidBBox { .. }));
    }

    #[test]
    fn bbox_outside_page_is_empty_crop() {
        let b = bitmap(20, 20);
        let err = crop_bitmap(&b, PageRect::new(50.0, 50.0, 60.0, 60.0), 0).unwrap_err();
        assert!(matches!(err, IngestError::EmptyCrop { page: 1 }));
    }

    #[test]
    fn bad_scale_is_config_error() {
        assert!(check_scale(0.0).is_err());
        assert!(check_scale(f32::INFINITY).is_err());
        assert_eq!(check_scale(1.5).unwrap(), 1.5);
    }

    #[test]
    fn render_rejects_non_pdf_before_binding() {
        let err = render_pages(b"hello", &PageRange::all(), 0, 1.0).unwrap_err();
        assert!(matches!(err, IngestError::NotAPdf { .. }));
        let err = render_crop(b"", 1, PageRect::new(0.0, 0.0, 1.0, 1.0), 1.0, 0).unwrap_err();
        assert!(matches!(err, IngestError::EmptyInput));
    }
}
