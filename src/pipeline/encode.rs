//! Image encoding: `DynamicImage` → PNG bytes → base64 data URL.
//!
//! Vision endpoints accept images as `data:` URLs embedded in the JSON
//! request body. PNG is used throughout because it is lossless: crisp glyph
//! edges matter more than file size for OCR and formula recognition.
//! Encoding is deterministic, so identical renders produce identical bytes.

use crate::error::IngestError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode an image as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, IngestError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| IngestError::ImageEncoding(e.to_string()))?;
    debug!(
        "Encoded {}x{} image → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}

/// `data:image/png;base64,…` URL for PNG bytes.
pub fn png_data_url(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn red_square() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])))
    }

    #[test]
    fn encode_small_image() {
        let png = encode_png(&red_square()).expect("encode should succeed");
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        let decoded = image::load_from_memory(&png).expect("valid png");
        assert_eq!((decoded.width(), decoded.height()), (10, 10));
    }

    #[test]
    fn encoding_is_deterministic() {
        assert_eq!(encode_png(&red_square()).unwrap(), encode_png(&red_square()).unwrap());
    }

    #[test]
    fn data_url_round_trips_base64() {
        let url = png_data_url(b"abc");
        let payload = url.strip_prefix("data:image/png;base64,").expect("prefix");
        assert_eq!(STANDARD.decode(payload).unwrap(), b"abc");
    }
}
