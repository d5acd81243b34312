//! Embedded raster image extraction.
//!
//! Walks each selected page's `/Resources /XObject` dictionary (inherited
//! through `/Parent` when the page has none of its own) and turns every
//! `/Subtype /Image` stream into a PNG, a reconstructed raw buffer, or a
//! verbatim JPEG/PNG payload. Anything else is recorded as a skip.
//!
//! Decoding order per image:
//!
//! 1. general decode of the stream bytes (a JPEG from `/DCTDecode`, or a
//!    file embedded as-is), normalised to RGB/RGBA and PNG-encoded, halving
//!    the size while the PNG is over budget;
//! 2. headerless raw pixels rebuilt from `/Width`, `/Height`,
//!    `/BitsPerComponent 8` and a device colour space;
//! 3. the bytes verbatim, when they carry a JPEG or PNG signature.

use crate::config::PageRange;
use crate::error::{IngestError, SkipReason};
use crate::naming::embedded_image_filename;
use crate::output::{ImageSource, SavedImage, SkippedImage};
use crate::pipeline::encode::encode_png;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, RgbImage};
use lopdf::{Dictionary, Document, Object, Stream};
use std::path::Path;
use tracing::{debug, info, warn};

/// Images are never downscaled below this edge length.
pub const MIN_IMAGE_EDGE: u32 = 64;

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8];
const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Budget for one extraction call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLimits {
    /// Stop after this many images.
    pub max_images: usize,
    /// Target encoded size per image.
    pub max_bytes: usize,
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self {
            max_images: 50,
            max_bytes: 2_000_000,
        }
    }
}

/// How an image's pixels were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMethod {
    Decoded,
    Reconstructed,
    Verbatim,
}

/// One extracted image, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub page_number: usize,
    /// Resource name of the XObject.
    pub name: String,
    pub filename: String,
    pub mime: &'static str,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
    pub method: DecodeMethod,
}

/// Outcome of walking a document for images.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageExtraction {
    pub images: Vec<DecodedImage>,
    pub skipped: Vec<SkippedImage>,
}

// ── Typed views of the PDF objects involved ──────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum XObjectKind {
    Image,
    Form,
    Other(String),
}

impl XObjectKind {
    fn of(dict: &Dictionary) -> Self {
        match dict.get(b"Subtype").and_then(Object::as_name) {
            Ok(b"Image") => XObjectKind::Image,
            Ok(b"Form") => XObjectKind::Form,
            Ok(other) => XObjectKind::Other(String::from_utf8_lossy(other).into_owned()),
            Err(_) => XObjectKind::Other(String::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StreamFilter {
    Flate,
    Dct,
    Jpx,
    Other(String),
}

impl StreamFilter {
    fn from_name(name: &[u8]) -> Self {
        match name {
            b"FlateDecode" | b"Fl" => StreamFilter::Flate,
            b"DCTDecode" | b"DCT" => StreamFilter::Dct,
            b"JPXDecode" => StreamFilter::Jpx,
            other => StreamFilter::Other(String::from_utf8_lossy(other).into_owned()),
        }
    }

    fn is_image_codec(&self) -> bool {
        matches!(self, StreamFilter::Dct | StreamFilter::Jpx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ColorSpace {
    DeviceRgb,
    DeviceGray,
    DeviceCmyk,
    Unknown(String),
}

impl ColorSpace {
    fn from_name(name: &[u8]) -> Self {
        match name {
            b"DeviceRGB" | b"RGB" | b"CalRGB" => ColorSpace::DeviceRgb,
            b"DeviceGray" | b"G" | b"CalGray" => ColorSpace::DeviceGray,
            b"DeviceCMYK" | b"CMYK" => ColorSpace::DeviceCmyk,
            other => ColorSpace::Unknown(String::from_utf8_lossy(other).into_owned()),
        }
    }

    fn from_components(n: i64) -> Self {
        match n {
            1 => ColorSpace::DeviceGray,
            3 => ColorSpace::DeviceRgb,
            4 => ColorSpace::DeviceCmyk,
            other => ColorSpace::Unknown(format!("ICCBased /N {other}")),
        }
    }

    fn components(&self) -> Option<usize> {
        match self {
            ColorSpace::DeviceGray => Some(1),
            ColorSpace::DeviceRgb => Some(3),
            ColorSpace::DeviceCmyk => Some(4),
            ColorSpace::Unknown(_) => None,
        }
    }
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    resolve(doc, obj).as_dict().ok()
}

fn int_entry(dict: &Dictionary, key: &[u8]) -> Option<i64> {
    dict.get(key).ok().and_then(|o| o.as_i64().ok())
}

fn filters(doc: &Document, dict: &Dictionary) -> Vec<StreamFilter> {
    match dict.get(b"Filter").map(|o| resolve(doc, o)) {
        Ok(Object::Name(name)) => vec![StreamFilter::from_name(name)],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|item| resolve(doc, item).as_name().ok())
            .map(StreamFilter::from_name)
            .collect(),
        _ => Vec::new(),
    }
}

/// Colour space of an image: a name, an array headed by a name, or an
/// `/ICCBased` stream described by its `/Alternate` or `/N`.
fn color_space(doc: &Document, dict: &Dictionary) -> ColorSpace {
    match dict.get(b"ColorSpace") {
        Ok(obj) => color_space_of(doc, resolve(doc, obj)),
        Err(_) => ColorSpace::Unknown("missing".into()),
    }
}

fn color_space_of(doc: &Document, obj: &Object) -> ColorSpace {
    match obj {
        Object::Name(name) => ColorSpace::from_name(name),
        Object::Array(items) => {
            let Some(head) = items.first().and_then(|o| resolve(doc, o).as_name().ok()) else {
                return ColorSpace::Unknown("array".into());
            };
            if head != b"ICCBased" {
                return ColorSpace::from_name(head);
            }
            let Some(Object::Stream(icc)) = items.get(1).map(|o| resolve(doc, o)) else {
                return ColorSpace::Unknown("ICCBased without profile".into());
            };
            if let Ok(alt) = icc.dict.get(b"Alternate") {
                let alt = color_space_of(doc, resolve(doc, alt));
                if alt.components().is_some() {
                    return alt;
                }
            }
            match int_entry(&icc.dict, b"N") {
                Some(n) => ColorSpace::from_components(n),
                None => ColorSpace::Unknown("ICCBased without /N".into()),
            }
        }
        _ => ColorSpace::Unknown("unsupported object".into()),
    }
}

/// `/Resources` of a page, looked up through `/Parent` when absent.
fn page_resources<'a>(doc: &'a Document, page: &'a Dictionary) -> Option<&'a Dictionary> {
    let mut current = page;
    // Bounded walk; a cyclic page tree must not hang the extractor.
    for _ in 0..32 {
        if let Ok(res) = current.get(b"Resources") {
            return resolve_dict(doc, res);
        }
        let parent = current.get(b"Parent").ok()?;
        current = resolve_dict(doc, parent)?;
    }
    None
}

// ── Decoding ─────────────────────────────────────────────────────────────

/// Stream bytes with non-image filters removed.
fn stream_bytes(doc: &Document, stream: &Stream) -> Result<Vec<u8>, SkipReason> {
    let chain = filters(doc, &stream.dict);
    let bytes = match chain.as_slice() {
        [] => stream.content.clone(),
        [only] if only.is_image_codec() => stream.content.clone(),
        _ => stream
            .decompressed_content()
            .map_err(|e| SkipReason::UndecodableStream(e.to_string()))?,
    };
    if bytes.is_empty() {
        return Err(SkipReason::EmptyStream);
    }
    Ok(bytes)
}

/// Encoded bytes of one image and how they were obtained.
#[derive(Debug)]
struct Payload {
    bytes: Vec<u8>,
    ext: &'static str,
    mime: &'static str,
    width: u32,
    height: u32,
    method: DecodeMethod,
}

impl Payload {
    fn png(img: DynamicImage, max_bytes: usize, method: DecodeMethod) -> Result<Self, SkipReason> {
        let (bytes, width, height) = fit_png(img, max_bytes)?;
        Ok(Self {
            bytes,
            ext: "png",
            mime: "image/png",
            width,
            height,
            method,
        })
    }
}

/// Decode one image XObject stream.
fn decode_xobject(doc: &Document, stream: &Stream, max_bytes: usize) -> Result<Payload, SkipReason> {
    let bytes = stream_bytes(doc, stream)?;

    if let Ok(img) = image::load_from_memory(&bytes) {
        return Payload::png(normalise(img), max_bytes, DecodeMethod::Decoded);
    }

    let dict = &stream.dict;
    let width = int_entry(dict, b"Width").unwrap_or(0);
    let height = int_entry(dict, b"Height").unwrap_or(0);
    let bpc = int_entry(dict, b"BitsPerComponent").unwrap_or(8);
    let space = color_space(doc, dict);

    if let Some(img) = reconstruct_raw(&bytes, width, height, bpc, &space) {
        return Payload::png(img, max_bytes, DecodeMethod::Reconstructed);
    }

    let (ext, mime) = if bytes.starts_with(JPEG_MAGIC) {
        ("jpg", "image/jpeg")
    } else if bytes.starts_with(PNG_MAGIC) {
        ("png", "image/png")
    } else {
        return Err(SkipReason::Unrecognised(format!(
            "{}x{}, {} bpc, {:?}",
            width, height, bpc, space
        )));
    };
    if bytes.len() > max_bytes {
        return Err(SkipReason::OverBudget {
            size: bytes.len(),
            budget: max_bytes,
        });
    }
    Ok(Payload {
        bytes,
        ext,
        mime,
        width: u32::try_from(width).unwrap_or(0),
        height: u32::try_from(height).unwrap_or(0),
        method: DecodeMethod::Verbatim,
    })
}

fn normalise(img: DynamicImage) -> DynamicImage {
    if img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    }
}

/// Rebuild a headerless 8-bit pixel buffer. Trailing bytes are ignored; a
/// short buffer is not an image.
fn reconstruct_raw(bytes: &[u8], width: i64, height: i64, bpc: i64, space: &ColorSpace) -> Option<DynamicImage> {
    if width <= 0 || height <= 0 || bpc != 8 {
        return None;
    }
    let (w, h) = (u32::try_from(width).ok()?, u32::try_from(height).ok()?);
    let n = space.components()?;
    let expected = (w as usize).checked_mul(h as usize)?.checked_mul(n)?;
    if bytes.len() < expected {
        return None;
    }
    let pixels = &bytes[..expected];

    match space {
        ColorSpace::DeviceRgb => RgbImage::from_raw(w, h, pixels.to_vec()).map(DynamicImage::ImageRgb8),
        ColorSpace::DeviceGray => GrayImage::from_raw(w, h, pixels.to_vec())
            .map(|g| DynamicImage::ImageRgb8(DynamicImage::ImageLuma8(g).to_rgb8())),
        ColorSpace::DeviceCmyk => {
            let rgb: Vec<u8> = pixels.chunks_exact(4).flat_map(cmyk_to_rgb).collect();
            RgbImage::from_raw(w, h, rgb).map(DynamicImage::ImageRgb8)
        }
        ColorSpace::Unknown(_) => None,
    }
}

fn cmyk_to_rgb(px: &[u8]) -> [u8; 3] {
    let k = 255 - px[3] as u32;
    let ch = |c: u8| ((255 - c as u32) * k / 255) as u8;
    [ch(px[0]), ch(px[1]), ch(px[2])]
}

/// PNG-encode, halving both edges while over budget and above the floor.
fn fit_png(mut img: DynamicImage, max_bytes: usize) -> Result<(Vec<u8>, u32, u32), SkipReason> {
    let encode = |img: &DynamicImage| encode_png(img).map_err(|e| SkipReason::Encoding(e.to_string()));
    let mut png = encode(&img)?;
    while png.len() > max_bytes && img.width() > MIN_IMAGE_EDGE && img.height() > MIN_IMAGE_EDGE {
        let w = (img.width() / 2).max(MIN_IMAGE_EDGE);
        let h = (img.height() / 2).max(MIN_IMAGE_EDGE);
        img = img.resize_exact(w, h, FilterType::Triangle);
        png = encode(&img)?;
    }
    if png.len() > max_bytes {
        warn!(
            "Image still {} bytes at {}x{} (budget {}); keeping it",
            png.len(),
            img.width(),
            img.height(),
            max_bytes
        );
    }
    Ok((png, img.width(), img.height()))
}

// ── Walk ─────────────────────────────────────────────────────────────────

/// Extract embedded images from the pages in `pages`.
///
/// `max_images` is checked before each XObject, so exactly that many
/// images come back when the document has more.
pub fn extract_embedded_images(
    pdf_bytes: &[u8],
    pages: &PageRange,
    limits: ImageLimits,
) -> Result<ImageExtraction, IngestError> {
    let doc = Document::load_mem(pdf_bytes).map_err(|e| IngestError::CorruptPdf {
        detail: e.to_string(),
    })?;
    let page_ids = doc.get_pages();
    let indices = pages.to_indices(page_ids.len(), 0);
    let mut out = ImageExtraction::default();

    'pages: for (page_number, page_id) in page_ids
        .into_iter()
        .map(|(n, id)| (n as usize, id))
        .filter(|(n, _)| indices.contains(&(n - 1)))
    {
        let Some(page) = doc.get_object(page_id).ok().and_then(|o| o.as_dict().ok()) else {
            continue;
        };
        let Some(xobjects) = page_resources(&doc, page)
            .and_then(|res| res.get(b"XObject").ok())
            .and_then(|x| resolve_dict(&doc, x))
        else {
            continue;
        };

        for (name, entry) in xobjects.iter() {
            if out.images.len() >= limits.max_images {
                break 'pages;
            }
            let name = String::from_utf8_lossy(name).into_owned();
            let Object::Stream(stream) = resolve(&doc, entry) else {
                out.skipped.push(SkippedImage {
                    page_number,
                    name,
                    reason: SkipReason::NotAStream,
                });
                continue;
            };
            if XObjectKind::of(&stream.dict) != XObjectKind::Image {
                continue;
            }

            match decode_xobject(&doc, stream, limits.max_bytes) {
                Ok(payload) => {
                    let filename = embedded_image_filename(page_number, out.images.len(), payload.ext);
                    debug!(
                        "Page {}: {} → {} ({}x{}, {:?})",
                        page_number, name, filename, payload.width, payload.height, payload.method
                    );
                    out.images.push(DecodedImage {
                        page_number,
                        name,
                        filename,
                        mime: payload.mime,
                        width: payload.width,
                        height: payload.height,
                        bytes: payload.bytes,
                        method: payload.method,
                    });
                }
                Err(reason) => {
                    warn!("Page {}: skipping image {}: {}", page_number, name, reason);
                    out.skipped.push(SkippedImage {
                        page_number,
                        name,
                        reason,
                    });
                }
            }
        }
    }

    info!(
        "Extracted {} embedded images ({} skipped)",
        out.images.len(),
        out.skipped.len()
    );
    Ok(out)
}

/// Write extracted images into `dir`, creating it if needed.
pub fn save_images(images: &[DecodedImage], dir: &Path) -> Result<Vec<SavedImage>, IngestError> {
    std::fs::create_dir_all(dir).map_err(|source| IngestError::OutputWriteFailed {
        path: dir.to_path_buf(),
        source,
    })?;
    images
        .iter()
        .map(|img| {
            let path = dir.join(&img.filename);
            std::fs::write(&path, &img.bytes)
                .map_err(|source| IngestError::OutputWriteFailed { path, source })?;
            Ok(SavedImage {
                filename: img.filename.clone(),
                mime: img.mime.to_string(),
                width: img.width,
                height: img.height,
                page_number: img.page_number,
                source: ImageSource::Embedded,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn raw_image(w: i64, h: i64, cs: Object, data: Vec<u8>) -> Stream {
        Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => w,
                "Height" => h,
                "BitsPerComponent" => 8,
                "ColorSpace" => cs,
            },
            data,
        )
    }

    /// One page per entry; each page carries the given XObjects.
    fn pdf(pages: Vec<Vec<Stream>>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();
        for streams in pages {
            let mut xobjects = Dictionary::new();
            for (i, s) in streams.into_iter().enumerate() {
                let id = doc.add_object(s);
                xobjects.set(format!("Im{i}"), Object::Reference(id));
            }
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 200.into(), 200.into()],
                "Resources" => dictionary! { "XObject" => xobjects },
            });
            kids.push(Object::Reference(page_id));
        }
        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    fn rgb_square(n: i64) -> Stream {
        raw_image(n, n, "DeviceRGB".into(), vec![200; (n * n * 3) as usize])
    }

    #[test]
    fn no_images_yields_empty_report() {
        let out = extract_embedded_images(&pdf(vec![vec![]]), &PageRange::all(), ImageLimits::default()).unwrap();
        assert!(out.images.is_empty());
        assert!(out.skipped.is_empty());
    }

    #[test]
    fn max_images_caps_collection() {
        let bytes = pdf(vec![vec![rgb_square(4), rgb_square(4), rgb_square(4)]]);
        let limits = ImageLimits {
            max_images: 1,
            max_bytes: 2_000_000,
        };
        let out = extract_embedded_images(&bytes, &PageRange::all(), limits).unwrap();
        assert_eq!(out.images.len(), 1);
        assert_eq!(out.images[0].filename, "pdf_p1_0.png");
    }

    #[test]
    fn raw_rgb_is_reconstructed() {
        let out = extract_embedded_images(&pdf(vec![vec![rgb_square(8)]]), &PageRange::all(), ImageLimits::default())
            .unwrap();
        let img = &out.images[0];
        assert_eq!(img.method, DecodeMethod::Reconstructed);
        assert_eq!((img.width, img.height), (8, 8));
        assert_eq!(img.mime, "image/png");
        assert!(img.bytes.starts_with(PNG_MAGIC));
    }

    #[test]
    fn gray_and_cmyk_are_reconstructed() {
        let gray = raw_image(2, 2, "DeviceGray".into(), vec![0, 64, 128, 255]);
        let cmyk = raw_image(1, 1, "DeviceCMYK".into(), vec![0, 255, 255, 0]);
        let out = extract_embedded_images(&pdf(vec![vec![gray, cmyk]]), &PageRange::all(), ImageLimits::default())
            .unwrap();
        assert_eq!(out.images.len(), 2);
        let red = image::load_from_memory(&out.images[1].bytes).unwrap().to_rgb8();
        assert_eq!(red.get_pixel(0, 0).0, [255, 0, 0]);
    }

    #[test]
    fn iccbased_uses_n_components() {
        let mut doc = Document::with_version("1.5");
        let icc = doc.add_object(Stream::new(dictionary! { "N" => 3 }, vec![0; 4]));
        let obj = Object::Array(vec!["ICCBased".into(), Object::Reference(icc)]);
        assert_eq!(color_space_of(&doc, &obj), ColorSpace::DeviceRgb);

        let alt = doc.add_object(Stream::new(dictionary! { "N" => 3, "Alternate" => "DeviceGray" }, vec![]));
        let obj = Object::Array(vec!["ICCBased".into(), Object::Reference(alt)]);
        assert_eq!(color_space_of(&doc, &obj), ColorSpace::DeviceGray);
    }

    #[test]
    fn short_buffer_and_unknown_space_are_skipped() {
        let short = raw_image(10, 10, "DeviceRGB".into(), vec![1; 20]);
        let indexed = raw_image(2, 2, "Indexed".into(), vec![1; 4]);
        let out = extract_embedded_images(&pdf(vec![vec![short, indexed]]), &PageRange::all(), ImageLimits::default())
            .unwrap();
        assert!(out.images.is_empty());
        assert_eq!(out.skipped.len(), 2);
        assert!(matches!(out.skipped[0].reason, SkipReason::Unrecognised(_)));
    }

    #[test]
    fn verbatim_jpeg_over_budget_is_skipped() {
        let mut data = JPEG_MAGIC.to_vec();
        data.extend(vec![0u8; 100]);
        let fake_jpeg = Stream::new(
            dictionary! {
                "Subtype" => "Image",
                "Width" => 10,
                "Height" => 10,
                "BitsPerComponent" => 8,
                "ColorSpace" => "Indexed",
            },
            data,
        );
        let limits = ImageLimits {
            max_images: 10,
            max_bytes: 50,
        };
        let out = extract_embedded_images(&pdf(vec![vec![fake_jpeg]]), &PageRange::all(), limits).unwrap();
        assert!(matches!(
            out.skipped[0].reason,
            SkipReason::OverBudget { size: 102, budget: 50 }
        ));
    }

    #[test]
    fn oversized_png_is_halved_to_floor() {
        let noisy: Vec<u8> = (0..256 * 256 * 3).map(|i| ((i * 7919) % 251) as u8).collect();
        let img = RgbImage::from_raw(256, 256, noisy).unwrap();
        let (png, w, h) = fit_png(DynamicImage::ImageRgb8(img), 10_000).unwrap();
        assert!(w < 256 && h < 256);
        assert!(w >= MIN_IMAGE_EDGE && h >= MIN_IMAGE_EDGE);
        assert!(png.len() <= 10_000 || w == MIN_IMAGE_EDGE);
    }

    #[test]
    fn range_selects_pages_and_names_are_page_scoped() {
        let bytes = pdf(vec![vec![rgb_square(2)], vec![rgb_square(2)], vec![rgb_square(2)]]);
        let range = PageRange::new(Some(2), Some(3)).unwrap();
        let out = extract_embedded_images(&bytes, &range, ImageLimits::default()).unwrap();
        let names: Vec<_> = out.images.iter().map(|i| i.filename.as_str()).collect();
        assert_eq!(names, vec!["pdf_p2_0.png", "pdf_p3_1.png"]);
    }

    #[test]
    fn save_writes_files() {
        let out = extract_embedded_images(&pdf(vec![vec![rgb_square(2)]]), &PageRange::all(), ImageLimits::default())
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let saved = save_images(&out.images, &dir.path().join("imgs")).unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].source, ImageSource::Embedded);
        assert!(dir.path().join("imgs").join(&saved[0].filename).exists());
    }

    #[test]
    fn garbage_is_corrupt_pdf() {
        let err = extract_embedded_images(b"%PDF-1.4 garbage", &PageRange::all(), ImageLimits::default()).unwrap_err();
        assert!(matches!(err, IngestError::CorruptPdf { .. }));
    }
}
