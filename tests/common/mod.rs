//! Shared fixtures for the integration tests: small PDFs built with lopdf.

#![allow(dead_code)]

use lopdf::{dictionary, Dictionary, Document, Object, Stream};

/// Skip the calling test when the pdfium shared library cannot be bound.
#[allow(unused_macros)]
macro_rules! skip_unless_pdfium {
    () => {{
        if let Err(e) = pdf_ingest::pdfium::bind_pdfium() {
            println!("SKIP: pdfium not available: {}", e.to_string().lines().next().unwrap_or(""));
            return;
        }
    }};
}

/// Page edge length in points; every fixture page is square.
pub const PAGE_SIZE: i64 = 200;

/// One fixture page: a raw content stream plus image XObjects.
#[derive(Default)]
pub struct PageFixture {
    pub content: String,
    pub images: Vec<Stream>,
}

impl PageFixture {
    /// A page showing `label` in Helvetica.
    pub fn text(label: &str) -> Self {
        Self {
            content: format!("BT /F1 18 Tf 20 160 Td ({label}) Tj ET\n"),
            images: Vec::new(),
        }
    }

    /// A 2×2 ruled table, each cell stroked on its own, with one letter
    /// per cell: A B on top, C D below.
    pub fn ruled_table() -> Self {
        let mut content = String::from("1 w\n");
        let cells = [
            ("A", 20, 140),
            ("B", 100, 140),
            ("C", 20, 100),
            ("D", 100, 100),
        ];
        for (label, x, y) in cells {
            content.push_str(&format!("{x} {y} 80 40 re S\n"));
            content.push_str(&format!("BT /F1 14 Tf {} {} Td ({label}) Tj ET\n", x + 30, y + 14));
        }
        Self {
            content,
            images: Vec::new(),
        }
    }

    /// Two columns of prose side by side, three lines each, no rulings.
    pub fn two_column_prose() -> Self {
        let left = ["The method was", "applied to each", "sample in turn"];
        let right = ["Prior work had", "relied on manual", "inspection only"];
        let mut content = String::new();
        for (i, (l, r)) in left.iter().zip(right).enumerate() {
            let y = 160 - 12 * i as i64;
            content.push_str(&format!("BT /F1 9 Tf 10 {y} Td ({l}) Tj ET\n"));
            content.push_str(&format!("BT /F1 9 Tf 110 {y} Td ({r}) Tj ET\n"));
        }
        Self {
            content,
            images: Vec::new(),
        }
    }

    pub fn with_image(mut self, image: Stream) -> Self {
        self.images.push(image);
        self
    }
}

/// An uncompressed DeviceRGB image XObject filled with one colour.
pub fn rgb_image(width: i64, height: i64, rgb: [u8; 3]) -> Stream {
    let data: Vec<u8> = rgb.iter().copied().cycle().take((width * height * 3) as usize).collect();
    Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width,
            "Height" => height,
            "BitsPerComponent" => 8,
            "ColorSpace" => "DeviceRGB",
        },
        data,
    )
}

/// Build a PDF with one page per [`PageFixture`].
pub fn build_pdf(pages: Vec<PageFixture>) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids = Vec::new();
    for page in pages {
        let mut xobjects = Dictionary::new();
        for (i, image) in page.images.into_iter().enumerate() {
            let id = doc.add_object(image);
            xobjects.set(format!("Im{i}"), Object::Reference(id));
        }
        let content_id = doc.add_object(Stream::new(dictionary! {}, page.content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_SIZE.into(), PAGE_SIZE.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
                "XObject" => xobjects,
            },
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
    doc.save_to(&mut buf).expect("fixture PDF serialises");
    buf
}

/// `Page 1`, `Page 2`, … one text page each.
pub fn numbered_pages(n: usize) -> Vec<u8> {
    build_pdf((1..=n).map(|i| PageFixture::text(&format!("Page {i}"))).collect())
}
