//! Page text, table detection and the `ingest` entry point over lopdf-built
//! PDFs. Text and tables come from pdfplumber, so nothing here needs pdfium.

mod common;

use common::{build_pdf, numbered_pages, rgb_image, PageFixture};
use pdf_ingest::{extract_pdf_payload, ingest, IngestConfig, PageRange};

#[test]
fn page_range_selects_pages_two_and_three() {
    let config = IngestConfig::builder()
        .pages(PageRange::new(Some(2), Some(3)).unwrap())
        .max_pages(5)
        .build()
        .unwrap();
    let out = ingest(&numbered_pages(3), &config, None).unwrap();
    let numbers: Vec<_> = out.pages.iter().map(|p| p.page_number).collect();
    assert_eq!(numbers, vec![2, 3]);
    assert!(out.pages[0].text.contains("Page 2"), "got: {:?}", out.pages[0].text);
    assert!(out.images.is_empty());
}

#[test]
fn max_pages_caps_the_range() {
    let config = IngestConfig::builder().max_pages(2).build().unwrap();
    let payload = extract_pdf_payload(&numbered_pages(4), &config).unwrap();
    assert_eq!(payload.pages.len(), 2);
    assert_eq!(payload.pages[1].page_number, 2);
}

#[test]
fn text_is_truncated_to_budget() {
    let config = IngestConfig::builder().max_chars_per_page(4).build().unwrap();
    let payload = extract_pdf_payload(&numbered_pages(1), &config).unwrap();
    assert_eq!(payload.pages[0].text, "Page\n...[truncated]");
}

#[test]
fn ruled_table_is_extracted() {
    let bytes = build_pdf(vec![PageFixture::ruled_table()]);
    let payload = extract_pdf_payload(&bytes, &IngestConfig::default()).unwrap();
    assert_eq!(payload.tables.len(), 1);
    let table = &payload.tables[0];
    assert_eq!(table.page_number, 1);
    assert_eq!((table.rows, table.cols), (2, 2));
    assert!(table.cells.iter().flatten().all(|c| !c.is_placeholder && c.bbox.is_some()));
    let contents: Vec<_> = table.cells.iter().flatten().map(|c| c.content.as_str()).collect();
    assert_eq!(contents, vec!["A", "B", "C", "D"]);
}

#[test]
fn two_column_prose_is_not_a_table() {
    let bytes = build_pdf(vec![PageFixture::two_column_prose()]);
    let payload = extract_pdf_payload(&bytes, &IngestConfig::default()).unwrap();
    assert!(payload.tables.is_empty(), "got {:?}", payload.tables);
    assert!(payload.pages[0].text.contains("Prior work"));
}

#[test]
fn plain_text_pages_have_no_tables() {
    let payload = extract_pdf_payload(&numbered_pages(2), &IngestConfig::default()).unwrap();
    assert_eq!(payload.pages.len(), 2);
    assert!(payload.tables.is_empty());
}

#[test]
fn ingest_persists_images_next_to_text() {
    let bytes = build_pdf(vec![PageFixture::text("Figure").with_image(rgb_image(16, 16, [0, 128, 255]))]);
    let dir = tempfile::tempdir().unwrap();
    let out = ingest(&bytes, &IngestConfig::default(), Some(dir.path())).unwrap();
    assert_eq!(out.pages.len(), 1);
    assert_eq!(out.images.len(), 1);
    assert_eq!(out.images[0].filename, "pdf_p1_0.png");
    assert!(dir.path().join("pdf_p1_0.png").is_file());
}
