//! Page text and table extraction.
//!
//! For each selected page: the text (truncated to the per-page budget), then
//! tables. Ruled tables come from pdfplumber's lattice finder as one
//! rectangle per visual cell; the grid builder turns those into a table that
//! keeps its merged cells. With `text_table_fallback` on, a page without a
//! ruled table is searched for text-aligned tables, which come back as plain
//! 1×1 matrices.
//!
//! Page access goes through [`PageContent`], so the table logic runs the same
//! over pdfplumber pages and over fixtures in tests.

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::geometry::PageRect;
use crate::output::{ExtractedTable, PageText, PdfPayload};
use crate::pipeline::grid::{build_grid, table_from_grid, table_from_matrix, TextQuery};
use crate::pipeline::input::validate_input;
use pdfplumber::{BBox, Page, Pdf, Strategy, Table, TableSettings, TextOptions};
use tracing::{debug, info, warn};

/// Marker appended to text cut at the per-page budget.
pub const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// What the extractor needs from one page. Coordinates are page points with
/// a top-left origin.
pub trait PageContent {
    /// 1-indexed page number.
    fn page_number(&self) -> usize;
    fn text(&self) -> String;
    /// Cell rectangles of each ruled table.
    fn ruled_tables(&self, settings: &TableSettings) -> Vec<Vec<PageRect>>;
    /// Row-major cell text of each text-aligned table.
    fn aligned_tables(&self, settings: &TableSettings) -> Vec<Vec<Vec<String>>>;
    fn text_in(&self, rect: &PageRect) -> String;
}

struct PageTextQuery<'p, P: PageContent + ?Sized>(&'p P);

impl<P: PageContent + ?Sized> TextQuery for PageTextQuery<'_, P> {
    fn text_in(&self, rect: &PageRect) -> String {
        self.0.text_in(rect)
    }
}

/// Cut `text` to `max_chars` characters, marking the cut. `0` yields "".
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{}", &text[..byte_idx], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

/// Text and tables of one page.
pub fn extract_page<P: PageContent + ?Sized>(page: &P, config: &IngestConfig) -> (PageText, Vec<ExtractedTable>) {
    let page_number = page.page_number();
    let text = PageText {
        page_number,
        text: truncate_text(&page.text(), config.max_chars_per_page),
    };

    let query = PageTextQuery(page);
    let mut tables: Vec<ExtractedTable> = page
        .ruled_tables(&config.table_settings)
        .into_iter()
        .filter_map(|cells| table_from_grid(page_number, build_grid(&cells, Some(&query))))
        .collect();

    if !tables.is_empty() {
        debug!("Page {}: {} ruled table(s)", page_number, tables.len());
    } else if config.text_table_fallback {
        tables = page
            .aligned_tables(&config.table_settings)
            .into_iter()
            .filter_map(|matrix| table_from_matrix(page_number, matrix))
            .collect();
        if !tables.is_empty() {
            debug!("Page {}: {} text-aligned table(s)", page_number, tables.len());
        }
    }

    (text, tables)
}

/// Run [`extract_page`] over pages in order.
pub fn extract_from_pages<'a, P, I>(pages: I, config: &IngestConfig) -> PdfPayload
where
    P: PageContent + ?Sized + 'a,
    I: IntoIterator<Item = &'a P>,
{
    let mut payload = PdfPayload::default();
    for page in pages {
        let (text, tables) = extract_page(page, config);
        payload.pages.push(text);
        payload.tables.extend(tables);
    }
    payload
}

/// Extract text and tables from the pages `config` selects.
pub fn extract_pdf_payload(pdf_bytes: &[u8], config: &IngestConfig) -> Result<PdfPayload, IngestError> {
    validate_input(pdf_bytes, &config.pages)?;
    let pdf = Pdf::open(pdf_bytes, None).map_err(|e| IngestError::CorruptPdf { detail: e.to_string() })?;
    let total = pdf.page_count();
    let indices = config.page_indices(total);
    info!("Extracting text and tables from {} of {} pages", indices.len(), total);

    let mut payload = PdfPayload::default();
    for idx in indices {
        let page = match pdf.page(idx) {
            Ok(page) => PlumberPage::new(page, idx + 1),
            Err(e) => {
                warn!("Skipping page {}: {}", idx + 1, e);
                continue;
            }
        };
        let (text, tables) = extract_page(&page, config);
        payload.pages.push(text);
        payload.tables.extend(tables);
    }
    Ok(payload)
}

// ── pdfplumber adapter ───────────────────────────────────────────────────

/// A pdfplumber page seen through [`PageContent`]. pdfplumber already
/// measures from the top-left corner.
pub struct PlumberPage {
    page: Page,
    number: usize,
}

impl PlumberPage {
    pub fn new(page: Page, number: usize) -> Self {
        Self { page, number }
    }

    fn find(&self, settings: &TableSettings, strategy: Strategy) -> Vec<Table> {
        let settings = TableSettings {
            strategy,
            ..settings.clone()
        };
        self.page.find_tables(&settings)
    }
}

impl PageContent for PlumberPage {
    fn page_number(&self) -> usize {
        self.number
    }

    fn text(&self) -> String {
        self.page.extract_text(&TextOptions::default())
    }

    fn ruled_tables(&self, settings: &TableSettings) -> Vec<Vec<PageRect>> {
        self.find(settings, Strategy::Lattice)
            .into_iter()
            .map(|table| {
                table
                    .cells
                    .iter()
                    .map(|cell| PageRect::new(cell.bbox.x0, cell.bbox.top, cell.bbox.x1, cell.bbox.bottom))
                    .collect()
            })
            .collect()
    }

    fn aligned_tables(&self, settings: &TableSettings) -> Vec<Vec<Vec<String>>> {
        self.find(settings, Strategy::Stream)
            .into_iter()
            .map(|table| {
                table
                    .rows
                    .iter()
                    .map(|row| {
                        row.iter()
                            .map(|cell| cell.text.as_deref().unwrap_or("").trim().to_string())
                            .collect()
                    })
                    .collect()
            })
            .collect()
    }

    fn text_in(&self, rect: &PageRect) -> String {
        let area = BBox::new(rect.x0, rect.top, rect.x1, rect.bottom);
        self.page
            .within_bbox(area)
            .extract_text(&TextOptions::default())
            .trim()
            .to_string()
    }
}
