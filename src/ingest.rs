//! Top-level entry points.
//!
//! * [`ingest`]: text, tables and embedded images of a document.
//! * [`ocr_pages`]: page OCR through a vision model.
//! * [`recognize_table_formulas`]: LaTeX for every geometric table cell.
//!
//! Each call opens its own document handles and runs in document order on
//! the calling thread. Per-item failures are stored next to the results;
//! only whole-call failures come back as `Err`.

use crate::config::IngestConfig;
use crate::error::{IngestError, ItemError};
use crate::naming::{cell_crop_filename, page_render_filename};
use crate::output::{
    ExtractedTable, ImageSource, IngestOutput, OcrPageResult, RenderedPage, SavedImage,
    TableFormulaOutput,
};
use crate::pipeline::extract::extract_pdf_payload;
use crate::pipeline::images::{extract_embedded_images, save_images, ImageLimits};
use crate::pipeline::input::validate_input;
use crate::pipeline::render::{crop_bitmap, render_bitmaps, render_pages, PageBitmap};
use crate::pipeline::retry::RetryRunner;
use crate::pipeline::vision::{ocr_page_image, recognize_cell_image, CellReply, VisionClient};
use crate::progress::{IngestProgressCallback, NoopProgressCallback};
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Extract text, tables and embedded images from a PDF.
///
/// Images are written into `images_dir` when one is given; otherwise
/// `IngestOutput::images` stays empty and only the skip report is returned.
///
/// # Errors
/// Fatal input errors (empty, not a PDF, bad page range), an unopenable
/// document, a missing pdfium library, or a failed write into `images_dir`.
pub fn ingest(
    pdf_bytes: &[u8],
    config: &IngestConfig,
    images_dir: Option<&Path>,
) -> Result<IngestOutput, IngestError> {
    let started = Instant::now();
    validate_input(pdf_bytes, &config.pages)?;

    let payload = extract_pdf_payload(pdf_bytes, config)?;
    let extraction = extract_embedded_images(
        pdf_bytes,
        &config.pages,
        ImageLimits {
            max_images: config.max_images,
            max_bytes: config.max_image_bytes,
        },
    )?;

    let images = match images_dir {
        Some(dir) => save_images(&extraction.images, dir)?,
        None => Vec::new(),
    };

    info!(
        "Ingested {} pages, {} tables, {} images in {}ms",
        payload.pages.len(),
        payload.tables.len(),
        extraction.images.len(),
        started.elapsed().as_millis()
    );

    Ok(IngestOutput {
        pages: payload.pages,
        tables: payload.tables,
        images,
        skipped: extraction.skipped,
    })
}

/// Retry runner for the vision calls of one batch.
pub fn build_runner(config: &IngestConfig) -> RetryRunner {
    RetryRunner::new(config.retry.clone())
}

/// Render the selected pages and OCR each one.
///
/// # Errors
/// Everything [`render_pages`] can fail with, plus
/// [`IngestError::AllPagesFailed`] when not a single page was recognised.
pub fn ocr_pages(
    pdf_bytes: &[u8],
    config: &IngestConfig,
    client: &dyn VisionClient,
) -> Result<Vec<OcrPageResult>, IngestError> {
    let pages = render_pages(
        pdf_bytes,
        &config.pages,
        config.max_pages,
        config.render_scale,
    )?;
    ocr_rendered_pages(&pages, config, client, &build_runner(config))
}

/// OCR already rendered pages, one request at a time.
///
/// Requests are spaced by `config.request_interval`. A page whose reply is
/// unusable gets an [`OcrPageResult`] with `error` set and the batch goes on.
/// An upstream failure ([`IngestError::is_upstream`]) ends the batch: the
/// remaining pages would be rejected the same way.
pub fn ocr_rendered_pages(
    pages: &[RenderedPage],
    config: &IngestConfig,
    client: &dyn VisionClient,
    runner: &RetryRunner,
) -> Result<Vec<OcrPageResult>, IngestError> {
    let total = pages.len();
    let progress = progress_of(config);
    progress.on_batch_start(total);
    info!("OCR of {} pages with model {}", total, config.model);

    let mut results = Vec::with_capacity(total);
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            runner.pause(config.request_interval);
        }
        progress.on_item_start(page.page_number, total);

        match ocr_page_image(client, runner, &config.model, &config.ocr_prompt, &page.png_bytes) {
            Ok(text) => {
                debug!("Page {}: {} chars recognised", page.page_number, text.chars().count());
                progress.on_item_complete(page.page_number, total, text.chars().count());
                results.push(OcrPageResult::ok(page.page_number, text));
            }
            Err(e) => {
                progress.on_item_error(page.page_number, total, &e.to_string());
                if e.is_upstream() {
                    warn!("Page {}: aborting OCR batch: {}", page.page_number, e);
                    return Err(e);
                }
                let item = ItemError::OcrFailed {
                    page: page.page_number,
                    detail: e.to_string(),
                };
                warn!("{}", item);
                results.push(OcrPageResult::failed(&item, page.page_number));
            }
        }
    }

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    progress.on_batch_complete(total, succeeded);

    if total > 0 && succeeded == 0 {
        let first_error = results
            .iter()
            .find_map(|r| r.error.clone())
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(IngestError::AllPagesFailed { total, first_error });
    }
    Ok(results)
}

/// Write rendered pages into `dir` as `pdfpage_p{page}_vision.png`.
pub fn save_page_renders(pages: &[RenderedPage], dir: &Path) -> Result<Vec<SavedImage>, IngestError> {
    create_dir(dir)?;
    pages
        .iter()
        .map(|page| {
            let filename = page_render_filename(page.page_number);
            write_file(&dir.join(&filename), &page.png_bytes)?;
            Ok(SavedImage {
                filename,
                mime: "image/png".to_string(),
                width: page.width,
                height: page.height,
                page_number: page.page_number,
                source: ImageSource::PageRender,
            })
        })
        .collect()
}

/// Extract tables and recognise a formula in every anchor cell with a bbox.
///
/// Each page is rendered once; cells are cropped from that render. At most
/// `config.max_cells` cells are attempted across all tables. Crops are
/// written into `crops_dir` when one is given.
///
/// A cell whose crop fails keeps `latex = None`. A cell whose reply cannot
/// be parsed gets `latex = Some("")`. Both are recorded in
/// [`TableFormulaOutput::diagnostics`].
///
/// # Errors
/// Input and document errors as for [`ingest`], and any fatal upstream
/// error: a rejected key or exhausted retries stop the whole call.
pub fn recognize_table_formulas(
    pdf_bytes: &[u8],
    config: &IngestConfig,
    client: &dyn VisionClient,
    crops_dir: Option<&Path>,
) -> Result<TableFormulaOutput, IngestError> {
    let payload = extract_pdf_payload(pdf_bytes, config)?;
    let mut tables = payload.tables;

    let candidates = tables
        .iter()
        .flat_map(|t| t.anchors())
        .filter(|(_, _, cell)| cell.bbox.is_some())
        .count();
    let total = candidates.min(config.max_cells);
    if total == 0 {
        info!("No table cells with geometry; nothing to recognise");
        return Ok(TableFormulaOutput {
            tables,
            ..TableFormulaOutput::default()
        });
    }

    let bitmaps: HashMap<usize, PageBitmap> = render_bitmaps(
        pdf_bytes,
        &config.pages,
        config.max_pages,
        config.render_scale,
    )?
    .into_iter()
    .map(|b| (b.page_number, b))
    .collect();
    if let Some(dir) = crops_dir {
        create_dir(dir)?;
    }

    let runner = build_runner(config);
    let progress = progress_of(config);
    progress.on_batch_start(total);
    info!(
        "Recognising formulas in {} of {} cells across {} tables",
        total,
        candidates,
        tables.len()
    );

    let mut state = CellBatch {
        config,
        client,
        runner: &runner,
        progress,
        total,
        crops_dir,
        out: TableFormulaOutput::default(),
        succeeded: 0,
        requests: 0,
    };
    'tables: for (table_index, table) in tables.iter_mut().enumerate() {
        let bitmap = bitmaps.get(&table.page_number);
        let mut cell_index = 0;
        for row in 0..table.rows {
            for col in 0..table.cols {
                if state.out.cells_processed >= config.max_cells {
                    break 'tables;
                }
                let cell = &table.cells[row][col];
                if cell.is_placeholder || cell.bbox.is_none() {
                    continue;
                }
                state.recognize(table, table_index, cell_index, row, col, bitmap)?;
                cell_index += 1;
            }
        }
    }

    let CellBatch {
        mut out, succeeded, ..
    } = state;
    progress.on_batch_complete(total, succeeded);
    info!(
        "Recognised {}/{} cells ({} diagnostics)",
        succeeded,
        out.cells_processed,
        out.diagnostics.len()
    );
    out.tables = tables;
    Ok(out)
}

/// Mutable state of one table-formula batch.
struct CellBatch<'a> {
    config: &'a IngestConfig,
    client: &'a dyn VisionClient,
    runner: &'a RetryRunner,
    progress: &'a dyn IngestProgressCallback,
    total: usize,
    crops_dir: Option<&'a Path>,
    out: TableFormulaOutput,
    succeeded: usize,
    requests: usize,
}

impl CellBatch<'_> {
    fn recognize(
        &mut self,
        table: &mut ExtractedTable,
        table_index: usize,
        cell_index: usize,
        row: usize,
        col: usize,
        bitmap: Option<&PageBitmap>,
    ) -> Result<(), IngestError> {
        self.out.cells_processed += 1;
        let item = self.out.cells_processed;
        let page = table.page_number;
        self.progress.on_item_start(item, self.total);

        let cell = &mut table.cells[row][col];
        let Some(bbox) = cell.bbox else {
            return Ok(());
        };
        let crop = match bitmap {
            Some(bitmap) => crop_bitmap(bitmap, bbox, self.config.crop_padding_px),
            None => Err(IngestError::RasterisationFailed {
                page,
                detail: "page was not rendered".into(),
            }),
        };
        let crop = match crop {
            Ok(crop) => crop,
            Err(e) => {
                self.fail(page, table_index, row, col, item, e.to_string());
                return Ok(());
            }
        };

        if let Some(dir) = self.crops_dir {
            let filename = cell_crop_filename(page, table_index, cell_index);
            write_file(&dir.join(&filename), &crop.png_bytes)?;
            self.out.crops.push(SavedImage {
                filename,
                mime: "image/png".to_string(),
                width: crop.width,
                height: crop.height,
                page_number: page,
                source: ImageSource::PageRender,
            });
        }

        if self.requests > 0 {
            self.runner.pause(self.config.request_interval);
        }
        self.requests += 1;

        match recognize_cell_image(
            self.client,
            self.runner,
            &self.config.model,
            &self.config.cell_prompt,
            &crop.png_bytes,
        )? {
            CellReply::Latex(latex) => {
                debug!("Page {} table {} cell ({}, {}): {:?}", page, table_index, row, col, latex);
                self.progress.on_item_complete(item, self.total, latex.chars().count());
                cell.latex = Some(latex);
                self.succeeded += 1;
            }
            CellReply::Unparseable(detail) => {
                cell.latex = Some(String::new());
                self.fail(page, table_index, row, col, item, detail);
            }
        }
        Ok(())
    }

    fn fail(&mut self, page: usize, table: usize, row: usize, col: usize, item: usize, detail: String) {
        let error = ItemError::CellFailed {
            page,
            table,
            row,
            col,
            detail,
        };
        warn!("{}", error);
        self.progress.on_item_error(item, self.total, &error.to_string());
        self.out.diagnostics.push(error);
    }
}

fn progress_of(config: &IngestConfig) -> &dyn IngestProgressCallback {
    match config.progress_callback {
        Some(ref cb) => cb.as_ref(),
        None => &NoopProgressCallback,
    }
}

fn create_dir(dir: &Path) -> Result<(), IngestError> {
    std::fs::create_dir_all(dir).map_err(|source| IngestError::OutputWriteFailed {
        path: dir.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), IngestError> {
    std::fs::write(path, bytes).map_err(|source| IngestError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    })
}
