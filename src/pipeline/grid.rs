//! Merged-cell grid reconstruction from cell rectangles.
//!
//! A lattice detector hands back one rectangle per *visual* cell. A cell that
//! spans two columns is one wide rectangle, so the logical grid has to be
//! recovered from the rectangles themselves:
//!
//! ```text
//!  xs:  0      50     100    150
//!       ┌──────────────┬──────┐   ys: 0
//!       │  A (1×2)     │  B   │
//!       ├──────┬───────┼──────┤       20
//!       │  C   │  D    │  E   │
//!       └──────┴───────┴──────┘       40
//! ```
//!
//! Every distinct x and y edge becomes a grid boundary. Each rectangle snaps
//! to its nearest boundaries, which gives its anchor position and span. The
//! grid keeps, for every position, who owns it ([`GridSlot`]); the exported
//! table turns non-anchor positions into placeholders.

use crate::geometry::PageRect;
use crate::output::{ExtractedTable, TableCell};
use tracing::debug;

/// Boundaries closer than this (in points) are the same boundary.
pub const BOUNDARY_EPSILON: f64 = 0.5;

/// Rows shown in [`csv_preview`].
pub const CSV_PREVIEW_ROWS: usize = 20;

/// Source of the text inside a page-space rectangle.
pub trait TextQuery {
    fn text_in(&self, rect: &PageRect) -> String;
}

impl<F> TextQuery for F
where
    F: Fn(&PageRect) -> String,
{
    fn text_in(&self, rect: &PageRect) -> String {
        self(rect)
    }
}

/// Ownership of one grid position.
#[derive(Debug, Clone, PartialEq)]
pub enum GridSlot {
    /// Top-left position of a span.
    Anchor(TableCell),
    /// Inside the span of the anchor at `(row, col)`.
    Covered { row: usize, col: usize },
    /// No rectangle touches this position.
    Empty,
}

/// A reconstructed grid: boundaries plus per-position ownership.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CellGrid {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    slots: Vec<Vec<GridSlot>>,
}

impl CellGrid {
    pub fn rows(&self) -> usize {
        self.slots.len()
    }

    pub fn cols(&self) -> usize {
        self.slots.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.rows() == 0 || self.cols() == 0
    }

    pub fn slot(&self, row: usize, col: usize) -> Option<&GridSlot> {
        self.slots.get(row).and_then(|r| r.get(col))
    }

    pub fn slots(&self) -> &[Vec<GridSlot>] {
        &self.slots
    }

    /// Export as a rectangular cell matrix; covered and empty positions both
    /// become placeholders.
    pub fn into_cells(self) -> Vec<Vec<TableCell>> {
        self.slots
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|slot| match slot {
                        GridSlot::Anchor(cell) => cell,
                        GridSlot::Covered { .. } | GridSlot::Empty => TableCell::placeholder(),
                    })
                    .collect()
            })
            .collect()
    }
}

/// Build a grid from cell rectangles (page space, top-left origin).
///
/// Rectangles are placed in input order; a rectangle whose anchor position
/// is already owned is dropped, and a span that would run into an existing
/// anchor is clipped. Fewer than two distinct boundaries on either axis gives
/// an empty grid.
pub fn build_grid(rects: &[PageRect], text: Option<&dyn TextQuery>) -> CellGrid {
    let rects: Vec<&PageRect> = rects.iter().filter(|r| r.is_finite()).collect();

    let xs = distinct_boundaries(rects.iter().flat_map(|r| [r.x0, r.x1]));
    let ys = distinct_boundaries(rects.iter().flat_map(|r| [r.top, r.bottom]));
    if xs.len() < 2 || ys.len() < 2 {
        return CellGrid::default();
    }

    let n_rows = ys.len() - 1;
    let n_cols = xs.len() - 1;
    let mut slots = vec![vec![GridSlot::Empty; n_cols]; n_rows];

    for rect in rects {
        // Clamp to the last row/column; a rectangle starting on the final
        // boundary still needs a home.
        let r0 = nearest(&ys, rect.top).min(n_rows - 1);
        let c0 = nearest(&xs, rect.x0).min(n_cols - 1);
        let r1 = nearest(&ys, rect.bottom);
        let c1 = nearest(&xs, rect.x1);

        if !matches!(slots[r0][c0], GridSlot::Empty) {
            debug!(
                "Dropping cell at ({}, {}): position already owned",
                r0, c0
            );
            continue;
        }

        let want_rows = r1.saturating_sub(r0).max(1).min(n_rows - r0);
        let want_cols = c1.saturating_sub(c0).max(1).min(n_cols - c0);
        let (rowspan, colspan) = fit_span(&slots, r0, c0, want_rows, want_cols);

        for row in slots.iter_mut().skip(r0).take(rowspan) {
            for slot in row.iter_mut().skip(c0).take(colspan) {
                *slot = GridSlot::Covered { row: r0, col: c0 };
            }
        }

        let content = text
            .map(|q| q.text_in(rect).trim().to_string())
            .unwrap_or_default();
        slots[r0][c0] = GridSlot::Anchor(TableCell::anchor(
            content,
            rowspan as u32,
            colspan as u32,
            Some(*rect),
        ));
    }

    CellGrid { xs, ys, slots }
}

/// Sorted boundaries with near-duplicates merged into their mean.
fn distinct_boundaries(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.collect();
    sorted.sort_by(f64::total_cmp);

    let mut out: Vec<f64> = Vec::new();
    let mut cluster: Vec<f64> = Vec::new();
    for v in sorted {
        if let Some(&first) = cluster.first() {
            if v - first > BOUNDARY_EPSILON {
                out.push(mean(&cluster));
                cluster.clear();
            }
        }
        cluster.push(v);
    }
    if !cluster.is_empty() {
        out.push(mean(&cluster));
    }
    out
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Index of the boundary closest to `v`; ties go to the lower index.
fn nearest(bounds: &[f64], v: f64) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, b) in bounds.iter().enumerate() {
        let d = (b - v).abs();
        if d < best_dist {
            best = i;
            best_dist = d;
        }
    }
    best
}

/// Largest span no bigger than the requested one whose positions are all
/// still empty. Columns are fitted along the anchor row first, then rows are
/// fitted across those columns.
fn fit_span(
    slots: &[Vec<GridSlot>],
    r0: usize,
    c0: usize,
    want_rows: usize,
    want_cols: usize,
) -> (usize, usize) {
    let is_free = |r: usize, c: usize| matches!(slots[r][c], GridSlot::Empty);

    let colspan = (c0..c0 + want_cols)
        .take_while(|&c| is_free(r0, c))
        .count()
        .max(1);
    let rowspan = (r0..r0 + want_rows)
        .take_while(|&r| (c0..c0 + colspan).all(|c| is_free(r, c)))
        .count()
        .max(1);
    (rowspan, colspan)
}

/// Comma-joined preview of the first [`CSV_PREVIEW_ROWS`] rows. Placeholders
/// are empty fields; newlines and commas inside content become spaces.
pub fn csv_preview(cells: &[Vec<TableCell>]) -> String {
    cells
        .iter()
        .take(CSV_PREVIEW_ROWS)
        .map(|row| {
            row.iter()
                .map(|cell| {
                    if cell.is_placeholder {
                        String::new()
                    } else {
                        cell.content.replace(['\r', '\n', ','], " ")
                    }
                })
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Wrap a non-empty grid as a table of `page_number`.
pub fn table_from_grid(page_number: usize, grid: CellGrid) -> Option<ExtractedTable> {
    if grid.is_empty() {
        return None;
    }
    let rows = grid.rows();
    let cols = grid.cols();
    let cells = grid.into_cells();
    let csv_preview = csv_preview(&cells);
    Some(ExtractedTable {
        page_number,
        rows,
        cols,
        cells,
        csv_preview,
    })
}

/// Wrap a plain string matrix as a table of 1×1 cells, padding short rows.
pub fn table_from_matrix(page_number: usize, matrix: Vec<Vec<String>>) -> Option<ExtractedTable> {
    let cols = matrix.iter().map(Vec::len).max().unwrap_or(0);
    if matrix.is_empty() || cols == 0 {
        return None;
    }
    let cells: Vec<Vec<TableCell>> = matrix
        .into_iter()
        .map(|row| {
            let mut out: Vec<TableCell> = row.into_iter().map(TableCell::plain).collect();
            out.resize_with(cols, || TableCell::plain(""));
            out
        })
        .collect();
    let csv_preview = csv_preview(&cells);
    Some(ExtractedTable {
        page_number,
        rows: cells.len(),
        cols,
        cells,
        csv_preview,
    })
}
