//! Output filenames.
//!
//! Names are unique within one call. They carry no document identity, so
//! two documents saved into the same directory overwrite each other's files;
//! give each document its own directory.

/// `pdf_p{page}_{sequence}.{ext}` for an embedded image.
pub fn embedded_image_filename(page_number: usize, sequence: usize, ext: &str) -> String {
    format!("pdf_p{page_number}_{sequence}.{ext}")
}

/// `pdfpage_p{page}_vision.png` for a full-page render sent to the vision model.
pub fn page_render_filename(page_number: usize) -> String {
    format!("pdfpage_p{page_number}_vision.png")
}

/// `pdfcell_p{page}_t{table}_r{index}_vision.png` for a table-cell crop.
pub fn cell_crop_filename(page_number: usize, table_index: usize, cell_index: usize) -> String {
    format!("pdfcell_p{page_number}_t{table_index}_r{cell_index}_vision.png")
}

/// `mineru_{task prefix}_{basename}` for images produced by an external
/// layout parser. The prefix is the first eight characters of the task id.
pub fn third_party_image_filename(task_id: &str, basename: &str) -> String {
    let prefix: String = task_id.chars().take(8).collect();
    format!("mineru_{}_{}", sanitize(&prefix), sanitize(base_component(basename)))
}

fn base_component(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Keep `[A-Za-z0-9._-]`, replace everything else with `_`. Never returns an
/// empty string or a dot-only name.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.chars().all(|c| c == '.') {
        "image".to_string()
    } else {
        cleaned
    }
}
