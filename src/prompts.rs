//! System prompts and user instructions for the vision calls.
//!
//! Both flows ask for a single JSON object so replies can go through
//! [`crate::pipeline::response::extract_json_object`]. Callers can replace
//! either system prompt via [`crate::config::IngestConfigBuilder`]; the
//! constants here are the defaults.

/// Default system prompt for page OCR. The reply is `{"lines": [...]}`.
pub const PAGE_OCR_PROMPT: &str = r#"You are a meticulous OCR assistant for scanned papers and textbooks.
You will receive a screenshot of one PDF page.

Reply with JSON of exactly this shape: {"lines": ["...", "..."]}

Rules:
1. Emit the text in reading order, one visual line per element of "lines". Never put the whole page into one string.
2. Transcribe every mathematical symbol or formula as LaTeX.
3. Wrap inline math in \\( ... \\) and display math in \\[ ... \\].
4. Never emit Unicode math (η, α, β, ₀, superscript or subscript characters). Use LaTeX such as \\eta or \\alpha_0.
5. Backslashes inside JSON strings must be doubled, e.g. \\beta, \\text.
6. Output the JSON object only, with no other text."#;

/// Default system prompt for table-cell formula recognition. The reply is
/// `{"latex": "..."}`.
pub const TABLE_CELL_PROMPT: &str = r#"You are a meticulous OCR and formula recognition assistant.
You will receive a screenshot of a single table cell from a PDF.

1. If the cell contains mathematical notation, convert it to LaTeX.
2. If it contains no formula, return an empty string for latex.
3. Reply with valid JSON: {"latex": "string"}
4. Backslashes in the LaTeX must be doubled, e.g. \\beta rather than \beta.

Output nothing else."#;

/// User-turn text sent with each page image.
pub const PAGE_OCR_INSTRUCTION: &str = "OCR this page and reply with the JSON object described above.";

/// User-turn text sent with each cell image.
pub const TABLE_CELL_INSTRUCTION: &str = "Recognise any formula in this table cell and reply with JSON {latex}.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_name_their_reply_keys() {
        assert!(PAGE_OCR_PROMPT.contains(r#"{"lines""#));
        assert!(TABLE_CELL_PROMPT.contains(r#"{"latex""#));
    }

    #[test]
    fn prompts_are_not_blank() {
        for p in [PAGE_OCR_PROMPT, TABLE_CELL_PROMPT, PAGE_OCR_INSTRUCTION, TABLE_CELL_INSTRUCTION] {
            assert!(!p.trim().is_empty());
        }
    }
}
