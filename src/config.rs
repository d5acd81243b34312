//! Configuration types for PDF ingestion.
//!
//! Every limit and knob lives in [`IngestConfig`], built via
//! [`IngestConfigBuilder`]. One struct keeps calls reproducible: the same
//! config over the same bytes yields the same output.

use crate::error::IngestError;
use crate::pipeline::retry::RetryPolicy;
use crate::progress::ProgressCallback;
use crate::prompts::{PAGE_OCR_PROMPT, TABLE_CELL_PROMPT};
use pdfplumber::TableSettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default vision model.
pub const DEFAULT_MODEL: &str = "glm-4.6v-flash";

/// Configuration for ingestion, rendering and vision calls.
///
/// Built via [`IngestConfig::builder()`] or using [`IngestConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf_ingest::{IngestConfig, PageRange};
///
/// let config = IngestConfig::builder()
///     .pages(PageRange::new(Some(2), Some(5)).unwrap())
///     .max_pages(3)
///     .render_scale(1.5)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_pages, 3);
/// ```
#[derive(Clone)]
pub struct IngestConfig {
    /// 1-indexed inclusive page range. Default: whole document.
    pub pages: PageRange,

    /// At most this many pages from the range, in document order. `0` = no
    /// limit. Default: 10.
    pub max_pages: usize,

    /// Per-page text budget in characters; longer text is cut and marked.
    /// `0` yields empty text. Default: 20 000.
    pub max_chars_per_page: usize,

    /// Embedded images collected per call. Default: 50.
    pub max_images: usize,

    /// Target PNG size per embedded image; larger images are downscaled.
    /// Default: 2 000 000.
    pub max_image_bytes: usize,

    /// Pixels per point when rasterising. Range: 0.1–8.0. Default: 2.0.
    pub render_scale: f32,

    /// Pixels added around each table-cell crop. Default: 10.
    pub crop_padding_px: u32,

    /// Table cells sent for formula recognition per call. Default: 200.
    pub max_cells: usize,

    /// Vision model identifier. Default: [`DEFAULT_MODEL`].
    pub model: String,

    /// System prompt for page OCR. Must not be blank.
    pub ocr_prompt: String,

    /// System prompt for table-cell formula recognition. Must not be blank.
    pub cell_prompt: String,

    /// Pause between consecutive vision requests. Default: 300 ms.
    pub request_interval: Duration,

    /// Backoff for rate-limited vision requests.
    pub retry: RetryPolicy,

    /// Tolerances for pdfplumber's table finder. The strategy field is
    /// ignored: each pass sets its own.
    pub table_settings: TableSettings,

    /// Look for text-aligned tables on pages without a ruled one. Two-column
    /// prose aligns like a table, so this is off by default.
    pub text_table_fallback: bool,

    /// Receives per-item events from batch calls.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            pages: PageRange::default(),
            max_pages: 10,
            max_chars_per_page: 20_000,
            max_images: 50,
            max_image_bytes: 2_000_000,
            render_scale: 2.0,
            crop_padding_px: 10,
            max_cells: 200,
            model: DEFAULT_MODEL.to_string(),
            ocr_prompt: PAGE_OCR_PROMPT.to_string(),
            cell_prompt: TABLE_CELL_PROMPT.to_string(),
            request_interval: Duration::from_millis(300),
            retry: RetryPolicy::default(),
            table_settings: TableSettings::default(),
            text_table_fallback: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestConfig")
            .field("pages", &self.pages)
            .field("max_pages", &self.max_pages)
            .field("max_chars_per_page", &self.max_chars_per_page)
            .field("max_images", &self.max_images)
            .field("max_image_bytes", &self.max_image_bytes)
            .field("render_scale", &self.render_scale)
            .field("crop_padding_px", &self.crop_padding_px)
            .field("max_cells", &self.max_cells)
            .field("model", &self.model)
            .field("request_interval", &self.request_interval)
            .field("retry", &self.retry)
            .field("text_table_fallback", &self.text_table_fallback)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn IngestProgressCallback>"),
            )
            .finish()
    }
}

impl IngestConfig {
    /// Create a new builder for `IngestConfig`.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder {
            config: Self::default(),
        }
    }

    /// 0-based indices of the pages this config selects in a document of
    /// `total_pages` pages.
    pub fn page_indices(&self, total_pages: usize) -> Vec<usize> {
        self.pages.to_indices(total_pages, self.max_pages)
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn pages(mut self, range: PageRange) -> Self {
        self.config.pages = range;
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n;
        self
    }

    pub fn max_chars_per_page(mut self, n: usize) -> Self {
        self.config.max_chars_per_page = n;
        self
    }

    pub fn max_images(mut self, n: usize) -> Self {
        self.config.max_images = n;
        self
    }

    pub fn max_image_bytes(mut self, n: usize) -> Self {
        self.config.max_image_bytes = n;
        self
    }

    pub fn render_scale(mut self, scale: f32) -> Self {
        self.config.render_scale = if scale.is_finite() {
            scale.clamp(0.1, 8.0)
        } else {
            scale
        };
        self
    }

    pub fn crop_padding_px(mut self, px: u32) -> Self {
        self.config.crop_padding_px = px;
        self
    }

    pub fn max_cells(mut self, n: usize) -> Self {
        self.config.max_cells = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn ocr_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.ocr_prompt = prompt.into();
        self
    }

    pub fn cell_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.cell_prompt = prompt.into();
        self
    }

    pub fn request_interval(mut self, interval: Duration) -> Self {
        self.config.request_interval = interval;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn table_settings(mut self, settings: TableSettings) -> Self {
        self.config.table_settings = settings;
        self
    }

    pub fn text_table_fallback(mut self, enabled: bool) -> Self {
        self.config.text_table_fallback = enabled;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        let c = &self.config;
        c.pages.validate()?;
        if !c.render_scale.is_finite() {
            return Err(IngestError::InvalidConfig(format!(
                "render scale must be a finite number, got {}",
                c.render_scale
            )));
        }
        if c.max_image_bytes == 0 {
            return Err(IngestError::InvalidConfig(
                "max image bytes must be ≥ 1".into(),
            ));
        }
        if c.model.trim().is_empty() {
            return Err(IngestError::InvalidConfig("model must not be empty".into()));
        }
        if c.ocr_prompt.trim().is_empty() {
            return Err(IngestError::InvalidConfig(
                "page OCR prompt must not be empty".into(),
            ));
        }
        if c.cell_prompt.trim().is_empty() {
            return Err(IngestError::InvalidConfig(
                "table cell prompt must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Page range ───────────────────────────────────────────────────────────

/// Optional 1-indexed, inclusive page bounds. Bounds past the end of the
/// document are clamped, never an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: Option<usize>,
    pub end: Option<usize>,
}

impl PageRange {
    /// The whole document.
    pub fn all() -> Self {
        Self::default()
    }

    /// A validated range.
    pub fn new(start: Option<usize>, end: Option<usize>) -> Result<Self, IngestError> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    /// Pages are 1-indexed and `end` may not precede `start`.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.start == Some(0) || self.end == Some(0) {
            return Err(IngestError::InvalidPageRange {
                detail: "page numbers are 1-indexed".into(),
            });
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if end < start {
                return Err(IngestError::InvalidPageRange {
                    detail: format!("page_end ({end}) must be >= page_start ({start})"),
                });
            }
        }
        Ok(())
    }

    /// 0-based indices in document order, clamped to `total_pages` and cut to
    /// `max_pages` when non-zero.
    pub fn to_indices(&self, total_pages: usize, max_pages: usize) -> Vec<usize> {
        let start = self.start.map_or(0, |s| s.saturating_sub(1)).min(total_pages);
        let end = self.end.unwrap_or(total_pages).min(total_pages);
        let limit = if max_pages == 0 { usize::MAX } else { max_pages };
        (start..end.max(start)).take(limit).collect()
    }

    /// Parse `all`, `5`, `2-7`, `3-` or `-4`.
    pub fn parse(s: &str) -> Result<Self, IngestError> {
        let s = s.trim();
        let invalid = || IngestError::InvalidPageRange {
            detail: format!("cannot parse '{s}' (expected all, N, N-M, N- or -M)"),
        };
        let num = |part: &str| -> Result<Option<usize>, IngestError> {
            let part = part.trim();
            if part.is_empty() {
                Ok(None)
            } else {
                part.parse::<usize>().map(Some).map_err(|_| invalid())
            }
        };

        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(Self::all());
        }
        let range = match s.split_once('-') {
            Some((a, b)) => Self {
                start: num(a)?,
                end: num(b)?,
            },
            None => {
                let page = num(s)?;
                Self {
                    start: page,
                    end: page,
                }
            }
        };
        range.validate()?;
        Ok(range)
    }
}
