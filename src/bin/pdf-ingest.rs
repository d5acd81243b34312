//! CLI binary for pdf-ingest.
//!
//! A thin shim over the library crate: each subcommand maps its flags to
//! `IngestConfig`, runs one entry point, and prints the result as JSON.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pdf_ingest::ingest::build_runner;
use pdf_ingest::{
    ingest, ocr_rendered_pages, recognize_table_formulas, render_crop, render_pages,
    save_page_renders, HttpVisionClient, IngestConfig, IngestConfigBuilder, IngestProgressCallback,
    PageRange, PageRect, ProgressCallback, RetryPolicy, VisionEndpoint, DEFAULT_MODEL,
};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per item.
struct CliProgressCallback {
    bar: ProgressBar,
    /// What an item is called in log lines ("page", "cell").
    unit: &'static str,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new(unit: &'static str) -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            unit,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed(&self, item: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut times| times.remove(&item))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl IngestProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len}  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Recognising");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Sending {total} {}(s) to the vision model…", self.unit))
        ));
    }

    fn on_item_start(&self, item: usize, _total: usize) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(item, Instant::now());
        }
        self.bar.set_message(format!("{} {item}", self.unit));
    }

    fn on_item_complete(&self, item: usize, _total: usize, output_len: usize) {
        let secs = self.elapsed(item);
        self.bar.println(format!(
            "  {} {} {:>4}  {:<8}  {}",
            green("✓"),
            self.unit,
            item,
            dim(&format!("{output_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_item_error(&self, item: usize, _total: usize, error: &str) {
        let secs = self.elapsed(item);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {} {:>4}  {}  {}",
            red("✗"),
            self.unit,
            item,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = total.saturating_sub(success_count);
        if failed == 0 {
            eprintln!("{} {} {}(s) recognised", green("✔"), bold(&success_count.to_string()), self.unit);
        } else {
            eprintln!(
                "{} {}/{} {}(s) recognised  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total,
                self.unit,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Text, tables and embedded images of pages 2-5
  pdf-ingest ingest paper.pdf --pages 2-5 --images-dir out/images

  # Render the first three pages at 144 dpi
  pdf-ingest render paper.pdf --pages 1-3 --scale 2 --out-dir out/pages

  # Crop a region of page 4 (points, top-left origin)
  pdf-ingest crop paper.pdf --page 4 --bbox 72,100,300,180 --png cell.png

  # OCR pages with the vision model
  VISION_API_KEY=... pdf-ingest ocr scan.pdf --pages 1-2

  # LaTeX for every table cell
  VISION_API_KEY=... pdf-ingest table-formulas paper.pdf --crops-dir out/cells

ENVIRONMENT VARIABLES:
  VISION_API_KEY                Bearer key for the vision service
  VISION_API_BASE               Base URL (default: open.bigmodel.cn/api/paas/v4)
  VISION_MODEL                  Model id (default: glm-4.6v-flash)
  VISION_RETRY_BACKOFF_BASE_S   Backoff base in seconds (default: 1.5)
  VISION_RETRY_BACKOFF_CAP_S    Backoff cap in seconds (default: 30)
  VISION_RETRY_MAX_ATTEMPTS     Attempt cap, 0 = unlimited (default: 0)
  PDFIUM_LIB_PATH               Path to libpdfium (file or directory)
  RUST_LOG                      Log filter, overrides -v / -q
"#;

/// Extract text, tables, images and vision OCR from PDF documents.
#[derive(Parser, Debug)]
#[command(
    name = "pdf-ingest",
    version,
    about = "Extract text, tables, images and vision OCR from PDF documents",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Write JSON to this file instead of stdout.
    #[arg(short, long, global = true, env = "PDF_INGEST_OUTPUT")]
    output: Option<PathBuf>,

    /// Disable progress bar.
    #[arg(long, global = true, env = "PDF_INGEST_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDF_INGEST_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDF_INGEST_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Page text, tables and embedded images.
    Ingest {
        /// Local PDF file.
        input: PathBuf,

        #[command(flatten)]
        pages: PageArgs,

        /// Write embedded images into this directory.
        #[arg(long, env = "PDF_INGEST_IMAGES_DIR")]
        images_dir: Option<PathBuf>,

        /// Per-page text budget in characters.
        #[arg(long, default_value_t = 20_000)]
        max_chars_per_page: usize,

        /// Embedded images collected per call.
        #[arg(long, default_value_t = 50)]
        max_images: usize,

        /// Target PNG size per embedded image, in bytes.
        #[arg(long, default_value_t = 2_000_000)]
        max_image_bytes: usize,

        /// Also report text-aligned tables on pages without ruling lines.
        #[arg(long)]
        text_tables: bool,
    },

    /// Rasterise pages to PNG.
    Render {
        input: PathBuf,

        #[command(flatten)]
        pages: PageArgs,

        #[command(flatten)]
        render: RenderArgs,

        /// Write `pdfpage_p{page}_vision.png` files into this directory.
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Render a padded crop of one page region.
    Crop {
        input: PathBuf,

        /// 1-indexed page number.
        #[arg(long)]
        page: usize,

        /// Region in points, top-left origin: x0,top,x1,bottom.
        #[arg(long, value_parser = parse_bbox)]
        bbox: PageRect,

        #[command(flatten)]
        render: RenderArgs,

        /// Write the crop to this PNG file.
        #[arg(long)]
        png: Option<PathBuf>,
    },

    /// OCR pages with the vision model.
    Ocr {
        input: PathBuf,

        #[command(flatten)]
        pages: PageArgs,

        #[command(flatten)]
        render: RenderArgs,

        #[command(flatten)]
        vision: VisionArgs,

        /// Also keep the page renders sent to the model.
        #[arg(long)]
        renders_dir: Option<PathBuf>,
    },

    /// Recognise LaTeX in every table cell with geometry.
    TableFormulas {
        input: PathBuf,

        #[command(flatten)]
        pages: PageArgs,

        #[command(flatten)]
        render: RenderArgs,

        #[command(flatten)]
        vision: VisionArgs,

        /// At most this many cells across all tables.
        #[arg(long, default_value_t = 200)]
        max_cells: usize,

        /// Write cell crops into this directory.
        #[arg(long)]
        crops_dir: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct PageArgs {
    /// Page range: all, 5, 3-15, 3-, -7.
    #[arg(long, env = "PDF_INGEST_PAGES", default_value = "all", value_parser = parse_pages)]
    pages: PageRange,

    /// At most this many pages from the range (0 = no limit).
    #[arg(long, env = "PDF_INGEST_MAX_PAGES", default_value_t = 10)]
    max_pages: usize,
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Pixels per point (1.0 = 72 dpi).
    #[arg(long, env = "PDF_INGEST_SCALE", default_value_t = 2.0)]
    scale: f32,

    /// Pixels of padding around crops.
    #[arg(long, default_value_t = 10)]
    padding: u32,
}

#[derive(Args, Debug)]
struct VisionArgs {
    /// Vision model id.
    #[arg(long, env = "VISION_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDF_INGEST_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Pause between vision requests, in milliseconds.
    #[arg(long, default_value_t = 300)]
    request_interval_ms: u64,

    /// Per-request timeout in seconds.
    #[arg(long, env = "VISION_API_TIMEOUT", default_value_t = 180)]
    api_timeout: u64,
}

fn parse_pages(s: &str) -> std::result::Result<PageRange, String> {
    PageRange::parse(s).map_err(|e| e.to_string())
}

fn parse_bbox(s: &str) -> std::result::Result<PageRect, String> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| format!("bbox must be four numbers x0,top,x1,bottom: {e}"))?;
    match parts.as_slice() {
        [x0, top, x1, bottom] => Ok(PageRect::new(*x0, *top, *x1, *bottom)),
        _ => Err(format!("bbox must be four numbers x0,top,x1,bottom, got {}", parts.len())),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let uses_vision = matches!(cli.command, Command::Ocr { .. } | Command::TableFormulas { .. });
    let show_progress = uses_vision && !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress = |unit: &'static str| -> Option<ProgressCallback> {
        show_progress.then(|| CliProgressCallback::new(unit) as Arc<dyn IngestProgressCallback>)
    };

    match &cli.command {
        Command::Ingest {
            input,
            pages,
            images_dir,
            max_chars_per_page,
            max_images,
            max_image_bytes,
            text_tables,
        } => {
            let bytes = read_pdf(input)?;
            let config = pages
                .apply(IngestConfig::builder())
                .max_chars_per_page(*max_chars_per_page)
                .max_images(*max_images)
                .max_image_bytes(*max_image_bytes)
                .text_table_fallback(*text_tables)
                .build()?;
            let output = ingest(&bytes, &config, images_dir.as_deref()).context("Ingestion failed")?;
            if !cli.quiet {
                eprintln!(
                    "{} {} pages, {} tables, {} images ({} skipped)",
                    green("✔"),
                    output.pages.len(),
                    output.tables.len(),
                    output.images.len(),
                    output.skipped.len()
                );
            }
            emit(&output, cli.output.as_deref())
        }

        Command::Render {
            input,
            pages,
            render,
            out_dir,
        } => {
            let bytes = read_pdf(input)?;
            let rendered = render_pages(&bytes, &pages.pages, pages.max_pages, render.scale)
                .context("Rendering failed")?;
            let saved = match out_dir {
                Some(dir) => save_page_renders(&rendered, dir).context("Failed to save renders")?,
                None => Vec::new(),
            };
            emit(
                &serde_json::json!({ "pages": rendered, "saved": saved }),
                cli.output.as_deref(),
            )
        }

        Command::Crop {
            input,
            page,
            bbox,
            render,
            png,
        } => {
            let bytes = read_pdf(input)?;
            let crop = render_crop(&bytes, *page, *bbox, render.scale, render.padding)
                .context("Crop failed")?;
            if let Some(path) = png {
                std::fs::write(path, &crop.png_bytes)
                    .with_context(|| format!("Failed to write crop to {:?}", path))?;
            }
            emit(&crop, cli.output.as_deref())
        }

        Command::Ocr {
            input,
            pages,
            render,
            vision,
            renders_dir,
        } => {
            let bytes = read_pdf(input)?;
            let mut builder = vision.apply(pages.apply(render.apply(IngestConfig::builder())));
            if let Some(prompt) = vision.prompt()? {
                builder = builder.ocr_prompt(prompt);
            }
            if let Some(cb) = progress("page") {
                builder = builder.progress_callback(cb);
            }
            let config = builder.build()?;
            let client = vision.client()?;

            let rendered = render_pages(&bytes, &config.pages, config.max_pages, config.render_scale)
                .context("Rendering failed")?;
            let saved = match renders_dir {
                Some(dir) => save_page_renders(&rendered, dir).context("Failed to save renders")?,
                None => Vec::new(),
            };
            let results = ocr_rendered_pages(&rendered, &config, &client, &build_runner(&config))
                .context("OCR failed")?;
            emit(
                &serde_json::json!({ "pages": results, "renders": saved }),
                cli.output.as_deref(),
            )
        }

        Command::TableFormulas {
            input,
            pages,
            render,
            vision,
            max_cells,
            crops_dir,
        } => {
            let bytes = read_pdf(input)?;
            let mut builder = vision
                .apply(pages.apply(render.apply(IngestConfig::builder())))
                .max_cells(*max_cells);
            if let Some(prompt) = vision.prompt()? {
                builder = builder.cell_prompt(prompt);
            }
            if let Some(cb) = progress("cell") {
                builder = builder.progress_callback(cb);
            }
            let config = builder.build()?;
            let client = vision.client()?;

            let output = recognize_table_formulas(&bytes, &config, &client, crops_dir.as_deref())
                .context("Table formula recognition failed")?;
            if !cli.quiet && !show_progress {
                eprintln!(
                    "Processed {} cells in {} tables ({} diagnostics)",
                    output.cells_processed,
                    output.tables.len(),
                    output.diagnostics.len()
                );
            }
            emit(&output, cli.output.as_deref())
        }
    }
}

impl PageArgs {
    fn apply(&self, builder: IngestConfigBuilder) -> IngestConfigBuilder {
        builder.pages(self.pages).max_pages(self.max_pages)
    }
}

impl RenderArgs {
    fn apply(&self, builder: IngestConfigBuilder) -> IngestConfigBuilder {
        builder.render_scale(self.scale).crop_padding_px(self.padding)
    }
}

impl VisionArgs {
    fn apply(&self, builder: IngestConfigBuilder) -> IngestConfigBuilder {
        builder
            .model(self.model.clone())
            .request_interval(Duration::from_millis(self.request_interval_ms))
            .retry(RetryPolicy::from_env())
    }

    fn prompt(&self) -> Result<Option<String>> {
        self.system_prompt
            .as_ref()
            .map(|path| {
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read system prompt from {:?}", path))
            })
            .transpose()
    }

    fn client(&self) -> Result<HttpVisionClient> {
        let endpoint = VisionEndpoint::from_env().with_timeout(Duration::from_secs(self.api_timeout));
        HttpVisionClient::new(endpoint).context("Vision client is not configured")
    }
}

fn read_pdf(path: &Path) -> Result<Vec<u8>> {
    if !path.is_file() {
        bail!("Input file not found: {}", path.display());
    }
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Pretty JSON to `output`, or stdout.
fn emit<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialise output")?;
    match output {
        Some(path) => std::fs::write(path, format!("{json}\n"))
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            writeln!(handle, "{json}").context("Failed to write to stdout")
        }
    }
}
