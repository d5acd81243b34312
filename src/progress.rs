//! Progress-callback trait for per-item ingestion events.
//!
//! Inject an [`Arc<dyn IngestProgressCallback>`] via
//! [`crate::config::IngestConfigBuilder::progress_callback`] to receive
//! events while the OCR and table-formula flows work through their items.
//! An item is one page for OCR and one table cell for formula recognition.
//!
//! # Example
//!
//! ```rust
//! use pdf_ingest::{IngestConfig, IngestProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl IngestProgressCallback for CountingCallback {
//!     fn on_item_complete(&self, item: usize, total: usize, output_len: usize) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{}/{} done (item {}, {} chars)", done, total, item, output_len);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: AtomicUsize::new(0),
//! });
//!
//! let config = IngestConfig::builder()
//!     .progress_callback(counter as Arc<dyn IngestProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the batch flows as they process each item.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Items are processed sequentially, but the trait is
/// `Send + Sync` so one callback can be shared across threads.
pub trait IngestProgressCallback: Send + Sync {
    /// Called once before the first item.
    ///
    /// # Arguments
    /// * `total`: number of items that will be attempted
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called just before the vision request for an item is sent.
    ///
    /// # Arguments
    /// * `item`: 1-indexed page number (OCR) or 1-based cell counter
    /// * `total`: items in the batch
    fn on_item_start(&self, item: usize, total: usize) {
        let _ = (item, total);
    }

    /// Called when an item succeeds.
    ///
    /// # Arguments
    /// * `item`: as in [`on_item_start`](Self::on_item_start)
    /// * `total`: items in the batch
    /// * `output_len`: character count of the recognised text
    fn on_item_complete(&self, item: usize, total: usize, output_len: usize) {
        let _ = (item, total, output_len);
    }

    /// Called when an item fails; the batch goes on.
    fn on_item_error(&self, item: usize, total: usize, error: &str) {
        let _ = (item, total, error);
    }

    /// Called once after every item has been attempted.
    ///
    /// # Arguments
    /// * `total`: items in the batch
    /// * `success_count`: items that completed without error
    fn on_batch_complete(&self, total: usize, success_count: usize) {
        let _ = (total, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl IngestProgressCallback for NoopProgressCallback {}

/// The type stored in [`crate::config::IngestConfig`].
pub type ProgressCallback = Arc<dyn IngestProgressCallback>;
