//! Progress callbacks for the two-pass extraction driver.
//!
//! Extraction is deliberately slow (a throttle pause between every page in
//! both passes), so hosts want per-page events to drive a progress bar or a
//! status record. Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExamConfigBuilder::progress_callback`].
//!
//! # Example
//!
//! ```rust
//! use edgequake_exam::{ExamConfig, ExtractionProgressCallback, Pass};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct QuestionCounter(AtomicUsize);
//!
//! impl ExtractionProgressCallback for QuestionCounter {
//!     fn on_page_complete(&self, pass: Pass, _page: usize, _total: usize, questions: usize) {
//!         if pass == Pass::Extraction {
//!             self.0.fetch_add(questions, Ordering::SeqCst);
//!         }
//!     }
//! }
//!
//! let config = ExamConfig::builder()
//!     .progress_callback(Arc::new(QuestionCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Which pass of the extraction an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pass {
    /// Pass 1: page structure analysis.
    Structure,
    /// Pass 2: context-aware question extraction.
    Extraction,
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Pass::Structure => "structure",
            Pass::Extraction => "extraction",
        })
    }
}

/// Called by the driver as it works through the pages.
///
/// Every method has a no-op default. Calls arrive sequentially from the
/// driver's task; implementations still need `Send + Sync` because the
/// driver future may move between threads.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Once, before pass 1.
    fn on_extraction_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Before each page of each pass. `page` is 1-indexed.
    fn on_page_start(&self, pass: Pass, page: usize, total_pages: usize) {
        let _ = (pass, page, total_pages);
    }

    /// After a page succeeds. `items` is the number of questions for the
    /// extraction pass, and 1 or 0 (shared description found) for the
    /// structure pass.
    fn on_page_complete(&self, pass: Pass, page: usize, total_pages: usize, items: usize) {
        let _ = (pass, page, total_pages, items);
    }

    /// After a page fails. The driver continues with the next page.
    fn on_page_error(&self, pass: Pass, page: usize, total_pages: usize, error: &str) {
        let _ = (pass, page, total_pages, error);
    }

    /// Once, after pass 2.
    fn on_extraction_complete(&self, total_pages: usize, total_questions: usize) {
        let _ = (total_pages, total_questions);
    }
}

/// The default when no callback is configured.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Type stored in [`crate::config::ExamConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
