//! Configuration for extraction, generation and review.
//!
//! Every knob lives in [`ExamConfig`], built via [`ExamConfigBuilder`]. The
//! defaults encode the provider's free-tier realities: a 2 s wait before
//! moving to the next key on a rate limit, and multi-second pauses between
//! pages in both extraction passes. Lower them only with paid quotas.

use crate::error::ExamError;
use crate::progress::ProgressCallback;
use crate::throttle::{FixedDelay, Throttle};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration shared by every model-calling operation.
///
/// # Example
/// ```rust
/// use edgequake_exam::ExamConfig;
///
/// let config = ExamConfig::builder()
///     .structure_delay_ms(0)
///     .extraction_delay_ms(0)
///     .context_window(5)
///     .build()
///     .unwrap();
/// assert_eq!(config.context_window, 5);
/// ```
#[derive(Clone)]
pub struct ExamConfig {
    /// Model identifier passed to the backend. `None` uses the backend default.
    pub model: Option<String>,

    /// Per-request timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Wait before retrying a rate-limited call with the next key. Default: 2000.
    pub retry_backoff_ms: u64,

    /// Attempts per model call. `None` (default) means one per pooled key.
    pub max_attempts: Option<u32>,

    /// Pause between pages in pass 1. Default: 5000.
    pub structure_delay_ms: u64,

    /// Pause between pages in pass 2. Default: 10000.
    pub extraction_delay_ms: u64,

    /// Replaces the pass-1 fixed delay when set.
    pub structure_throttle: Option<Arc<dyn Throttle>>,

    /// Replaces the pass-2 fixed delay when set.
    pub extraction_throttle: Option<Arc<dyn Throttle>>,

    /// Prior questions shown to the model in pass 2. Default: 3.
    pub context_window: usize,

    /// Page number given to the first image passed to the driver. Default: 1.
    pub start_page: usize,

    /// Which pages of a PDF to extract. Default: all.
    pub pages: PageSelection,

    /// Previous-year questions included in a generation prompt. Default: 10.
    pub pyq_sample: usize,

    /// Recently generated questions included in a generation prompt. Default: 3.
    pub recent_window: usize,

    /// Output token cap per call. Default: 8192.
    pub max_output_tokens: usize,

    /// Longest rendered page edge in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted papers.
    pub password: Option<String>,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExamConfig {
    fn default() -> Self {
        Self {
            model: None,
            api_timeout_secs: 120,
            retry_backoff_ms: 2000,
            max_attempts: None,
            structure_delay_ms: 5000,
            extraction_delay_ms: 10000,
            structure_throttle: None,
            extraction_throttle: None,
            context_window: 3,
            start_page: 1,
            pages: PageSelection::default(),
            pyq_sample: 10,
            recent_window: 3,
            max_output_tokens: 8192,
            max_rendered_pixels: 2000,
            password: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExamConfig")
            .field("model", &self.model)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("max_attempts", &self.max_attempts)
            .field("structure_delay_ms", &self.structure_delay_ms)
            .field("extraction_delay_ms", &self.extraction_delay_ms)
            .field("custom_throttles", &(self.structure_throttle.is_some(), self.extraction_throttle.is_some()))
            .field("context_window", &self.context_window)
            .field("start_page", &self.start_page)
            .field("pages", &self.pages)
            .field("pyq_sample", &self.pyq_sample)
            .field("recent_window", &self.recent_window)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

impl ExamConfig {
    pub fn builder() -> ExamConfigBuilder {
        ExamConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Pause policy between pass-1 pages.
    pub fn structure_throttle(&self) -> Arc<dyn Throttle> {
        self.structure_throttle
            .clone()
            .unwrap_or_else(|| Arc::new(FixedDelay(Duration::from_millis(self.structure_delay_ms))))
    }

    /// Pause policy between pass-2 pages.
    pub fn extraction_throttle(&self) -> Arc<dyn Throttle> {
        self.extraction_throttle
            .clone()
            .unwrap_or_else(|| Arc::new(FixedDelay(Duration::from_millis(self.extraction_delay_ms))))
    }

    pub fn render_config(&self) -> RenderConfig {
        RenderConfig {
            max_rendered_pixels: self.max_rendered_pixels,
            password: self.password.clone(),
        }
    }
}

/// Builder for [`ExamConfig`].
#[derive(Debug)]
pub struct ExamConfigBuilder {
    config: ExamConfig,
}

impl ExamConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = Some(n);
        self
    }

    pub fn structure_delay_ms(mut self, ms: u64) -> Self {
        self.config.structure_delay_ms = ms;
        self
    }

    pub fn extraction_delay_ms(mut self, ms: u64) -> Self {
        self.config.extraction_delay_ms = ms;
        self
    }

    pub fn structure_throttle(mut self, throttle: Arc<dyn Throttle>) -> Self {
        self.config.structure_throttle = Some(throttle);
        self
    }

    pub fn extraction_throttle(mut self, throttle: Arc<dyn Throttle>) -> Self {
        self.config.extraction_throttle = Some(throttle);
        self
    }

    pub fn context_window(mut self, n: usize) -> Self {
        self.config.context_window = n;
        self
    }

    pub fn start_page(mut self, page: usize) -> Self {
        self.config.start_page = page;
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn pyq_sample(mut self, n: usize) -> Self {
        self.config.pyq_sample = n;
        self
    }

    pub fn recent_window(mut self, n: usize) -> Self {
        self.config.recent_window = n;
        self
    }

    pub fn max_output_tokens(mut self, n: usize) -> Self {
        self.config.max_output_tokens = n;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExamConfig, ExamError> {
        let c = &self.config;
        if c.max_attempts == Some(0) {
            return Err(ExamError::InvalidConfig("max_attempts must be ≥ 1".into()));
        }
        if c.start_page == 0 {
            return Err(ExamError::InvalidConfig(
                "start_page is 1-indexed and must be ≥ 1".into(),
            ));
        }
        if c.max_output_tokens == 0 {
            return Err(ExamError::InvalidConfig("max_output_tokens must be > 0".into()));
        }
        if c.max_rendered_pixels < 100 {
            return Err(ExamError::InvalidConfig(format!(
                "max_rendered_pixels must be ≥ 100, got {}",
                c.max_rendered_pixels
            )));
        }
        Ok(self.config)
    }
}

/// Rasterisation settings handed to [`crate::pipeline::render`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderConfig {
    pub max_rendered_pixels: u32,
    pub password: Option<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_rendered_pixels: 2000,
            password: None,
        }
    }
}

/// Which pages of a PDF to extract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    #[default]
    All,
    /// One page (1-indexed).
    Single(usize),
    /// Inclusive 1-indexed range.
    Range(usize, usize),
    /// Specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Sorted, deduplicated 0-indexed page numbers within `total_pages`.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

impl std::str::FromStr for PageSelection {
    type Err = String;

    /// `"all"`, `"5"`, `"3-7"` or `"1,4,9"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(PageSelection::All);
        }
        let num = |t: &str| {
            t.trim()
                .parse::<usize>()
                .map_err(|_| format!("invalid page number '{}'", t.trim()))
        };
        if let Some((a, b)) = s.split_once('-') {
            return Ok(PageSelection::Range(num(a)?, num(b)?));
        }
        if s.contains(',') {
            return s.split(',').map(num).collect::<Result<_, _>>().map(PageSelection::Set);
        }
        Ok(PageSelection::Single(num(s)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_free_tier_pacing() {
        let c = ExamConfig::default();
        assert_eq!(c.retry_backoff_ms, 2000);
        assert_eq!(c.structure_delay_ms, 5000);
        assert_eq!(c.extraction_delay_ms, 10000);
        assert_eq!(c.context_window, 3);
        assert_eq!(c.pyq_sample, 10);
        assert_eq!(c.recent_window, 3);
        assert!(c.max_attempts.is_none());
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = ExamConfig::builder().max_attempts(0).build().unwrap_err();
        assert!(matches!(err, ExamError::InvalidConfig(_)));
    }

    #[test]
    fn zero_start_page_rejected() {
        assert!(ExamConfig::builder().start_page(0).build().is_err());
    }

    #[test]
    fn page_selection_parsing() {
        assert_eq!("all".parse::<PageSelection>(), Ok(PageSelection::All));
        assert_eq!("4".parse::<PageSelection>(), Ok(PageSelection::Single(4)));
        assert_eq!("2-5".parse::<PageSelection>(), Ok(PageSelection::Range(2, 5)));
        assert_eq!(
            "9, 1,4".parse::<PageSelection>(),
            Ok(PageSelection::Set(vec![9, 1, 4]))
        );
        assert!("x-2".parse::<PageSelection>().is_err());
    }

    #[test]
    fn page_selection_indices() {
        assert_eq!(PageSelection::Range(2, 9).to_indices(4), vec![1, 2, 3]);
        assert_eq!(PageSelection::Set(vec![3, 1, 3, 10]).to_indices(5), vec![0, 2]);
        assert!(PageSelection::Single(6).to_indices(5).is_empty());
    }
}
