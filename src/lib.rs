//! # edgequake-exam
//!
//! Extract exam questions from scanned PDF pages with a multimodal model,
//! and generate, solve and repair practice questions.
//!
//! ## Why this crate?
//!
//! A question paper is not a document a text extractor can read: questions
//! share a passage printed once, run across page breaks, and carry diagrams
//! and formulae. This crate rasterises each page and lets a vision model read
//! it, in two passes so context printed on one page reaches the questions
//! that need it. Everything around the model is built for an unreliable,
//! rate-limited API: a pool of keys used least-first, retry on `429`, and
//! JSON parsing that survives prose and unescaped LaTeX.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Render     rasterise pages via pdfium (spawn_blocking)
//!  ├─ 2. Structure  pass 1: shared descriptions per page
//!  ├─ 3. Extract    pass 2: questions, with shared + rolling context
//!  └─ 4. Output     ordered questions + per-page reports
//!
//! Topic + history
//!  │
//!  ├─ Generate      new questions, filtered for shape and repeats
//!  └─ Review        solve → validate → fix once → accept / reject
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_exam::{extract_pdf, ExamConfig, GeminiBackend, KeyPool, ModelClient};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Keys from GEMINI_API_KEYS (comma separated) or GEMINI_API_KEY
//!     let pool = Arc::new(KeyPool::from_env()?);
//!     let backend = Arc::new(GeminiBackend::new(None, Duration::from_secs(120))?);
//!     let config = ExamConfig::default();
//!     let client = ModelClient::from_config(backend, pool, &config);
//!
//!     let output = extract_pdf("paper.pdf", &client, &config).await?;
//!     println!("{} questions", output.questions.len());
//!     for page in output.failed_pages() {
//!         eprintln!("page {page} failed");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `examq` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod error;
pub mod extract;
pub mod generate;
pub mod keys;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod question;
pub mod review;
pub mod throttle;
pub mod validate;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{GeminiBackend, InlineImage, ModelBackend, ModelRequest, ProviderBackend, SamplingParams};
pub use config::{ExamConfig, ExamConfigBuilder, PageSelection, RenderConfig};
pub use error::{AnswerIssue, BackendError, ExamError, PageError};
pub use extract::{extract_pdf, extract_pdf_bytes, extract_questions};
pub use generate::{generate_questions, solve_pyqs, GenerationRequest, PyqSolution};
pub use keys::{Credential, KeyPool};
pub use output::{write_json, ExtractionOutput, ExtractionStats, PageReport};
pub use pipeline::call::ModelClient;
pub use pipeline::json::extract_json;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, Pass, ProgressCallback};
pub use question::{ExtractedQuestion, PreviousYearQuestion, QuestionType, Topic};
pub use review::{ReviewOutcome, Reviewer, SolvedAnswer};
pub use throttle::{FixedDelay, IntervalGate, NoDelay, Throttle};
pub use validate::validate_answer;
