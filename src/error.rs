//! Error types for the edgequake-exam library.
//!
//! Failures fall into four groups, and each has its own type:
//!
//! * [`ExamError`]: **Fatal for one operation**: no usable credentials,
//!   every credential rate-limited, a non-retryable backend error, or a PDF
//!   that cannot be opened. Returned as `Err(ExamError)`.
//!
//! * [`PageError`]: **Non-fatal**: one page failed in one pass of the
//!   two-pass extraction. Stored inside [`crate::output::PageReport`] so the
//!   rest of the document still yields questions.
//!
//! * [`BackendError`]: the raw text of a failed inference call. The only
//!   thing the retry loop looks at is whether it is rate-limit class.
//!
//! * [`AnswerIssue`]: a structural problem with a question's answer. Not an
//!   exception at all; validators return it as data.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-exam library.
#[derive(Debug, Error)]
pub enum ExamError {
    // ── Configuration ─────────────────────────────────────────────────────
    /// The credential set was empty after dropping blanks and placeholders.
    #[error(
        "No valid API keys configured.\n\
Set GEMINI_API_KEYS=key1,key2,… (or GEMINI_API_KEY) with real keys."
    )]
    NoCredentials,

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Model calls ───────────────────────────────────────────────────────
    /// Every attempt hit a rate-limit / quota error.
    #[error("All {attempts} API key attempts exhausted for {operation}")]
    PoolExhausted { operation: String, attempts: u32 },

    /// The backend returned an error that is not worth retrying.
    #[error("Model call failed for {operation}: {message}")]
    Backend { operation: String, message: String },

    /// The model answered, but not with the JSON we asked for.
    #[error("Malformed model output for {operation}: {detail}")]
    MalformedOutput { operation: String, detail: String },

    // ── PDF input ─────────────────────────────────────────────────────────
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    #[error("PDF '{path}' is corrupt or encrypted: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Output ────────────────────────────────────────────────────────────
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExamError {
    pub(crate) fn malformed(operation: impl Into<String>, detail: impl ToString) -> Self {
        ExamError::MalformedOutput {
            operation: operation.into(),
            detail: detail.to_string(),
        }
    }
}

/// A non-fatal failure of one page in one extraction pass.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Pass 1 (structure analysis) failed; the page is extracted without a
    /// shared description.
    #[error("Page {page}: structure analysis failed: {detail}")]
    StructureFailed { page: usize, detail: String },

    /// Pass 2 failed; the page contributes no questions.
    #[error("Page {page}: question extraction failed: {detail}")]
    ExtractionFailed { page: usize, detail: String },
}

impl PageError {
    pub fn page(&self) -> usize {
        match self {
            PageError::StructureFailed { page, .. } | PageError::ExtractionFailed { page, .. } => {
                *page
            }
        }
    }
}

/// Error text returned by a [`crate::backend::ModelBackend`].
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Rate-limit class errors are matched on the message text: a `429`
    /// status anywhere, or the word "quota".
    pub fn is_rate_limited(&self) -> bool {
        self.message.contains("429") || self.message.to_ascii_lowercase().contains("quota")
    }
}

/// Why an answer does not fit its question type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnswerIssue {
    #[error("No answer provided")]
    Missing,

    #[error("No options provided for {0}")]
    NoOptions(&'static str),

    #[error("Answer \"{0}\" is not a valid option (A, B, C, D, E)")]
    NotALetter(String),

    #[error("Answer \"{letter}\" refers to option {position} but only {available} options provided")]
    OutOfRange {
        letter: char,
        position: usize,
        available: usize,
    },

    #[error("Answer lists option {0} more than once")]
    DuplicateLetter(char),

    #[error("MSQ should have 1-4 correct options, got {0}")]
    LetterCount(usize),

    #[error("NAT answer \"{0}\" is not a valid number")]
    NotNumeric(String),

    #[error("Subjective answer is too short (minimum {0} characters)")]
    TooShort(usize),
}
