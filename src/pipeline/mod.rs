//! Extraction pipeline stages.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own and the driver in [`crate::extract`] stays a plain loop.
//!
//! ## Data Flow
//!
//! ```text
//! render ──▶ encode ──▶ structure ──▶ extract ──▶ postprocess
//! (pdfium)   (base64)   (pass 1)      (pass 2)    (cleanup)
//!                          │             │
//!                          └── call ─────┘ ◀── json
//!                          (key rotation,     (pull JSON out of
//!                           429 retry)         model text)
//! ```
//!
//! 1. [`render`] rasterises pages; runs in `spawn_blocking` because pdfium is
//!    not async-safe
//! 2. [`encode`] PNG-encodes and base64-wraps each page image
//! 3. [`structure`] pass 1: shared descriptions, page-spanning questions
//! 4. [`extract`] pass 2: questions with shared and rolling context
//! 5. [`postprocess`] deterministic cleanup of parsed records
//!
//! [`call`] and [`json`] are shared by every model-facing stage, including
//! [`crate::review`] and [`crate::generate`].

pub mod call;
pub mod encode;
pub mod extract;
pub mod json;
pub mod postprocess;
pub mod render;
pub mod structure;
