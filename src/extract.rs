//! Two-pass extraction over a whole document.
//!
//! ## Why two passes?
//!
//! A description shared by several questions ("Read the passage and answer
//! Q17 to Q19") is often printed once, sometimes on the page before the
//! questions. Pass 1 walks every page first and records such descriptions;
//! pass 2 then extracts each page with its description in hand, plus the
//! last few questions already extracted so numbering and continuations line
//! up across page breaks.
//!
//! ## Why sequential?
//!
//! Free-tier quotas are per key *and* per project. Key rotation handles the
//! first; a throttle pause between consecutive pages of each pass handles the
//! second. Runs therefore take roughly `pages × (pass-1 delay + pass-2 delay)`
//! of wall-clock time by design.
//!
//! A page failing in either pass is logged, reported in its
//! [`PageReport`] and skipped. Nothing short of a configuration error aborts
//! the document.

use crate::backend::InlineImage;
use crate::config::ExamConfig;
use crate::error::{ExamError, PageError};
use crate::output::{ExtractionOutput, ExtractionStats, PageReport};
use crate::pipeline::call::ModelClient;
use crate::pipeline::extract::{extract_page, PageContext};
use crate::pipeline::render;
use crate::pipeline::structure::analyze_page;
use crate::progress::Pass;
use crate::question::ExtractedQuestion;
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Extract questions from page images numbered from `config.start_page`.
pub async fn extract_questions(
    client: &ModelClient,
    images: &[InlineImage],
    config: &ExamConfig,
) -> ExtractionOutput {
    let pages: Vec<(usize, &InlineImage)> = images
        .iter()
        .enumerate()
        .map(|(i, img)| (config.start_page + i, img))
        .collect();
    run_two_passes(client, &pages, config).await
}

/// Rasterise a PDF and extract the pages selected by `config.pages`.
///
/// # Errors
/// Only PDF-level failures (missing file, not a PDF, corrupt, pdfium not
/// found) and an empty page selection. Page-level model failures are
/// reported in the output instead.
pub async fn extract_pdf(
    pdf_path: impl AsRef<Path>,
    client: &ModelClient,
    config: &ExamConfig,
) -> Result<ExtractionOutput, ExamError> {
    let pdf_path = pdf_path.as_ref();
    info!("Starting extraction: {}", pdf_path.display());

    let render_start = Instant::now();
    let images = render::render_pdf(pdf_path, &config.render_config()).await?;
    info!(
        "Rendered {} pages in {}ms",
        images.len(),
        render_start.elapsed().as_millis()
    );

    let indices = config.pages.to_indices(images.len());
    if indices.is_empty() {
        return Err(ExamError::InvalidConfig(format!(
            "page selection {:?} matches none of the {} pages",
            config.pages,
            images.len()
        )));
    }
    let pages: Vec<(usize, &InlineImage)> =
        indices.iter().map(|&i| (i + 1, &images[i])).collect();

    Ok(run_two_passes(client, &pages, config).await)
}

/// [`extract_pdf`] for a PDF held in memory.
pub async fn extract_pdf_bytes(
    bytes: &[u8],
    client: &ModelClient,
    config: &ExamConfig,
) -> Result<ExtractionOutput, ExamError> {
    let mut tmp = tempfile::NamedTempFile::new()
        .map_err(|e| ExamError::Internal(format!("tempfile: {e}")))?;
    std::io::Write::write_all(&mut tmp, bytes)
        .map_err(|e| ExamError::Internal(format!("tempfile write: {e}")))?;
    extract_pdf(tmp.path(), client, config).await
}

async fn run_two_passes(
    client: &ModelClient,
    pages: &[(usize, &InlineImage)],
    config: &ExamConfig,
) -> ExtractionOutput {
    let total_start = Instant::now();
    let total = pages.len();
    let cb = config.progress_callback.as_ref();
    if let Some(cb) = cb {
        cb.on_extraction_start(total);
    }

    let mut reports: Vec<PageReport> = pages
        .iter()
        .map(|(page_number, _)| PageReport {
            page_number: *page_number,
            ..Default::default()
        })
        .collect();

    // ── Pass 1: structure ────────────────────────────────────────────────
    info!("Pass 1: analysing structure of {} pages", total);
    let structure_start = Instant::now();
    let throttle = config.structure_throttle();
    let mut shared: HashMap<usize, String> = HashMap::new();

    for (i, (page_number, image)) in pages.iter().enumerate() {
        if i > 0 {
            throttle.pause().await;
        }
        if let Some(cb) = cb {
            cb.on_page_start(Pass::Structure, *page_number, total);
        }
        match analyze_page(client, *page_number, image, config.max_output_tokens).await {
            Ok(structure) => {
                let report = &mut reports[i];
                report.has_multi_page_question = structure.has_multi_page_question;
                report.question_numbers = structure.question_numbers;
                if let Some(desc) = structure.shared_description {
                    report.has_shared_description = true;
                    shared.insert(*page_number, desc);
                }
                if let Some(cb) = cb {
                    cb.on_page_complete(
                        Pass::Structure,
                        *page_number,
                        total,
                        usize::from(report.has_shared_description),
                    );
                }
            }
            Err(e) => {
                warn!("Page {}: structure analysis failed: {}", page_number, e);
                if let Some(cb) = cb {
                    cb.on_page_error(Pass::Structure, *page_number, total, &e.to_string());
                }
                reports[i].errors.push(PageError::StructureFailed {
                    page: *page_number,
                    detail: e.to_string(),
                });
            }
        }
    }
    let structure_duration_ms = structure_start.elapsed().as_millis() as u64;
    debug!("Pass 1 found {} shared description(s)", shared.len());

    // ── Pass 2: extraction ───────────────────────────────────────────────
    info!("Pass 2: extracting questions from {} pages", total);
    let extraction_start = Instant::now();
    let throttle = config.extraction_throttle();
    let mut questions: Vec<ExtractedQuestion> = Vec::new();

    for (i, (page_number, image)) in pages.iter().enumerate() {
        if i > 0 {
            throttle.pause().await;
        }
        if let Some(cb) = cb {
            cb.on_page_start(Pass::Extraction, *page_number, total);
        }
        let ctx = PageContext {
            page_number: *page_number,
            image,
            shared_description: shared.get(page_number).map(String::as_str),
            prior_questions: &questions,
            context_window: config.context_window,
        };
        match extract_page(client, ctx, config.max_output_tokens).await {
            Ok(page_questions) => {
                reports[i].question_count = page_questions.len();
                if let Some(cb) = cb {
                    cb.on_page_complete(Pass::Extraction, *page_number, total, page_questions.len());
                }
                questions.extend(page_questions);
            }
            Err(e) => {
                warn!("Page {}: question extraction failed: {}", page_number, e);
                if let Some(cb) = cb {
                    cb.on_page_error(Pass::Extraction, *page_number, total, &e.to_string());
                }
                reports[i].errors.push(PageError::ExtractionFailed {
                    page: *page_number,
                    detail: e.to_string(),
                });
            }
        }
    }
    let extraction_duration_ms = extraction_start.elapsed().as_millis() as u64;

    let stats = ExtractionStats {
        total_pages: total,
        total_questions: questions.len(),
        structure_failures: count_failures(&reports, |e| matches!(e, PageError::StructureFailed { .. })),
        extraction_failures: count_failures(&reports, |e| matches!(e, PageError::ExtractionFailed { .. })),
        shared_descriptions: shared.len(),
        structure_duration_ms,
        extraction_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Extraction complete: {} questions from {} pages ({} structure / {} extraction failures), {}ms",
        stats.total_questions,
        total,
        stats.structure_failures,
        stats.extraction_failures,
        stats.total_duration_ms
    );
    if let Some(cb) = cb {
        cb.on_extraction_complete(total, questions.len());
    }

    ExtractionOutput {
        questions,
        pages: reports,
        stats,
    }
}

fn count_failures(reports: &[PageReport], pred: impl Fn(&PageError) -> bool) -> usize {
    reports
        .iter()
        .flat_map(|r| r.errors.iter())
        .filter(|e| pred(e))
        .count()
}
