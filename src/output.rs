//! Output types returned by the extraction driver, and JSON persistence.

use crate::error::{ExamError, PageError};
use crate::question::ExtractedQuestion;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Result of a two-pass extraction over one document.
///
/// Returned even when some pages failed; inspect [`PageReport::errors`] or
/// [`ExtractionOutput::empty_pages`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// All questions in page order, then model order within a page.
    pub questions: Vec<ExtractedQuestion>,
    /// One report per processed page, in page order.
    pub pages: Vec<PageReport>,
    pub stats: ExtractionStats,
}

impl ExtractionOutput {
    /// Pages that contributed no questions, whether by failure or because
    /// they had none.
    pub fn empty_pages(&self) -> Vec<usize> {
        self.pages
            .iter()
            .filter(|p| p.question_count == 0)
            .map(|p| p.page_number)
            .collect()
    }

    /// Pages with at least one pass failure.
    pub fn failed_pages(&self) -> Vec<usize> {
        self.pages
            .iter()
            .filter(|p| !p.errors.is_empty())
            .map(|p| p.page_number)
            .collect()
    }
}

/// What happened to one page across both passes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageReport {
    /// 1-indexed page number.
    pub page_number: usize,
    /// Questions extracted in pass 2.
    pub question_count: usize,
    /// Pass 1 found a description shared by several questions.
    pub has_shared_description: bool,
    /// Pass 1 saw a question running off the page.
    pub has_multi_page_question: bool,
    /// Question labels pass 1 saw on the page.
    pub question_numbers: Vec<String>,
    /// Non-fatal failures, at most one per pass.
    pub errors: Vec<PageError>,
}

/// Aggregate counters for one extraction run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_pages: usize,
    pub total_questions: usize,
    pub structure_failures: usize,
    pub extraction_failures: usize,
    /// Pages with a shared description.
    pub shared_descriptions: usize,
    pub structure_duration_ms: u64,
    pub extraction_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Serialise `value` as pretty JSON to `path`.
///
/// Atomic: written to a sibling temp file, then renamed over the target.
pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ExamError> {
    let write_err = |e: std::io::Error| ExamError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    let json = serde_json::to_string_pretty(value)
        .map_err(|e| ExamError::Internal(format!("JSON encoding failed: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::QuestionType;

    fn report(page: usize, count: usize, errors: Vec<PageError>) -> PageReport {
        PageReport {
            page_number: page,
            question_count: count,
            errors,
            ..Default::default()
        }
    }

    #[test]
    fn empty_and_failed_pages() {
        let out = ExtractionOutput {
            questions: vec![],
            pages: vec![
                report(1, 4, vec![]),
                report(
                    2,
                    0,
                    vec![PageError::ExtractionFailed {
                        page: 2,
                        detail: "429".into(),
                    }],
                ),
                report(3, 0, vec![]),
            ],
            stats: ExtractionStats::default(),
        };
        assert_eq!(out.empty_pages(), vec![2, 3]);
        assert_eq!(out.failed_pages(), vec![2]);
    }

    #[tokio::test]
    async fn write_json_creates_parents_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.json");
        let q = vec![ExtractedQuestion::new(QuestionType::Nat, "1+1")];
        write_json(&path, &q).await.unwrap();

        let back: Vec<ExtractedQuestion> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, q);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
