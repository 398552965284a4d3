//! Pass 2: context-aware question extraction for one page.
//!
//! The prompt carries three kinds of context the page image alone lacks:
//! the shared description found for this page in pass 1, a rolling window
//! of the last few questions already extracted (so numbering and
//! continuations line up), and the page number itself.

use crate::backend::{InlineImage, ModelRequest, SamplingParams};
use crate::error::ExamError;
use crate::pipeline::call::ModelClient;
use crate::pipeline::json::parse_model_json;
use crate::pipeline::postprocess::clean_question;
use crate::prompts::extraction_prompt;
use crate::question::{ExtractedQuestion, QuestionType, RawQuestion};
use tracing::{debug, warn};

/// Characters of each prior statement shown in the rolling context.
pub const CONTEXT_CHARS: usize = 200;

/// Everything pass 2 needs to know about one page.
#[derive(Debug, Clone, Copy)]
pub struct PageContext<'a> {
    /// 1-indexed page number.
    pub page_number: usize,
    pub image: &'a InlineImage,
    /// Shared description found for this page in pass 1.
    pub shared_description: Option<&'a str>,
    /// Every question extracted so far, in document order.
    pub prior_questions: &'a [ExtractedQuestion],
    /// How many of the most recent prior questions to show the model.
    pub context_window: usize,
}

/// `Q<num>: <first 200 chars>...` for the last `window` questions.
pub fn render_recent_context(prior: &[ExtractedQuestion], window: usize) -> String {
    let start = prior.len().saturating_sub(window);
    prior[start..]
        .iter()
        .map(|q| q.context_line(CONTEXT_CHARS))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Turn pass-2 model output into records for `page_number`.
///
/// Unusable output yields an empty page. Each record is stamped with the page
/// number regardless of what the model wrote, and cleaned.
pub fn parse_page_questions(text: &str, page_number: usize) -> Vec<ExtractedQuestion> {
    let values: Vec<serde_json::Value> = match parse_model_json(text) {
        Ok(values) => values,
        Err(e) => {
            warn!("Page {}: no usable questions in response: {}", page_number, e);
            return Vec::new();
        }
    };
    let (raw, malformed) = RawQuestion::from_values(values);
    if malformed > 0 {
        warn!("Page {}: skipped {} malformed record(s)", page_number, malformed);
    }

    let total = raw.len();
    let questions: Vec<ExtractedQuestion> = raw
        .into_iter()
        .filter_map(|r| {
            let inferred = if r.options.as_ref().is_some_and(|o| !o.is_empty()) {
                QuestionType::Mcq
            } else {
                QuestionType::Subjective
            };
            r.into_question(Some(inferred))
        })
        .map(|mut q| {
            q.page_number = page_number;
            if q.is_continuation && q.continuation_from_page.is_none() && page_number > 1 {
                q.continuation_from_page = Some(page_number - 1);
            }
            clean_question(&mut q);
            q
        })
        .collect();

    if questions.len() < total {
        debug!(
            "Page {}: dropped {} record(s) without a statement",
            page_number,
            total - questions.len()
        );
    }
    questions
}

/// Run pass 2 on one page.
///
/// # Errors
/// Model-call failures propagate; malformed output is an empty result.
pub async fn extract_page(
    client: &ModelClient,
    ctx: PageContext<'_>,
    max_output_tokens: usize,
) -> Result<Vec<ExtractedQuestion>, ExamError> {
    let recent = render_recent_context(ctx.prior_questions, ctx.context_window);
    let prompt = extraction_prompt(ctx.page_number, ctx.shared_description, &recent);
    let request = ModelRequest::text(prompt, SamplingParams::PRECISE)
        .with_image(ctx.image.clone())
        .max_output_tokens(max_output_tokens);
    let operation = format!("question extraction (page {})", ctx.page_number);

    let text = client.call(&operation, &request).await?;
    let questions = parse_page_questions(&text, ctx.page_number);
    debug!("Page {}: {} question(s)", ctx.page_number, questions.len());
    Ok(questions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_number_is_overwritten() {
        let text = r#"[{"question_number":"1","question_type":"NAT","question_statement":"Compute 6*7","page_number":99}]"#;
        let qs = parse_page_questions(text, 7);
        assert_eq!(qs.len(), 1);
        assert_eq!(qs[0].page_number, 7);
        assert_eq!(qs[0].confidence_score, 1.0);
    }

    #[test]
    fn confidence_is_kept_when_given() {
        let text = r#"[{"question_type":"NAT","question_statement":"x","confidence_score":0.4}]"#;
        assert_eq!(parse_page_questions(text, 1)[0].confidence_score, 0.4);
    }

    #[test]
    fn one_badly_typed_record_keeps_the_rest_of_the_page() {
        let text = r#"[
            {"question_type":"NAT","question_statement":"Compute 6*7","answer":"42"},
            {"question_type":"NAT","question_statement":"Compute 3*3","answer":"9","confidence_score":"high"},
            "stray text"
        ]"#;
        let qs = parse_page_questions(text, 3);
        assert_eq!(qs.len(), 2);
        assert!(qs.iter().all(|q| q.page_number == 3));
        assert_eq!(qs[1].confidence_score, 1.0);
    }

    #[test]
    fn continuation_points_at_previous_page() {
        let text = r#"[{"question_type":"Subjective","question_statement":"...end of proof","is_continuation":true}]"#;
        let qs = parse_page_questions(text, 5);
        assert_eq!(qs[0].continuation_from_page, Some(4));
    }

    #[test]
    fn missing_type_is_inferred_from_options() {
        let text = r#"[{"question_statement":"Pick","options":["a","b","c","d"]},{"question_statement":"Explain"}]"#;
        let qs = parse_page_questions(text, 1);
        assert_eq!(qs[0].question_type, QuestionType::Mcq);
        assert_eq!(qs[1].question_type, QuestionType::Subjective);
    }

    #[test]
    fn unparseable_page_is_empty() {
        assert!(parse_page_questions("The page is blank.", 2).is_empty());
        assert!(parse_page_questions(r#"{"error": "blank"}"#, 2).is_empty());
    }

    #[test]
    fn recent_context_keeps_last_three() {
        let prior: Vec<ExtractedQuestion> = (1..=5)
            .map(|i| {
                let mut q = ExtractedQuestion::new(QuestionType::Nat, format!("Statement {i}"));
                q.question_number = Some(i.to_string());
                q
            })
            .collect();
        let ctx = render_recent_context(&prior, 3);
        assert_eq!(ctx, "Q3: Statement 3...\nQ4: Statement 4...\nQ5: Statement 5...");
        assert_eq!(render_recent_context(&[], 3), "");
    }
}
