//! Practice-question generation for a syllabus topic, and answers for
//! previous-year questions.
//!
//! Generation is one model call per request. The prompt carries the topic
//! notes, a sample of previous-year questions as a style reference, and the
//! questions already generated for the topic so the model does not repeat
//! itself. What comes back is filtered before the caller sees it:
//!
//! - the requested type is forced onto every record;
//! - records whose answer does not fit that type are dropped;
//! - records repeating a known statement, or one earlier in the batch, are
//!   dropped.
//!
//! Surviving records are structurally valid but unchecked; run them through
//! [`crate::review::Reviewer`] to check the answers.

use crate::backend::{ModelRequest, SamplingParams};
use crate::config::ExamConfig;
use crate::error::ExamError;
use crate::pipeline::call::ModelClient;
use crate::pipeline::json::parse_model_json;
use crate::pipeline::postprocess::clean_question;
use crate::prompts::{generation_prompt, pyq_solution_prompt};
use crate::question::{ExtractedQuestion, PreviousYearQuestion, QuestionType, RawQuestion, Topic};
use crate::validate::validate_answer;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Most previous-year questions solved in one call.
pub const PYQ_SOLUTION_BATCH: usize = 5;

/// Inputs for one generation call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub topic: &'a Topic,
    pub exam_name: &'a str,
    pub course_name: &'a str,
    pub question_type: QuestionType,
    /// Style references; the first `pyq_sample` are shown.
    pub pyqs: &'a [PreviousYearQuestion],
    /// Questions already generated for this topic, one per `\n\n` block.
    pub existing_context: &'a str,
    /// Statements generated recently, oldest first; the last `recent_window`
    /// are shown.
    pub recent: &'a [String],
    pub count: usize,
}

impl<'a> GenerationRequest<'a> {
    /// A request for one question with no history.
    pub fn new(
        topic: &'a Topic,
        exam_name: &'a str,
        course_name: &'a str,
        question_type: QuestionType,
    ) -> Self {
        Self {
            topic,
            exam_name,
            course_name,
            question_type,
            pyqs: &[],
            existing_context: "",
            recent: &[],
            count: 1,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<serde_json::Value>),
    One(serde_json::Value),
}

/// Generate questions for `request.topic`.
///
/// # Errors
/// Model-call failures only. Output that cannot be parsed is an empty batch.
pub async fn generate_questions(
    client: &ModelClient,
    request: &GenerationRequest<'_>,
    config: &ExamConfig,
) -> Result<Vec<ExtractedQuestion>, ExamError> {
    let prompt = generation_prompt(request, config.pyq_sample, config.recent_window);
    let model_request = ModelRequest::text(prompt, SamplingParams::CREATIVE)
        .max_output_tokens(config.max_output_tokens);
    let operation = format!("generate {} for topic {}", request.question_type, request.topic.name);

    let text = client.call(&operation, &model_request).await?;
    let questions = parse_generated(&text, request);
    info!(
        "Generated {} {} question(s) for topic {}",
        questions.len(),
        request.question_type,
        request.topic.name
    );
    Ok(questions)
}

/// Turn generator output into filtered records for `request`.
pub fn parse_generated(text: &str, request: &GenerationRequest<'_>) -> Vec<ExtractedQuestion> {
    let values = match parse_model_json::<OneOrMany>(text) {
        Ok(OneOrMany::Many(values)) => values,
        Ok(OneOrMany::One(value)) => vec![value],
        Err(e) => {
            warn!("Topic {}: no usable questions in response: {}", request.topic.name, e);
            return Vec::new();
        }
    };
    let (raw, malformed) = RawQuestion::from_values(values);
    if malformed > 0 {
        warn!("Topic {}: skipped {} malformed record(s)", request.topic.name, malformed);
    }

    let mut seen: HashSet<String> = request
        .recent
        .iter()
        .map(String::as_str)
        .chain(request.existing_context.split("\n\n"))
        .map(normalise_statement)
        .filter(|s| !s.is_empty())
        .collect();

    let mut out = Vec::with_capacity(raw.len());
    for mut record in raw {
        record.question_type = Some(request.question_type);
        let Some(mut q) = record.into_question(None) else {
            debug!("Dropping generated record without a statement");
            continue;
        };
        q.topic_id = Some(request.topic.id.clone());
        q.page_number = 0;
        q.confidence_score = 1.0;
        q.is_continuation = false;
        q.spans_multiple_pages = false;
        q.continuation_from_page = None;
        clean_question(&mut q);

        if let Err(issue) = validate_answer(&q) {
            warn!("Dropping generated {}: {}", q.question_type, issue);
            continue;
        }
        if q.question_type == QuestionType::Mcq && q.options().len() != 4 {
            warn!("Dropping generated MCQ with {} options", q.options().len());
            continue;
        }
        if !seen.insert(normalise_statement(&q.question_statement)) {
            warn!("Dropping repeated question: {}", q.context_line(60));
            continue;
        }
        out.push(q);
    }
    out
}

/// Lowercase, whitespace-collapsed form used to spot repeats.
fn normalise_statement(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Answer and worked solution for one previous-year question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PyqSolution {
    #[serde(default, deserialize_with = "crate::question::text_or_empty")]
    pub answer: String,
    #[serde(default)]
    pub solution: String,
}

/// Solve up to [`PYQ_SOLUTION_BATCH`] previous-year questions in one call.
///
/// Solutions come back in input order. A malformed response is an empty list.
///
/// # Errors
/// Model-call failures only.
pub async fn solve_pyqs(
    client: &ModelClient,
    pyqs: &[PreviousYearQuestion],
    topic_notes: &str,
) -> Result<Vec<PyqSolution>, ExamError> {
    let batch = &pyqs[..pyqs.len().min(PYQ_SOLUTION_BATCH)];
    if batch.is_empty() {
        return Ok(Vec::new());
    }
    if pyqs.len() > batch.len() {
        debug!(
            "Solving the first {} of {} previous-year questions",
            batch.len(),
            pyqs.len()
        );
    }

    let request = ModelRequest::text(pyq_solution_prompt(batch, topic_notes), SamplingParams::REPAIR);
    let text = client.call("previous-year solutions", &request).await?;
    match parse_model_json::<Vec<PyqSolution>>(&text) {
        Ok(solutions) => {
            if solutions.len() != batch.len() {
                warn!(
                    "Asked for {} previous-year solutions, got {}",
                    batch.len(),
                    solutions.len()
                );
            }
            Ok(solutions)
        }
        Err(e) => {
            warn!("No usable previous-year solutions in response: {}", e);
            Ok(Vec::new())
        }
    }
}
