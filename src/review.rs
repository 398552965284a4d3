//! Solve, validate, fix: make a question agree with an independent solution.
//!
//! ```text
//!  question ──► solve ──► validate ──ok──► Accepted (no fix call)
//!                            │
//!                          issues
//!                            ▼
//!                           fix ──► validate ──ok──► Accepted { fixed }
//!                                       │
//!                                     issues ──► Rejected
//! ```
//!
//! The solver never sees the stated answer, so agreement means two
//! independent derivations landed on the same result. A failed validation
//! gets exactly one fix attempt.
//!
//! ## Correct-letter spread
//!
//! Models asked to write MCQ options put the right one at `A` or `B` far more
//! often than chance. When a fix rewrites MCQ options, the correct letter is
//! drawn uniformly from `A`–`D` before the prompt is built and the model is
//! told where to put it, so the letters of a reviewed batch come out evenly
//! spread.

use crate::backend::{ModelRequest, SamplingParams};
use crate::error::ExamError;
use crate::pipeline::call::ModelClient;
use crate::pipeline::json::parse_model_json;
use crate::pipeline::postprocess::{clean_question, normalise_answer_letters};
use crate::prompts;
use crate::question::{ExtractedQuestion, QuestionType, OPTION_LETTERS};
use crate::validate::{msq_letter_set, validate_answer};
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Absolute tolerance when comparing NAT answers.
pub const NAT_TOLERANCE: f64 = 0.001;

/// Shortest acceptable statement, in characters.
pub const MIN_STATEMENT_CHARS: usize = 10;

/// Shortest acceptable solution, in characters.
pub const MIN_SOLUTION_CHARS: usize = 20;

/// Letters a fixed MCQ may place its correct option at.
const MCQ_TARGETS: [char; 4] = ['A', 'B', 'C', 'D'];

/// The model's own answer to a question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolvedAnswer {
    #[serde(
        default,
        alias = "correct_answer",
        alias = "answer",
        deserialize_with = "crate::question::text_or_empty"
    )]
    pub correct_answer: String,
    #[serde(default, alias = "detailed_solution", alias = "solution")]
    pub detailed_solution: String,
    #[serde(default)]
    pub reasoning: String,
}

/// Final state of one review.
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewOutcome {
    /// The question is consistent with its solution. `fixed` lists the issues
    /// the fix resolved; empty when the question passed as submitted.
    Accepted {
        question: ExtractedQuestion,
        fixed: Vec<String>,
    },
    /// The fix did not converge. `question` is the question as submitted.
    Rejected {
        question: ExtractedQuestion,
        issues: Vec<String>,
    },
}

impl ReviewOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ReviewOutcome::Accepted { .. })
    }

    /// Whether a fix call was made and succeeded.
    pub fn was_fixed(&self) -> bool {
        matches!(self, ReviewOutcome::Accepted { fixed, .. } if !fixed.is_empty())
    }

    pub fn question(&self) -> &ExtractedQuestion {
        match self {
            ReviewOutcome::Accepted { question, .. } | ReviewOutcome::Rejected { question, .. } => {
                question
            }
        }
    }

    pub fn into_question(self) -> ExtractedQuestion {
        match self {
            ReviewOutcome::Accepted { question, .. } | ReviewOutcome::Rejected { question, .. } => {
                question
            }
        }
    }
}

/// Fields a fix response may replace.
#[derive(Debug, Default, Deserialize)]
struct FixedFields {
    #[serde(default)]
    question_statement: Option<String>,
    #[serde(default)]
    options: Option<Vec<String>>,
    #[serde(default)]
    answer: Option<serde_json::Value>,
    #[serde(default)]
    solution: Option<String>,
}

/// Runs the solve/validate/fix loop through a [`ModelClient`].
pub struct Reviewer {
    client: ModelClient,
    rng: Mutex<StdRng>,
}

impl Reviewer {
    pub fn new(client: ModelClient) -> Self {
        Self {
            client,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Reproducible MCQ target letters.
    pub fn with_seed(client: ModelClient, seed: u64) -> Self {
        Self {
            client,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Review one question.
    ///
    /// # Errors
    /// Model-call failures and unparseable solve/fix responses. Semantic
    /// problems are not errors; they end in [`ReviewOutcome::Rejected`].
    pub async fn review(&self, question: &ExtractedQuestion) -> Result<ReviewOutcome, ExamError> {
        let solved = self.solve(question).await?;
        let expected = expected_answer(question, &solved.correct_answer);

        let issues = validate_against(question, &expected);
        if issues.is_empty() {
            debug!("Question accepted as submitted");
            return Ok(ReviewOutcome::Accepted {
                question: question.clone(),
                fixed: Vec::new(),
            });
        }
        info!("Question has {} issue(s), attempting fix", issues.len());
        for issue in &issues {
            debug!("  issue: {}", issue);
        }

        let target = match question.question_type {
            QuestionType::Mcq => Some(self.draw_mcq_letter()),
            _ => None,
        };
        let fixed = self.fix(question, &solved, &expected, &issues, target).await?;

        let expected_after_fix = target.map(String::from).unwrap_or(expected);
        let remaining = validate_against(&fixed, &expected_after_fix);
        if remaining.is_empty() {
            info!("Question fixed ({} issue(s) resolved)", issues.len());
            Ok(ReviewOutcome::Accepted {
                question: fixed,
                fixed: issues,
            })
        } else {
            warn!("Fix did not converge: {}", remaining.join("; "));
            let mut all = issues;
            all.extend(remaining.into_iter().map(|i| format!("after fix: {i}")));
            Ok(ReviewOutcome::Rejected {
                question: question.clone(),
                issues: all,
            })
        }
    }

    /// Solve `question` without showing it the stated answer.
    pub async fn solve(&self, question: &ExtractedQuestion) -> Result<SolvedAnswer, ExamError> {
        let request = ModelRequest::text(prompts::solve_prompt(question), SamplingParams::PRECISE);
        let text = self.client.call("solve question", &request).await?;
        let solved: SolvedAnswer = parse_model_json(&text)
            .map_err(|e| ExamError::malformed("solve question", e.to_string()))?;
        if solved.correct_answer.trim().is_empty() {
            return Err(ExamError::malformed(
                "solve question",
                "response has no correctAnswer",
            ));
        }
        Ok(solved)
    }

    async fn fix(
        &self,
        question: &ExtractedQuestion,
        solved: &SolvedAnswer,
        expected: &str,
        issues: &[String],
        target: Option<char>,
    ) -> Result<ExtractedQuestion, ExamError> {
        let prompt = prompts::fix_prompt(question, expected, &solved.detailed_solution, issues, target);
        let request = ModelRequest::text(prompt, SamplingParams::REPAIR);
        let text = self.client.call("fix question", &request).await?;
        let fields: FixedFields = parse_model_json(&text)
            .map_err(|e| ExamError::malformed("fix question", e.to_string()))?;
        Ok(apply_fix(question, fields))
    }

    fn draw_mcq_letter(&self) -> char {
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        MCQ_TARGETS[rng.random_range(0..MCQ_TARGETS.len())]
    }
}

/// Merge a fix response into a copy of `question`. Type, number, page and
/// topic are never touched.
fn apply_fix(question: &ExtractedQuestion, fields: FixedFields) -> ExtractedQuestion {
    let mut fixed = question.clone();
    if let Some(statement) = fields.question_statement.filter(|s| !s.trim().is_empty()) {
        fixed.question_statement = statement;
    }
    if fixed.question_type.has_options() {
        if let Some(options) = fields.options.filter(|o| !o.is_empty()) {
            fixed.options = Some(options);
        }
    }
    fixed.answer = fields.answer.and_then(|v| match v {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    fixed.solution = fields.solution;
    clean_question(&mut fixed);
    fixed
}

/// The solved answer in the form the question's answer should take. An MCQ
/// solver that answers with an option's text is mapped to that option's letter.
fn expected_answer(question: &ExtractedQuestion, solved: &str) -> String {
    let solved = solved.trim();
    match question.question_type {
        qtype @ (QuestionType::Mcq | QuestionType::Msq) => {
            normalise_answer_letters(solved, qtype, question.options())
        }
        QuestionType::Nat | QuestionType::Subjective => solved.to_string(),
    }
}

/// Compare `question` against the answer it should have. An empty list
/// means consistent.
pub fn validate_against(question: &ExtractedQuestion, expected: &str) -> Vec<String> {
    let mut issues = Vec::new();
    let stated = question.answer().trim();

    if question.question_statement.trim().chars().count() < MIN_STATEMENT_CHARS {
        issues.push("Question statement is too short or empty".to_string());
    }
    if let Err(issue) = validate_answer(question) {
        issues.push(format!("Answer format: {issue}"));
    }

    match question.question_type {
        QuestionType::Mcq => {
            let count = question.options().len();
            if count != 4 {
                issues.push(format!("MCQ must have exactly 4 options, found {count}"));
            } else {
                let expected = expected.trim().to_ascii_uppercase();
                let valid = expected.len() == 1 && expected.chars().all(|c| MCQ_TARGETS.contains(&c));
                if !valid {
                    issues.push(format!(
                        "Solved answer \"{expected}\" is not a valid MCQ option (A, B, C, D)"
                    ));
                }
                if stated.to_ascii_uppercase() != expected {
                    issues.push(format!(
                        "Current answer \"{stated}\" doesn't match solved answer \"{expected}\""
                    ));
                }
            }
        }
        QuestionType::Msq => {
            let count = question.options().len();
            if !(4..=5).contains(&count) {
                issues.push(format!("MSQ must have 4-5 options, found {count}"));
            } else {
                for part in expected.split(',').map(str::trim) {
                    let ok = part.len() == 1 && part.chars().all(|c| OPTION_LETTERS.contains(&c.to_ascii_uppercase()));
                    if !ok {
                        issues.push(format!("Invalid MSQ option \"{part}\" in solved answer"));
                    }
                }
                let solved_set = msq_letter_set(expected);
                if solved_set.is_empty() || msq_letter_set(stated) != solved_set {
                    issues.push(format!(
                        "Current answer \"{stated}\" doesn't match solved answer \"{expected}\""
                    ));
                }
            }
        }
        QuestionType::Nat => match leading_number(expected) {
            None => issues.push(format!(
                "Solved answer \"{expected}\" for NAT question is not numerical"
            )),
            Some(solved) => {
                let matches = stated
                    .parse::<f64>()
                    .is_ok_and(|n| (n - solved).abs() <= NAT_TOLERANCE);
                if !matches {
                    issues.push(format!(
                        "Current answer \"{stated}\" doesn't match solved answer \"{expected}\""
                    ));
                }
            }
        },
        QuestionType::Subjective => {
            if expected.trim().is_empty() {
                issues.push("Solved answer is empty".to_string());
            }
        }
    }

    let solution_len = question.solution.as_deref().map_or(0, |s| s.trim().chars().count());
    if solution_len < MIN_SOLUTION_CHARS {
        issues.push("Solution is too short or missing".to_string());
    }

    issues
}

static RE_LEADING_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?").expect("valid regex")
});

/// Number at the start of a solved answer, ignoring any units after it
/// (`"12.5 m/s"` → `12.5`). Stated answers must be bare numbers.
fn leading_number(text: &str) -> Option<f64> {
    RE_LEADING_NUMBER
        .find(text.trim())
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ModelBackend;
    use crate::error::BackendError;
    use crate::keys::{Credential, KeyPool};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Solves every question as `solved`; fixes by following the target
    /// letter named in the prompt.
    struct FakeTutor {
        solved: &'static str,
        fix_calls: AtomicUsize,
        solve_calls: AtomicUsize,
        fix_response: Option<&'static str>,
    }

    impl FakeTutor {
        fn new(solved: &'static str) -> Self {
            Self {
                solved,
                fix_calls: AtomicUsize::new(0),
                solve_calls: AtomicUsize::new(0),
                fix_response: None,
            }
        }
    }

    #[async_trait]
    impl ModelBackend for FakeTutor {
        fn name(&self) -> &str {
            "fake-tutor"
        }

        async fn generate(&self, request: &ModelRequest, _: &Credential) -> Result<String, BackendError> {
            if request.prompt.contains("FIXING REQUIREMENTS") {
                self.fix_calls.fetch_add(1, Ordering::SeqCst);
                if let Some(canned) = self.fix_response {
                    return Ok(canned.to_string());
                }
                let marker = "MUST be placed at position ";
                let letter = request
                    .prompt
                    .find(marker)
                    .and_then(|i| request.prompt[i + marker.len()..].chars().next())
                    .unwrap_or('A');
                Ok(format!(
                    r#"{{"question_statement": "What is 2 + 2 in base ten?",
                        "options": ["3", "4", "5", "6"],
                        "answer": "{letter}",
                        "solution": "Adding two and two gives four, so the answer is four."}}"#
                ))
            } else {
                self.solve_calls.fetch_add(1, Ordering::SeqCst);
                Ok(format!(
                    r#"{{"correctAnswer": "{}", "detailedSolution": "Add the numbers step by step.", "reasoning": "arithmetic"}}"#,
                    self.solved
                ))
            }
        }
    }

    fn client(backend: Arc<FakeTutor>) -> ModelClient {
        ModelClient::new(backend, Arc::new(KeyPool::new(["k1"]).unwrap()))
    }

    fn mcq(answer: &str) -> ExtractedQuestion {
        let mut q = ExtractedQuestion::new(QuestionType::Mcq, "What is 2 + 2 in base ten?");
        q.options = Some(vec!["4".into(), "3".into(), "5".into(), "6".into()]);
        q.answer = Some(answer.into());
        q.solution = Some("Two plus two equals four, which is option A.".into());
        q.topic_id = Some("arith".into());
        q
    }

    #[tokio::test]
    async fn consistent_question_is_accepted_without_fix() {
        let tutor = Arc::new(FakeTutor::new("A"));
        let reviewer = Reviewer::with_seed(client(tutor.clone()), 1);

        let outcome = reviewer.review(&mcq("A")).await.unwrap();
        assert!(outcome.is_accepted());
        assert!(!outcome.was_fixed());
        assert_eq!(outcome.question(), &mcq("A"));
        assert_eq!(tutor.solve_calls.load(Ordering::SeqCst), 1);
        assert_eq!(tutor.fix_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mismatch_is_fixed_at_drawn_letter() {
        let tutor = Arc::new(FakeTutor::new("B"));
        let reviewer = Reviewer::with_seed(client(tutor.clone()), 7);

        let outcome = reviewer.review(&mcq("A")).await.unwrap();
        assert!(outcome.was_fixed(), "{outcome:?}");
        let q = outcome.question();
        assert_eq!(q.question_type, QuestionType::Mcq);
        assert_eq!(q.topic_id.as_deref(), Some("arith"));
        let letter = q.answer().chars().next().unwrap();
        assert!(MCQ_TARGETS.contains(&letter));
        assert_eq!(tutor.fix_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fixed_letters_are_spread_evenly() {
        let tutor = Arc::new(FakeTutor::new("B"));
        let reviewer = Reviewer::with_seed(client(tutor.clone()), 42);

        let mut counts: HashMap<char, usize> = HashMap::new();
        for _ in 0..400 {
            let outcome = reviewer.review(&mcq("A")).await.unwrap();
            let letter = outcome.question().answer().chars().next().unwrap();
            *counts.entry(letter).or_default() += 1;
        }
        for letter in MCQ_TARGETS {
            let n = counts.get(&letter).copied().unwrap_or(0);
            assert!((60..=140).contains(&n), "{letter}: {n} of 400 ({counts:?})");
        }
    }

    #[tokio::test]
    async fn unfixable_question_is_rejected_with_issues() {
        let mut tutor = FakeTutor::new("12");
        tutor.fix_response = Some(r#"{"answer": "13", "solution": "short"}"#);
        let tutor = Arc::new(tutor);
        let reviewer = Reviewer::with_seed(client(tutor.clone()), 3);

        let mut q = ExtractedQuestion::new(QuestionType::Nat, "How many months are in a year?");
        q.answer = Some("11".into());
        q.solution = Some("Count the months of the calendar year one by one.".into());

        match reviewer.review(&q).await.unwrap() {
            ReviewOutcome::Rejected { question, issues } => {
                assert_eq!(question, q);
                assert!(issues.iter().any(|i| i.starts_with("after fix:")), "{issues:?}");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(tutor.fix_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unparseable_solve_is_an_error() {
        struct Mumbler;

        #[async_trait]
        impl ModelBackend for Mumbler {
            fn name(&self) -> &str {
                "mumbler"
            }

            async fn generate(&self, _: &ModelRequest, _: &Credential) -> Result<String, BackendError> {
                Ok("I think it's probably B".into())
            }
        }

        let client = ModelClient::new(Arc::new(Mumbler), Arc::new(KeyPool::new(["k1"]).unwrap()));
        let err = Reviewer::new(client).review(&mcq("A")).await.unwrap_err();
        assert!(matches!(err, ExamError::MalformedOutput { .. }), "{err:?}");
    }

    fn msq(answer: &str) -> ExtractedQuestion {
        let mut q = ExtractedQuestion::new(QuestionType::Msq, "Which of these numbers are prime?");
        q.options = Some(vec!["2".into(), "4".into(), "5".into(), "9".into()]);
        q.answer = Some(answer.into());
        q.solution = Some("2 and 5 are prime; 4 and 9 are composite.".into());
        q
    }

    #[tokio::test]
    async fn msq_answer_with_invalid_letter_goes_through_fix() {
        let mut tutor = FakeTutor::new("A,C");
        tutor.fix_response = Some(r#"{"answer": "A,C", "solution": "2 and 5 are the primes among the options."}"#);
        let tutor = Arc::new(tutor);
        let reviewer = Reviewer::with_seed(client(tutor.clone()), 5);

        let outcome = reviewer.review(&msq("A,C,Z")).await.unwrap();
        assert!(outcome.was_fixed(), "{outcome:?}");
        assert_eq!(outcome.question().answer(), "A,C");
        assert_eq!(tutor.fix_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn msq_answer_with_duplicate_letter_goes_through_fix() {
        let mut tutor = FakeTutor::new("A,C");
        tutor.fix_response = Some(r#"{"answer": "A,C", "solution": "2 and 5 are the primes among the options."}"#);
        let tutor = Arc::new(tutor);
        let reviewer = Reviewer::with_seed(client(tutor.clone()), 5);

        let outcome = reviewer.review(&msq("A,A,C")).await.unwrap();
        assert!(outcome.was_fixed(), "{outcome:?}");
        assert_eq!(tutor.fix_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn nat_answer_with_units_goes_through_fix() {
        let mut tutor = FakeTutor::new("12.5");
        tutor.fix_response = Some(r#"{"answer": 12.5, "solution": "Distance over time gives 12.5 metres per second."}"#);
        let tutor = Arc::new(tutor);
        let reviewer = Reviewer::with_seed(client(tutor.clone()), 5);

        let mut q = ExtractedQuestion::new(QuestionType::Nat, "A runner covers 100 m in 8 s. Find the speed.");
        q.answer = Some("12.5 m/s (approx)".into());
        q.solution = Some("Speed is distance divided by time, 100 / 8.".into());

        let outcome = reviewer.review(&q).await.unwrap();
        assert!(outcome.was_fixed(), "{outcome:?}");
        assert_eq!(outcome.question().answer(), "12.5");
        assert_eq!(tutor.fix_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn solver_answering_with_option_text_matches_its_letter() {
        let tutor = Arc::new(FakeTutor::new("4"));
        let reviewer = Reviewer::with_seed(client(tutor.clone()), 1);

        let outcome = reviewer.review(&mcq("A")).await.unwrap();
        assert!(outcome.is_accepted());
        assert!(!outcome.was_fixed());
        assert_eq!(tutor.fix_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn malformed_stated_answers_are_issues() {
        assert!(validate_against(&msq("A,C,Z"), "A,C")
            .iter()
            .any(|i| i.starts_with("Answer format")));
        assert!(validate_against(&msq("A,A,C"), "A,C")
            .iter()
            .any(|i| i.starts_with("Answer format")));
    }

    #[test]
    fn solved_answer_accepts_numbers() {
        let solved: SolvedAnswer =
            serde_json::from_str(r#"{"correctAnswer": 12.5, "solution": "half of 25"}"#).unwrap();
        assert_eq!(solved.correct_answer, "12.5");
        assert_eq!(solved.detailed_solution, "half of 25");
    }

    #[test]
    fn nat_compares_within_tolerance() {
        let mut q = ExtractedQuestion::new(QuestionType::Nat, "Compute the value of pi");
        q.answer = Some("3.1416".into());
        q.solution = Some("Pi is approximately 3.14159 to five places.".into());
        assert!(validate_against(&q, "3.14159").is_empty());
        assert!(validate_against(&q, "3.15 units").len() == 1);
        assert!(validate_against(&q, "about three").iter().any(|i| i.contains("not numerical")));
    }

    #[test]
    fn msq_compares_sorted_sets() {
        let mut q = ExtractedQuestion::new(QuestionType::Msq, "Which of these are prime?");
        q.options = Some(vec!["2".into(), "4".into(), "5".into(), "9".into()]);
        q.answer = Some("C,A".into());
        q.solution = Some("2 and 5 are prime; 4 and 9 are composite.".into());
        assert!(validate_against(&q, "A, C").is_empty());
        assert_eq!(validate_against(&q, "A,B,C").len(), 1);
    }

    #[test]
    fn structural_checks() {
        let mut q = mcq("A");
        q.options = Some(vec!["4".into(), "3".into(), "5".into()]);
        q.solution = None;
        let issues = validate_against(&q, "A");
        assert!(issues.iter().any(|i| i.contains("exactly 4 options")));
        assert!(issues.iter().any(|i| i.contains("Solution is too short")));
    }

    #[test]
    fn leading_number_ignores_units() {
        assert_eq!(leading_number("12.5 m/s"), Some(12.5));
        assert_eq!(leading_number("-3"), Some(-3.0));
        assert_eq!(leading_number("x = 3"), None);
    }
}
