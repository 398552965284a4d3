//! Question records and the caller-supplied metadata they are built from.
//!
//! [`ExtractedQuestion`] is the one record type that flows through the whole
//! crate: the context-aware extractor and the generator create it, the review
//! loop replaces its options/answer/solution, and the caller persists it.
//!
//! Model output is parsed through [`RawQuestion`] first. Models return
//! numbers where we asked for strings (`"question_number": 17`), `null` where
//! we asked for booleans, and extra keys from earlier prompt versions
//! (`has_diagram`); the raw form absorbs all of that so one sloppy field does
//! not cost a whole page.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Option letters in order. MCQ/MSQ answers refer to options by letter.
pub const OPTION_LETTERS: [char; 5] = ['A', 'B', 'C', 'D', 'E'];

/// Zero-based option index for an answer letter (`'c'` → `Some(2)`).
pub fn letter_index(letter: char) -> Option<usize> {
    let upper = letter.to_ascii_uppercase();
    OPTION_LETTERS.iter().position(|&l| l == upper)
}

/// Answer letter for a zero-based option index.
pub fn option_letter(index: usize) -> Option<char> {
    OPTION_LETTERS.get(index).copied()
}

/// Question type taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuestionType {
    /// Single correct option.
    #[serde(rename = "MCQ", alias = "mcq", alias = "Mcq")]
    Mcq,
    /// One or more correct options.
    #[serde(rename = "MSQ", alias = "msq", alias = "Msq")]
    Msq,
    /// Numerical answer.
    #[serde(rename = "NAT", alias = "nat", alias = "Nat")]
    Nat,
    /// Free response.
    #[serde(rename = "Subjective", alias = "subjective", alias = "SUBJECTIVE")]
    Subjective,
}

impl QuestionType {
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionType::Mcq => "MCQ",
            QuestionType::Msq => "MSQ",
            QuestionType::Nat => "NAT",
            QuestionType::Subjective => "Subjective",
        }
    }

    /// MCQ and MSQ carry options; NAT and Subjective never do.
    pub fn has_options(self) -> bool {
        matches!(self, QuestionType::Mcq | QuestionType::Msq)
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mcq" => Ok(QuestionType::Mcq),
            "msq" => Ok(QuestionType::Msq),
            "nat" => Ok(QuestionType::Nat),
            "subjective" => Ok(QuestionType::Subjective),
            other => Err(format!(
                "unknown question type '{other}' (expected MCQ, MSQ, NAT or Subjective)"
            )),
        }
    }
}

fn default_confidence() -> f64 {
    1.0
}

/// A single exam question, extracted from a page or generated for a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedQuestion {
    /// Printed label, possibly compound for split parts ("11(A)").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_number: Option<String>,
    pub question_type: QuestionType,
    pub question_statement: String,
    /// Present only for MCQ/MSQ.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution: Option<String>,
    #[serde(default)]
    pub is_continuation: bool,
    #[serde(default)]
    pub spans_multiple_pages: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_from_page: Option<usize>,
    #[serde(default)]
    pub has_image: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_description: Option<String>,
    /// 1-indexed source page; 0 for generated questions.
    #[serde(default)]
    pub page_number: usize,
    #[serde(default = "default_confidence")]
    pub confidence_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty_level: Option<String>,
}

impl ExtractedQuestion {
    /// A bare question with no answer, flags or provenance.
    pub fn new(question_type: QuestionType, statement: impl Into<String>) -> Self {
        Self {
            question_number: None,
            question_type,
            question_statement: statement.into(),
            options: None,
            answer: None,
            solution: None,
            is_continuation: false,
            spans_multiple_pages: false,
            continuation_from_page: None,
            has_image: false,
            image_description: None,
            page_number: 0,
            confidence_score: 1.0,
            topic_id: None,
            difficulty_level: None,
        }
    }

    pub fn options(&self) -> &[String] {
        self.options.as_deref().unwrap_or(&[])
    }

    pub fn answer(&self) -> &str {
        self.answer.as_deref().unwrap_or("")
    }

    /// One-line summary used as rolling context in later prompts.
    pub fn context_line(&self, max_chars: usize) -> String {
        let label = self.question_number.as_deref().unwrap_or("?");
        let head: String = self.question_statement.chars().take(max_chars).collect();
        format!("Q{label}: {head}...")
    }

    /// `A: text` lines for prompts, one per option.
    pub fn lettered_options(&self) -> String {
        self.options()
            .iter()
            .enumerate()
            .filter_map(|(i, opt)| option_letter(i).map(|l| format!("{l}: {opt}")))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Lenient shape of one question as a model writes it.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawQuestion {
    #[serde(default, deserialize_with = "lenient_text")]
    pub question_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_type")]
    pub question_type: Option<QuestionType>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub question_statement: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub options: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub answer: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub solution: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_continuation: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub spans_multiple_pages: bool,
    #[serde(default, deserialize_with = "lenient_page")]
    pub continuation_from_page: Option<usize>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub has_image: bool,
    #[serde(default, deserialize_with = "lenient_text")]
    pub image_description: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub has_diagram: bool,
    #[serde(default, deserialize_with = "lenient_text")]
    pub diagram_description: Option<String>,
    #[serde(default, deserialize_with = "lenient_score")]
    pub confidence_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub topic_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub difficulty_level: Option<String>,
}

impl RawQuestion {
    /// Convert to a record, falling back to `default_type` when the model
    /// omitted the type. Records without a statement are unusable.
    pub fn into_question(self, default_type: Option<QuestionType>) -> Option<ExtractedQuestion> {
        let question_type = self.question_type.or(default_type)?;
        let statement = self.question_statement.filter(|s| !s.trim().is_empty())?;
        let image_description = self
            .image_description
            .or(self.diagram_description)
            .filter(|s| !s.trim().is_empty());

        Some(ExtractedQuestion {
            question_number: self.question_number,
            question_type,
            question_statement: statement,
            options: if question_type.has_options() {
                self.options
            } else {
                None
            },
            answer: self.answer,
            solution: self.solution,
            is_continuation: self.is_continuation,
            spans_multiple_pages: self.spans_multiple_pages,
            continuation_from_page: self.continuation_from_page,
            has_image: self.has_image || self.has_diagram,
            image_description,
            page_number: 0,
            confidence_score: self.confidence_score.unwrap_or(1.0),
            topic_id: self.topic_id,
            difficulty_level: self.difficulty_level,
        })
    }

    /// Parse each element on its own, so a malformed record costs only
    /// itself. Returns the records and how many elements were skipped.
    pub fn from_values(values: Vec<serde_json::Value>) -> (Vec<RawQuestion>, usize) {
        let total = values.len();
        let records: Vec<RawQuestion> = values
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect();
        let skipped = total - records.len();
        (records, skipped)
    }
}

/// Accept a string, a number, or null.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// Like `lenient_text`, with absent values as an empty string.
pub(crate) fn text_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_text(deserializer)?.unwrap_or_default())
}

/// Numbers or numeric strings; anything else (`"high"`) is treated as absent.
fn lenient_score<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_text(deserializer)?
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite()))
}

/// Unknown type names become `None` instead of failing the whole batch.
fn lenient_type<'de, D>(deserializer: D) -> Result<Option<QuestionType>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_text(deserializer)?.and_then(|s| s.parse().ok()))
}

fn lenient_page<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_text(deserializer)?.and_then(|s| s.trim().parse().ok()))
}

/// Accept a list of strings/numbers, or null.
fn lenient_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Array(items)) => Some(
            items
                .into_iter()
                .filter_map(|item| match item {
                    serde_json::Value::String(s) => Some(s),
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    })
}

/// Accept a bool, "true"/"false", or null (→ false).
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Bool(b)) => b,
        Some(serde_json::Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

/// A syllabus topic questions are generated for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    #[serde(deserialize_with = "required_text")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub notes: Option<String>,
    /// Fraction of the syllabus, e.g. 0.05 for 5 %.
    #[serde(default)]
    pub weightage: Option<f64>,
}

impl Topic {
    pub fn weightage_percent(&self) -> f64 {
        self.weightage.unwrap_or(0.02) * 100.0
    }
}

fn required_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_text(deserializer)?.ok_or_else(|| serde::de::Error::custom("expected string or number"))
}

/// A previous-year question used as a style and difficulty reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviousYearQuestion {
    pub question_statement: String,
    #[serde(default)]
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub question_type: Option<QuestionType>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub year: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_round_trip() {
        assert_eq!(letter_index('c'), Some(2));
        assert_eq!(letter_index('F'), None);
        assert_eq!(option_letter(4), Some('E'));
        assert_eq!(option_letter(5), None);
    }

    #[test]
    fn question_type_parses_loosely() {
        assert_eq!("msq".parse::<QuestionType>(), Ok(QuestionType::Msq));
        assert_eq!(" Subjective ".parse::<QuestionType>(), Ok(QuestionType::Subjective));
        assert!("essay".parse::<QuestionType>().is_err());
        let t: QuestionType = serde_json::from_str("\"nat\"").unwrap();
        assert_eq!(t, QuestionType::Nat);
    }

    #[test]
    fn raw_question_tolerates_model_quirks() {
        let raw: RawQuestion = serde_json::from_str(
            r#"{
                "question_number": 17,
                "question_type": "MCQ",
                "question_statement": "Pick one",
                "options": ["1", 2, "3", "4"],
                "has_diagram": "true",
                "diagram_description": "a triangle",
                "is_continuation": null,
                "page_number": 99
            }"#,
        )
        .unwrap();
        let q = raw.into_question(None).unwrap();
        assert_eq!(q.question_number.as_deref(), Some("17"));
        assert_eq!(q.options().len(), 4);
        assert!(q.has_image);
        assert_eq!(q.image_description.as_deref(), Some("a triangle"));
        assert!(!q.is_continuation);
        assert_eq!(q.confidence_score, 1.0);
    }

    #[test]
    fn confidence_accepts_strings_and_ignores_words() {
        let raw: RawQuestion = serde_json::from_str(
            r#"{"question_type": "NAT", "question_statement": "Compute 6*7", "confidence_score": "0.8"}"#,
        )
        .unwrap();
        assert_eq!(raw.confidence_score, Some(0.8));

        let raw: RawQuestion = serde_json::from_str(
            r#"{"question_type": "NAT", "question_statement": "Compute 6*7", "confidence_score": "high"}"#,
        )
        .unwrap();
        let q = raw.into_question(None).unwrap();
        assert_eq!(q.confidence_score, 1.0);
    }

    #[test]
    fn malformed_elements_are_skipped_one_by_one() {
        let values: Vec<serde_json::Value> = serde_json::from_str(
            r#"[{"question_statement": "First"}, "not a record", 7, {"question_statement": "Second"}]"#,
        )
        .unwrap();
        let (records, skipped) = RawQuestion::from_values(values);
        assert_eq!(records.len(), 2);
        assert_eq!(skipped, 2);
    }

    #[test]
    fn raw_question_without_statement_is_dropped() {
        let raw: RawQuestion =
            serde_json::from_str(r#"{"question_type": "NAT", "question_statement": "  "}"#).unwrap();
        assert!(raw.into_question(None).is_none());
    }

    #[test]
    fn nat_options_are_discarded() {
        let raw: RawQuestion = serde_json::from_str(
            r#"{"question_statement": "Compute 2+2", "options": ["4"], "answer": 4}"#,
        )
        .unwrap();
        let q = raw.into_question(Some(QuestionType::Nat)).unwrap();
        assert!(q.options.is_none());
        assert_eq!(q.answer(), "4");
    }

    #[test]
    fn context_line_truncates() {
        let mut q = ExtractedQuestion::new(QuestionType::Nat, "x".repeat(500));
        q.question_number = Some("3".into());
        let line = q.context_line(200);
        assert!(line.starts_with("Q3: "));
        assert_eq!(line.len(), 4 + 200 + 3);
    }

    #[test]
    fn topic_id_accepts_numbers() {
        let t: Topic = serde_json::from_str(r#"{"id": 42, "name": "Optics"}"#).unwrap();
        assert_eq!(t.id, "42");
        assert!((t.weightage_percent() - 2.0).abs() < 1e-9);
    }
}
