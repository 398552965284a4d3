//! Prompt text for every model call the crate makes.
//!
//! All prompt wording lives here so a change to the instructions never
//! touches retry, parsing or validation code, and so tests can inspect the
//! exact text a stage will send.
//!
//! Each prompt ends by pinning the JSON shape its parser expects. Field names
//! in those shapes are part of the parsing contract (see
//! [`crate::pipeline::structure`], [`crate::pipeline::extract`],
//! [`crate::review`] and [`crate::generate`]).

use crate::generate::GenerationRequest;
use crate::question::{ExtractedQuestion, PreviousYearQuestion, QuestionType};
use std::fmt::Write as _;

/// Pass 1: find shared descriptions, page-spanning questions and labels.
pub const STRUCTURE_PROMPT: &str = r#"Analyze this exam page to identify structural elements. Focus on:

1. SHARED DESCRIPTIONS: text such as "Description for the following X questions:", "For questions X-Y:" or "Consider the following for next questions:"
2. MULTI-PAGE QUESTIONS: whether any question starts on this page but does not finish on it
3. QUESTION NUMBERS: every question number visible on this page

Return JSON with this structure:
{
  "sharedDescription": "Full text of any shared description found",
  "hasMultiPageQuestion": true,
  "questionNumbers": ["17", "18", "19"]
}

If no shared description exists, set sharedDescription to null.
Return ONLY the JSON object."#;

const LATEX_ESCAPING: &str =
    "CRITICAL: Return ONLY valid JSON. Use double backslashes (\\\\) for ALL LaTeX commands.";

/// Pass 2 prompt for one page.
///
/// `recent_context` is the already-rendered rolling window of prior questions
/// (one `Q<num>: <head>...` line each); empty means this is the first page.
pub fn extraction_prompt(
    page_number: usize,
    shared_description: Option<&str>,
    recent_context: &str,
) -> String {
    let shared = match shared_description {
        Some(desc) => format!("SHARED DESCRIPTION FOR THIS PAGE: \"{desc}\""),
        None => "No shared description found".to_string(),
    };
    let context = if recent_context.is_empty() {
        "None (this is the first page with questions)"
    } else {
        recent_context
    };

    format!(
        r#"You are an EXPERT question extraction system. Extract ALL questions on this page with ABSOLUTE PRECISION.

EXTRACTION RULES:
1. Extract questions EXACTLY as they appear: preserve every word and symbol
2. Convert math to LaTeX: $...$ for inline, $$...$$ for display math
3. If a description is shared by several questions, include the FULL description in EACH of those question statements
4. Describe diagrams, charts, tables and figures in text inside the question statement; NEVER skip a question because it has a diagram
5. Split multi-part questions into separate records numbered N(A), N(B), N(C) ...
6. If a question starts on this page but is cut off, extract what is visible and set spans_multiple_pages to true
7. If the top of the page finishes a question from the previous page, set is_continuation to true
8. question_type is one of MCQ (single correct), MSQ (multiple correct), NAT (numerical answer) or Subjective

SHARED DESCRIPTION HANDLING:
{shared}

CONTEXT FROM PREVIOUS QUESTIONS:
{context}

RESPONSE FORMAT (JSON array, one object per question):
[
  {{
    "question_number": "17",
    "question_type": "MCQ",
    "question_statement": "Full shared description + question statement + diagram description",
    "options": ["Option A", "Option B", "Option C", "Option D"],
    "has_diagram": false,
    "diagram_description": null,
    "spans_multiple_pages": false,
    "is_continuation": false,
    "page_number": {page_number}
  }}
]

Use "options": null for NAT and Subjective questions.
Return [] if the page contains no questions.
{LATEX_ESCAPING}"#
    )
}

/// Ask for an independent solution. The question's own answer is never shown.
pub fn solve_prompt(question: &ExtractedQuestion) -> String {
    let mut body = format!(
        "Statement: {}\nType: {}\n",
        question.question_statement, question.question_type
    );
    if question.question_type.has_options() && !question.options().is_empty() {
        let _ = writeln!(body, "Options:\n{}", question.lettered_options());
    }

    format!(
        r#"You are an expert in competitive exams. Solve this question completely and independently.

QUESTION TO SOLVE:
{body}
TASK:
1. Solve the question step by step
2. Determine the correct answer
3. For MCQ give exactly one option letter; for MSQ give every correct letter, comma separated (e.g. "A,C")
4. For NAT give only the number, without units
5. For Subjective give a concise but complete answer

Expected JSON format:
{{
  "correctAnswer": "A" or "A,C" or "12.5" or "Descriptive answer",
  "detailedSolution": "Complete step-by-step solution",
  "reasoning": "Brief explanation of why this is the correct answer"
}}

{LATEX_ESCAPING}"#
    )
}

/// Ask for a repaired question consistent with the solved answer.
///
/// `target_letter` is set for MCQ: the solved answer must be moved to that
/// option position and the answer field must be that letter.
pub fn fix_prompt(
    question: &ExtractedQuestion,
    solved_answer: &str,
    solved_solution: &str,
    issues: &[String],
    target_letter: Option<char>,
) -> String {
    let qtype = question.question_type;
    let current_options = if question.options().is_empty() {
        "None".to_string()
    } else {
        question.lettered_options()
    };
    let issue_list = issues
        .iter()
        .map(|i| format!("- {i}"))
        .collect::<Vec<_>>()
        .join("\n");

    let (requirements, answer_field, options_field) = match qtype {
        QuestionType::Mcq => {
            let letter = target_letter.unwrap_or('A');
            (
                format!(
                    "1. Produce exactly 4 options with exactly ONE correct option\n\
                     2. The correct option (the solved answer: {solved_answer}) MUST be placed at position {letter}\n\
                     3. The other three options must be plausible but clearly incorrect\n\
                     4. Keep all options of similar length and style"
                ),
                letter.to_string(),
                r#"["Option A", "Option B", "Option C", "Option D"]"#,
            )
        }
        QuestionType::Msq => (
            format!(
                "1. Produce 4 options\n\
                 2. The correct options are exactly {solved_answer}; keep them at those letters\n\
                 3. Every other option must be clearly incorrect"
            ),
            solved_answer.to_string(),
            r#"["Option A", "Option B", "Option C", "Option D"]"#,
        ),
        QuestionType::Nat => (
            format!(
                "1. The question must lead to the numerical answer {solved_answer}\n\
                 2. Adjust the statement only if it is flawed\n\
                 3. No options for NAT"
            ),
            solved_answer.to_string(),
            "null",
        ),
        QuestionType::Subjective => (
            "1. The question must require a descriptive answer\n\
             2. Give a full model answer of at least a few sentences\n\
             3. No options for Subjective"
                .to_string(),
            solved_answer.to_string(),
            "null",
        ),
    };

    format!(
        r#"You are an expert question fixer for competitive exams. Fix this question so that it is internally consistent.

ORIGINAL QUESTION:
Statement: {statement}
Type: {qtype}
Current Options:
{current_options}
Current Answer: {current_answer}
Current Solution: {current_solution}

ISSUES FOUND:
{issue_list}

CORRECT SOLUTION:
Correct Answer: {solved_answer}
Detailed Solution: {solved_solution}

FIXING REQUIREMENTS:
{requirements}

QUALITY STANDARDS:
1. The statement must be clear and unambiguous
2. Use LaTeX for math: $inline$ or $$display$$
3. The solution must be detailed, step by step, and end at the answer

Expected JSON format:
{{
  "question_statement": "Fixed statement",
  "question_type": "{qtype}",
  "options": {options_field},
  "answer": "{answer_field}",
  "solution": "Complete detailed solution"
}}

{LATEX_ESCAPING}"#,
        statement = question.question_statement,
        current_answer = question.answer.as_deref().unwrap_or("None"),
        current_solution = question.solution.as_deref().unwrap_or("None"),
    )
}

fn type_instructions(qtype: QuestionType) -> &'static str {
    match qtype {
        QuestionType::Mcq => "Generate Multiple Choice Questions with exactly 4 options (A, B, C, D). Exactly ONE option is correct. Spread the correct letter evenly over A, B, C and D across questions.",
        QuestionType::Msq => "Generate Multiple Select Questions with 4-5 options. One or more options may be correct.",
        QuestionType::Nat => "Generate Numerical Answer Type questions whose answer is a single number (integer or decimal). No options.",
        QuestionType::Subjective => "Generate descriptive questions that require explanations, proofs or derivations. No options.",
    }
}

fn pyq_block(pyqs: &[PreviousYearQuestion]) -> String {
    pyqs.iter()
        .enumerate()
        .map(|(i, pyq)| {
            let mut line = format!("PYQ {}: {}", i + 1, pyq.question_statement);
            if let Some(ref opts) = pyq.options {
                let _ = write!(line, "\nOptions: {}", opts.join(", "));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Batch generation prompt for one topic.
pub fn generation_prompt(request: &GenerationRequest<'_>, pyq_sample: usize, recent_window: usize) -> String {
    let topic = request.topic;
    let qtype = request.question_type;

    let pyqs = &request.pyqs[..request.pyqs.len().min(pyq_sample)];
    let pyq_context = if pyqs.is_empty() {
        "No PYQs available for this topic".to_string()
    } else {
        pyq_block(pyqs)
    };

    let recent_start = request.recent.len().saturating_sub(recent_window);
    let recent_context = if request.recent.is_empty() {
        "No recent questions".to_string()
    } else {
        request.recent[recent_start..]
            .iter()
            .enumerate()
            .map(|(i, q)| {
                let head: String = q.chars().take(200).collect();
                format!("Recent {}: {head}...", i + 1)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    let existing = request.existing_context.trim();
    let existing_count = if existing.is_empty() {
        0
    } else {
        existing.split("\n\n").count()
    };
    let existing_context = if existing.is_empty() {
        "No existing questions generated yet for this topic"
    } else {
        existing
    };

    let options_field = if qtype.has_options() {
        r#"["Option A", "Option B", "Option C", "Option D"]"#
    } else {
        "null"
    };

    format!(
        r#"You are an expert question generator for the {exam} - {course} entrance examination.

TOPIC: {topic_name}
WEIGHTAGE: {weightage:.1}% of total syllabus
QUESTION TYPE: {qtype}

TOPIC NOTES (use these concepts in solutions):
{notes}

PREVIOUS YEAR QUESTIONS FROM THIS TOPIC (reference for style and difficulty only, never copy):
{pyq_context}

EXISTING QUESTIONS ALREADY GENERATED FOR THIS TOPIC ({existing_count} questions):
{existing_context}

RECENTLY GENERATED QUESTIONS (do not repeat):
{recent_context}

INSTRUCTIONS:
1. {type_instructions}
2. Match or exceed the difficulty of the PYQs
3. DO NOT repeat or paraphrase any existing or recent question; use new scenarios and numerical values
4. For MCQ the answer is exactly one letter among A, B, C, D and that option is correct
5. For MSQ the answer is a comma-separated list of letters ("A", "B,C", "A,C,D"), each naming an option that is present
6. For NAT the answer is a plain number
7. Use LaTeX for math: $ for inline, $$ for display
8. Keep expressions in standard form (π/3, not 1.047...)

Generate {count} {qtype} question(s).

RESPONSE FORMAT (JSON only):
[
  {{
    "question_statement": "Complete question with LaTeX math",
    "question_type": "{qtype}",
    "options": {options_field},
    "answer": "Correct answer",
    "solution": "Detailed step-by-step solution using the topic notes",
    "topic_id": "{topic_id}",
    "difficulty_level": "Medium"
  }}
]

{LATEX_ESCAPING}"#,
        exam = request.exam_name,
        course = request.course_name,
        topic_name = topic.name,
        weightage = topic.weightage_percent(),
        notes = topic.notes.as_deref().unwrap_or("No specific notes available"),
        type_instructions = type_instructions(qtype),
        count = request.count,
        topic_id = topic.id,
    )
}

/// Ask for answers and solutions to a batch of previous-year questions.
pub fn pyq_solution_prompt(pyqs: &[PreviousYearQuestion], topic_notes: &str) -> String {
    let listing = pyqs
        .iter()
        .enumerate()
        .map(|(i, pyq)| {
            let mut block = format!("PYQ {}:\nQuestion: {}\n", i + 1, pyq.question_statement);
            if let Some(ref opts) = pyq.options {
                let _ = writeln!(block, "Options: {}", opts.join(", "));
            }
            if let Some(qtype) = pyq.question_type {
                let _ = writeln!(block, "Type: {qtype}");
            }
            let _ = write!(block, "Year: {}", pyq.year.as_deref().unwrap_or("Unknown"));
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    let notes = if topic_notes.trim().is_empty() {
        "Use standard concepts for this topic"
    } else {
        topic_notes
    };

    format!(
        r#"You are an expert solution writer for competitive exam questions.

TOPIC NOTES (base your solutions on these concepts):
{notes}

PREVIOUS YEAR QUESTIONS TO SOLVE:
{listing}

INSTRUCTIONS:
1. Give the correct answer and a detailed solution for EACH question, in the same order
2. For MCQ/MSQ identify the correct option letter(s) and explain why the others are wrong
3. For NAT give the exact numerical answer
4. For Subjective give a complete step-by-step answer
5. Use LaTeX for math: $ for inline, $$ for display

RESPONSE FORMAT (JSON only, one object per question):
[
  {{
    "answer": "A" or "A,C" or "42" or "key result",
    "solution": "Detailed step-by-step solution"
  }}
]

{LATEX_ESCAPING}"#
    )
}
