//! Post-processing: deterministic cleanup of parsed question records.
//!
//! Even well-prompted models return records that are *semantically* right
//! but *structurally* noisy:
//!
//! - Windows `\r\n` line endings and zero-width characters from the scan
//! - options that repeat their own label (`"A. 42"`, `"(b) 17"`)
//! - answers written as `"a, c"`, `"Option B"` or `"(C)"`
//! - GFM tables in a statement with the separator row missing
//!
//! None of these are validation failures; fixing them here keeps the
//! validators strict without rejecting good questions over formatting.
//! Every rule is a pure function and independently testable.

use crate::question::{letter_index, option_letter, ExtractedQuestion, QuestionType};
use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every cleanup rule to one record in place.
///
/// Rules (applied in order):
/// 1. Clean free text (statement, solution, image description, answer)
/// 2. Strip option labels when every option carries one
/// 3. Drop empty options
/// 4. Normalise MCQ/MSQ answer letters
pub fn clean_question(q: &mut ExtractedQuestion) {
    q.question_statement = clean_text(&q.question_statement);
    q.solution = q.solution.as_deref().map(clean_text).filter(|s| !s.is_empty());
    q.image_description = q
        .image_description
        .as_deref()
        .map(clean_text)
        .filter(|s| !s.is_empty());
    q.answer = q.answer.as_deref().map(clean_text).filter(|s| !s.is_empty());

    if let Some(options) = q.options.take() {
        let options: Vec<String> = strip_option_labels(&options)
            .into_iter()
            .map(|o| clean_text(&o))
            .filter(|o| !o.is_empty())
            .collect();
        q.options = if options.is_empty() { None } else { Some(options) };
    }

    if q.question_type.has_options() {
        if let Some(ref answer) = q.answer {
            let normalised = normalise_answer_letters(answer, q.question_type, q.options());
            q.answer = Some(normalised);
        }
    }
}

/// Line-ending, invisible-character and whitespace cleanup for free text.
pub fn clean_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = fix_broken_tables(&s);
    s.trim().to_string()
}

// ── Rule 1a: Normalise line endings ──────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 1b: Strip invisible Unicode ─────────────────────────────────────────

/// Zero-width spaces, joiners, BOM and soft hyphens survive OCR-style
/// transcription and break exact-match de-duplication.
fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| {
            !matches!(
                c,
                '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}'
            )
        })
        .collect()
}

// ── Rule 1c: Trim trailing whitespace per line ───────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 1d: Collapse excessive blank lines ──────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

// ── Rule 1e: Fix broken GFM tables ───────────────────────────────────────────

/// Tables transcribed into a statement sometimes lack the separator row after
/// the header; insert one so renderers show a table.
fn fix_broken_tables(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let mut result: Vec<String> = Vec::with_capacity(lines.len() + 2);
    let mut prev_is_table = false;

    for (i, line) in lines.iter().enumerate() {
        let starts_table = is_table_row(line) && !prev_is_table && !is_separator_row(line);
        result.push((*line).to_string());
        if starts_table {
            if let Some(next) = lines.get(i + 1) {
                if is_table_row(next) && !is_separator_row(next) {
                    let cols = line.trim().trim_matches('|').split('|').count();
                    let sep = format!("|{}", " --- |".repeat(cols));
                    result.push(sep);
                }
            }
        }
        prev_is_table = is_table_row(line);
    }
    result.join("\n")
}

fn is_table_row(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|') && t.ends_with('|') && t.len() > 1
}

static RE_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\|(\s*:?-{3,}:?\s*\|)+$").expect("valid regex"));

fn is_separator_row(line: &str) -> bool {
    RE_SEPARATOR.is_match(line.trim())
}

// ── Rule 2: Strip option labels ──────────────────────────────────────────────

static RE_OPTION_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:\(([A-Ea-e])\)|([A-Ea-e])[.):])\s*").expect("valid regex")
});

/// `["A. 3", "B. 4"]` → `["3", "4"]`. Labels are only removed when every
/// option has one and they run A, B, C … in order, so an option that merely
/// starts with "a)" is left alone.
fn strip_option_labels(options: &[String]) -> Vec<String> {
    let labelled = options.iter().enumerate().all(|(i, opt)| {
        RE_OPTION_LABEL
            .captures(opt)
            .and_then(|c| c.get(1).or_else(|| c.get(2)))
            .and_then(|m| m.as_str().chars().next())
            .and_then(letter_index)
            == Some(i)
    });
    if !labelled || options.is_empty() {
        return options.to_vec();
    }
    options
        .iter()
        .map(|opt| RE_OPTION_LABEL.replace(opt, "").into_owned())
        .collect()
}

// ── Rule 4: Normalise answer letters ─────────────────────────────────────────

static RE_ANSWER_NOISE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:options?|and)\b|[()&.;/]").expect("valid regex"));

/// `"a, c"` → `"A,C"`, `"Option (B)"` → `"B"`. For MCQ an answer that repeats
/// one option's text verbatim becomes that option's letter. Anything else is
/// returned unchanged for the validators to judge.
pub fn normalise_answer_letters(answer: &str, qtype: QuestionType, options: &[String]) -> String {
    let trimmed = answer.trim();

    if qtype == QuestionType::Mcq {
        if let Some(i) = options.iter().position(|o| o.trim() == trimmed) {
            if trimmed.chars().count() > 1 || letter_index_of(trimmed).is_none() {
                if let Some(letter) = option_letter(i) {
                    return letter.to_string();
                }
            }
        }
    }

    let spaced = RE_ANSWER_NOISE.replace_all(trimmed, " ");
    let tokens: Vec<&str> = spaced
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        return trimmed.to_string();
    }

    let letters: Option<Vec<char>> = tokens
        .iter()
        .map(|t| letter_index_of(t).and_then(option_letter))
        .collect();
    match letters {
        Some(letters) => letters
            .iter()
            .map(char::to_string)
            .collect::<Vec<_>>()
            .join(","),
        None => trimmed.to_string(),
    }
}

fn letter_index_of(token: &str) -> Option<usize> {
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => letter_index(c),
        _ => None,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
