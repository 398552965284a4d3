//! Answer-format validators.
//!
//! Pure functions over an answer string and, for option-based types, the
//! option list. They check *shape* only: whether an MCQ answer names an
//! existing option, not whether it is the right one. Correctness is the
//! business of [`crate::review`].
//!
//! | Type       | Answer format                   | Rule                        |
//! |------------|---------------------------------|-----------------------------|
//! | MCQ        | one letter `A`–`E`              | letter names a present option |
//! | MSQ        | `"A,C"`, 1–4 distinct letters   | every letter names an option |
//! | NAT        | `-?\d+(\.\d+)?`                 | matches                     |
//! | Subjective | free text                       | at least 10 chars trimmed   |

use crate::error::AnswerIssue;
use crate::question::{letter_index, ExtractedQuestion, QuestionType};
use once_cell::sync::Lazy;
use regex::Regex;

/// Shortest acceptable subjective answer, in characters.
pub const MIN_SUBJECTIVE_CHARS: usize = 10;

/// Most letters an MSQ answer may list.
pub const MAX_MSQ_LETTERS: usize = 4;

static RE_NAT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("valid regex"));

/// Validate `answer` against the rule for `question.question_type`.
pub fn validate_answer(question: &ExtractedQuestion) -> Result<(), AnswerIssue> {
    let answer = question.answer();
    match question.question_type {
        QuestionType::Mcq => match question.options.as_deref() {
            Some(options) if !options.is_empty() => validate_mcq_answer(options, answer),
            _ => Err(AnswerIssue::NoOptions("MCQ")),
        },
        QuestionType::Msq => match question.options.as_deref() {
            Some(options) if !options.is_empty() => validate_msq_answer(options, answer),
            _ => Err(AnswerIssue::NoOptions("MSQ")),
        },
        QuestionType::Nat => validate_nat_answer(answer),
        QuestionType::Subjective => validate_subjective_answer(answer),
    }
}

/// Single letter naming one of `options`.
pub fn validate_mcq_answer(options: &[String], answer: &str) -> Result<(), AnswerIssue> {
    let answer = answer.trim();
    if answer.is_empty() {
        return Err(AnswerIssue::Missing);
    }
    if options.is_empty() {
        return Err(AnswerIssue::NoOptions("MCQ"));
    }
    let letter = single_letter(answer).ok_or_else(|| AnswerIssue::NotALetter(answer.to_string()))?;
    check_in_range(letter, options.len())
}

/// Comma-separated letters, 1 to 4 of them, no repeats, each naming an option.
pub fn validate_msq_answer(options: &[String], answer: &str) -> Result<(), AnswerIssue> {
    let answer = answer.trim();
    if answer.is_empty() {
        return Err(AnswerIssue::Missing);
    }
    if options.is_empty() {
        return Err(AnswerIssue::NoOptions("MSQ"));
    }

    let mut seen: Vec<char> = Vec::new();
    for part in answer.split(',') {
        let part = part.trim();
        let letter = single_letter(part).ok_or_else(|| AnswerIssue::NotALetter(part.to_string()))?;
        if seen.contains(&letter) {
            return Err(AnswerIssue::DuplicateLetter(letter));
        }
        seen.push(letter);
    }
    if seen.len() > MAX_MSQ_LETTERS {
        return Err(AnswerIssue::LetterCount(seen.len()));
    }
    seen.into_iter()
        .try_for_each(|letter| check_in_range(letter, options.len()))
}

/// Plain decimal number, optionally negative.
pub fn validate_nat_answer(answer: &str) -> Result<(), AnswerIssue> {
    let answer = answer.trim();
    if answer.is_empty() {
        return Err(AnswerIssue::Missing);
    }
    if RE_NAT.is_match(answer) {
        Ok(())
    } else {
        Err(AnswerIssue::NotNumeric(answer.to_string()))
    }
}

pub fn validate_subjective_answer(answer: &str) -> Result<(), AnswerIssue> {
    let answer = answer.trim();
    if answer.is_empty() {
        return Err(AnswerIssue::Missing);
    }
    if answer.chars().count() < MIN_SUBJECTIVE_CHARS {
        return Err(AnswerIssue::TooShort(MIN_SUBJECTIVE_CHARS));
    }
    Ok(())
}

/// Letters of an MSQ answer, sorted and deduplicated. Tokens that are not a
/// single option letter are dropped.
pub fn msq_letter_set(answer: &str) -> Vec<char> {
    let mut letters: Vec<char> = answer
        .split(',')
        .filter_map(|part| single_letter(part.trim()))
        .collect();
    letters.sort_unstable();
    letters.dedup();
    letters
}

fn single_letter(token: &str) -> Option<char> {
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if letter_index(c).is_some() => Some(c.to_ascii_uppercase()),
        _ => None,
    }
}

fn check_in_range(letter: char, available: usize) -> Result<(), AnswerIssue> {
    match letter_index(letter) {
        Some(i) if i < available => Ok(()),
        Some(i) => Err(AnswerIssue::OutOfRange {
            letter,
            position: i + 1,
            available,
        }),
        None => Err(AnswerIssue::NotALetter(letter.to_string())),
    }
}
