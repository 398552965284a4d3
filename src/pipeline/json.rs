//! Pull a JSON value out of free-form model output.
//!
//! Models wrap JSON in prose and markdown fences, and math-heavy questions
//! come back with raw LaTeX backslashes that are not valid JSON escapes.
//! [`extract_json`] isolates the candidate substring; [`parse_model_json`]
//! parses it, repairing the common defects once before giving up.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use thiserror::Error;
use tracing::debug;

/// Why model output could not be turned into the requested type.
#[derive(Debug, Error)]
pub enum JsonError {
    #[error("no JSON array or object found in model output")]
    NoJson,

    #[error("invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("valid regex"));

/// One regex walks the escapes left to right so an already-escaped `\\`
/// pair is never split. Alternatives, in order:
/// 1. `\\`, a valid escaped backslash, kept as is;
/// 2. a LaTeX command whose first letter happens to be a JSON escape
///    (`\frac`, `\theta`, `\nu` …) followed by a non-letter;
/// 3. a backslash before any character JSON does not allow after it.
static ESCAPES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\\\\",
        r"|\\(frac|forall|flat|beta|bar|binom|boxed|bmatrix|begin|bigg|big|bullet|because|bf",
        r"|nu|neq|nabla|neg|newline|not|ni|ne|rho|rightarrow|right|rangle|rceil|rfloor|rm",
        r"|theta|times|tan|tau|textbf|text|therefore|tilde|triangle|top|to",
        r"|underline|upsilon|uparrow)([^A-Za-z]|$)",
        r#"|\\([^"\\/bfnrtu])"#,
    ))
    .expect("valid regex")
});

static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",(\s*[\]}])").expect("valid regex"));

/// Locate the JSON payload in `text`.
///
/// 1. A ```` ```json ```` fenced block wins; its trimmed interior is returned.
/// 2. Otherwise the first `[` or `{` starts the payload, and the last
///    matching closer (`]` for `[`, `}` for `{`) ends it.
/// 3. No opener, or no closer after it, yields `None`.
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(caps) = FENCED_JSON.captures(text) {
        if let Some(inner) = caps.get(1) {
            return Some(inner.as_str().trim());
        }
    }

    let start = text.find(['[', '{'])?;
    let closer = if text[start..].starts_with('[') { ']' } else { '}' };
    let end = text.rfind(closer)?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Double stray backslashes and drop trailing commas.
pub(crate) fn repair_json(raw: &str) -> Cow<'_, str> {
    let escaped = ESCAPES.replace_all(raw, |caps: &Captures<'_>| {
        if let (Some(cmd), Some(tail)) = (caps.get(1), caps.get(2)) {
            format!("\\\\{}{}", cmd.as_str(), tail.as_str())
        } else if let Some(ch) = caps.get(3) {
            format!("\\\\{}", ch.as_str())
        } else {
            caps[0].to_string()
        }
    });
    let fixed = TRAILING_COMMA.replace_all(&escaped, "$1").into_owned();
    if fixed == raw {
        Cow::Borrowed(raw)
    } else {
        Cow::Owned(fixed)
    }
}

/// Extract and deserialize JSON from model output, with one repair attempt.
pub fn parse_model_json<T: DeserializeOwned>(text: &str) -> Result<T, JsonError> {
    let payload = extract_json(text).ok_or(JsonError::NoJson)?;
    match serde_json::from_str(payload) {
        Ok(value) => Ok(value),
        Err(first) => {
            let repaired = repair_json(payload);
            if matches!(repaired, Cow::Borrowed(_)) {
                return Err(first.into());
            }
            debug!("JSON parse failed ({first}); retrying after repair");
            Ok(serde_json::from_str(&repaired)?)
        }
    }
}
