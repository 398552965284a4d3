//! Pass 1: page structure analysis.
//!
//! One call per page asks only for layout facts: a description shared by
//! several questions, whether a question runs off the page, and the visible
//! question labels. Pass 2 uses the shared description; the rest is logged
//! and reported.

use crate::backend::{InlineImage, ModelRequest, SamplingParams};
use crate::error::ExamError;
use crate::pipeline::call::ModelClient;
use crate::pipeline::json::parse_model_json;
use crate::prompts::STRUCTURE_PROMPT;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

/// Layout facts for one page. The default means "nothing noteworthy".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageStructure {
    #[serde(default, deserialize_with = "non_blank")]
    pub shared_description: Option<String>,
    #[serde(default, deserialize_with = "bool_or_null")]
    pub has_multi_page_question: bool,
    #[serde(default, deserialize_with = "labels")]
    pub question_numbers: Vec<String>,
}

fn non_blank<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let s = Option::<String>::deserialize(d)?;
    Ok(s.filter(|s| !s.trim().is_empty() && !s.trim().eq_ignore_ascii_case("null")))
}

fn bool_or_null<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(d)?.unwrap_or(false))
}

/// Labels come back as strings or bare numbers.
fn labels<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    let values = Option::<Vec<serde_json::Value>>::deserialize(d)?.unwrap_or_default();
    Ok(values
        .into_iter()
        .filter_map(|v| match v {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect())
}

/// Interpret pass-1 model output. Anything unusable is the default structure.
pub fn parse_structure(text: &str, page_number: usize) -> PageStructure {
    if text.trim().is_empty() {
        debug!("Page {}: empty structure response", page_number);
        return PageStructure::default();
    }
    match parse_model_json::<PageStructure>(text) {
        Ok(structure) => structure,
        Err(e) => {
            warn!("Page {}: unreadable structure response: {}", page_number, e);
            PageStructure::default()
        }
    }
}

/// Run pass 1 on one page.
///
/// # Errors
/// Model-call failures ([`ExamError::PoolExhausted`], [`ExamError::Backend`])
/// propagate; malformed output does not.
pub async fn analyze_page(
    client: &ModelClient,
    page_number: usize,
    image: &InlineImage,
    max_output_tokens: usize,
) -> Result<PageStructure, ExamError> {
    let request = ModelRequest::text(STRUCTURE_PROMPT, SamplingParams::PRECISE)
        .with_image(image.clone())
        .max_output_tokens(max_output_tokens);
    let operation = format!("page structure analysis (page {page_number})");

    let text = client.call(&operation, &request).await?;
    let structure = parse_structure(&text, page_number);
    debug!(
        "Page {}: shared description: {}, multi-page: {}, labels: {:?}",
        page_number,
        structure.shared_description.is_some(),
        structure.has_multi_page_question,
        structure.question_numbers
    );
    Ok(structure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_fields() {
        let s = parse_structure(
            r#"```json
{"sharedDescription": "Passage for Q17-18", "hasMultiPageQuestion": true, "questionNumbers": [17, "18"]}
```"#,
            3,
        );
        assert_eq!(s.shared_description.as_deref(), Some("Passage for Q17-18"));
        assert!(s.has_multi_page_question);
        assert_eq!(s.question_numbers, vec!["17", "18"]);
    }

    #[test]
    fn null_and_blank_descriptions_are_none() {
        let s = parse_structure(r#"{"sharedDescription": null, "hasMultiPageQuestion": null}"#, 1);
        assert_eq!(s, PageStructure::default());
        let s = parse_structure(r#"{"sharedDescription": "  "}"#, 1);
        assert!(s.shared_description.is_none());
    }

    #[test]
    fn garbage_is_default() {
        assert_eq!(parse_structure("I could not read the page.", 2), PageStructure::default());
        assert_eq!(parse_structure("", 2), PageStructure::default());
        assert_eq!(parse_structure("{broken", 2), PageStructure::default());
    }
}
