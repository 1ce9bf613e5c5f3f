//! Tagged-block extraction from LLM responses.
//!
//! Templates ask the model to wrap its structured answer in a
//! `<results>...</results>` block. Everything around the block (preamble,
//! thinking, trailing chatter) is ignored. Element text is unescaped,
//! dedented and trimmed.

use crate::models::{CotTriple, CriteriaError, PipelineError, Result};
use regex::Regex;
use std::sync::LazyLock;

static RESULTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<results>.*?</results>").expect("valid results pattern"));

/// Return the first `<results>...</results>` block, tags included.
pub fn extract_results_block(text: &str) -> Option<&str> {
    RESULTS_RE.find(text).map(|m| m.as_str())
}

/// Return the cleaned text of the first `<tag>...</tag>` element in `block`.
///
/// Nested elements are returned verbatim as part of the text, so
/// `extract_tag(block, "content")` can be fed back into `extract_tag`.
pub fn extract_tag(block: &str, tag: &str) -> Option<String> {
    raw_tag(block, tag).map(clean_text)
}

fn raw_tag<'a>(block: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = block.find(&open)? + open.len();
    let len = block[start..].find(&close)?;
    Some(&block[start..start + len])
}

/// Unescape XML entities, then dedent and trim.
pub fn clean_text(raw: &str) -> String {
    let unescaped = quick_xml::escape::unescape(raw)
        .map(|text| text.into_owned())
        .unwrap_or_else(|_| raw.to_string());
    dedent(&unescaped).trim().to_string()
}

/// Remove the whitespace prefix common to every non-blank line.
fn dedent(text: &str) -> String {
    let indent = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);

    text.lines()
        .map(|line| match line.get(..indent) {
            Some(prefix) if prefix.trim().is_empty() => &line[indent..],
            _ => line.trim_start(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a question / chain of reasoning / answer triple out of a response.
///
/// The chain of reasoning and answer are required and must be non-empty;
/// the question is optional because voiced content only rewrites the other two.
pub fn parse_cot_triple(response: &str) -> Result<CotTriple> {
    let block = extract_results_block(response).ok_or(CriteriaError::MissingResults)?;
    parse_cot_fields(block)
}

/// Parse chain of reasoning and answer (and optional question) from a block.
pub fn parse_cot_fields(block: &str) -> Result<CotTriple> {
    let chain_of_reasoning = required_tag(block, "chain_of_reasoning")?;
    let answer = required_tag(block, "answer")?;
    let question = extract_tag(block, "question").unwrap_or_default();

    Ok(CotTriple {
        question,
        chain_of_reasoning,
        answer,
    })
}

/// Parse voiced reasoning and answer from the `<content>` element.
pub fn parse_voiced_content(response: &str) -> Result<CotTriple> {
    let content = raw_tag(response, "content").ok_or_else(|| PipelineError::MissingTag {
        tag: "content".to_string(),
    })?;
    parse_cot_fields(content)
}

/// Extract a tag that must be present and non-empty.
pub fn required_tag(block: &str, tag: &str) -> Result<String> {
    let value = extract_tag(block, tag).ok_or_else(|| PipelineError::MissingTag {
        tag: tag.to_string(),
    })?;
    if value.is_empty() {
        return Err(PipelineError::ParseError(format!("<{tag}> is empty")));
    }
    Ok(value)
}
