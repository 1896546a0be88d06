//! Response Normalizer Service
//!
//! Turns generator text into a [`GenerationResult`]. Never fails: text that
//! cannot be read as a JSON object yields a degraded result carrying the raw
//! text verbatim.
//!
//! Extraction order (first success wins):
//! 1. the first fenced block labeled `json`
//! 2. the first fenced block with any label
//! 3. the whole text
//!
//! Each step looks for its own opening fence and runs to the first fence
//! after it.

use mixplan_common::models::{
    ChannelConfig, CompressionSettings, EqSettings, FxSettings, ParseStatus,
};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::models::GenerationResult;

const FENCE: &str = "```";

/// One fenced block found in generator text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FencedBlock<'a> {
    pub label: &'a str,
    pub body: &'a str,
}

/// Block opened by the fence at byte offset `open`, closed by the first fence after it
fn block_at(text: &str, open: usize) -> Option<FencedBlock<'_>> {
    let after_fence = open + FENCE.len();
    let rest = &text[after_fence..];
    let label_len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+')))
        .unwrap_or(rest.len());
    let body_start = after_fence + label_len;
    let close = text[body_start..].find(FENCE)?;
    Some(FencedBlock {
        label: &text[after_fence..body_start],
        body: &text[body_start..body_start + close],
    })
}

/// First block whose opening fence carries `label` (ASCII case-insensitive)
///
/// Fences are not paired up front, so a stray fence earlier in the text
/// cannot swallow the labeled opening.
pub fn first_labeled_block<'a>(text: &'a str, label: &str) -> Option<FencedBlock<'a>> {
    text.match_indices(FENCE)
        .map(|(open, _)| open)
        .find(|&open| {
            let after_fence = &text[open + FENCE.len()..];
            after_fence.len() >= label.len()
                && after_fence.is_char_boundary(label.len())
                && after_fence[..label.len()].eq_ignore_ascii_case(label)
                && !after_fence[label.len()..]
                    .starts_with(|c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+'))
        })
        .and_then(|open| block_at(text, open))
}

/// Block opened by the first fence in the text, whatever its label
pub fn first_block(text: &str) -> Option<FencedBlock<'_>> {
    text.find(FENCE).and_then(|open| block_at(text, open))
}

/// Generator response normalizer
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseNormalizer;

impl ResponseNormalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, raw: &str) -> GenerationResult {
        match self.extract_object(raw) {
            Ok(object) => structured(&object),
            Err(error) => {
                warn!(error = %error, chars = raw.len(), "Generator response degraded to raw text");
                degraded(raw, &error)
            }
        }
    }

    /// First JSON object found by the extraction order above
    ///
    /// On failure returns the error from the most specific candidate tried.
    pub fn extract_object(&self, raw: &str) -> Result<Map<String, Value>, String> {
        let mut attempts: Vec<(&str, &str)> = Vec::with_capacity(3);
        if let Some(block) = first_labeled_block(raw, "json") {
            attempts.push(("json block", block.body));
        }
        if let Some(block) = first_block(raw) {
            attempts.push(("fenced block", block.body));
        }
        attempts.push(("raw text", raw));

        let mut first_error: Option<String> = None;
        for (source, candidate) in attempts {
            match parse_object(candidate) {
                Ok(object) => {
                    debug!(source, "Generator response parsed");
                    return Ok(object);
                }
                Err(e) => {
                    debug!(source, error = %e, "Generator response candidate rejected");
                    first_error.get_or_insert(e);
                }
            }
        }

        Err(first_error.unwrap_or_else(|| "empty response".to_string()))
    }
}

fn parse_object(candidate: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, found {}", json_kind(&other))),
        Err(e) => Err(e.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Missing keys become empty values
fn structured(object: &Map<String, Value>) -> GenerationResult {
    GenerationResult {
        channel_config: ChannelConfig::from_value(object.get("channel_config")),
        eq_settings: EqSettings::from_value(object.get("eq_settings")),
        compression_settings: CompressionSettings::from_value(object.get("compression_settings")),
        fx_settings: FxSettings::from_value(object.get("fx_settings")),
        instructions: text_field(object.get("instructions")),
        troubleshooting_tips: text_field(object.get("troubleshooting_tips")),
        parse_status: ParseStatus::Structured,
    }
}

/// Prose fields: strings as-is, lists of steps one per line
pub(crate) fn text_field(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn degraded(raw: &str, error: &str) -> GenerationResult {
    GenerationResult {
        channel_config: ChannelConfig::default(),
        eq_settings: EqSettings::default(),
        compression_settings: CompressionSettings::default(),
        fx_settings: FxSettings::default(),
        instructions: raw.to_string(),
        troubleshooting_tips: format!(
            "Could not read structured settings from the generator response ({}). \
             The full response is shown in the instructions.",
            error
        ),
        parse_status: ParseStatus::Degraded,
    }
}
