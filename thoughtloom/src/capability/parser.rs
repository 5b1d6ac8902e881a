//! Turning a raw response into field updates.
//!
//! A parser never sees the thought being built, only the prompt context and the response; it
//! returns the fields to merge. Returning `Err(CapabilityError::Malformed)` marks the sample invalid.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::capability::RawResponse;
use crate::error::CapabilityError;
use crate::state::{fields, State};

/// Deterministic merge of a [`RawResponse`] into a State.
pub trait ResponseParser: Send + Sync {
    /// Field updates for the new thought derived from `context`.
    fn parse(&self, context: &State, response: &RawResponse) -> Result<State, CapabilityError>;
}

/// Writes the trimmed response text into one field.
#[derive(Debug, Clone)]
pub struct TextParser {
    field: String,
}

impl TextParser {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }
}

impl Default for TextParser {
    fn default() -> Self {
        Self::new(fields::CURRENT)
    }
}

impl ResponseParser for TextParser {
    fn parse(&self, _context: &State, response: &RawResponse) -> Result<State, CapabilityError> {
        let text = response.text.trim();
        if text.is_empty() {
            return Err(CapabilityError::Malformed("empty response".into()));
        }
        Ok(State::new().with(self.field.clone(), text))
    }
}

/// Extracts a bracketed label list, e.g. `Final answer: [Job information, Job table]`.
///
/// When a marker is configured, only text after its last occurrence is searched. Items may be
/// separated by ASCII or full-width commas and by `、`; quotes around items are stripped. A list
/// whose only item is `none` / `无` (or which is empty) is the empty list.
#[derive(Debug, Clone, Default)]
pub struct LabelListParser {
    marker: Option<String>,
}

fn bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\[【]([^\[\]【】]*)[\]】]").expect("static regex"))
}

fn separator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[,，、;；]").expect("static regex"))
}

impl LabelListParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only search after the last occurrence of `marker` (builder).
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    /// Items of the first bracketed list in `text`, with its start offset.
    fn extract(text: &str) -> Option<(usize, Vec<String>)> {
        let caps = bracket_re().captures(text)?;
        let whole = caps.get(0)?;
        let inner = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let items: Vec<String> = separator_re()
            .split(inner)
            .map(|s| {
                s.trim()
                    .trim_matches(|c| matches!(c, '"' | '\'' | '“' | '”' | '‘' | '’'))
                    .trim()
                    .to_string()
            })
            .filter(|s| !s.is_empty())
            .collect();
        let items = match items.as_slice() {
            [only] if is_none_label(only) => Vec::new(),
            _ => items,
        };
        Some((whole.start(), items))
    }
}

fn is_none_label(s: &str) -> bool {
    s.eq_ignore_ascii_case("none") || s == "无"
}

impl ResponseParser for LabelListParser {
    fn parse(&self, _context: &State, response: &RawResponse) -> Result<State, CapabilityError> {
        let text = response.text.trim();
        let offset = match &self.marker {
            Some(m) => text.rfind(m.as_str()).map(|i| i + m.len()).unwrap_or(0),
            None => 0,
        };
        let tail = &text[offset..];
        let (start, items) = Self::extract(tail)
            .ok_or_else(|| CapabilityError::Malformed("no bracketed label list".into()))?;
        let rationale = text[..offset + start].trim();
        Ok(State::new()
            .with(fields::CANDIDATES, items)
            .with(fields::RATIONALE, rationale)
            .with(fields::CURRENT, text))
    }
}

/// Merges the top-level fields of a JSON object response (optionally in a ```json fence).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

fn strip_fence(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

impl ResponseParser for JsonParser {
    fn parse(&self, _context: &State, response: &RawResponse) -> Result<State, CapabilityError> {
        let value: Value = serde_json::from_str(strip_fence(&response.text))
            .map_err(|e| CapabilityError::Malformed(format!("invalid JSON: {}", e)))?;
        State::from_value(value)
            .ok_or_else(|| CapabilityError::Malformed("expected a JSON object".into()))
    }
}
